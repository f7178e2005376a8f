//! PSM datasets, read-only views and cross-validation folds

use crate::ml::matrix::Matrix;
use crate::{Error, Result};
use fnv::FnvHashMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Identification metadata of a single peptide-spectrum match
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Psm {
    /// Spectrum identifier, unique within a file
    pub spec_id: String,
    /// Candidate peptide sequence
    pub peptide: String,
    /// Index into [`Dataset::filenames`]
    pub file_id: usize,
    /// Explicit grouping key; rows sharing it are never split across folds
    pub group: Option<String>,
    pub decoy: bool,
}

/// Which key keeps related PSMs together in one fold
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// All candidates of a spectrum share a fold
    #[default]
    Spectrum,
    /// All PSMs of a peptide sequence share a fold
    Peptide,
    /// The explicit `group` column, or the spectrum if it is missing
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum GroupKey<'a> {
    Spectrum(usize, &'a str),
    Peptide(&'a str),
    Group(&'a str),
}

/// An immutable collection of PSMs and their feature vectors
#[derive(Clone, Debug)]
pub struct Dataset {
    feature_names: Vec<String>,
    filenames: Vec<String>,
    psms: Vec<Psm>,
    features: Matrix,
}

impl Dataset {
    /// Build a dataset from parsed records. Every feature vector must have
    /// one finite value per feature name
    pub fn new(
        feature_names: Vec<String>,
        filenames: Vec<String>,
        records: Vec<(Psm, Vec<f64>)>,
    ) -> Result<Self> {
        if feature_names.is_empty() {
            return Err(Error::Configuration("dataset has no features".into()));
        }
        let cols = feature_names.len();
        let mut psms = Vec::with_capacity(records.len());
        let mut data = Vec::with_capacity(records.len() * cols);

        for (psm, features) in records {
            if features.len() != cols {
                return Err(Error::Configuration(format!(
                    "PSM `{}` has {} features, expected {}",
                    psm.spec_id,
                    features.len(),
                    cols
                )));
            }
            if let Some(ix) = features.iter().position(|f| !f.is_finite()) {
                return Err(Error::Configuration(format!(
                    "PSM `{}` has a non-finite value for feature `{}`",
                    psm.spec_id, feature_names[ix]
                )));
            }
            if psm.file_id >= filenames.len() {
                return Err(Error::Configuration(format!(
                    "PSM `{}` references unknown file #{}",
                    psm.spec_id, psm.file_id
                )));
            }
            data.extend(features);
            psms.push(psm);
        }

        let rows = psms.len();
        Ok(Dataset {
            feature_names,
            filenames,
            psms,
            features: Matrix::new(data, rows, cols),
        })
    }

    /// Concatenate datasets with identical feature columns. File ids are
    /// offset, so each PSM still knows which input it came from
    pub fn merge(datasets: Vec<Dataset>) -> Result<Self> {
        let mut iter = datasets.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::Configuration("no datasets to merge".into()))?;

        let cols = first.feature_names.len();
        let feature_names = first.feature_names;
        let mut filenames = first.filenames;
        let mut psms = first.psms;
        let mut data = (0..first.features.rows)
            .flat_map(|row| first.features.row(row).to_vec())
            .collect::<Vec<_>>();

        for dataset in iter {
            if dataset.feature_names != feature_names {
                return Err(Error::Configuration(format!(
                    "cannot merge datasets with different features: {:?} and {:?}",
                    feature_names, dataset.feature_names
                )));
            }
            let offset = filenames.len();
            filenames.extend(dataset.filenames);
            psms.extend(dataset.psms.into_iter().map(|mut psm| {
                psm.file_id += offset;
                psm
            }));
            for row in 0..dataset.features.rows {
                data.extend_from_slice(dataset.features.row(row));
            }
        }

        let rows = psms.len();
        Ok(Dataset {
            feature_names,
            filenames,
            psms,
            features: Matrix::new(data, rows, cols),
        })
    }

    pub fn len(&self) -> usize {
        self.psms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.psms.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn psms(&self) -> &[Psm] {
        &self.psms
    }

    pub fn features(&self, ix: usize) -> &[f64] {
        self.features.row(ix)
    }

    pub fn decoys(&self) -> usize {
        self.psms.iter().filter(|psm| psm.decoy).count()
    }

    /// A view over every PSM
    pub fn view(&self) -> View<'_> {
        View {
            dataset: self,
            indices: (0..self.len()).collect(),
        }
    }

    /// A read-only view over the PSMs satisfying `predicate`, which receives
    /// the PSM index and the PSM
    pub fn subset<F: Fn(usize, &Psm) -> bool>(&self, predicate: F) -> View<'_> {
        self.view().subset(predicate)
    }

    fn group_key(&self, ix: usize, group_by: GroupBy) -> GroupKey<'_> {
        let psm = &self.psms[ix];
        match (group_by, &psm.group) {
            (GroupBy::Peptide, _) => GroupKey::Peptide(&psm.peptide),
            (GroupBy::Group, Some(group)) => GroupKey::Group(group),
            (GroupBy::Group, None) | (GroupBy::Spectrum, _) => {
                GroupKey::Spectrum(psm.file_id, &psm.spec_id)
            }
        }
    }

    /// Deterministically assign each distinct group to one of `k` folds.
    ///
    /// Groups are shuffled with an RNG seeded from `seed`, then dealt out
    /// round-robin, so fold sizes (counted in groups) differ by at most one.
    pub fn partition_into_folds(&self, k: usize, group_by: GroupBy, seed: u64) -> Result<Folds> {
        if k < 2 {
            return Err(Error::Configuration(format!(
                "at least 2 folds are required, got {}",
                k
            )));
        }
        if self.decoys() == 0 {
            return Err(Error::UndefinedFdr(
                "dataset contains no decoy PSMs".into(),
            ));
        }

        // Distinct groups, in order of first appearance
        let mut groups: FnvHashMap<GroupKey<'_>, usize> = FnvHashMap::default();
        let mut membership = Vec::with_capacity(self.len());
        for ix in 0..self.len() {
            let next = groups.len();
            let group = *groups.entry(self.group_key(ix, group_by)).or_insert(next);
            membership.push(group);
        }

        if k > groups.len() {
            return Err(Error::Configuration(format!(
                "cannot split {} distinct groups into {} folds",
                groups.len(),
                k
            )));
        }

        let mut order = (0..groups.len()).collect::<Vec<_>>();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let mut group_fold = vec![0; groups.len()];
        for (position, group) in order.into_iter().enumerate() {
            group_fold[group] = position % k;
        }

        let assignment = membership.into_iter().map(|g| group_fold[g]).collect();
        log::debug!(
            "- assigned {} PSMs in {} groups to {} folds",
            self.len(),
            groups.len(),
            k
        );
        Ok(Folds { k, assignment })
    }
}

/// Read-only subset of a [`Dataset`]: an index list, never a copy of the
/// feature data
#[derive(Clone, Debug)]
pub struct View<'a> {
    dataset: &'a Dataset,
    indices: Vec<usize>,
}

impl<'a> View<'a> {
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Dataset indices of the PSMs in this view, in dataset order
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn psm(&self, i: usize) -> &'a Psm {
        &self.dataset.psms[self.indices[i]]
    }

    /// Feature vector of the `i`-th PSM of the view
    pub fn row(&self, i: usize) -> &'a [f64] {
        self.dataset.features(self.indices[i])
    }

    pub fn feature(&self, i: usize, col: usize) -> f64 {
        self.row(i)[col]
    }

    /// Decoy flags, aligned with the view
    pub fn decoys(&self) -> Vec<bool> {
        self.indices
            .iter()
            .map(|&ix| self.dataset.psms[ix].decoy)
            .collect()
    }

    /// Narrow this view further; `predicate` receives the dataset index
    pub fn subset<F: Fn(usize, &Psm) -> bool>(&self, predicate: F) -> View<'a> {
        View {
            dataset: self.dataset,
            indices: self
                .indices
                .iter()
                .copied()
                .filter(|&ix| predicate(ix, &self.dataset.psms[ix]))
                .collect(),
        }
    }

    /// Narrow this view to the positions (not dataset indices) where `keep`
    /// is true
    pub fn select(&self, keep: &[bool]) -> View<'a> {
        assert_eq!(keep.len(), self.len());
        View {
            dataset: self.dataset,
            indices: self
                .indices
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(ix, _)| *ix)
                .collect(),
        }
    }
}

/// Fold id of every PSM, computed once and reused for the whole run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folds {
    k: usize,
    assignment: Vec<usize>,
}

impl Folds {
    pub fn k(&self) -> usize {
        self.k
    }

    /// Fold of the PSM with dataset index `ix`
    pub fn fold(&self, ix: usize) -> usize {
        self.assignment[ix]
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Every PSM outside of fold `i`
    pub fn train<'a>(&self, dataset: &'a Dataset, i: usize) -> View<'a> {
        dataset.subset(|ix, _| self.assignment[ix] != i)
    }

    /// Every PSM in fold `i`
    pub fn test<'a>(&self, dataset: &'a Dataset, i: usize) -> View<'a> {
        dataset.subset(|ix, _| self.assignment[ix] == i)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    pub fn psm(spec_id: &str, peptide: &str, decoy: bool) -> Psm {
        Psm {
            spec_id: spec_id.into(),
            peptide: peptide.into(),
            file_id: 0,
            group: None,
            decoy,
        }
    }

    /// `n` PSMs with a single feature equal to their index, every third a decoy
    pub fn simple(n: usize) -> Dataset {
        let records = (0..n)
            .map(|i| {
                (
                    psm(&format!("scan={}", i), &format!("PEPTIDE{}", i), i % 3 == 0),
                    vec![i as f64],
                )
            })
            .collect();
        Dataset::new(vec!["score".into()], vec!["a.pin".into()], records).unwrap()
    }

    #[test]
    fn reject_malformed_records() {
        let records = vec![(psm("1", "PEPTIDE", false), vec![1.0, 2.0])];
        assert!(matches!(
            Dataset::new(vec!["a".into()], vec!["x".into()], records),
            Err(Error::Configuration(_))
        ));

        let records = vec![(psm("1", "PEPTIDE", false), vec![f64::NAN])];
        assert!(matches!(
            Dataset::new(vec!["a".into()], vec!["x".into()], records),
            Err(Error::Configuration(_))
        ));

        let mut bad = psm("1", "PEPTIDE", false);
        bad.file_id = 3;
        assert!(Dataset::new(vec!["a".into()], vec!["x".into()], vec![(bad, vec![1.0])]).is_err());
    }

    #[test]
    fn subsets_are_views() {
        let dataset = simple(9);
        let decoys = dataset.subset(|_, psm| psm.decoy);
        assert_eq!(decoys.indices(), &[0, 3, 6]);
        assert_eq!(decoys.row(1), &[3.0]);
        assert!(std::ptr::eq(decoys.row(1), dataset.features(3)));

        let nested = decoys.subset(|ix, _| ix > 0);
        assert_eq!(nested.indices(), &[3, 6]);
        assert_eq!(nested.select(&[false, true]).indices(), &[6]);
    }

    #[test]
    fn merge_keeps_provenance() {
        let a = simple(3);
        let b = simple(4);
        let merged = Dataset::merge(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 7);
        assert_eq!(merged.filenames().len(), 2);
        assert_eq!(merged.psms()[2].file_id, 0);
        assert_eq!(merged.psms()[3].file_id, 1);
        assert_eq!(merged.features(6), &[3.0]);

        let other = Dataset::new(
            vec!["other".into()],
            vec!["b.pin".into()],
            vec![(psm("1", "PEPTIDE", true), vec![1.0])],
        )
        .unwrap();
        assert!(Dataset::merge(vec![simple(2), other]).is_err());
    }

    #[test]
    fn fold_errors() {
        let dataset = simple(6);
        assert!(dataset.partition_into_folds(1, GroupBy::Spectrum, 1).is_err());
        assert!(dataset.partition_into_folds(7, GroupBy::Spectrum, 1).is_err());

        let records = (0..6)
            .map(|i| (psm(&i.to_string(), "PEPTIDE", false), vec![1.0]))
            .collect();
        let targets = Dataset::new(vec!["a".into()], vec!["x".into()], records).unwrap();
        assert!(matches!(
            targets.partition_into_folds(2, GroupBy::Spectrum, 1),
            Err(Error::UndefinedFdr(_))
        ));
    }

    #[test]
    fn groups_share_folds() {
        // Three candidates per spectrum
        let records = (0..30)
            .map(|i| {
                (
                    psm(&format!("scan={}", i / 3), &format!("PEP{}", i), i % 2 == 0),
                    vec![i as f64],
                )
            })
            .collect();
        let dataset = Dataset::new(vec!["a".into()], vec!["x".into()], records).unwrap();
        let folds = dataset.partition_into_folds(3, GroupBy::Spectrum, 42).unwrap();
        for i in (0..30).step_by(3) {
            assert_eq!(folds.fold(i), folds.fold(i + 1));
            assert_eq!(folds.fold(i), folds.fold(i + 2));
        }

        let train = folds.train(&dataset, 0);
        let test = folds.test(&dataset, 0);
        assert_eq!(train.len() + test.len(), 30);
        assert!(test.indices().iter().all(|ix| !train.indices().contains(ix)));
    }

    #[quickcheck]
    fn folds_are_deterministic_and_balanced(n: u8, k: u8, seed: u64) -> bool {
        let n = n as usize + 2;
        let k = (k as usize % n).max(2);
        let dataset = simple(n);

        let a = dataset.partition_into_folds(k, GroupBy::Spectrum, seed).unwrap();
        let b = dataset.partition_into_folds(k, GroupBy::Spectrum, seed).unwrap();

        let mut sizes = vec![0usize; k];
        for &fold in a.assignment() {
            sizes[fold] += 1;
        }
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();

        a == b && a.assignment().len() == n && max - min <= 1
    }
}
