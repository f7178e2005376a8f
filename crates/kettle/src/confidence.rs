//! Final confidence estimates over the held-out scores of every fold

use crate::dataset::Dataset;
use crate::fdr;
use crate::ml::kde;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    Psm,
    Peptide,
}

impl Level {
    fn name(&self) -> &'static str {
        match self {
            Level::Psm => "psms",
            Level::Peptide => "peptides",
        }
    }
}

/// How results over several input files are reported
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One set of outputs over all files
    #[default]
    Aggregate,
    /// Confidence recomputed within each file, one set of outputs per file
    PerFile,
}

/// A scored PSM with its confidence estimates
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// Index of the PSM in the dataset
    pub psm: usize,
    pub score: f64,
    pub fold: usize,
    pub q_value: f64,
    pub posterior_error: f64,
}

#[derive(Clone, Debug)]
pub struct Confidence<'a> {
    dataset: &'a Dataset,
    file_id: Option<usize>,
    psms: Vec<Entry>,
    peptides: Vec<Entry>,
}

/// Assign q-values and posterior errors in place
fn assign(dataset: &Dataset, entries: &mut [Entry]) -> Result<()> {
    let scores = entries.iter().map(|e| e.score).collect::<Vec<_>>();
    let decoys = entries
        .iter()
        .map(|e| dataset.psms()[e.psm].decoy)
        .collect::<Vec<_>>();

    let q = fdr::q_values(&scores, &decoys)?;
    let pep = kde::Estimator::fit(&scores, &decoys);
    for (entry, q) in entries.iter_mut().zip(q) {
        entry.q_value = q;
        entry.posterior_error = pep.posterior_error(entry.score);
    }
    Ok(())
}

impl<'a> Confidence<'a> {
    /// Build confidence estimates from one held-out score and fold id per
    /// PSM of `dataset`
    pub fn new(dataset: &'a Dataset, scores: Vec<f64>, folds: Vec<usize>) -> Result<Self> {
        if scores.len() != dataset.len() || folds.len() != dataset.len() {
            return Err(Error::Configuration(format!(
                "{} scores and {} fold ids for {} PSMs",
                scores.len(),
                folds.len(),
                dataset.len()
            )));
        }
        let entries = scores
            .into_iter()
            .zip(folds)
            .enumerate()
            .map(|(psm, (score, fold))| Entry {
                psm,
                score,
                fold,
                q_value: 1.0,
                posterior_error: 1.0,
            })
            .collect();
        Self::from_entries(dataset, None, entries)
    }

    fn from_entries(dataset: &'a Dataset, file_id: Option<usize>, mut psms: Vec<Entry>) -> Result<Self> {
        assign(dataset, &mut psms)?;

        let scores = psms.iter().map(|e| e.score).collect::<Vec<_>>();
        let mut peptides = fdr::best_per_key(&scores, |ix| {
            let psm = &dataset.psms()[psms[ix].psm];
            (psm.peptide.as_str(), psm.decoy)
        })
        .into_iter()
        .map(|ix| psms[ix].clone())
        .collect::<Vec<_>>();
        assign(dataset, &mut peptides)?;

        Ok(Confidence {
            dataset,
            file_id,
            psms,
            peptides,
        })
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Input file these estimates were restricted to, if any
    pub fn filename(&self) -> Option<&'a str> {
        self.file_id
            .map(|id| self.dataset.filenames()[id].as_str())
    }

    pub fn len(&self) -> usize {
        self.psms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.psms.is_empty()
    }

    pub fn psms(&self) -> &[Entry] {
        &self.psms
    }

    /// One representative PSM per peptide and target/decoy label
    pub fn peptides(&self) -> &[Entry] {
        &self.peptides
    }

    pub fn level(&self, level: Level) -> &[Entry] {
        match level {
            Level::Psm => &self.psms,
            Level::Peptide => &self.peptides,
        }
    }

    /// Number of targets at `level` with q-value <= `threshold`
    pub fn passing(&self, level: Level, threshold: f64) -> usize {
        self.level(level)
            .iter()
            .filter(|e| !self.dataset.psms()[e.psm].decoy && e.q_value <= threshold)
            .count()
    }

    /// Recompute confidence estimates within each input file. Files without
    /// any PSMs are skipped; a file without decoys is an error
    pub fn split_by_file(&self) -> Result<Vec<Confidence<'a>>> {
        let mut by_file = vec![Vec::new(); self.dataset.filenames().len()];
        for entry in &self.psms {
            by_file[self.dataset.psms()[entry.psm].file_id].push(entry.clone());
        }

        by_file
            .into_iter()
            .enumerate()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(file_id, entries)| {
                Self::from_entries(self.dataset, Some(file_id), entries).map_err(|e| match e {
                    Error::UndefinedFdr(reason) => Error::UndefinedFdr(format!(
                        "{}: {}",
                        self.dataset.filenames()[file_id],
                        reason
                    )),
                    e => e,
                })
            })
            .collect()
    }

    fn serialize(&self, entry: &Entry) -> csv::ByteRecord {
        let psm = &self.dataset.psms()[entry.psm];
        let mut record = csv::ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(entry.psm).as_bytes());
        record.push_field(self.dataset.filenames()[psm.file_id].as_bytes());
        record.push_field(psm.spec_id.as_bytes());
        record.push_field(psm.peptide.as_bytes());
        record.push_field(if psm.decoy { "-1" } else { "1" }.as_bytes());
        record.push_field(if psm.decoy { "true" } else { "false" }.as_bytes());
        record.push_field(itoa::Buffer::new().format(entry.fold).as_bytes());
        record.push_field(ryu::Buffer::new().format(entry.score).as_bytes());
        record.push_field(ryu::Buffer::new().format(entry.q_value).as_bytes());
        record.push_field(ryu::Buffer::new().format(entry.posterior_error).as_bytes());
        record
    }

    /// Write one level as a tab-delimited table, best score first
    fn write_level(&self, path: &Path, level: Level) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        let headers = csv::ByteRecord::from(vec![
            "psm_id",
            "filename",
            "spec_id",
            "peptide",
            "label",
            "is_decoy",
            "fold",
            "score",
            "q_value",
            "posterior_error",
        ]);
        wtr.write_byte_record(&headers)?;

        let entries = self.level(level);
        let scores = entries.iter().map(|e| e.score).collect::<Vec<_>>();
        for ix in fdr::rank(&scores) {
            wtr.write_byte_record(&self.serialize(&entries[ix]))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_tables(&self, dest_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        [Level::Psm, Level::Peptide]
            .into_iter()
            .map(|level| {
                let path = dest_dir.join(format!("{}kettle.{}.txt", prefix, level.name()));
                self.write_level(&path, level)?;
                log::info!("- wrote {}", path.display());
                Ok(path)
            })
            .collect()
    }

    /// Write `<file_root.>kettle.psms.txt` and `<file_root.>kettle.peptides.txt`
    /// to `dest_dir`. With [`Grouping::PerFile`], one pair is written per
    /// input file, additionally prefixed with the file stem
    pub fn write(
        &self,
        dest_dir: &Path,
        file_root: Option<&str>,
        grouping: Grouping,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest_dir)?;
        let root = file_root
            .filter(|root| !root.is_empty())
            .map(|root| format!("{}.", root))
            .unwrap_or_default();

        match grouping {
            Grouping::Aggregate => self.write_tables(dest_dir, &root),
            Grouping::PerFile => {
                let mut paths = Vec::new();
                for confidence in self.split_by_file()? {
                    let stem = confidence
                        .filename()
                        .and_then(|name| Path::new(name).file_stem())
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let prefix = format!("{}{}.", root, stem);
                    paths.extend(confidence.write_tables(dest_dir, &prefix)?);
                }
                Ok(paths)
            }
        }
    }
}
