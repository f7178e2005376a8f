//! False discovery rate estimation by target-decoy competition
//!
//! Elias & Gygi, https://pubmed.ncbi.nlm.nih.gov/17327847/
//! Levitsky et al., https://pubmed.ncbi.nlm.nih.gov/28302922/ (the `+1` correction)

use crate::{Error, Result};
use fnv::FnvHashMap;

/// Indices of `scores`, best first. Sorting is stable, so equal scores keep
/// their input order and the FDR curve is reproducible
pub fn rank(scores: &[f64]) -> Vec<usize> {
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

fn check(scores: &[f64], decoys: &[bool]) -> Result<()> {
    if scores.len() != decoys.len() {
        return Err(Error::Configuration(format!(
            "{} scores for {} decoy labels",
            scores.len(),
            decoys.len()
        )));
    }
    if !decoys.iter().any(|d| *d) {
        return Err(Error::UndefinedFdr(format!(
            "no decoys among {} PSMs",
            decoys.len()
        )));
    }
    if let Some(ix) = scores.iter().position(|s| !s.is_finite()) {
        return Err(Error::UndefinedFdr(format!(
            "PSM #{} has a non-finite score",
            ix
        )));
    }
    Ok(())
}

/// Estimated FDR at each rank of `order`: `(D + 1) / max(T, 1)`, where `D`
/// and `T` are the decoys and targets at or above that rank
pub fn fdr_curve(order: &[usize], decoys: &[bool]) -> Vec<f64> {
    let mut decoy = 1;
    let mut target = 0;

    order
        .iter()
        .map(|&ix| {
            match decoys[ix] {
                true => decoy += 1,
                false => target += 1,
            }
            decoy as f64 / target.max(1) as f64
        })
        .collect()
}

/// Assign q-values to a set of PSMs, aligned with the input order.
///
/// The q-value of a PSM is the minimum estimated FDR over every threshold
/// that would still accept it, capped at 1.
pub fn q_values(scores: &[f64], decoys: &[bool]) -> Result<Vec<f64>> {
    // FDR Calculation:
    // * Sort by score, descending
    // * Estimate FDR
    // * Calculate q-value
    check(scores, decoys)?;
    let order = rank(scores);
    let fdr = fdr_curve(&order, decoys);

    // Reverse, and calculate the cumulative minimum
    let mut q = vec![1.0; scores.len()];
    let mut q_min = 1.0f64;
    for (&ix, fdr) in order.iter().zip(&fdr).rev() {
        q_min = q_min.min(*fdr);
        q[ix] = q_min;
    }
    Ok(q)
}

/// Number of targets with q-value <= `threshold`
pub fn passing(q_values: &[f64], decoys: &[bool], threshold: f64) -> usize {
    q_values
        .iter()
        .zip(decoys)
        .filter(|&(q, decoy)| !*decoy && *q <= threshold)
        .count()
}

/// Pick one representative PSM per key: the best-scoring one, with ties
/// resolved in favor of the earlier row. Returned indices are in input order
pub fn best_per_key<K, F>(scores: &[f64], key: F) -> Vec<usize>
where
    K: std::hash::Hash + Eq,
    F: Fn(usize) -> K,
{
    let mut best: FnvHashMap<K, usize> = FnvHashMap::default();
    for (ix, score) in scores.iter().enumerate() {
        best.entry(key(ix))
            .and_modify(|current| {
                if *score > scores[*current] {
                    *current = ix;
                }
            })
            .or_insert(ix);
    }
    let mut picked = best.into_values().collect::<Vec<_>>();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn fdr_at_each_rank() {
        // T T D T D D
        let decoys = [false, false, true, false, true, true];
        let order = (0..6).collect::<Vec<_>>();
        let fdr = fdr_curve(&order, &decoys);
        assert_eq!(fdr, vec![1.0, 0.5, 1.0, 2.0 / 3.0, 1.0, 4.0 / 3.0]);
    }

    #[test]
    fn q_value_is_cumulative_minimum() {
        let scores = [10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let decoys = [
            false, false, false, false, true, false, false, false, true, true,
        ];
        let q = q_values(&scores, &decoys).unwrap();
        // FDR bottoms out at 1/4 after four targets, and at 2/7 after seven
        let expected = [
            0.25,
            0.25,
            0.25,
            0.25,
            2.0 / 7.0,
            2.0 / 7.0,
            2.0 / 7.0,
            2.0 / 7.0,
            3.0 / 7.0,
            4.0 / 7.0,
        ];
        for (a, b) in q.iter().zip(expected) {
            assert!((a - b).abs() < 1E-12, "{:?}", q);
        }
        assert_eq!(passing(&q, &decoys, 0.3), 7);
        assert_eq!(passing(&q, &decoys, 0.2), 0);
    }

    #[test]
    fn unsorted_input_and_ties() {
        // Input order is preserved in the output
        let scores = [1.0, 3.0, 2.0, 3.0];
        let decoys = [true, false, false, true];
        let q = q_values(&scores, &decoys).unwrap();
        // Rank order: 1 (T), 3 (D, tie keeps input order), 2 (T), 0 (D)
        assert_eq!(rank(&scores), vec![1, 3, 2, 0]);
        assert_eq!(q, vec![1.0, 1.0, 1.0, 1.0]);

        let scores = [5.0, 5.0, 5.0, 1.0];
        let decoys = [false, false, false, true];
        assert_eq!(q_values(&scores, &decoys).unwrap()[..3], [1.0 / 3.0; 3]);
    }

    #[test]
    fn no_decoys() {
        assert!(matches!(
            q_values(&[1.0, 2.0], &[false, false]),
            Err(Error::UndefinedFdr(_))
        ));
        assert!(matches!(
            q_values(&[f64::NAN, 2.0], &[true, false]),
            Err(Error::UndefinedFdr(_))
        ));
    }

    #[test]
    fn mismatched_lengths() {
        assert!(matches!(
            q_values(&[1.0, 2.0, 3.0], &[true, false]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn best_per_peptide() {
        let scores = [1.0, 4.0, 4.0, 2.0, 0.5];
        let peptides = ["A", "B", "B", "A", "C"];
        assert_eq!(best_per_key(&scores, |ix| peptides[ix]), vec![1, 3, 4]);
    }

    #[quickcheck]
    fn q_values_are_monotonic(data: Vec<(i16, bool)>) -> bool {
        let mut data = data;
        data.push((0, true));
        let scores = data.iter().map(|(s, _)| *s as f64).collect::<Vec<_>>();
        let decoys = data.iter().map(|(_, d)| *d).collect::<Vec<_>>();

        let q = q_values(&scores, &decoys).unwrap();
        let order = rank(&scores);
        order.windows(2).all(|w| q[w[0]] <= q[w[1]])
            && q.iter().all(|q| *q > 0.0 && *q <= 1.0)
    }
}
