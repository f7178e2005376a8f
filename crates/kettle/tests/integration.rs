//! Train and evaluate on synthetic datasets with a known answer

use kettle_core::brew::{self, BrewParameters};
use kettle_core::model::DEFAULT_SHRINKAGE;
use kettle_core::{Confidence, Dataset, DistributedModel, Error, LocalModel, Psm};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

const SEPARABLE: usize = 80;
const TARGETS: usize = 100;
const DECOYS: usize = 100;

/// 100 targets and 100 decoys. The first 80 targets score far above every
/// decoy on `signal`; the last 20 are drawn from the same distribution as
/// the bulk of the decoys. Five decoys sit between the two groups, so that
/// no indistinguishable target can reach 5% FDR
fn synthetic() -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut records = Vec::new();
    for i in 0..TARGETS + DECOYS {
        let decoy = i >= TARGETS;
        let signal = if i < SEPARABLE {
            rng.gen_range(5.0..6.0)
        } else if decoy && i < TARGETS + 5 {
            rng.gen_range(2.0..2.4)
        } else {
            rng.gen_range(0.0..1.0)
        };
        let echo = 0.5 * signal + rng.gen_range(-0.05..0.05);
        let noise = rng.gen_range(0.0..1.0);

        let psm = Psm {
            spec_id: format!("scan={}", i),
            peptide: format!("{}{}", if decoy { "DECOY_PEP" } else { "PEP" }, i),
            file_id: 0,
            group: None,
            decoy,
        };
        records.push((psm, vec![noise, signal, echo]));
    }
    Dataset::new(
        vec!["noise".into(), "signal".into(), "echo".into()],
        vec!["synthetic.pin".into()],
        records,
    )
    .unwrap()
}

fn parameters() -> BrewParameters {
    BrewParameters {
        train_fdr: 0.05,
        test_fdr: 0.05,
        max_iter: 10,
        folds: 3,
        ..Default::default()
    }
}

fn check_separation(confidence: &Confidence<'_>, threshold: f64) {
    let psms = confidence.psms();
    let separable = psms[..SEPARABLE]
        .iter()
        .filter(|e| e.q_value <= threshold)
        .count();
    assert!(separable >= 70, "only {} separable targets pass", separable);

    for entry in &psms[SEPARABLE..TARGETS] {
        assert!(
            entry.q_value > threshold,
            "indistinguishable target {} passes with q = {}",
            entry.psm,
            entry.q_value
        );
    }
}

#[test]
fn end_to_end() {
    let dataset = synthetic();
    let confidence = brew::brew(&dataset, &LocalModel::default(), &parameters()).unwrap();
    assert_eq!(confidence.len(), TARGETS + DECOYS);
    check_separation(&confidence, 0.05);
}

#[test]
fn distributed_model_agrees() {
    let dataset = synthetic();
    let pool = Arc::new(
        rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap(),
    );
    let distributed = DistributedModel::new(pool, 4, vec![DEFAULT_SHRINKAGE]).unwrap();

    let remote = brew::brew(&dataset, &distributed, &parameters()).unwrap();
    let local = brew::brew(&dataset, &LocalModel::default(), &parameters()).unwrap();
    check_separation(&remote, 0.05);

    for (a, b) in remote.psms().iter().zip(local.psms()) {
        assert!((a.score - b.score).abs() < 1E-9, "{} != {}", a.score, b.score);
        assert_eq!(a.fold, b.fold);
    }
}

#[test]
fn reproducible() {
    let dataset = synthetic();
    let model = LocalModel::default();
    let first = brew::brew(&dataset, &model, &parameters()).unwrap();
    let second = brew::brew(&dataset, &model, &parameters()).unwrap();

    for (a, b) in first.psms().iter().zip(second.psms()) {
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.q_value.to_bits(), b.q_value.to_bits());
    }
}

#[test]
fn held_out_purity() {
    let dataset = synthetic();
    let (folds, outcomes) = brew::train(&dataset, &LocalModel::default(), &parameters()).unwrap();

    let mut scored = vec![0; dataset.len()];
    for outcome in &outcomes {
        for &ix in &outcome.test_indices {
            scored[ix] += 1;
            assert_eq!(folds.fold(ix), outcome.fold);
            assert!(!outcome.selected.trained_on.contains(&ix));
        }
        // Every PSM the model was fit on belongs to another fold
        assert!(outcome
            .selected
            .trained_on
            .iter()
            .all(|&ix| folds.fold(ix) != outcome.fold));
    }
    assert!(scored.iter().all(|&n| n == 1));
}

#[test]
fn no_decoys() {
    let records = (0..30)
        .map(|i| {
            let psm = Psm {
                spec_id: i.to_string(),
                peptide: "PEPTIDE".into(),
                file_id: 0,
                group: None,
                decoy: false,
            };
            (psm, vec![i as f64])
        })
        .collect();
    let dataset = Dataset::new(vec!["x".into()], vec!["a.pin".into()], records).unwrap();
    assert!(matches!(
        brew::brew(&dataset, &LocalModel::default(), &parameters()),
        Err(Error::UndefinedFdr(_))
    ));
}
