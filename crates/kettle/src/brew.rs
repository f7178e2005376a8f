//! Iterative, semi-supervised training of a scoring model inside a
//! cross-validation scheme.
//!
//! For every fold, a model is trained on the remaining folds only: starting
//! from a single-feature ranking, targets passing `train_fdr` are labelled as
//! positives, all decoys as negatives, a new model is fit, the training
//! partition is re-scored and the labels are refined. The round passing the
//! most targets at `test_fdr` on the training partition is then applied to
//! the held-out fold, so that no PSM is ever scored by a model that saw it.

use crate::confidence::Confidence;
use crate::dataset::{Dataset, Folds, GroupBy, View};
use crate::fdr;
use crate::ml::median;
use crate::model::{FittedModel, Model};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How PSMs are ranked before any model exists
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Use the single feature (and sign) that passes the most targets
    #[default]
    Auto,
    /// Use the named feature; its sign is still chosen automatically
    Feature(String),
}

impl FromStr for Direction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "auto" => Direction::Auto,
            feature => Direction::Feature(feature.into()),
        })
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Auto => f.write_str("auto"),
            Direction::Feature(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrewParameters {
    /// FDR threshold for selecting positive training examples
    pub train_fdr: f64,
    /// FDR threshold used to select among training rounds
    pub test_fdr: f64,
    /// Maximum number of training rounds per fold
    pub max_iter: usize,
    pub direction: Direction,
    /// Number of cross-validation folds
    pub folds: usize,
    pub group_by: GroupBy,
    /// Seed for the fold assignment
    pub seed: u64,
    /// Folds used by [`Model::cross_validate`] to choose hyperparameters
    pub inner_folds: usize,
}

impl Default for BrewParameters {
    fn default() -> Self {
        Self {
            train_fdr: 0.01,
            test_fdr: 0.01,
            max_iter: 10,
            direction: Direction::Auto,
            folds: 3,
            group_by: GroupBy::Spectrum,
            seed: 1,
            inner_folds: 3,
        }
    }
}

impl BrewParameters {
    /// Check every parameter against `dataset` before any training happens,
    /// returning the column forced by `direction`, if any
    pub fn validate(&self, dataset: &Dataset) -> Result<Option<usize>> {
        for (name, value) in [("train_fdr", self.train_fdr), ("test_fdr", self.test_fdr)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Configuration(format!(
                    "`{}` must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.max_iter == 0 {
            return Err(Error::Configuration("`max_iter` must be at least 1".into()));
        }
        if self.folds < 2 {
            return Err(Error::Configuration(format!(
                "`folds` must be at least 2, got {}",
                self.folds
            )));
        }
        if self.inner_folds < 2 {
            return Err(Error::Configuration(format!(
                "`inner_folds` must be at least 2, got {}",
                self.inner_folds
            )));
        }
        match &self.direction {
            Direction::Auto => Ok(None),
            Direction::Feature(name) => dataset.feature_index(name).map(Some).ok_or_else(|| {
                Error::Configuration(format!(
                    "`direction` feature `{}` is not one of {:?}",
                    name,
                    dataset.feature_names()
                ))
            }),
        }
    }
}

/// Single-feature ranking used before the first model is trained
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitialRanking {
    pub column: usize,
    pub descending: bool,
    pub passing: usize,
}

/// A completed training round
#[derive(Clone, Debug)]
pub struct Round {
    pub iteration: usize,
    pub model: FittedModel,
    /// Targets at `train_fdr` on the training partition
    pub passing_train: usize,
    /// Targets at `test_fdr` on the training partition
    pub passing_test: usize,
    /// Dataset indices of the PSMs the model was fit on
    pub trained_on: Vec<usize>,
}

/// Everything a single fold produced
#[derive(Clone, Debug)]
pub struct FoldOutcome {
    pub fold: usize,
    pub initial: InitialRanking,
    pub rounds: usize,
    pub selected: Round,
    /// Calibrated model applied to the held-out fold
    pub model: FittedModel,
    /// Dataset indices of the held-out PSMs
    pub test_indices: Vec<usize>,
    /// Held-out scores, aligned with `test_indices`
    pub scores: Vec<f64>,
}

/// Rank the training partition by one feature. Every candidate column is
/// tried in both directions, and the ranking that passes the most targets at
/// `fdr` wins; ties go to the lower column, then to descending order.
pub fn initial_ranking(
    view: &View<'_>,
    decoys: &[bool],
    columns: &[usize],
    fdr: f64,
) -> Result<(Vec<f64>, InitialRanking)> {
    let mut best: Option<(Vec<f64>, InitialRanking)> = None;
    for &column in columns {
        for descending in [true, false] {
            let sign = if descending { 1.0 } else { -1.0 };
            let scores = (0..view.len())
                .map(|i| sign * view.feature(i, column))
                .collect::<Vec<_>>();
            let q = fdr::q_values(&scores, decoys)?;
            let passing = fdr::passing(&q, decoys, fdr);

            if best.as_ref().map_or(true, |(_, b)| passing > b.passing) {
                best = Some((
                    scores,
                    InitialRanking {
                        column,
                        descending,
                        passing,
                    },
                ));
            }
        }
    }
    best.ok_or_else(|| Error::Configuration("no features to rank PSMs by".into()))
}

/// Calibrate scores so that the lowest-scoring target passing `fdr` sits at
/// 0 and the median decoy at -1
fn calibrate(model: &FittedModel, scores: &[f64], decoys: &[bool], fdr: f64) -> Result<FittedModel> {
    let q = fdr::q_values(scores, decoys)?;
    let threshold = scores
        .iter()
        .zip(&q)
        .zip(decoys)
        .filter(|((_, q), decoy)| !**decoy && **q <= fdr)
        .map(|((s, _), _)| *s)
        .fold(f64::INFINITY, f64::min);
    let decoy_scores = scores
        .iter()
        .zip(decoys)
        .filter(|(_, d)| **d)
        .map(|(s, _)| *s)
        .collect::<Vec<_>>();
    let decoy_median = median(&decoy_scores);

    if !threshold.is_finite() || threshold <= decoy_median {
        log::warn!(
            "- no targets pass {} FDR above the median decoy score: scores are not calibrated",
            fdr
        );
        return Ok(model.clone());
    }
    Ok(model.calibrated(threshold, threshold - decoy_median))
}

/// The round passing the most targets at `test_fdr`; the earlier round wins
/// a tie
fn select(rounds: Vec<Round>) -> Option<Round> {
    rounds.into_iter().reduce(|best, round| {
        if round.passing_test > best.passing_test {
            round
        } else {
            best
        }
    })
}

fn train_fold<M: Model + ?Sized>(
    dataset: &Dataset,
    folds: &Folds,
    fold: usize,
    model: &M,
    params: &BrewParameters,
    columns: &[usize],
) -> Result<FoldOutcome> {
    let train = folds.train(dataset, fold);
    let decoys = train.decoys();
    log::debug!(
        "fold {}: training on {} PSMs ({} decoys)",
        fold,
        train.len(),
        decoys.iter().filter(|d| **d).count()
    );

    let (mut scores, initial) = initial_ranking(&train, &decoys, columns, params.train_fdr)?;
    let mut q = fdr::q_values(&scores, &decoys)?;
    let mut passing = initial.passing;
    log::debug!(
        "fold {}: round 0 ranks by `{}` ({}), {} targets at {} FDR",
        fold,
        dataset.feature_names()[initial.column],
        if initial.descending { "descending" } else { "ascending" },
        passing,
        params.train_fdr
    );

    let mut rounds: Vec<Round> = Vec::new();
    for iteration in 1..=params.max_iter {
        // Positives are confident targets, negatives are all decoys; the
        // remaining targets are left out of this round entirely
        let keep = decoys
            .iter()
            .zip(&q)
            .map(|(decoy, q)| *decoy || *q <= params.train_fdr)
            .collect::<Vec<_>>();
        let positives = keep
            .iter()
            .zip(&decoys)
            .filter(|(k, d)| **k && !**d)
            .count();

        // Skipping a round leaves the scores untouched, so every later round
        // would see the same labels: stop here and keep the previous model
        if positives == 0 {
            log::warn!(
                "fold {}: no targets pass {} FDR in round {}",
                fold,
                params.train_fdr,
                iteration
            );
            break;
        }

        let training = train.select(&keep);
        let labels = training.decoys().iter().map(|d| !d).collect::<Vec<_>>();
        let fitted = match model.cross_validate(
            &training,
            &labels,
            params.inner_folds,
            params.train_fdr,
        ) {
            Ok(fitted) => fitted,
            Err(Error::ModelFit(reason)) => {
                log::warn!(
                    "fold {}: round {} could not be trained: {}",
                    fold,
                    iteration,
                    reason
                );
                break;
            }
            Err(e) => return Err(e),
        };

        let next_scores = model.score(&fitted, &train);
        let next_q = fdr::q_values(&next_scores, &decoys)?;
        let next_passing = fdr::passing(&next_q, &decoys, params.train_fdr);
        let passing_test = fdr::passing(&next_q, &decoys, params.test_fdr);
        log::debug!(
            "fold {}: round {} trained on {} positives, {} targets at {} FDR",
            fold,
            iteration,
            positives,
            next_passing,
            params.train_fdr
        );

        rounds.push(Round {
            iteration,
            model: fitted,
            passing_train: next_passing,
            passing_test,
            trained_on: training.indices().to_vec(),
        });

        let improved = next_passing > passing;
        scores = next_scores;
        q = next_q;
        passing = next_passing;
        if !improved {
            break;
        }
    }

    let executed = rounds.len();
    let selected = select(rounds)
        .ok_or_else(|| Error::ModelFit(format!("no model could be trained for fold {}", fold)))?;

    // `scores` belongs to the last round, which is not necessarily selected
    if selected.iteration != executed {
        scores = model.score(&selected.model, &train);
    }
    let calibrated = calibrate(&selected.model, &scores, &decoys, params.test_fdr)?;

    let test = folds.test(dataset, fold);
    let held_out = model.score(&calibrated, &test);
    log::info!(
        "fold {}: selected round {} of {} ({} training targets at {} FDR)",
        fold,
        selected.iteration,
        executed,
        selected.passing_test,
        params.test_fdr
    );

    Ok(FoldOutcome {
        fold,
        initial,
        rounds: executed,
        selected,
        model: calibrated,
        test_indices: test.indices().to_vec(),
        scores: held_out,
    })
}

/// Assign folds and train every fold in parallel, without computing the
/// final confidence estimates. Any failing fold aborts the whole run
pub fn train<M: Model + ?Sized>(
    dataset: &Dataset,
    model: &M,
    params: &BrewParameters,
) -> Result<(Folds, Vec<FoldOutcome>)> {
    let forced = params.validate(dataset)?;
    let columns = match forced {
        Some(column) => vec![column],
        None => (0..dataset.feature_names().len()).collect(),
    };
    if dataset.decoys() == 0 {
        return Err(Error::UndefinedFdr(format!(
            "no decoys among {} PSMs",
            dataset.len()
        )));
    }
    let folds = dataset.partition_into_folds(params.folds, params.group_by, params.seed)?;

    log::info!(
        "training {} model on {} PSMs ({} decoys) across {} folds",
        model.name(),
        dataset.len(),
        dataset.decoys(),
        folds.k()
    );

    let outcomes = (0..folds.k())
        .into_par_iter()
        .map(|fold| {
            train_fold(dataset, &folds, fold, model, params, &columns).map_err(|e| Error::Fold {
                fold,
                source: Box::new(e),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((folds, outcomes))
}

/// Train, evaluate every held-out fold, and assign final confidence
/// estimates over the concatenation of all folds
pub fn brew<'a, M: Model + ?Sized>(
    dataset: &'a Dataset,
    model: &M,
    params: &BrewParameters,
) -> Result<Confidence<'a>> {
    let (folds, outcomes) = train(dataset, model, params)?;

    let mut scores = vec![f64::NAN; dataset.len()];
    for outcome in &outcomes {
        for (&ix, &score) in outcome.test_indices.iter().zip(&outcome.scores) {
            scores[ix] = score;
        }
    }

    let confidence = Confidence::new(dataset, scores, folds.assignment().to_vec())?;
    log::info!(
        "discovered {} target PSMs and {} target peptides at {} FDR",
        confidence.passing(crate::Level::Psm, params.test_fdr),
        confidence.passing(crate::Level::Peptide, params.test_fdr),
        params.test_fdr
    );
    Ok(confidence)
}
