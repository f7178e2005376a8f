//! Scoring models driven by the iterative trainer
//!
//! A [`Model`] is a factory: it holds hyperparameters only, and every call to
//! [`Model::fit`] returns a new, immutable [`FittedModel`]. Two variants share
//! the contract. [`LocalModel`] does all of its work in-process, while
//! [`DistributedModel`] splits the training statistics and the scoring into
//! shards that run on a caller-supplied worker pool, and blocks until every
//! shard has been merged back.

use crate::dataset::View;
use crate::fdr;
use crate::ml::linear_discriminant::{LinearDiscriminant, Statistics};
use crate::{Error, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::ops::Range;
use std::sync::Arc;

/// Ridge term added to the standardized within-class scatter matrix
pub const DEFAULT_SHRINKAGE: f64 = 1E-3;

/// A linear scoring function learned by [`Model::fit`]
#[derive(Clone, Debug, PartialEq)]
pub struct FittedModel {
    discriminant: LinearDiscriminant,
    shrinkage: f64,
}

impl FittedModel {
    /// Score a single feature vector; higher is more target-like
    pub fn score_row(&self, row: &[f64]) -> f64 {
        self.discriminant.score(row)
    }

    pub fn weights(&self) -> &[f64] {
        self.discriminant.weights()
    }

    pub fn intercept(&self) -> f64 {
        self.discriminant.intercept()
    }

    pub fn shrinkage(&self) -> f64 {
        self.shrinkage
    }

    /// Return a model whose scores are `(score - zero) / unit`
    pub fn calibrated(&self, zero: f64, unit: f64) -> FittedModel {
        FittedModel {
            discriminant: self.discriminant.rescaled(zero, unit),
            shrinkage: self.shrinkage,
        }
    }
}

/// Binary classifier separating confident targets (`true`) from decoys
pub trait Model: Send + Sync {
    /// Candidate shrinkage values. [`Model::fit`] uses the first one,
    /// [`Model::cross_validate`] chooses among all of them
    fn shrinkage(&self) -> &[f64];

    /// Fit a new model on `view`, with `labels[i]` the class of `view`'s
    /// `i`-th PSM. Deterministic for identical inputs
    fn fit_with(&self, view: &View<'_>, labels: &[bool], shrinkage: f64) -> Result<FittedModel>;

    /// Score every PSM in `view`, in view order
    fn score(&self, model: &FittedModel, view: &View<'_>) -> Vec<f64>;

    fn name(&self) -> &'static str;

    fn fit(&self, view: &View<'_>, labels: &[bool]) -> Result<FittedModel> {
        let shrinkage = self.shrinkage().first().copied().unwrap_or(DEFAULT_SHRINKAGE);
        self.fit_with(view, labels, shrinkage)
    }

    /// Choose the shrinkage candidate by an inner cross-validation over
    /// `view`, then refit with it on the whole view. Positives and decoys are
    /// dealt into inner folds separately, in view order. The winner passes
    /// the most targets at `eval_fdr` over the concatenated inner held-out
    /// scores; ties go to the earlier candidate. A candidate whose inner fits
    /// fail is not eligible, and without any eligible candidate (or with a
    /// single one) this is [`Model::fit`]
    fn cross_validate(
        &self,
        view: &View<'_>,
        labels: &[bool],
        folds: usize,
        eval_fdr: f64,
    ) -> Result<FittedModel> {
        let candidates = self.shrinkage();
        if candidates.len() < 2 || folds < 2 || view.len() < folds {
            return self.fit(view, labels);
        }
        check_labels(view, labels)?;

        let assignment = inner_folds(labels, folds);

        let mut best: Option<(usize, f64)> = None;
        for &shrinkage in candidates {
            let passing = match evaluate(
                self,
                view,
                labels,
                &assignment,
                folds,
                shrinkage,
                eval_fdr,
            ) {
                Ok(passing) => passing,
                Err(Error::ModelFit(reason)) | Err(Error::UndefinedFdr(reason)) => {
                    log::debug!(
                        "- inner cross-validation: shrinkage {} not evaluated: {}",
                        shrinkage,
                        reason
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            log::debug!(
                "- inner cross-validation: shrinkage {} passes {} targets",
                shrinkage,
                passing
            );
            if best.map_or(true, |(count, _)| passing > count) {
                best = Some((passing, shrinkage));
            }
        }

        match best {
            Some((_, shrinkage)) => self.fit_with(view, labels, shrinkage),
            None => self.fit(view, labels),
        }
    }
}

/// Targets passing `eval_fdr` over the inner held-out scores of one
/// shrinkage candidate
fn evaluate<M: Model + ?Sized>(
    model: &M,
    view: &View<'_>,
    labels: &[bool],
    assignment: &[usize],
    folds: usize,
    shrinkage: f64,
    eval_fdr: f64,
) -> Result<usize> {
    let mut scores = vec![0.0; view.len()];
    for fold in 0..folds {
        let held_out = assignment.iter().map(|f| *f == fold).collect::<Vec<_>>();
        let keep = held_out.iter().map(|h| !h).collect::<Vec<_>>();
        let train_labels = labels
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(l, _)| *l)
            .collect::<Vec<_>>();

        let fitted = model.fit_with(&view.select(&keep), &train_labels, shrinkage)?;
        let test_scores = model.score(&fitted, &view.select(&held_out));

        let positions = (0..view.len()).filter(|&i| held_out[i]);
        for (pos, score) in positions.zip(test_scores) {
            scores[pos] = score;
        }
    }

    let decoys = labels.iter().map(|target| !target).collect::<Vec<_>>();
    let q = fdr::q_values(&scores, &decoys)?;
    Ok(fdr::passing(&q, &decoys, eval_fdr))
}

/// Inner fold of every row: the `n`-th positive goes to fold `n % folds`,
/// and likewise for decoys, so both classes are spread over every fold
fn inner_folds(labels: &[bool], folds: usize) -> Vec<usize> {
    let mut seen = [0usize; 2];
    labels
        .iter()
        .map(|&target| {
            let class = &mut seen[target as usize];
            let fold = *class % folds;
            *class += 1;
            fold
        })
        .collect()
}

fn check_labels(view: &View<'_>, labels: &[bool]) -> Result<()> {
    if labels.len() != view.len() {
        return Err(Error::ModelFit(format!(
            "{} labels provided for {} PSMs",
            labels.len(),
            view.len()
        )));
    }
    if view.is_empty() {
        return Err(Error::ModelFit("no PSMs to train on".into()));
    }
    Ok(())
}

/// Accumulate training statistics over `range` of the view
fn accumulate(view: &View<'_>, labels: &[bool], range: Range<usize>, shift: &[f64]) -> Statistics {
    let mut stats = Statistics::new(shift.to_vec());
    for i in range {
        stats.push(view.row(i), labels[i]);
    }
    stats
}

/// Split `len` items into at most `shards` contiguous, non-empty ranges
fn shard_ranges(len: usize, shards: usize) -> Vec<Range<usize>> {
    let size = ((len + shards - 1) / shards.max(1)).max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

fn solve(stats: &Statistics, shrinkage: f64) -> Result<FittedModel> {
    Ok(FittedModel {
        discriminant: LinearDiscriminant::solve(stats, shrinkage)?,
        shrinkage,
    })
}

/// In-process linear discriminant model
#[derive(Clone, Debug)]
pub struct LocalModel {
    shrinkage: Vec<f64>,
}

impl LocalModel {
    pub fn new(shrinkage: Vec<f64>) -> Result<Self> {
        check_shrinkage(&shrinkage)?;
        Ok(LocalModel { shrinkage })
    }
}

impl Default for LocalModel {
    fn default() -> Self {
        LocalModel {
            shrinkage: vec![DEFAULT_SHRINKAGE],
        }
    }
}

fn check_shrinkage(shrinkage: &[f64]) -> Result<()> {
    if shrinkage.is_empty() || shrinkage.iter().any(|s| !s.is_finite() || *s < 0.0) {
        return Err(Error::Configuration(format!(
            "shrinkage candidates must be a non-empty list of non-negative values, got {:?}",
            shrinkage
        )));
    }
    Ok(())
}

impl Model for LocalModel {
    fn shrinkage(&self) -> &[f64] {
        &self.shrinkage
    }

    fn fit_with(&self, view: &View<'_>, labels: &[bool], shrinkage: f64) -> Result<FittedModel> {
        check_labels(view, labels)?;
        let stats = accumulate(view, labels, 0..view.len(), view.row(0));
        solve(&stats, shrinkage)
    }

    fn score(&self, model: &FittedModel, view: &View<'_>) -> Vec<f64> {
        (0..view.len())
            .into_par_iter()
            .map(|i| model.score_row(view.row(i)))
            .collect()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Linear discriminant model whose work is sharded across a worker pool.
///
/// The pool is owned by the caller, and may be shared with other models.
#[derive(Clone)]
pub struct DistributedModel {
    pool: Arc<ThreadPool>,
    shards: usize,
    shrinkage: Vec<f64>,
}

impl DistributedModel {
    pub fn new(pool: Arc<ThreadPool>, shards: usize, shrinkage: Vec<f64>) -> Result<Self> {
        if shards == 0 {
            return Err(Error::Configuration(
                "distributed model requires at least one shard".into(),
            ));
        }
        check_shrinkage(&shrinkage)?;
        Ok(DistributedModel {
            pool,
            shards,
            shrinkage,
        })
    }

    /// One shard per worker thread of `pool`
    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        let shards = pool.current_num_threads().max(1);
        DistributedModel {
            pool,
            shards,
            shrinkage: vec![DEFAULT_SHRINKAGE],
        }
    }

    pub fn shards(&self) -> usize {
        self.shards
    }
}

impl std::fmt::Debug for DistributedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedModel")
            .field("workers", &self.pool.current_num_threads())
            .field("shards", &self.shards)
            .field("shrinkage", &self.shrinkage)
            .finish()
    }
}

impl Model for DistributedModel {
    fn shrinkage(&self) -> &[f64] {
        &self.shrinkage
    }

    fn fit_with(&self, view: &View<'_>, labels: &[bool], shrinkage: f64) -> Result<FittedModel> {
        check_labels(view, labels)?;
        let shift = view.row(0);
        let ranges = shard_ranges(view.len(), self.shards);

        let partial = self.pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| accumulate(view, labels, range, shift))
                .collect::<Vec<_>>()
        });

        // Merge in shard order, so the result does not depend on scheduling
        let stats = partial
            .iter()
            .fold(Statistics::new(shift.to_vec()), |acc, shard| acc.merge(shard));
        solve(&stats, shrinkage)
    }

    fn score(&self, model: &FittedModel, view: &View<'_>) -> Vec<f64> {
        let ranges = shard_ranges(view.len(), self.shards);
        let partial = self.pool.install(|| {
            ranges
                .into_par_iter()
                .map(|range| {
                    range
                        .map(|i| model.score_row(view.row(i)))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        });
        partial.into_iter().flatten().collect()
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}
