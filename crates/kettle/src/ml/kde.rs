//! Calculate posterior error probabilities for PSMs.
//! We use Kernel Density Estimation to fit a non-parametric model to the
//! target and decoy score distributions. Linear interpolation and binning is
//! used to dramatically speed up the PEP calculation
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]
//! Ma, 2012 [https://pubmed.ncbi.nlm.nih.gov/23176103/]

use super::*;
use rayon::prelude::*;

pub struct Kde<'a> {
    sample: &'a [f64],
    pub bandwidth: f64,
    constant: f64,
}

impl<'a> Kde<'a> {
    /// Gaussian kernel density with Silverman's rule-of-thumb bandwidth
    pub fn new(sample: &'a [f64]) -> Self {
        let factor = 4. / 3.;
        let exponent = 1. / 5.;
        let sigma = std(sample);
        let mut bandwidth = sigma * (factor / sample.len() as f64).powf(exponent);
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            // Degenerate sample (single value): fall back to a unit kernel
            bandwidth = 1.0;
        }
        let constant = (2.0 * std::f64::consts::PI).sqrt() * bandwidth * sample.len() as f64;
        Self {
            sample,
            bandwidth,
            constant,
        }
    }

    fn kernel(&self, x: f64) -> f64 {
        (-0.5 * x.powi(2)).exp()
    }

    pub fn pdf(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let sum = self
            .sample
            .iter()
            .fold(0.0, |acc, xi| acc + self.kernel((x - xi) / h));
        sum / self.constant
    }
}

/// Number of evenly spaced scores the posterior error is evaluated at
const BINS: usize = 1000;

impl Estimator {
    /// Fit target and decoy score densities, and tabulate the posterior
    /// error probability, monotonically decreasing with score
    pub fn fit(scores: &[f64], decoys: &[bool]) -> Self {
        assert_eq!(scores.len(), decoys.len());
        let d = scores
            .iter()
            .zip(decoys)
            .filter(|&(_, d)| *d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        let t = scores
            .iter()
            .zip(decoys)
            .filter(|&(_, d)| !*d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        // Essentially, np.linspace(scores.min(), scores.max(), 1000)
        let mut min_score = f64::MAX;
        let mut max_score = f64::MIN;
        for s in scores {
            min_score = min_score.min(*s);
            max_score = max_score.max(*s);
        }
        let mut score_step = (max_score - min_score) / (BINS - 1) as f64;
        if !score_step.is_finite() || score_step <= 0.0 {
            score_step = 1.0;
        }
        if min_score > max_score {
            min_score = 0.0;
        }

        if d.is_empty() || t.is_empty() {
            // Without one of the populations every PSM is as likely to be
            // incorrect as the decoy fraction says
            let pep = if t.is_empty() { 1.0 } else { 0.0 };
            return Estimator {
                bins: vec![pep; BINS],
                min_score,
                score_step,
            };
        }

        // P(decoy)
        let pi = d.len() as f64 / scores.len() as f64;
        let decoy = Kde::new(&d);
        let target = Kde::new(&t);

        // Calculate PEP for evenly spaced scores
        let mut bins = (0..BINS)
            .into_par_iter()
            .map(|bin| {
                let score = (bin as f64 * score_step) + min_score;
                let decoy = decoy.pdf(score) * pi;
                let target = target.pdf(score) * (1.0 - pi);
                match decoy + target {
                    // Far outside of both distributions
                    total if total <= 0.0 => f64::NAN,
                    total => decoy / total,
                }
            })
            .collect::<Vec<_>>();

        // Bins where both densities underflow inherit from their neighbours:
        // low scores are errors, high scores are not
        let first_finite = bins.iter().position(|x| x.is_finite());
        match first_finite {
            None => bins.iter_mut().for_each(|x| *x = pi),
            Some(_) => {
                let mut last = 1.0;
                for x in bins.iter_mut() {
                    if x.is_nan() {
                        *x = last;
                    } else {
                        last = *x;
                    }
                }
            }
        }

        // Make PEP monotonically decreasing with score
        let init = *bins.last().unwrap_or(&1.0);
        bins.iter_mut().rev().fold(init, |acc, x| {
            *x = acc.max(*x);
            *x
        });

        Estimator {
            bins,
            min_score,
            score_step,
        }
    }
}

pub struct Estimator {
    bins: Vec<f64>,
    min_score: f64,
    score_step: f64,
}

impl Estimator {
    /// Calculate the posterior error probability for a given score, under the
    /// pre-fit non-parametric probability model.
    pub fn posterior_error(&self, score: f64) -> f64 {
        let last = self.bins.len().saturating_sub(1);
        let position = ((score - self.min_score) / self.score_step).max(0.0);
        let bin_lo = last.min(position.floor() as usize);
        let bin_hi = last.min(bin_lo + 1);

        // PEP of lower & one higher bin
        let lower = self.bins[bin_lo];
        let upper = self.bins[bin_hi];

        // What percent of the way to the higher bin are we?
        let linear = (position - bin_lo as f64).clamp(0.0, 1.0);

        // Linear interpolation between lower and upper bin
        let delta = upper - lower;
        (lower + (delta * linear)).clamp(0.0, 1.0)
    }
}
