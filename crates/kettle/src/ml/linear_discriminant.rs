//! Linear Discriminant Analysis for FDR refinement
//!
//! The model is a two-class Fisher discriminant over standardized features.
//! Everything it needs is contained in additive sufficient statistics
//! (class counts, class sums and class sums of outer products), so the
//! statistics for a large training set can be accumulated in independent
//! shards and merged before solving. Feature values are shifted by a
//! reference row before accumulation: constant features then produce exact
//! zeros, and large offsets (precursor masses, retention times) do not cancel
//! catastrophically when the scatter matrices are formed.

use super::gauss::Gauss;
use super::matrix::{dot, Matrix};
use crate::{Error, Result};

const DECOY: usize = 0;
const TARGET: usize = 1;

/// Additive sufficient statistics of a labelled feature sample
#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    shift: Vec<f64>,
    count: [usize; 2],
    sum: [Vec<f64>; 2],
    cross: [Matrix; 2],
}

impl Statistics {
    /// Empty statistics for feature vectors of length `shift.len()`. Every
    /// shard that is later merged must use the same `shift`
    pub fn new(shift: Vec<f64>) -> Self {
        let cols = shift.len();
        Statistics {
            shift,
            count: [0, 0],
            sum: [vec![0.0; cols], vec![0.0; cols]],
            cross: [Matrix::zeros(cols, cols), Matrix::zeros(cols, cols)],
        }
    }

    pub fn cols(&self) -> usize {
        self.shift.len()
    }

    /// Add a single feature vector, `target` is the class label
    pub fn push(&mut self, row: &[f64], target: bool) {
        assert_eq!(row.len(), self.cols(), "feature vector has wrong length");
        let class = if target { TARGET } else { DECOY };
        let x = row
            .iter()
            .zip(&self.shift)
            .map(|(x, s)| x - s)
            .collect::<Vec<_>>();

        self.count[class] += 1;
        for (acc, v) in self.sum[class].iter_mut().zip(&x) {
            *acc += v;
        }
        let cross = &mut self.cross[class];
        for i in 0..x.len() {
            // Only the upper triangle is accumulated, mirrored in `solve`
            for j in i..x.len() {
                cross[(i, j)] += x[i] * x[j];
            }
        }
    }

    /// Merge statistics accumulated over another shard of the same sample
    pub fn merge(mut self, other: &Statistics) -> Self {
        assert_eq!(self.shift, other.shift, "shards must share a reference row");
        for class in [DECOY, TARGET] {
            self.count[class] += other.count[class];
            for (acc, v) in self.sum[class].iter_mut().zip(&other.sum[class]) {
                *acc += v;
            }
            self.cross[class] += &other.cross[class];
        }
        self
    }

    pub fn targets(&self) -> usize {
        self.count[TARGET]
    }

    pub fn decoys(&self) -> usize {
        self.count[DECOY]
    }

    fn total(&self) -> usize {
        self.count[DECOY] + self.count[TARGET]
    }

    fn cross(&self, class: usize, i: usize, j: usize) -> f64 {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        self.cross[class][(i, j)]
    }

    /// Per-feature mean (in shifted coordinates) and standard deviation over
    /// both classes. Zero-variance features get a standard deviation of 1
    fn moments(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.total() as f64;
        let cols = self.cols();
        let mut mean = vec![0.0; cols];
        let mut sd = vec![1.0; cols];
        for j in 0..cols {
            mean[j] = (self.sum[DECOY][j] + self.sum[TARGET][j]) / n;
            let ss = self.cross(DECOY, j, j) + self.cross(TARGET, j, j);
            let var = ss / n - mean[j].powi(2);
            if var > 0.0 && var.sqrt() > 1E-12 * (1.0 + mean[j].abs()) {
                sd[j] = var.sqrt();
            }
        }
        (mean, sd)
    }
}

/// A fitted linear discriminant, expressed in raw feature space:
/// `score = weights . x + intercept`
#[derive(Clone, Debug, PartialEq)]
pub struct LinearDiscriminant {
    weights: Vec<f64>,
    intercept: f64,
}

impl LinearDiscriminant {
    /// Solve for the discriminant direction of standardized features,
    /// `w = (Sw / n + shrinkage * I)^-1 (mu_target - mu_decoy)`, and fold the
    /// standardization back into raw-space weights.
    pub fn solve(stats: &Statistics, shrinkage: f64) -> Result<Self> {
        if stats.targets() == 0 || stats.decoys() == 0 {
            return Err(Error::ModelFit(format!(
                "training labels contain a single class ({} targets, {} decoys)",
                stats.targets(),
                stats.decoys()
            )));
        }

        let cols = stats.cols();
        let n = stats.total() as f64;
        let (mean, sd) = stats.moments();

        let class_mean = |class: usize| {
            stats.sum[class]
                .iter()
                .map(|s| s / stats.count[class] as f64)
                .collect::<Vec<_>>()
        };
        let means = [class_mean(DECOY), class_mean(TARGET)];

        // Pooled within-class scatter of the standardized features
        let mut scatter_within = Matrix::zeros(cols, cols);
        for class in [DECOY, TARGET] {
            let count = stats.count[class] as f64;
            let mu = &means[class];
            for i in 0..cols {
                for j in 0..cols {
                    let s = stats.cross(class, i, j) - count * mu[i] * mu[j];
                    scatter_within[(i, j)] += s / (sd[i] * sd[j] * n);
                }
            }
        }
        scatter_within.add_diagonal(shrinkage);

        let diff = (0..cols)
            .map(|j| (means[TARGET][j] - means[DECOY][j]) / sd[j])
            .collect::<Vec<_>>();

        let solution = Gauss::solve(scatter_within, Matrix::col_vector(diff.clone()))
            .ok_or_else(|| Error::ModelFit("within-class scatter matrix is singular".into()))?;
        let mut direction = solution.col(0).collect::<Vec<_>>();

        // Make it so that target class scores are higher than decoy, so that
        // we can make assumptions about this for ranking
        if dot(&direction, &diff) < 0.0 {
            direction.iter_mut().for_each(|c| *c *= -1.0);
        }

        let weights = direction
            .iter()
            .zip(&sd)
            .map(|(w, s)| w / s)
            .collect::<Vec<_>>();
        // Standardized score is w . (x - shift - mean) / sd
        let intercept = -weights
            .iter()
            .zip(mean.iter().zip(&stats.shift))
            .map(|(w, (m, s))| w * (m + s))
            .sum::<f64>();

        if !weights.iter().all(|w| w.is_finite()) || !intercept.is_finite() {
            return Err(Error::ModelFit(
                "linear model weights include NaN or infinite values".into(),
            ));
        }

        log::trace!("- linear model fit with weights: {:?}", weights);
        Ok(LinearDiscriminant { weights, intercept })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn score(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.intercept
    }

    /// Compose with the affine map `s -> (s - zero) / unit`
    pub fn rescaled(&self, zero: f64, unit: f64) -> Self {
        LinearDiscriminant {
            weights: self.weights.iter().map(|w| w / unit).collect(),
            intercept: (self.intercept - zero) / unit,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ml::all_close;

    #[rustfmt::skip]
    const FEATURES: [[f64; 3]; 8] = [
        [5., 4., 3.],
        [4., 5., 4.],
        [6., 3., 4.],
        [1., 0., 2.],
        [5., 4., 4.],
        [2., 1., 1.],
        [1., 0., 2.5],
        [3., 2., -2.],
    ];
    const TARGETS: [bool; 8] = [true, true, true, false, true, false, false, false];

    fn statistics(rows: &[[f64; 3]], labels: &[bool]) -> Statistics {
        let mut stats = Statistics::new(rows[0].to_vec());
        for (row, label) in rows.iter().zip(labels) {
            stats.push(row, *label);
        }
        stats
    }

    #[test]
    fn linear_discriminant() {
        let stats = statistics(&FEATURES, &TARGETS);
        let lda = LinearDiscriminant::solve(&stats, 1E-3).expect("error training LDA");

        let scores = FEATURES.iter().map(|row| lda.score(row)).collect::<Vec<_>>();
        let min_target = scores
            .iter()
            .zip(TARGETS)
            .filter(|(_, t)| *t)
            .map(|(s, _)| *s)
            .fold(f64::MAX, f64::min);
        let max_decoy = scores
            .iter()
            .zip(TARGETS)
            .filter(|(_, t)| !*t)
            .map(|(s, _)| *s)
            .fold(f64::MIN, f64::max);
        assert!(min_target > max_decoy, "{:?}", scores);

        // Scores are centered on the overall mean
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        assert!(mean.abs() < 1E-9, "{}", mean);
    }

    #[test]
    fn sharded_statistics_merge() {
        let whole = statistics(&FEATURES, &TARGETS);

        let mut left = Statistics::new(FEATURES[0].to_vec());
        let mut right = Statistics::new(FEATURES[0].to_vec());
        for (i, (row, label)) in FEATURES.iter().zip(TARGETS).enumerate() {
            match i < 5 {
                true => left.push(row, label),
                false => right.push(row, label),
            }
        }
        let merged = left.merge(&right);
        assert_eq!(merged.targets(), 4);
        assert_eq!(merged.decoys(), 4);

        let a = LinearDiscriminant::solve(&whole, 1E-3).unwrap();
        let b = LinearDiscriminant::solve(&merged, 1E-3).unwrap();
        assert!(all_close(a.weights(), b.weights(), 1E-9));
        assert!((a.intercept() - b.intercept()).abs() < 1E-9);
    }

    #[test]
    fn constant_feature() {
        let rows = [[1., 7.], [2., 7.], [5., 7.], [6., 7.]];
        let mut stats = Statistics::new(rows[0].to_vec());
        for (row, label) in rows.iter().zip([false, false, true, true]) {
            stats.push(row, label);
        }
        let lda = LinearDiscriminant::solve(&stats, 1E-3).unwrap();
        assert_eq!(lda.weights()[1], 0.0);
        assert!(lda.weights()[0] > 0.0);
    }

    #[test]
    fn single_class() {
        let stats = statistics(&FEATURES[..3], &TARGETS[..3]);
        assert!(matches!(
            LinearDiscriminant::solve(&stats, 1E-3),
            Err(Error::ModelFit(_))
        ));
    }

    #[test]
    fn rescale() {
        let stats = statistics(&FEATURES, &TARGETS);
        let lda = LinearDiscriminant::solve(&stats, 1E-3).unwrap();
        let scaled = lda.rescaled(0.5, 2.0);
        for row in FEATURES.iter() {
            let expected = (lda.score(row) - 0.5) / 2.0;
            assert!((scaled.score(row) - expected).abs() < 1E-12);
        }
    }
}
