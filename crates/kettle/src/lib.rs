//! Semi-supervised confidence estimation for peptide-spectrum matches.
//!
//! A linear model is iteratively retrained to separate confident target PSMs
//! from decoys, inside a cross-validation scheme, and the resulting scores
//! are turned into q-values and posterior error probabilities.

pub mod brew;
pub mod confidence;
pub mod dataset;
pub mod fdr;
pub mod ml;
pub mod model;

pub use brew::{brew, BrewParameters, Direction};
pub use confidence::{Confidence, Grouping, Level};
pub use dataset::{Dataset, Folds, GroupBy, Psm, View};
pub use model::{DistributedModel, FittedModel, LocalModel, Model};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid or contradictory parameters, detected before training
    #[error("configuration error: {0}")]
    Configuration(String),
    /// FDR cannot be estimated, e.g. no decoys are present
    #[error("undefined FDR: {0}")]
    UndefinedFdr(String),
    /// Degenerate training data for a single fit
    #[error("model fit error: {0}")]
    ModelFit(String),
    #[error("fold {fold} failed: {source}")]
    Fold {
        fold: usize,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
