use fishhook_core::errors::RegionError;
use fishhook_overlaprs::OverlapError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FishHookError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Overlap(#[from] OverlapError),

    #[error("Event {event} is missing the metadata field '{field}'")]
    MissingEventField { event: String, field: String },

    #[error("Covariate '{covariate}': {reason}")]
    InvalidCovariate { covariate: String, reason: String },

    #[error("Duplicate covariate name: {0}")]
    DuplicateCovariate(String),

    #[error("Unknown covariate: {0}")]
    UnknownCovariate(String),

    #[error("Design matrix is rank deficient; linearly dependent columns: {}", .covariates.join(", "))]
    SingularDesign { covariates: Vec<String> },

    #[error("No hypothesis has enough eligible territory and complete covariates to fit a model")]
    NoFittableHypotheses,

    #[error("Set '{set}' references hypothesis {index}, but only {len} hypotheses exist")]
    InvalidSetReference { set: String, index: usize, len: usize },

    #[error("Set '{set}' references unknown hypothesis identifier '{identifier}'")]
    UnknownSetIdentifier { set: String, identifier: String },

    #[error("Row index {index} out of range for {len} hypotheses")]
    RowOutOfRange { index: usize, len: usize },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, FishHookError>;
