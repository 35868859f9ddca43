use fishhook_core::RegionError;
use thiserror::Error;

/// Errors that can occur when building a [`GenomeIndex`](crate::GenomeIndex).
#[derive(Debug, Error)]
pub enum OverlapError {
    #[error(transparent)]
    Region(#[from] RegionError),
}
