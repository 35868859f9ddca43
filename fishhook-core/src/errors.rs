use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Malformed interval {chr}:{start}-{end}: {reason}")]
    MalformedInterval {
        chr: String,
        start: u32,
        end: u32,
        reason: String,
    },

    #[error("Can't read file: {0}")]
    FileReadError(String),

    #[error("Error parsing region: {0}")]
    RegionParseError(String),

    #[error("Corrupted file. 0 regions found in the file: {0}")]
    EmptyRegionSet(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RegionResult<T> = std::result::Result<T, RegionError>;
