//! Error module for the Rusty Ephys library.
use thiserror::Error;

use crate::core::UnitId;

/// Error types for the library.
#[derive(Debug, PartialEq, Error)]
pub enum EphysError {
    /// Error for invalid parameters, e.g., a non-positive sampling frequency.
    #[error("Invalid parameters: {0}")]
    InvalidParameter(String),
    /// A named array is absent from a snippet dataset.
    #[error("Missing array: {0}")]
    MissingArray(String),
    /// A named array exists but its content does not match what is expected (rank, shape, values).
    #[error("Malformed array: {0}")]
    MalformedArray(String),
    /// The requested unit does not exist.
    #[error("Unit {0} not found")]
    UnitNotFound(UnitId),
    /// Error for spike trains which are not sorted or fall outside of the recording.
    #[error("Invalid spike train: {0}")]
    InvalidSpikeTrain(String),
    /// A content URI could not be parsed.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    /// A content URI does not resolve to anything in the store.
    #[error("Content not found: {0}")]
    ContentNotFound(String),
    /// The feed does not exist and was not created.
    #[error("Feed not found: {0}")]
    FeedNotFound(String),
    /// No job is registered under the given name.
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    /// The job arguments could not be decoded into the declared input type.
    #[error("Invalid arguments for job {name}: {message}")]
    InvalidJobArguments { name: String, message: String },
    /// Error for (de)serialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Error for I/O operations.
    #[error("I/O error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for EphysError {
    fn from(e: std::io::Error) -> Self {
        EphysError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for EphysError {
    fn from(e: serde_json::Error) -> Self {
        EphysError::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for EphysError {
    fn from(e: toml::de::Error) -> Self {
        EphysError::SerializationError(e.to_string())
    }
}

#[cfg(feature = "hdf5")]
impl From<hdf5::Error> for EphysError {
    fn from(e: hdf5::Error) -> Self {
        EphysError::IOError(format!("HDF5: {}", e))
    }
}
