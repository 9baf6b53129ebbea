//! Error types for qdet-dt
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.
//!
//! Operational failures (bad configuration, missing data, provider or
//! processing errors) travel through this enum. Violations of internal
//! invariants, such as a pick-offset table dimension mismatch, are
//! programmer errors and panic instead.

use thiserror::Error;

/// Main error type for the detector module
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid detector or template configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or unknown waveform stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Requested waveform data is unavailable
    #[error("No data: {0}")]
    NoData(String),

    /// Waveform provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Filtering / resampling / correlation processing failure
    #[error("Processing error: {0}")]
    Processing(String),

    /// Shared data model errors
    #[error(transparent)]
    Common(#[from] qdet_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience Result type using the qdet-dt Error
pub type Result<T> = std::result::Result<T, Error>;
