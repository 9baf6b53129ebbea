//! Error types for qdet-common
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation across the qdet crates.

use thiserror::Error;

/// Main error type for the shared data model
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed waveform stream identifier
    #[error("Invalid stream id: {0}")]
    InvalidStream(String),

    /// Unknown seismic phase code
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    /// Unknown signal unit
    #[error("Invalid signal unit: {0}")]
    InvalidUnit(String),

    /// Record sample frame violates its invariants
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Time window with end before start or similar
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),
}

/// Convenience Result type using the qdet-common Error
pub type Result<T> = std::result::Result<T, Error>;
