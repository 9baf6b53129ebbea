//! # QDET Detector Library (qdet-dt)
//!
//! Real-time matched-filter seismic event detection.
//!
//! **Purpose:** Cross-correlate template waveforms against continuous
//! multi-station record streams, associate the per-channel matches across
//! channels, and publish consolidated detections with provenance.
//!
//! **Architecture:** Synchronous per-record pipeline
//! record → stream state (gap handling) → template processors
//! (normalized cross-correlation) → linker (windowed association) →
//! detector façade → publisher/sink.

pub mod amplitude;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod publish;
pub mod replay;
pub mod sink;
pub mod waveform;

pub use error::{Error, Result};
