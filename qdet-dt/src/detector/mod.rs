//! Streaming detection engine
//!
//! One detector searches the continuous streams of its channels for repeats
//! of a reference origin:
//!
//! 1. [`stream::StreamState`] keeps per-channel continuity (gap detection,
//!    interpolation, filter state).
//! 2. [`processor::TemplateProcessor`] cross-correlates a template against
//!    the prepared channel samples and emits peak matches.
//! 3. [`linker::Linker`] associates matches across channels under the
//!    pick-offset ordering constraint ([`pot`]).
//! 4. [`Detector`] owns all of the above and converts linker results into
//!    published [`qdet_common::Detection`] values.

pub mod detector;
pub mod linker;
pub mod pot;
pub mod processor;
pub mod stream;

pub use detector::{Detector, DetectorBuilder, DetectorStatus};
pub use linker::{Linker, LinkerResult, LinkerStatus, TemplateResult};
pub use pot::{validate_pick_offsets, PickOffsetTable, PickOffsetValidation};
pub use processor::{MatchResult, ProcessorState, TemplateProcessor, TemplateWaveform};
pub use stream::{GapConfig, PreparedFeed, StreamState};
