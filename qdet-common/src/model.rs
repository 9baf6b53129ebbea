//! Picks, arrivals, origins and amplitude measurements

use crate::error::{Error, Result};
use crate::stream::StreamId;
use crate::time::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Phase codes the detector accepts for template arrivals
pub const KNOWN_PHASES: &[&str] = &["P", "Pg", "Pn", "S", "Sg", "Sn"];

/// Validate a phase code against the known phase set.
pub fn validate_phase(phase: &str) -> Result<()> {
    if KNOWN_PHASES.contains(&phase) {
        Ok(())
    } else {
        Err(Error::InvalidPhase(phase.to_string()))
    }
}

/// A phase onset observed (or expected) on a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub time: DateTime<Utc>,
    pub stream_id: StreamId,
}

/// Expected timing of a phase at a station relative to a reference origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub pick: Pick,
    pub phase: String,
    /// Lower time uncertainty in seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_uncertainty: Option<f64>,
    /// Upper time uncertainty in seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_uncertainty: Option<f64>,
}

impl Arrival {
    pub fn new(time: DateTime<Utc>, stream_id: StreamId, phase: impl Into<String>) -> Self {
        Self {
            pick: Pick { time, stream_id },
            phase: phase.into(),
            lower_uncertainty: None,
            upper_uncertainty: None,
        }
    }
}

/// Reference origin a detector searches for repeats of
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
}

/// Physical unit of an amplitude measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalUnit {
    /// Displacement
    #[serde(rename = "m")]
    Meter,
    /// Velocity
    #[serde(rename = "m/s")]
    MeterPerSecond,
    /// Acceleration
    #[serde(rename = "m/s**2")]
    MeterPerSecondSquared,
}

impl fmt::Display for SignalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalUnit::Meter => "m",
            SignalUnit::MeterPerSecond => "m/s",
            SignalUnit::MeterPerSecondSquared => "m/s**2",
        };
        f.write_str(s)
    }
}

impl FromStr for SignalUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "m" => Ok(SignalUnit::Meter),
            "m/s" => Ok(SignalUnit::MeterPerSecond),
            "m/s**2" => Ok(SignalUnit::MeterPerSecondSquared),
            other => Err(Error::InvalidUnit(other.to_string())),
        }
    }
}

/// A single amplitude measured over a time window of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeMeasurement {
    pub stream_id: StreamId,
    pub window: TimeWindow,
    pub value: f64,
    pub unit: SignalUnit,
}
