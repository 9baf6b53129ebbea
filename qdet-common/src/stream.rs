//! Waveform stream identifiers
//!
//! A stream is identified by the (network, station, location, channel)
//! tuple. The location code may be empty; all other components are
//! mandatory. The canonical text form is the dot-joined string
//! `NET.STA.LOC.CHA`, which is also the serde representation.

use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of a single waveform stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    network: String,
    station: String,
    location: String,
    channel: String,
}

impl StreamId {
    /// Create a stream id from its components.
    ///
    /// The location code may be empty, everything else must be non-empty.
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        };

        if id.network.is_empty() || id.station.is_empty() || id.channel.is_empty() {
            return Err(Error::InvalidStream(id.to_string()));
        }

        Ok(id)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Station-level key (`NET.STA`), used to count distinct stations.
    pub fn station_key(&self) -> String {
        format!("{}.{}", self.network, self.station)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(Error::InvalidStream(s.to_string()));
        }

        StreamId::new(parts[0], parts[1], parts[2], parts[3])
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
