//! Waveform provider implementations
//!
//! `DirectoryWaveformProvider` serves traces from a directory of JSON
//! record files, one file per stream named after the dot-joined stream id.
//! `CachingWaveformProvider` wraps any provider with a read-through cache:
//! writes are serialized behind the lock, reads clone a published `Arc`.

use crate::error::{Error, Result};
use crate::waveform::{prepare, ProcessingConfig, WaveformProvider};
use qdet_common::{Record, StreamId, TimeWindow};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// Provider reading one JSON `Record` file per stream
pub struct DirectoryWaveformProvider {
    dir: PathBuf,
}

impl DirectoryWaveformProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load(&self, stream_id: &StreamId) -> Result<Record> {
        let path = self.dir.join(format!("{stream_id}.json"));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NoData(format!("{stream_id}: no trace file at {}", path.display()))
            } else {
                Error::Provider(format!("{stream_id}: {e}"))
            }
        })?;

        let record: Record = serde_json::from_str(&content)
            .map_err(|e| Error::Provider(format!("{stream_id}: malformed trace file: {e}")))?;

        if &record.stream_id != stream_id {
            return Err(Error::Provider(format!(
                "{}: trace file {} carries stream id {}",
                stream_id,
                path.display(),
                record.stream_id
            )));
        }

        Ok(record)
    }
}

impl WaveformProvider for DirectoryWaveformProvider {
    fn get(
        &self,
        stream_id: &StreamId,
        window: &TimeWindow,
        config: &ProcessingConfig,
    ) -> Result<Record> {
        let record = self.load(stream_id)?;

        // Fetch padded so the final trim cuts away the filter transients.
        let padded = window.padded(config.filter_margin_seconds);
        let available = record.time_window();
        if !(available.start <= padded.start && padded.end <= available.end) {
            return Err(Error::NoData(format!(
                "{stream_id}: trace covers {} - {}, requested {} - {}",
                available.start, available.end, padded.start, padded.end
            )));
        }

        debug!("{stream_id}: preparing trace for {} - {}", window.start, window.end);
        let prepared = prepare(record, window, config)?;
        Ok(prepared)
    }
}

/// Read-through cache around any waveform provider
pub struct CachingWaveformProvider<P> {
    inner: P,
    cache: RwLock<HashMap<String, Arc<Record>>>,
}

impl<P> CachingWaveformProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(stream_id: &StreamId, window: &TimeWindow, config: &ProcessingConfig) -> String {
        format!(
            "{stream_id}|{}|{}|{}",
            window.start.timestamp_nanos_opt().unwrap_or_default(),
            window.end.timestamp_nanos_opt().unwrap_or_default(),
            config.fingerprint()
        )
    }
}

impl<P: WaveformProvider> WaveformProvider for CachingWaveformProvider<P> {
    fn get(
        &self,
        stream_id: &StreamId,
        window: &TimeWindow,
        config: &ProcessingConfig,
    ) -> Result<Record> {
        let key = Self::key(stream_id, window, config);

        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            trace!("{stream_id}: cache hit");
            return Ok(cached.as_ref().clone());
        }

        let record = self.inner.get(stream_id, window, config)?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let published = cache.entry(key).or_insert_with(|| Arc::new(record));
        Ok(published.as_ref().clone())
    }
}
