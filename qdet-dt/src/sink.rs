//! Result sinks
//!
//! Published detections leave the engine through a [`ResultSink`]. The
//! default sink writes one JSON object per line, either to a file or to
//! stdout; the in-memory sink backs tests and embedding.

use crate::error::Result;
use qdet_common::Detection;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Consumer of published detections
pub trait ResultSink: Send {
    fn publish(&mut self, detection: &Detection) -> Result<()>;
}

/// JSON-lines sink writing to a file or stdout
pub struct JsonLinesSink {
    writer: Box<dyn Write + Send>,
}

impl JsonLinesSink {
    pub fn to_file(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
        })
    }

    pub fn to_stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }
}

impl ResultSink for JsonLinesSink {
    fn publish(&mut self, detection: &Detection) -> Result<()> {
        let line = serde_json::to_string(detection)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink collecting detections in memory
#[derive(Default, Clone)]
pub struct MemorySink {
    detections: Arc<Mutex<Vec<Detection>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.detections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.detections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn publish(&mut self, detection: &Detection) -> Result<()> {
        self.detections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(detection.clone());
        Ok(())
    }
}
