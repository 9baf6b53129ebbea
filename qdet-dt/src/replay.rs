//! Record replay input
//!
//! Pull-based record source reading a JSON-lines file, one `Record` per
//! line, in arrival order. The engine consumes the iterator and dispatches
//! each record to the subscribed detectors.

use crate::error::{Error, Result};
use qdet_common::Record;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// JSON-lines record file reader
pub struct JsonLinesRecordSource {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    line_number: usize,
}

impl JsonLinesRecordSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::NoData(format!("cannot open record file {}: {e}", path.display()))
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path: path.to_path_buf(),
            line_number: 0,
        })
    }
}

impl Iterator for JsonLinesRecordSource {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_number += 1;
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<Record>(&line).map_err(|e| {
                        Error::Provider(format!(
                            "{}:{}: malformed record: {e}",
                            self.path.display(),
                            self.line_number
                        ))
                    });
                    return Some(parsed.and_then(|record| {
                        if record.sampling_frequency > 0.0 {
                            Ok(record)
                        } else {
                            Err(Error::Provider(format!(
                                "{}:{}: non-positive sampling frequency",
                                self.path.display(),
                                self.line_number
                            )))
                        }
                    }));
                }
                Err(e) => return Some(Err(Error::Io(e))),
            }
        }
    }
}
