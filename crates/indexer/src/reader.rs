use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// One complete record as read from the source, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Arrival order, starting at 0
    pub seq: u64,
    pub fields: Map<String, Value>,
}

/// Everything a single poll produced
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<RawRecord>,
    /// Entries that were read but dropped
    pub anomalies: Vec<String>,
}

impl SourceBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.anomalies.is_empty()
    }
}

/// A tailable, append-only record source.
///
/// Each call to `poll` returns the records that became complete since the previous call, in
/// arrival order. An error means the source is temporarily unreadable; the next poll resumes from
/// the last acknowledged position.
#[async_trait]
pub trait RecordSource: Send {
    async fn poll(&mut self) -> Result<SourceBatch>;

    fn describe(&self) -> String;
}

/// Tails a newline-delimited JSON file
#[derive(Debug)]
pub struct JsonlTailReader {
    path: PathBuf,
    offset: u64,
    next_seq: u64,
    held_tail: Option<Vec<u8>>,
}

impl JsonlTailReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            next_seq: 0,
            held_tail: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes acknowledged so far
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    async fn read_appended(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) => return Err(self.unavailable(&e)),
        };

        if len < self.offset {
            warn!(
                "{} shrank from {} to {len} bytes; re-reading from the start",
                self.path.display(),
                self.offset
            );
            self.offset = 0;
            self.held_tail = None;
        }
        if len == self.offset {
            return Ok(None);
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| self.unavailable(&e))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| self.unavailable(&e))?;
        let mut buf = Vec::with_capacity(usize::try_from(len - self.offset).unwrap_or(0));
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| self.unavailable(&e))?;
        Ok(Some(buf))
    }

    fn unavailable(&self, err: &std::io::Error) -> IndexerError {
        let reason = if err.kind() == ErrorKind::NotFound {
            "file not found".to_string()
        } else {
            err.to_string()
        };
        IndexerError::SourceUnavailable {
            path: self.path.display().to_string(),
            reason,
        }
    }

    fn accept_line(&mut self, line: &[u8], line_offset: u64, batch: &mut SourceBatch) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        match parse_object(line) {
            Ok(fields) => {
                batch.records.push(RawRecord {
                    seq: self.next_seq,
                    fields,
                });
                self.next_seq += 1;
            }
            Err(reason) => {
                let anomaly = format!(
                    "{}: dropped entry at byte {line_offset}: {reason}",
                    self.path.display()
                );
                warn!("{anomaly}");
                batch.anomalies.push(anomaly);
            }
        }
    }
}

#[async_trait]
impl RecordSource for JsonlTailReader {
    async fn poll(&mut self) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();
        let Some(buf) = self.read_appended().await? else {
            return Ok(batch);
        };

        let complete_len = buf.iter().rposition(|b| *b == b'\n').map_or(0, |idx| idx + 1);
        let (complete, tail) = buf.split_at(complete_len);

        let mut line_offset = self.offset;
        for line in complete.split_inclusive(|b| *b == b'\n') {
            self.accept_line(line, line_offset, &mut batch);
            line_offset += line.len() as u64;
        }
        self.offset += complete_len as u64;

        if tail.is_empty() {
            self.held_tail = None;
        } else if self.held_tail.as_deref() == Some(tail) && parse_object(tail).is_ok() {
            // Writers that never terminate their last line would otherwise stall it forever.
            debug!(
                "{}: accepting unterminated final line at byte {}",
                self.path.display(),
                self.offset
            );
            let tail_offset = self.offset;
            self.accept_line(tail, tail_offset, &mut batch);
            self.offset += tail.len() as u64;
            self.held_tail = None;
        } else {
            self.held_tail = Some(tail.to_vec());
        }

        if !batch.records.is_empty() {
            info!(
                "{}: read {} new record(s), offset {}",
                self.path.display(),
                batch.records.len(),
                self.offset
            );
        }
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}

fn parse_object(line: &[u8]) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
