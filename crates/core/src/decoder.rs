//! Newline-delimited JSON decoding for streamed generation bodies.
//!
//! The backend writes one JSON object per line, but the transport hands us
//! arbitrary byte chunks. A line (or a multi-byte UTF-8 character) may be
//! split across two reads, so bytes are carried over until the next `\n`.

use crate::record::StreamRecord;
use tracing::debug;

/// Incremental decoder turning byte chunks into [`StreamRecord`]s.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    carry: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every record completed by it, in order.
    ///
    /// The trailing fragment after the last newline stays buffered. Lines
    /// that are not valid records are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        self.carry.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(record) = parse_line(&self.carry[start..end]) {
                records.push(record);
            }
            start = end + 1;
        }
        self.carry.drain(..start);
        records
    }

    /// Parses whatever is left once the body has ended without a final newline.
    pub fn finish(&mut self) -> Option<StreamRecord> {
        let rest = std::mem::take(&mut self.carry);
        parse_line(&rest)
    }

    /// Number of bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<StreamRecord> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamRecord>(line) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, line_len = line.len(), "Skipping undecodable stream line");
            None
        }
    }
}
