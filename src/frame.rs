//! Newline-delimited JSON framing for the IPC byte stream.

use serde_json::Value;
use thiserror::Error;

/// A line that could not be parsed as JSON.
#[derive(Error, Debug)]
#[error("malformed frame {line:?}: {source}")]
pub struct DecodeError {
  pub line: String,
  #[source]
  pub source: serde_json::Error,
}

/// Splits incoming bytes into JSON frames, keeping an unterminated tail
/// buffered until the rest of it arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
  buffer: Vec<u8>,
  /// Bytes of `buffer` already known to contain no newline.
  scanned: usize,
}

impl FrameDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append raw bytes read from the connection.
  pub fn push(&mut self, bytes: &[u8]) {
    self.buffer.extend_from_slice(bytes);
  }

  /// Take the next complete frame, if one is buffered.
  ///
  /// Blank lines are skipped. `None` means the remaining bytes (if any)
  /// are an incomplete frame.
  pub fn next_frame(&mut self) -> Option<Result<Value, DecodeError>> {
    loop {
      let offset = self.buffer[self.scanned..]
        .iter()
        .position(|b| *b == b'\n');
      let Some(offset) = offset else {
        self.scanned = self.buffer.len();
        return None;
      };

      let end = self.scanned + offset;
      let line: Vec<u8> = self.buffer.drain(..=end).collect();
      self.scanned = 0;

      let line = trim_whitespace(&line[..end]);
      if line.is_empty() {
        continue;
      }

      return Some(serde_json::from_slice(line).map_err(|source| DecodeError {
        line: String::from_utf8_lossy(line).into_owned(),
        source,
      }));
    }
  }

  /// Number of bytes held back as a partial frame.
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
  let start = bytes
    .iter()
    .position(|b| !b.is_ascii_whitespace())
    .unwrap_or(bytes.len());
  let end = bytes
    .iter()
    .rposition(|b| !b.is_ascii_whitespace())
    .map_or(start, |i| i + 1);
  &bytes[start..end]
}
