// src/exec/decode.rs

//! Structured decoding of captured stdout.

use serde_json::Value;
use tracing::debug;

use super::runner::CommandOutput;

/// How a command's stdout should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Raw,
    /// The whole of stdout is one JSON document.
    Json,
    /// One JSON document per non-blank line.
    JsonLines,
}

/// Outcome of decoding a command's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Nothing was decoded: raw mode, a failed command, or empty stdout.
    Skipped,
    Document(Value),
    Records { records: Vec<Value>, skipped: usize },
    /// Stdout was expected to be JSON but was not.
    Malformed(String),
}

impl CommandOutput {
    /// Decode stdout according to `mode`.
    ///
    /// Decoding is only attempted for successful commands with output.
    pub fn decode(&self, mode: OutputMode) -> Decoded {
        if mode == OutputMode::Raw || !self.success || self.stdout.trim().is_empty() {
            return Decoded::Skipped;
        }
        match mode {
            OutputMode::Raw => Decoded::Skipped,
            OutputMode::Json => match decode_json(&self.stdout) {
                Ok(doc) => Decoded::Document(doc),
                Err(e) => Decoded::Malformed(e.to_string()),
            },
            OutputMode::JsonLines => {
                let (records, skipped) = decode_json_lines(&self.stdout);
                Decoded::Records { records, skipped }
            }
        }
    }
}

pub fn decode_json(stdout: &str) -> serde_json::Result<Value> {
    serde_json::from_str(stdout.trim())
}

/// Decode each non-blank line independently; malformed lines are skipped and
/// counted.
pub fn decode_json_lines(stdout: &str) -> (Vec<Value>, usize) {
    let mut skipped = 0;
    let mut records = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => records.push(value),
            Err(e) => {
                debug!(error = %e, "skipping malformed JSON line");
                skipped += 1;
            }
        }
    }

    (records, skipped)
}
