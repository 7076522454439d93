// src/engine/run_log.rs

//! Accumulates the human-readable log stored on a run record.
//!
//! Blocks are separated by a blank line, in the order the steps ran.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    text: String,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn separate(&mut self) {
        if !self.text.is_empty() {
            while self.text.ends_with('\n') {
                self.text.pop();
            }
            self.text.push_str("\n\n");
        }
    }

    /// Append captured process output verbatim as its own block.
    pub fn output(&mut self, output: &str) {
        if output.trim().is_empty() {
            return;
        }
        self.separate();
        self.text.push_str(output);
    }

    /// Append a `heading:` line followed by `body`.
    pub fn section(&mut self, heading: &str, body: &str) {
        self.separate();
        self.text.push_str(heading);
        self.text.push_str(":\n");
        self.text.push_str(body.trim_end());
    }

    /// Append a single-line note.
    pub fn note(&mut self, line: impl AsRef<str>) {
        self.separate();
        self.text.push_str(line.as_ref());
    }

    pub fn warning(&mut self, line: impl AsRef<str>) {
        self.note(format!("Warning: {}", line.as_ref()));
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_blank_line_separated() {
        let mut log = RunLog::new();
        log.output("   \n");
        assert!(log.is_empty());

        log.output("Creating archive\n");
        log.section("Prune output", "Keeping archive: a\n");
        log.warning("No JSON output from borg create");
        log.note("Prune skipped: No retention policies configured");

        assert_eq!(
            log.as_str(),
            "Creating archive\n\nPrune output:\nKeeping archive: a\n\n\
             Warning: No JSON output from borg create\n\n\
             Prune skipped: No retention policies configured"
        );
    }
}
