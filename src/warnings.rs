//! Warning log threaded through one normalization run.
//!
//! Every stage that recovers from a failure or fills in a default records a
//! human-readable line here. The log is an explicit context object: stages
//! take `&mut WarningLog`, nothing global is involved.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarningLog {
    entries: Vec<String>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning. Also emitted through `tracing` at WARN.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "scoreprep::warnings", "{message}");
        self.entries.push(message);
    }

    pub fn extend(&mut self, other: WarningLog) {
        self.entries.extend(other.entries);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Compact, header-safe summary: the first `max_entries` warnings joined
    /// by `"; "`, cut to `max_chars` (ending in "..." when cut), with every
    /// non-ASCII character replaced by '?'.
    pub fn summary(&self, max_entries: usize, max_chars: usize) -> String {
        let joined = self
            .entries
            .iter()
            .take(max_entries)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("; ");

        let ascii: String = joined
            .chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect();

        if ascii.len() > max_chars {
            let keep = max_chars.saturating_sub(3);
            format!("{}...", &ascii[..keep])
        } else {
            ascii
        }
    }
}

impl<'a> IntoIterator for &'a WarningLog {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_keeps_first_three() {
        let mut log = WarningLog::new();
        for i in 0..5 {
            log.push(format!("w{i}"));
        }
        assert_eq!(log.summary(3, 500), "w0; w1; w2");
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn summary_truncates_with_ellipsis() {
        let mut log = WarningLog::new();
        log.push("x".repeat(600));
        let summary = log.summary(3, 500);
        assert_eq!(summary.len(), 500);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn summary_replaces_non_ascii() {
        let mut log = WarningLog::new();
        log.push("Cifrado 'C-7' → 'Cm7'");
        assert_eq!(log.summary(3, 500), "Cifrado 'C-7' ? 'Cm7'");
    }
}
