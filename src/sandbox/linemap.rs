//! Source lines of simple assignments, for mapping element identifiers back
//! onto the script.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::compile;

static ASSIGNMENT: Lazy<Option<Regex>> = Lazy::new(|| compile(r"^\s*(?:let\s+|const\s+)?([A-Za-z_]\w*)\s*=[^=]"));

/// Variable name → zero-based line of its last simple assignment.
pub fn assignment_lines(script: &str) -> HashMap<String, usize> {
    let mut lines = HashMap::new();
    let Some(assignment) = ASSIGNMENT.as_ref() else {
        return lines;
    };
    for (idx, line) in script.lines().enumerate() {
        if line.trim_start().starts_with("//") {
            continue;
        }
        if let Some(caps) = assignment.captures(line) {
            lines.insert(caps[1].to_string(), idx);
        }
    }
    lines
}
