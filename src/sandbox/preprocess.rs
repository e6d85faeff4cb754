//! Script rewriting ahead of execution.
//!
//! Every rewrite keeps the line count unchanged, so positions reported by
//! the engine and the element line map refer to the submitted script.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::compile;

use crate::warnings::WarningLog;

/// `from <module> import a, b, c`
static IMPORT_LINE: Lazy<Option<Regex>> = Lazy::new(|| compile(r"^(\s*)from\s+([\w.:]+)\s+import\s+(.*?)\s*;?\s*$"));

/// `let s = stream::Score(...)`
static SCORE_ASSIGNMENT: Lazy<Option<Regex>> = Lazy::new(|| compile(r"^\s*(?:let\s+)?([A-Za-z_]\w*)\s*=\s*stream::Score\s*\("));

static METADATA_USE: Lazy<Option<Regex>> = Lazy::new(|| compile(r"\.metadata\.(?:title|composer)"));

static METADATA_INIT: Lazy<Option<Regex>> = Lazy::new(|| compile(r"metadata::Metadata\s*\(|\.metadata\s*=[^=]"));

/// Names the vocabulary already provides in their safe form.
const SUPPLIED_NAMES: &[&str] = &["harmony", "ChordSymbol"];

/// Rewrite import lines and initialize score metadata the script relies on.
pub fn preprocess(script: &str, warnings: &mut WarningLog) -> String {
    let lines: Vec<&str> = script.lines().collect();
    let uses_metadata = lines.iter().any(|l| matches(&METADATA_USE, l));
    let inits_metadata = lines.iter().any(|l| matches(&METADATA_INIT, l));

    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(rewritten) = rewrite_import(line) {
            out.push(rewritten);
            continue;
        }

        if uses_metadata && !inits_metadata {
            if let Some(caps) = SCORE_ASSIGNMENT.as_ref().and_then(|re| re.captures(line)) {
                let var = &caps[1];
                let separator = if line.trim_end().ends_with(';') { " " } else { "; " };
                info!(var, "initializing score metadata");
                warnings.push(format!("Metadata initialized automatically for '{var}'"));
                out.push(format!(
                    "{}{separator}{var}.metadata = metadata::Metadata();",
                    line.trim_end()
                ));
                continue;
            }
        }

        out.push(line.to_string());
    }
    out.join("\n")
}

fn matches(re: &Option<Regex>, line: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(line))
}

/// Inert replacement for an import line, `None` for any other line.
fn rewrite_import(line: &str) -> Option<String> {
    let caps = IMPORT_LINE.as_ref()?.captures(line)?;
    let indent = &caps[1];
    let module = &caps[2];
    let kept: Vec<&str> = caps[3]
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && !SUPPLIED_NAMES.contains(name))
        .collect();

    if kept.is_empty() {
        info!(module, "dropped import line");
        Some(String::new())
    } else {
        info!(module, names = %kept.join(", "), "rewrote import line");
        Some(format!("{indent}// from {module} import {}", kept.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn import_lines_lose_the_chord_constructor() {
        let mut w = WarningLog::new();
        let script = "from music21 import stream, harmony, note\nfrom music21.harmony import ChordSymbol\nlet n = note::Note(\"C4\");";
        let out = preprocess(script, &mut w);
        assert_eq!(
            out,
            "// from music21 import stream, note\n\nlet n = note::Note(\"C4\");"
        );
        assert!(w.is_empty());
    }

    #[test]
    fn metadata_is_initialized_on_the_same_line() {
        let mut w = WarningLog::new();
        let script = "let s = stream::Score();\ns.metadata.title = \"Tune\";";
        let out = preprocess(script, &mut w);
        assert_eq!(
            out,
            "let s = stream::Score(); s.metadata = metadata::Metadata();\ns.metadata.title = \"Tune\";"
        );
        assert_eq!(w.len(), 1);
        assert_eq!(out.lines().count(), script.lines().count());
    }

    #[test]
    fn explicit_metadata_is_left_alone() {
        let mut w = WarningLog::new();
        let script = "let s = stream::Score();\ns.metadata = metadata::Metadata();\ns.metadata.title = \"Tune\";";
        assert_eq!(preprocess(script, &mut w), script);
        assert!(w.is_empty());
    }
}
