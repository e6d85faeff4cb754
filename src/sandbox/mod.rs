//! Script execution sandbox.
//!
//! A script runs in a rhai engine pre-populated with the notation
//! vocabulary. What gets rendered is the value passed to `show(x)`; when a
//! script never calls `show`, the result is discovered from its variables:
//!
//! 1. `score`, when it holds a Score
//! 2. the first variable holding a notation object
//! 3. `xml`, holding document text (returned as-is)
//! 4. `mxl`, holding packed document bytes
//! 5. `path`, holding a file path
//!
//! Execution never raises: every failure comes back as the error report of
//! the [`ScriptRun`].

mod linemap;
mod preprocess;
mod vocab;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use regex::Regex;
use rhai::{Blob, Dynamic, EvalAltResult, Position, Scope};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::harmony::ChordSymbol;
use crate::model::*;
use crate::pipeline;
use crate::shape::ScoreInput;
use crate::warnings::WarningLog;

pub use linemap::assignment_lines;
pub use preprocess::preprocess;
pub use vocab::{build_engine, element_of, Duration, ResultSlot};

/// Lyric given to notes and chords that have none.
pub const PLACEHOLDER_LYRIC: &str = " ";

/// Outcome of one script run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptRun {
    /// Rendered document, absent on error
    pub document: Option<String>,
    pub warnings: WarningLog,
    /// Error report, absent on success
    pub error: Option<String>,
    /// Element identifier → zero-based script line of its assignment
    pub element_lines: BTreeMap<String, usize>,
}

/// What discovery settled on.
enum Found {
    Notation(Dynamic),
    Xml(String),
    Packed(Blob),
    Path(String),
}

pub(crate) fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!(pattern, "invalid pattern: {e}");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Execution
// ═══════════════════════════════════════════════════════════════════════

/// Run a script and render what it produced.
pub fn run(script: &str, config: &PipelineConfig) -> ScriptRun {
    let warnings = Rc::new(RefCell::new(WarningLog::new()));
    let slot: ResultSlot = Rc::new(RefCell::new(None));

    let source = preprocess(script, &mut warnings.borrow_mut());
    let engine = build_engine(warnings.clone(), slot.clone());
    let mut scope = Scope::new();

    let executed = engine
        .compile(&source)
        .map_err(Box::<EvalAltResult>::from)
        .and_then(|ast| engine.run_ast_with_scope(&mut scope, &ast));

    // The engine holds the other handles; release them before unwrapping.
    drop(engine);
    let mut log = take_log(warnings);

    if let Err(err) = executed {
        let report = error_report(&err);
        error!("script failed: {err}");
        return ScriptRun {
            warnings: log,
            error: Some(report),
            ..ScriptRun::default()
        };
    }

    let shown = slot.borrow_mut().take();
    let element_lines = element_lines(script, &scope);

    let found = match shown {
        Some(value) => Some(Found::Notation(value)),
        None => discover(&scope),
    };
    let Some(found) = found else {
        return ScriptRun {
            warnings: log,
            error: Some(
                "No notation object, 'xml', 'mxl' or 'path' variable found in the script"
                    .to_string(),
            ),
            ..ScriptRun::default()
        };
    };

    let input = match found {
        Found::Xml(text) => {
            debug!("script produced document text");
            return ScriptRun {
                document: Some(text),
                element_lines,
                ..ScriptRun::default()
            };
        }
        Found::Notation(mut value) => {
            record_lyrics(placeholder_lyrics(&mut value), &mut log);
            into_input(value)
        }
        Found::Packed(bytes) => ScoreInput::Packed(bytes),
        Found::Path(path) => ScoreInput::Path(PathBuf::from(path.trim())),
    };

    match pipeline::to_musicxml(input, config, &mut log) {
        Ok(document) => ScriptRun {
            document: Some(document),
            warnings: log,
            error: None,
            element_lines,
        },
        Err(e) => {
            error!("script result could not be rendered: {e}");
            ScriptRun {
                warnings: log,
                error: Some(format!("Error: {e}")),
                ..ScriptRun::default()
            }
        }
    }
}

fn take_log(warnings: Rc<RefCell<WarningLog>>) -> WarningLog {
    match Rc::try_unwrap(warnings) {
        Ok(cell) => cell.into_inner(),
        Err(shared) => shared.borrow().clone(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Discovery
// ═══════════════════════════════════════════════════════════════════════

/// Types a script result may be rendered from.
fn is_primitive(value: &Dynamic) -> bool {
    value.is::<Score>()
        || value.is::<Part>()
        || value.is::<Stream>()
        || value.is::<Measure>()
        || value.is::<Note>()
        || value.is::<Chord>()
        || value.is::<TimeSignature>()
        || value.is::<Clef>()
        || value.is::<Key>()
        || value.is::<MetronomeMark>()
        || value.is::<TextExpression>()
        || value.is::<ChordSymbol>()
        || value.is::<RomanNumeral>()
}

fn discover(scope: &Scope) -> Option<Found> {
    let var = |name: &str| scope.get(name).filter(|v| !v.is_unit());

    if let Some(score) = var("score").filter(|v| v.is::<Score>()) {
        return Some(Found::Notation(score.clone()));
    }
    // iter_raw yields the newest variable first
    let declared: Vec<_> = scope.iter_raw().collect();
    if let Some((name, _, value)) = declared.into_iter().rev().find(|(_, _, v)| is_primitive(v)) {
        debug!(var = name, "rendering first notation variable");
        return Some(Found::Notation(value.clone()));
    }
    if let Some(text) = var("xml").and_then(|v| v.clone().into_string().ok()) {
        if text.trim_start().starts_with("<?xml") {
            return Some(Found::Xml(text));
        }
    }
    if let Some(bytes) = var("mxl").and_then(|v| v.clone().try_cast::<Blob>()) {
        return Some(Found::Packed(bytes));
    }
    if let Some(path) = var("path").and_then(|v| v.clone().into_string().ok()) {
        return Some(Found::Path(path));
    }
    None
}

/// Resolve a script value into the pipeline's input shape.
fn into_input(value: Dynamic) -> ScoreInput {
    if value.is::<Score>() {
        return value.try_cast::<Score>().map_or_else(empty, ScoreInput::Score);
    }
    if value.is::<Part>() {
        return value.try_cast::<Part>().map_or_else(empty, ScoreInput::Part);
    }
    if value.is::<Stream>() {
        return value.try_cast::<Stream>().map_or_else(empty, ScoreInput::Stream);
    }
    if value.is::<Measure>() {
        return value.try_cast::<Measure>().map_or_else(empty, ScoreInput::Measure);
    }
    if let Some(element) = element_of(&value) {
        return ScoreInput::Element(element);
    }
    if value.is_array() {
        let items = value.into_array().unwrap_or_default();
        return ScoreInput::Sequence(items.into_iter().map(into_input).collect());
    }
    if value.is_string() {
        return ScoreInput::Text(value.into_string().unwrap_or_default());
    }
    if value.is::<Blob>() {
        return value.try_cast::<Blob>().map_or_else(empty, ScoreInput::Packed);
    }
    ScoreInput::Other {
        type_name: value.type_name().to_string(),
        element: None,
    }
}

fn empty() -> ScoreInput {
    ScoreInput::Sequence(Vec::new())
}

// ═══════════════════════════════════════════════════════════════════════
// Post-processing
// ═══════════════════════════════════════════════════════════════════════

fn record_lyrics(count: usize, log: &mut WarningLog) {
    if count > 0 {
        info!(count, "added placeholder lyrics");
        log.push(format!(
            "{count} note(s) without lyric received an invisible lyric for mapping"
        ));
    }
}

/// Give every lyric-less note and chord inside the rendered container the
/// placeholder lyric. Returns how many were filled.
fn placeholder_lyrics(value: &mut Dynamic) -> usize {
    let mut count = 0;
    let mut fill = |element: &mut Element| {
        if element.lyric().is_none() {
            element.set_lyric(PLACEHOLDER_LYRIC);
            count += 1;
        }
    };

    if value.is::<Score>() {
        if let Some(mut score) = value.write_lock::<Score>() {
            score.for_each_sounding_mut(&mut fill);
        }
    } else if value.is::<Part>() {
        if let Some(mut part) = value.write_lock::<Part>() {
            part.for_each_sounding_mut(&mut fill);
        }
    } else if value.is::<Stream>() {
        if let Some(mut stream) = value.write_lock::<Stream>() {
            let stream = &mut *stream;
            stream
                .measures
                .iter_mut()
                .flat_map(|m| m.elements.iter_mut())
                .chain(stream.elements.iter_mut())
                .filter(|p| p.element.is_pitched())
                .for_each(|p| fill(&mut p.element));
        }
    } else if value.is::<Measure>() {
        if let Some(mut measure) = value.write_lock::<Measure>() {
            measure
                .elements
                .iter_mut()
                .filter(|p| p.element.is_pitched())
                .for_each(|p| fill(&mut p.element));
        }
    }
    count
}

/// Map identifiers of element variables onto the line of their assignment.
fn element_lines(script: &str, scope: &Scope) -> BTreeMap<String, usize> {
    let assignments = assignment_lines(script);
    let mut map = BTreeMap::new();
    for (name, _, value) in scope.iter_raw() {
        let Some(line) = assignments.get(name) else {
            continue;
        };
        let id = element_of(value).and_then(|e| e.id().map(str::to_string));
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            debug!(%id, line, "element line");
            map.insert(id, *line);
        }
    }
    map
}

// ═══════════════════════════════════════════════════════════════════════
// Error reports
// ═══════════════════════════════════════════════════════════════════════

/// Multi-line report of a script failure: the error, where it happened and
/// the chain of calls that led there, outermost first.
pub fn error_report(err: &EvalAltResult) -> String {
    let mut calls = Vec::new();
    let mut current = err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) => {
                calls.push(format!("in function '{name}'{}", at(*pos)));
                current = inner;
            }
            EvalAltResult::ErrorInModule(name, inner, pos) => {
                calls.push(format!("in module '{name}'{}", at(*pos)));
                current = inner;
            }
            _ => break,
        }
    }

    let mut report = String::from("Script error\n");
    for call in &calls {
        report.push_str("  ");
        report.push_str(call);
        report.push('\n');
    }
    report.push_str(&format!("{current}"));
    if let Some(line) = current.position().line() {
        report.push_str(&format!("\n  at line {line}"));
    }
    report
}

fn at(pos: Position) -> String {
    match (pos.line(), pos.position()) {
        (Some(line), Some(col)) => format!(" (line {line}, position {col})"),
        (Some(line), None) => format!(" (line {line})"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run_default(script: &str) -> ScriptRun {
        run(script, &PipelineConfig::default())
    }

    #[test]
    fn shown_value_wins_over_variables() {
        let out = run_default(
            r#"
            let score = stream::Score();
            let n = note::Note("D4");
            show(note::Note("G4"));
            "#,
        );
        assert_eq!(out.error, None);
        let doc = out.document.unwrap();
        assert!(doc.contains("<step>G</step>"));
        assert!(!doc.contains("<step>D</step>"));
    }

    #[test]
    fn first_notation_variable_is_rendered() {
        let out = run_default("let label = \"x\";\nlet n = note::Note(\"E4\");");
        assert_eq!(out.error, None);
        assert!(out.document.unwrap().contains("<step>E</step>"));
    }

    #[test]
    fn score_variable_wins_over_earlier_variables() {
        let out = run_default(
            r#"
            let n = note::Note("D4");
            let score = stream::Score();
            let p = stream::Part();
            p.append(note::Note("G4", 4));
            score.append(p);
            "#,
        );
        assert_eq!(out.error, None);
        let doc = out.document.unwrap();
        assert!(doc.contains("<step>G</step>"));
        assert!(!doc.contains("<step>D</step>"));
    }

    #[test]
    fn earliest_of_several_notation_variables_is_rendered() {
        let out = run_default("let a = note::Note(\"D4\");\nlet b = note::Note(\"E4\");");
        assert_eq!(out.error, None);
        let doc = out.document.unwrap();
        assert!(doc.contains("<step>D</step>"));
        assert!(!doc.contains("<step>E</step>"));
    }

    #[test]
    fn score_keeps_its_parts_and_title_without_show() {
        let out = run_default(
            r#"
            let s = stream::Score();
            s.metadata = metadata::Metadata();
            s.metadata.title = "Tune";
            let p = stream::Part();
            p.append(note::Note("C4", 4));
            s.append(p);
            "#,
        );
        assert_eq!(out.error, None);
        assert!(out.document.unwrap().contains("<work-title>Tune</work-title>"));
        assert!(!out.warnings.entries().iter().any(|w| w.contains("Missing title")));
        let lyric_warnings = out
            .warnings
            .entries()
            .iter()
            .filter(|w| w.contains("without lyric"))
            .count();
        assert_eq!(lyric_warnings, 1);
    }

    #[test]
    fn notation_variable_wins_over_document_text() {
        let mut scope = Scope::new();
        scope.push("xml", "<?xml version=\"1.0\"?><score-partwise/>".to_string());
        scope.push("n", Note::new(Pitch::new('C', 4, None), 1.0));
        assert!(matches!(discover(&scope), Some(Found::Notation(_))));
    }

    #[test]
    fn document_text_wins_over_bytes_and_path() {
        let mut scope = Scope::new();
        scope.push("path", "/tmp/a.musicxml".to_string());
        scope.push("mxl", Blob::from(vec![0x50_u8, 0x4b]));
        scope.push("xml", "<?xml version=\"1.0\"?><score-partwise/>".to_string());
        assert!(matches!(discover(&scope), Some(Found::Xml(_))));
    }

    #[test]
    fn bytes_win_over_path() {
        let mut scope = Scope::new();
        scope.push("path", "/tmp/a.musicxml".to_string());
        scope.push("xml", "not a document".to_string());
        scope.push("mxl", Blob::from(vec![0x50_u8, 0x4b]));
        match discover(&scope) {
            Some(Found::Packed(bytes)) => assert_eq!(bytes, vec![0x50, 0x4b]),
            _ => panic!("expected packed bytes"),
        }
    }

    #[test]
    fn path_is_the_last_resort() {
        let mut scope = Scope::new();
        scope.push("label", "x".to_string());
        scope.push("path", "/tmp/a.musicxml".to_string());
        match discover(&scope) {
            Some(Found::Path(path)) => assert_eq!(path, "/tmp/a.musicxml"),
            _ => panic!("expected a path"),
        }
    }

    #[test]
    fn raw_document_text_is_returned_untouched() {
        let xml = "<?xml version=\"1.0\"?><score-partwise version=\"4.0\"><part-list/></score-partwise>";
        let out = run_default(&format!("let xml = `{xml}`;"));
        assert_eq!(out.document.as_deref(), Some(xml));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn nothing_to_render_is_an_error() {
        let out = run_default("let x = 1 + 2;");
        assert_eq!(out.document, None);
        assert!(out.error.unwrap().contains("No notation object"));
    }

    #[test]
    fn failures_come_back_as_reports() {
        let out = run_default("let n = note::Note(\"H9\");");
        let report = out.error.unwrap();
        assert!(report.starts_with("Script error"));
        assert!(report.contains("invalid pitch name"));
        assert!(out.element_lines.is_empty());
    }

    #[test]
    fn syntax_errors_are_reported() {
        let out = run_default("let s = stream::Score(;\n");
        assert!(out.error.is_some());
        assert_eq!(out.document, None);
    }

    #[test]
    fn call_chain_is_listed() {
        let out = run_default("fn build() { note::Note(\"nope\") }\nlet n = build();");
        let report = out.error.unwrap();
        assert!(report.contains("in function 'build'"));
    }

    #[test]
    fn placeholder_lyrics_fill_containers() {
        let out = run_default(
            r#"
            let m = stream::Measure(1);
            let sung = note::Note("C4");
            sung.lyric = "la";
            m.append(sung);
            m.append(note::Note("D4"));
            m.append(chord::Chord(["C4", "E4"]));
            "#,
        );
        assert_eq!(out.error, None);
        assert!(out
            .warnings
            .entries()
            .iter()
            .any(|w| w.starts_with("2 note(s) without lyric")));
        assert!(out.document.unwrap().contains("<text>la</text>"));
    }

    #[test]
    fn element_ids_map_to_assignment_lines() {
        let out = run_default(
            "let s = stream::Stream();\nlet c1 = harmony::ChordSymbol(\"Cmaj7\");\nc1.id = \"c1\";\nlet t = expressions::TextExpression(\"Swing\");\nt.id = \"intro\";\ns.append(c1);\ns.append(t);\nshow(s);",
        );
        assert_eq!(out.error, None);
        assert_eq!(out.element_lines.get("c1"), Some(&1));
        assert_eq!(out.element_lines.get("intro"), Some(&3));
    }

    #[test]
    fn imported_chord_constructor_stays_safe() {
        let out = run_default(
            "from music21 import harmony\nlet c = harmony::ChordSymbol(\"XXX###\");\nlet m = stream::Measure(1);\nm.append(c);\nshow(m);",
        );
        assert_eq!(out.error, None);
        assert!(out.document.unwrap().contains("XXX###"));
    }
}
