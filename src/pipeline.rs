//! The normalization pipeline and its request-level front door.
//!
//! ```text
//! input ─▶ normalize_to_score ─▶ inject_defaults ─▶ finalize_notation
//!       ─▶ disambiguate_offsets ─▶ dedup ─▶ writer ─▶ dedup_xml ─▶ document
//! ```
//!
//! Every stage either recovers on its own or records a warning; only an
//! unrecognized input shape, a codec failure, a script failure and empty
//! output end a request.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::accompaniment::{self, Rhythm};
use crate::codec;
use crate::config::{AccompanimentConfig, PipelineConfig, WarningConfig};
use crate::dedup::dedup;
use crate::defaults::inject_defaults;
use crate::error::{NormalizeError, PipelineError};
use crate::finalize::finalize_notation;
use crate::midi;
use crate::model::{Element, Measure, Metadata, Part, Placement, Rest, Score, TextExpression};
use crate::offsets::disambiguate_offsets;
use crate::sandbox;
use crate::shape::{looks_like_document, normalize_to_score, ScoreInput};
use crate::warnings::WarningLog;
use crate::writer;
use crate::xml_dedup::dedup_xml;

// ═══════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════

/// Run the in-memory stages: shape normalization, defaults, notation,
/// offsets and duplicates.
pub fn prepare(
    input: ScoreInput,
    config: &PipelineConfig,
    warnings: &mut WarningLog,
) -> Result<Score, PipelineError> {
    let mut score = normalize_to_score(input, warnings)?;
    inject_defaults(&mut score, &config.defaults, warnings);
    finalize_notation(&mut score);
    let shifted = disambiguate_offsets(&mut score, config.offsets.epsilon);
    let removed = dedup(&mut score, warnings);
    debug!(shifted, removed, parts = score.parts.len(), "score prepared");
    Ok(score)
}

/// Normalize any input into a clean MusicXML document.
pub fn to_musicxml(
    input: ScoreInput,
    config: &PipelineConfig,
    warnings: &mut WarningLog,
) -> Result<String, PipelineError> {
    let score = prepare(input, config, warnings)?;
    let xml = writer::to_musicxml(&score)?;
    let xml = dedup_xml(&xml, warnings);
    if xml.trim().is_empty() {
        return Err(PipelineError::EmptyOutput);
    }
    info!(bytes = xml.len(), warnings = warnings.len(), "document ready");
    Ok(xml)
}

/// Drop a leading byte-order mark and surrounding whitespace.
fn clean(document: &str) -> String {
    document.trim_start_matches('\u{feff}').trim().to_string()
}

/// The score served when the pipeline's own output is not a document.
pub fn fallback_score() -> Score {
    let mut text = TextExpression::new("Error: generated MusicXML was invalid");
    text.placement = Some(Placement::Above);

    let mut measure = Measure::new(1);
    measure.append(Element::Text(text));
    measure.append(Element::Rest(Rest::new(4.0)));

    let mut part = Part::new("P1");
    part.append_measure(measure);

    let mut score = Score::new();
    score.metadata = Some(Metadata {
        title: Some("Export Error".to_string()),
        ..Metadata::default()
    });
    score.push_part(part);
    score
}

/// Check that a document starts like one; replace it with the fallback
/// score otherwise.
fn ensure_document(document: String, warnings: &mut WarningLog) -> Result<String, PipelineError> {
    if document.starts_with("<?xml") || document.starts_with("<score-partwise") {
        return Ok(document);
    }
    let head: String = document.chars().take(120).collect();
    error!(%head, "generated document is not MusicXML");
    let fallback = clean(&writer::to_musicxml(&fallback_score())?);
    warnings.push("Invalid MusicXML, a fallback score was generated");
    Ok(fallback)
}

// ═══════════════════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════════════════

/// One render request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// A notation script to execute
    Script(String),
    /// Document text
    Xml(String),
    /// A score file on disk
    Path(PathBuf),
}

/// The document plus everything reported alongside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderResponse {
    pub document: String,
    pub warnings: WarningLog,
    pub element_lines: BTreeMap<String, usize>,
}

/// Serve one render request.
pub fn render_request(
    request: Request,
    config: &PipelineConfig,
) -> Result<RenderResponse, PipelineError> {
    match request {
        Request::Xml(text) if text.trim_start_matches('\u{feff}').trim_start().starts_with("<?xml") => {
            debug!("returning document text as given");
            Ok(RenderResponse {
                document: clean(&text),
                ..RenderResponse::default()
            })
        }
        Request::Xml(text) => {
            if !looks_like_document(&text) {
                return Err(NormalizeError::UnrecognizedShape(
                    "text without an XML declaration".to_string(),
                )
                .into());
            }
            let mut warnings = WarningLog::new();
            let document = clean(&to_musicxml(ScoreInput::Text(text), config, &mut warnings)?);
            Ok(RenderResponse {
                document,
                warnings,
                ..RenderResponse::default()
            })
        }
        Request::Path(path) => {
            let mut warnings = WarningLog::new();
            let document = clean(&to_musicxml(ScoreInput::Path(path), config, &mut warnings)?);
            Ok(RenderResponse {
                document,
                warnings,
                ..RenderResponse::default()
            })
        }
        Request::Script(script) => {
            if script.trim().is_empty() {
                return Err(PipelineError::Script("No script was given".to_string()));
            }
            let run = sandbox::run(&script, config);
            if let Some(report) = run.error {
                return Err(PipelineError::Script(report));
            }
            let mut warnings = run.warnings;
            let document = run
                .document
                .map(|d| clean(&d))
                .filter(|d| !d.is_empty())
                .ok_or(PipelineError::EmptyOutput)?;
            let document = ensure_document(document, &mut warnings)?;
            Ok(RenderResponse {
                document,
                warnings,
                element_lines: run.element_lines,
            })
        }
    }
}

/// Out-of-band metadata of a response, in header-ready form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SideChannel {
    /// Compact ASCII summary of the first warnings, absent when there are none
    pub warnings: Option<String>,
    pub warnings_count: usize,
    /// JSON object of identifier → line, absent when empty
    pub element_line_map: Option<String>,
}

impl SideChannel {
    pub fn from_response(response: &RenderResponse, limits: &WarningConfig) -> Self {
        let warnings = (!response.warnings.is_empty())
            .then(|| response.warnings.summary(limits.max_entries, limits.max_chars));

        let element_line_map = if response.element_lines.is_empty() {
            None
        } else {
            match serde_json::to_string(&response.element_lines) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("element line map not encoded: {e}");
                    None
                }
            }
        };

        Self {
            warnings,
            warnings_count: response.warnings.len(),
            element_line_map,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// MIDI export
// ═══════════════════════════════════════════════════════════════════════

/// Accompaniment settings of a MIDI export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiExportOptions {
    pub include_chords: bool,
    pub rhythm: Rhythm,
    pub octave: i32,
    pub velocity: f64,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        Self::from_config(&AccompanimentConfig::default())
    }
}

impl MidiExportOptions {
    /// Options with the configured accompaniment settings, chords off.
    pub fn from_config(config: &AccompanimentConfig) -> Self {
        Self {
            include_chords: false,
            rhythm: config.rhythm,
            octave: config.octave,
            velocity: config.velocity,
        }
    }
}

/// Run a script and render its result as a Standard MIDI File.
pub fn export_midi(
    script: &str,
    options: &MidiExportOptions,
    config: &PipelineConfig,
) -> Result<Vec<u8>, PipelineError> {
    if script.trim().is_empty() {
        return Err(PipelineError::Script("No script was given".to_string()));
    }
    let run = sandbox::run(script, config);
    if let Some(report) = run.error {
        return Err(PipelineError::Script(report));
    }
    let document = run
        .document
        .filter(|d| !d.trim().is_empty())
        .ok_or(PipelineError::EmptyOutput)?;

    let mut score = codec::parse_str(&document)?.into_score();
    if options.include_chords {
        match accompaniment::generate(&score, options.rhythm, options.octave, options.velocity) {
            Some(part) => {
                info!(rhythm = options.rhythm.as_str(), "accompaniment added");
                score.push_part(part);
            }
            None => info!("no chord symbols, exporting without accompaniment"),
        }
    }

    // Removed when dropped, on every path out of here.
    let file = tempfile::Builder::new().suffix(".mid").tempfile()?;
    midi::write_midi(&score, file.path())?;
    let bytes = std::fs::read(file.path())?;
    debug!(bytes = bytes.len(), "MIDI export done");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, Pitch};
    use pretty_assertions::assert_eq;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn bare_note_becomes_a_full_document() {
        let mut warnings = WarningLog::new();
        let note = Element::Note(Note::new(Pitch::parse("C4").unwrap(), 1.0));
        let xml = to_musicxml(ScoreInput::Element(note), &config(), &mut warnings).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<beats>4</beats>"));
        assert!(xml.contains("<per-minute>72</per-minute>"));
        // title, time signature, tempo
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn raw_xml_requests_are_only_cleaned() {
        let text = "\u{feff}  <?xml version=\"1.0\"?><score-partwise/>\n";
        let response = render_request(Request::Xml(text.to_string()), &config()).unwrap();
        assert_eq!(response.document, "<?xml version=\"1.0\"?><score-partwise/>");
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn plain_text_is_not_a_document() {
        let err = render_request(Request::Xml("hello".to_string()), &config()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Normalize(NormalizeError::UnrecognizedShape(_))
        ));
    }

    #[test]
    fn script_errors_are_reported_not_raised() {
        let err = render_request(Request::Script("let x = ;".to_string()), &config()).unwrap_err();
        assert!(matches!(err, PipelineError::Script(_)));
    }

    #[test]
    fn broken_output_is_replaced() {
        let mut warnings = WarningLog::new();
        let doc = ensure_document("garbage".to_string(), &mut warnings).unwrap();
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("Export Error"));
        assert!(doc.contains("Error: generated MusicXML was invalid"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn side_channel_summarizes() {
        let mut response = RenderResponse::default();
        for w in ["one", "two", "três", "four"] {
            response.warnings.push(w);
        }
        response.element_lines.insert("c1".to_string(), 3);
        let side = SideChannel::from_response(&response, &WarningConfig::default());
        assert_eq!(side.warnings.as_deref(), Some("one; two; tr?s"));
        assert_eq!(side.warnings_count, 4);
        assert_eq!(side.element_line_map.as_deref(), Some(r#"{"c1":3}"#));
    }

    #[test]
    fn empty_side_channel() {
        let side = SideChannel::from_response(&RenderResponse::default(), &WarningConfig::default());
        assert_eq!(side, SideChannel::default());
    }

    #[test]
    fn midi_export_produces_smf() {
        let bytes = export_midi(
            "let n = note::Note(\"A4\", 2);",
            &MidiExportOptions::default(),
            &config(),
        )
        .unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
    }
}
