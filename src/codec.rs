//! Codec front door: read notation documents in any supported format.
//!
//! Formats, chosen by file extension or sniffed from the content:
//! - `.musicxml` / `.xml` → uncompressed MusicXML
//! - `.mxl` → compressed MusicXML (ZIP archive)
//! - `.json` → a serialized [`Score`], [`Part`] or [`Measure`]
//!
//! MusicXML always yields a score; JSON may yield a bare part or measure,
//! which callers wrap into a score as needed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{Measure, Part, Score};
use crate::mxl;
use crate::parser::parse_musicxml;

/// What a parse produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Parsed {
    Score(Score),
    Part(Part),
    Measure(Measure),
}

impl Parsed {
    /// Wrap a bare part or measure into a single-part score.
    pub fn into_score(self) -> Score {
        match self {
            Parsed::Score(score) => score,
            Parsed::Part(part) => {
                let mut score = Score::new();
                score.push_part(part);
                score
            }
            Parsed::Measure(measure) => {
                let mut part = Part::new("P1");
                part.append_measure(measure);
                let mut score = Score::new();
                score.push_part(part);
                score
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Parsed::Score(_) => "Score",
            Parsed::Part(_) => "Part",
            Parsed::Measure(_) => "Measure",
        }
    }
}

/// Parse a notation file from a file path.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Parsed, CodecError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| CodecError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    parse_bytes(&data, extension.as_deref())
}

/// Parse raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Parsed, CodecError> {
    match extension {
        Some("mxl") => parse_mxl(data).map(Parsed::Score),
        Some("musicxml") | Some("xml") => {
            let xml = std::str::from_utf8(data)?;
            parse_musicxml(strip_bom(xml)).map(Parsed::Score)
        }
        Some("json") => {
            let text = std::str::from_utf8(data)?;
            parse_json(text)
        }
        Some(other) => Err(CodecError::UnsupportedFormat(other.to_string())),
        None => {
            // Auto-detect: text formats first, then MXL (ZIP)
            if let Ok(text) = std::str::from_utf8(data) {
                let trimmed = strip_bom(text).trim_start();
                if trimmed.starts_with('<') {
                    return parse_musicxml(trimmed).map(Parsed::Score);
                }
                if trimmed.starts_with('{') {
                    return parse_json(trimmed);
                }
            }
            parse_mxl(data).map(Parsed::Score)
        }
    }
}

/// Parse document text (MusicXML or JSON).
pub fn parse_str(text: &str) -> Result<Parsed, CodecError> {
    parse_bytes(text.as_bytes(), None)
}

/// Read and parse a .mxl file from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<Score, CodecError> {
    let xml = mxl::extract_musicxml_from_mxl(data)?;
    parse_musicxml(strip_bom(&xml))
}

fn parse_json(text: &str) -> Result<Parsed, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize a parsed object as JSON.
pub fn to_json(parsed: &Parsed) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(parsed)?)
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}
