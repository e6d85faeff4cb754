//! Error types for the codec, the engine and the normalization pipeline.
//!
//! Only [`NormalizeError::UnrecognizedShape`], script failures and empty
//! output ever reach a caller; everything else is recovered inside the
//! pipeline and turned into a warning.

use thiserror::Error;

/// Failures of the MusicXML / MXL / JSON codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("unsupported root element '{0}', only 'score-partwise' is supported")]
    UnsupportedRoot(String),

    #[error("MXL archive error: {0}")]
    Archive(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid UTF-8 in MusicXML data: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("JSON model error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported file format '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid document structure: {0}")]
    InvalidStructure(String),
}

/// A chord figure the chord-symbol engine cannot interpret.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChordSymbolError {
    #[error("empty chord figure")]
    Empty,

    #[error("invalid chord root in '{0}'")]
    InvalidRoot(String),

    #[error("unexpected '{rest}' in chord figure '{figure}'")]
    UnexpectedToken { figure: String, rest: String },

    #[error("unsupported chord degree {0}")]
    UnsupportedDegree(i32),
}

/// A pitch name that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid pitch name '{0}'")]
pub struct PitchError(pub String);

/// Failures of automatic measure derivation and beaming.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("time signature {0}/{1} has no usable bar length")]
    InvalidBarLength(i32, i32),

    #[error("element at offset {0} has a non-finite position or duration")]
    NonFinite(f64),

    #[error("measure {measure}: duration {duration} has no notated type")]
    UnbeamableDuration { measure: i32, duration: f64 },
}

/// Failures of the object shape normalizer.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("cannot normalize object of type {0} into a score")]
    UnrecognizedShape(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures that terminate one request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("MusicXML export was empty")]
    EmptyOutput,

    #[error("{0}")]
    Script(String),

    #[error("MIDI export failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
