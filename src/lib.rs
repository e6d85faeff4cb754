//! scoreprep — notation normalization pipeline.
//!
//! Takes a notation script, MusicXML (plain or compressed .mxl) or loose
//! musical objects and produces one clean, de-duplicated MusicXML document,
//! with warnings for every fallback taken along the way.
//!
//! # Example
//! ```no_run
//! use scoreprep::{render_request, PipelineConfig, Request};
//!
//! let script = r#"
//!     let n = note::Note("C4", 1.0);
//!     show(n);
//! "#;
//! let response = render_request(Request::Script(script.into()), &PipelineConfig::default()).unwrap();
//! println!("{}", response.document);
//! for warning in &response.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! ```

pub mod accompaniment;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod defaults;
pub mod edits;
pub mod error;
pub mod figure;
pub mod finalize;
pub mod harmony;
pub mod layout;
pub mod midi;
pub mod model;
pub mod mxl;
pub mod offsets;
pub mod parser;
pub mod pipeline;
pub mod sandbox;
pub mod shape;
pub mod warnings;
pub mod writer;
pub mod xml_dedup;

use std::path::Path;

pub use config::PipelineConfig;
pub use error::{CodecError, NormalizeError, PipelineError};
pub use harmony::{safe_chord_symbol, ChordSymbol, FigureKind};
pub use model::*;
pub use pipeline::{
    export_midi, render_request, to_musicxml, MidiExportOptions, RenderResponse, Request,
    SideChannel,
};
pub use shape::{normalize_to_score, ScoreInput};
pub use warnings::WarningLog;

/// Parse a score file into a [`Score`].
/// Detects the format from the file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
/// - `.json` → the crate's own model encoding
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, CodecError> {
    Ok(codec::parse_file(path)?.into_score())
}

/// Run a score file through the full pipeline and return MusicXML.
pub fn render_file<P: AsRef<Path>>(
    path: P,
    config: &PipelineConfig,
) -> Result<(String, WarningLog), PipelineError> {
    let mut warnings = WarningLog::new();
    let input = ScoreInput::Path(path.as_ref().to_path_buf());
    let xml = to_musicxml(input, config, &mut warnings)?;
    Ok((xml, warnings))
}
