//! Object shape normalizer: coerce any accepted input into a [`Score`].
//!
//! Every shape the pipeline accepts is one variant of [`ScoreInput`], so the
//! dispatch happens once, here, at the boundary.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::codec::{self, Parsed};
use crate::error::NormalizeError;
use crate::model::{Element, Measure, Part, Score, Stream};
use crate::warnings::WarningLog;

/// Everything that can be turned into a score.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreInput {
    /// Document text, or a path when it does not look like a document
    Text(String),
    Path(PathBuf),
    /// Packed document bytes (.mxl archive, or document text as bytes)
    Packed(Vec<u8>),
    Score(Score),
    Part(Part),
    Stream(Stream),
    Measure(Measure),
    Element(Element),
    Sequence(Vec<ScoreInput>),
    /// A value of a type the pipeline has no case for, with the musical
    /// element it carries when there is one
    Other {
        type_name: String,
        element: Option<Element>,
    },
}

impl ScoreInput {
    pub fn type_name(&self) -> String {
        match self {
            ScoreInput::Text(_) => "Text".to_string(),
            ScoreInput::Path(_) => "Path".to_string(),
            ScoreInput::Packed(_) => "Bytes".to_string(),
            ScoreInput::Score(_) => "Score".to_string(),
            ScoreInput::Part(_) => "Part".to_string(),
            ScoreInput::Stream(_) => "Stream".to_string(),
            ScoreInput::Measure(_) => "Measure".to_string(),
            ScoreInput::Element(e) => e.kind_name().to_string(),
            ScoreInput::Sequence(_) => "Sequence".to_string(),
            ScoreInput::Other { type_name, .. } => type_name.clone(),
        }
    }
}

impl From<Score> for ScoreInput {
    fn from(score: Score) -> Self {
        ScoreInput::Score(score)
    }
}

impl From<Part> for ScoreInput {
    fn from(part: Part) -> Self {
        ScoreInput::Part(part)
    }
}

impl From<Measure> for ScoreInput {
    fn from(measure: Measure) -> Self {
        ScoreInput::Measure(measure)
    }
}

impl From<Element> for ScoreInput {
    fn from(element: Element) -> Self {
        ScoreInput::Element(element)
    }
}

impl From<Parsed> for ScoreInput {
    fn from(parsed: Parsed) -> Self {
        match parsed {
            Parsed::Score(s) => ScoreInput::Score(s),
            Parsed::Part(p) => ScoreInput::Part(p),
            Parsed::Measure(m) => ScoreInput::Measure(m),
        }
    }
}

/// Whether text looks like a serialized notation document.
pub fn looks_like_document(text: &str) -> bool {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<?xml") || text.starts_with("<score-partwise")
}

/// Coerce `input` into a score.
///
/// Fails only when the input has no interpretation at all, or when the
/// codec rejects document text, bytes or a file.
pub fn normalize_to_score(
    input: ScoreInput,
    warnings: &mut WarningLog,
) -> Result<Score, NormalizeError> {
    debug!(shape = %input.type_name(), "normalizing input");
    match input {
        ScoreInput::Text(text) if looks_like_document(&text) => {
            Ok(codec::parse_str(&text)?.into_score())
        }
        ScoreInput::Text(path) => Ok(codec::parse_file(path.trim())?.into_score()),
        ScoreInput::Path(path) => Ok(codec::parse_file(&path)?.into_score()),
        ScoreInput::Packed(bytes) => Ok(codec::parse_bytes(&bytes, None)?.into_score()),
        ScoreInput::Score(score) => Ok(score),
        ScoreInput::Part(part) => Ok(single_part(part)),
        ScoreInput::Stream(stream) => Ok(single_part(part_from_stream(stream))),
        ScoreInput::Measure(measure) => {
            let mut part = Part::new("P1");
            part.append_measure(measure);
            Ok(single_part(part))
        }
        ScoreInput::Element(element) => {
            let mut part = Part::new("P1");
            part.append_measure(wrap_element(element, 1));
            Ok(single_part(part))
        }
        ScoreInput::Sequence(items) => {
            let mut part = Part::new("P1");
            for item in items {
                append_item(&mut part, item, warnings)?;
            }
            Ok(single_part(part))
        }
        ScoreInput::Other { type_name, element } => {
            warnings.push(format!(
                "Unrecognized object type {type_name}, attempting best-effort insertion"
            ));
            match element {
                Some(element) => {
                    let mut part = Part::new("P1");
                    part.append(element);
                    Ok(single_part(part))
                }
                None => {
                    warn!(shape = %type_name, "no usable content");
                    Err(NormalizeError::UnrecognizedShape(type_name))
                }
            }
        }
    }
}

fn single_part(part: Part) -> Score {
    let mut score = Score::new();
    score.push_part(part);
    score
}

/// Keep a stream's measures; loose elements stay loose for measure derivation.
fn part_from_stream(stream: Stream) -> Part {
    let mut part = Part::new("P1");
    for measure in stream.measures {
        part.append_measure(measure);
    }
    part.elements = stream.elements;
    part
}

/// One element in a measure of its own, with a usable duration.
fn wrap_element(mut element: Element, number: i32) -> Measure {
    element.ensure_duration();
    let mut measure = Measure::new(number);
    measure.insert(0.0, element);
    measure
}

/// Add one sequence item to the part being assembled.
fn append_item(
    part: &mut Part,
    item: ScoreInput,
    warnings: &mut WarningLog,
) -> Result<(), NormalizeError> {
    match item {
        ScoreInput::Element(element) => {
            let number = part.measures.len() as i32 + 1;
            part.measures.push(wrap_element(element, number));
        }
        ScoreInput::Measure(mut measure) => {
            measure.number = 0;
            part.append_measure(measure);
        }
        ScoreInput::Stream(stream) => {
            let nested = part_from_stream(stream);
            append_measures_of(part, nested);
        }
        other => {
            let score = normalize_to_score(other, warnings)?;
            for nested in score.parts {
                append_measures_of(part, nested);
            }
        }
    }
    Ok(())
}

/// Append a nested part's measures; its loose elements become one more measure.
fn append_measures_of(part: &mut Part, nested: Part) {
    for mut measure in nested.measures {
        measure.number = 0;
        part.append_measure(measure);
    }
    if !nested.elements.is_empty() {
        let mut measure = Measure::new(0);
        measure.elements = nested.elements;
        part.append_measure(measure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chord, Note, Pitch, Rest, TextExpression};
    use crate::writer;

    fn c4(ql: f64) -> Element {
        Element::Note(Note::new(Pitch::parse("C4").unwrap(), ql))
    }

    fn shape_counts(score: &Score) -> (usize, usize) {
        (score.parts.len(), score.measure_count())
    }

    #[test]
    fn bare_note_becomes_one_measure() {
        let mut w = WarningLog::new();
        let score = normalize_to_score(c4(1.0).into(), &mut w).unwrap();
        assert_eq!(shape_counts(&score), (1, 1));
        assert!(w.is_empty());
    }

    #[test]
    fn zero_length_chord_gets_a_beat() {
        let chord = Chord::new(
            vec![Pitch::parse("C4").unwrap(), Pitch::parse("E4").unwrap()],
            0.0,
        );
        let score =
            normalize_to_score(Element::Chord(chord).into(), &mut WarningLog::new()).unwrap();
        let element = &score.parts[0].measures[0].elements[0].element;
        assert_eq!(element.quarter_length(), 1.0);
    }

    #[test]
    fn heterogeneous_sequence_wraps_each_item() {
        let mut measure = Measure::new(7);
        measure.append(Element::Rest(Rest::new(4.0)));
        let items = vec![
            ScoreInput::Element(c4(0.0)),
            ScoreInput::Measure(measure),
            ScoreInput::Element(Element::Text(TextExpression::new("dolce"))),
        ];
        let score =
            normalize_to_score(ScoreInput::Sequence(items), &mut WarningLog::new()).unwrap();
        let numbers: Vec<i32> = score.parts[0].measures.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(
            score.parts[0].measures[0].elements[0].element.quarter_length(),
            1.0
        );
    }

    #[test]
    fn document_text_and_paths_parse() {
        let mut source = Score::new();
        source.push_part(Part::new(""));
        source.parts[0].append_measure(wrap_element(c4(1.0), 1));
        let xml = writer::to_musicxml(&source).unwrap();

        let mut w = WarningLog::new();
        let from_text = normalize_to_score(ScoreInput::Text(xml.clone()), &mut w).unwrap();
        assert_eq!(shape_counts(&from_text), (1, 1));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.musicxml");
        std::fs::write(&path, &xml).unwrap();
        let from_path =
            normalize_to_score(ScoreInput::Text(path.display().to_string()), &mut w).unwrap();
        assert_eq!(shape_counts(&from_path), (1, 1));
    }

    #[test]
    fn unknown_shape_without_content_fails() {
        let mut w = WarningLog::new();
        let err = normalize_to_score(
            ScoreInput::Other {
                type_name: "Duration".into(),
                element: None,
            },
            &mut w,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::UnrecognizedShape(ref t) if t == "Duration"));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn unknown_shape_with_content_is_inserted() {
        let mut w = WarningLog::new();
        let score = normalize_to_score(
            ScoreInput::Other {
                type_name: "Voice".into(),
                element: Some(c4(2.0)),
            },
            &mut w,
        )
        .unwrap();
        assert_eq!(score.parts[0].elements.len(), 1);
        assert_eq!(w.len(), 1);
    }
}
