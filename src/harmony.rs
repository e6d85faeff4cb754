//! Chord symbols: figure parsing, pitch derivation, and the safe constructor
//! that degrades unparseable figures to plain text.
//!
//! Grammar accepted by [`ChordSymbol::parse`] (after normalization):
//!
//! ```text
//! figure   := root quality? modifier* ("/" bass)?
//! root     := [A-G] ("#" | "b" | "-")*
//! quality  := "" | m | min | maj | maj7 | m7 | mmaj7 | 7 | 6 | m6 | 9 | 11 | 13
//!           | dim | dim7 | aug | aug7 | m7b5 | ø | 5 | ...
//! modifier := sus2 | sus4 | sus | add N | alter (#|b)N | omit N | subtract N
//! ```
//!
//! Modifiers may be attached ("Cadd9") or separated by spaces ("C7 alter b9").

use serde::{Deserialize, Serialize};

use crate::error::ChordSymbolError;
use crate::figure;
use crate::model::{Element, Pitch, Placement, TextExpression};
use crate::warnings::WarningLog;

/// Octave of the root of derived chord pitches.
const ROOT_OCTAVE: i32 = 3;

/// A harmonic label with derived pitch content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSymbol {
    /// Figure the symbol was built from ("Cmaj7 add 9")
    pub figure: String,
    pub root: Pitch,
    pub bass: Option<Pitch>,
    /// MusicXML kind value ("major-seventh")
    pub kind: String,
    /// Suffix as written after the root ("maj7 add 9")
    pub kind_text: String,
    pub degrees: Vec<Degree>,
    /// Sounding pitches, lowest first
    pub pitches: Vec<Pitch>,
    pub id: Option<String>,
}

/// A chord-degree modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degree {
    pub value: i32,
    /// Semitone alteration (-1 = flat, 1 = sharp)
    pub alter: i32,
    pub kind: DegreeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegreeKind {
    Add,
    Alter,
    Subtract,
}

impl DegreeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DegreeKind::Add => "add",
            DegreeKind::Alter => "alter",
            DegreeKind::Subtract => "subtract",
        }
    }
}

/// What the safe constructor produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureKind {
    ChordSymbol,
    Text,
}

/// Result of checking a chord figure without building a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureValidation {
    pub valid: bool,
    /// Normalized figure, only when it differs from the input
    pub normalized: Option<String>,
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Quality table
// ═══════════════════════════════════════════════════════════════════════

/// (written token, MusicXML kind, semitones above the root)
const QUALITIES: &[(&str, &str, &[i32])] = &[
    ("", "major", &[0, 4, 7]),
    ("maj", "major", &[0, 4, 7]),
    ("M", "major", &[0, 4, 7]),
    ("m", "minor", &[0, 3, 7]),
    ("min", "minor", &[0, 3, 7]),
    ("maj7", "major-seventh", &[0, 4, 7, 11]),
    ("M7", "major-seventh", &[0, 4, 7, 11]),
    ("m7", "minor-seventh", &[0, 3, 7, 10]),
    ("min7", "minor-seventh", &[0, 3, 7, 10]),
    ("mmaj7", "major-minor", &[0, 3, 7, 11]),
    ("mMaj7", "major-minor", &[0, 3, 7, 11]),
    ("mM7", "major-minor", &[0, 3, 7, 11]),
    ("7", "dominant", &[0, 4, 7, 10]),
    ("6", "major-sixth", &[0, 4, 7, 9]),
    ("m6", "minor-sixth", &[0, 3, 7, 9]),
    ("9", "dominant-ninth", &[0, 4, 7, 10, 14]),
    ("maj9", "major-ninth", &[0, 4, 7, 11, 14]),
    ("m9", "minor-ninth", &[0, 3, 7, 10, 14]),
    ("11", "dominant-11th", &[0, 4, 7, 10, 14, 17]),
    ("maj11", "major-11th", &[0, 4, 7, 11, 14, 17]),
    ("m11", "minor-11th", &[0, 3, 7, 10, 14, 17]),
    ("13", "dominant-13th", &[0, 4, 7, 10, 14, 17, 21]),
    ("maj13", "major-13th", &[0, 4, 7, 11, 14, 17, 21]),
    ("m13", "minor-13th", &[0, 3, 7, 10, 14, 17, 21]),
    ("dim", "diminished", &[0, 3, 6]),
    ("dim7", "diminished-seventh", &[0, 3, 6, 9]),
    ("aug", "augmented", &[0, 4, 8]),
    ("aug7", "augmented-seventh", &[0, 4, 8, 10]),
    ("m7b5", "half-diminished", &[0, 3, 6, 10]),
    ("ø", "half-diminished", &[0, 3, 6, 10]),
    ("ø7", "half-diminished", &[0, 3, 6, 10]),
    ("5", "power", &[0, 7]),
];

/// Longest quality token that prefixes `rest`.
fn match_quality(rest: &str) -> (&'static str, &'static str, &'static [i32]) {
    QUALITIES
        .iter()
        .filter(|(token, _, _)| rest.starts_with(token))
        .max_by_key(|(token, _, _)| token.len())
        .copied()
        .unwrap_or(QUALITIES[0])
}

/// Written abbreviation for a MusicXML kind value.
pub fn abbreviation_for_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "suspended-fourth" => Some("sus4"),
        "suspended-second" => Some("sus2"),
        _ => QUALITIES
            .iter()
            .find(|(_, k, _)| *k == kind)
            .map(|(token, _, _)| *token),
    }
}

fn degree_semitones(value: i32) -> i32 {
    match value {
        2 => 2,
        3 => 4,
        4 => 5,
        5 => 7,
        6 => 9,
        7 => 10,
        8 => 12,
        9 => 14,
        10 => 16,
        11 => 17,
        12 => 19,
        13 => 21,
        _ => 0,
    }
}

/// Every semitone a chord tone of this degree may sit at.
fn degree_family(value: i32) -> Vec<i32> {
    let base = degree_semitones(value);
    match value {
        3 | 5 | 7 => vec![base - 1, base, base + 1],
        _ => vec![base],
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════

impl ChordSymbol {
    /// Build a chord symbol from a figure such as "Cmaj7", "F#m7 add 9" or "G7/B".
    pub fn parse(figure: &str) -> Result<Self, ChordSymbolError> {
        let text = figure.trim();
        if text.is_empty() {
            return Err(ChordSymbolError::Empty);
        }

        let (root, after_root) =
            parse_note_name(text).ok_or_else(|| ChordSymbolError::InvalidRoot(text.to_string()))?;

        let (body, bass_text) = match after_root.rfind('/') {
            Some(idx) => (&after_root[..idx], Some(after_root[idx + 1..].trim())),
            None => (after_root, None),
        };

        let bass = match bass_text {
            Some(b) => match parse_note_name(b) {
                Some((pitch, "")) => Some(pitch),
                _ => {
                    return Err(ChordSymbolError::UnexpectedToken {
                        figure: text.to_string(),
                        rest: format!("/{b}"),
                    })
                }
            },
            None => None,
        };

        let body_trimmed = body.trim_start();
        let (token, mut kind, intervals) = match_quality(body_trimmed);
        let mut rest = &body_trimmed[token.len()..];

        let mut sus: Option<i32> = None;
        let mut degrees = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(r) = rest.strip_prefix("sus4") {
                sus = Some(5);
                rest = r;
            } else if let Some(r) = rest.strip_prefix("sus2") {
                sus = Some(2);
                rest = r;
            } else if let Some(r) = rest.strip_prefix("sus") {
                sus = Some(5);
                rest = r;
            } else if let Some(r) = rest.strip_prefix("add") {
                let (degree, r) = parse_degree(text, r, DegreeKind::Add)?;
                degrees.push(degree);
                rest = r;
            } else if let Some(r) = rest.strip_prefix("alter") {
                let (degree, r) = parse_degree(text, r, DegreeKind::Alter)?;
                degrees.push(degree);
                rest = r;
            } else if let Some(r) = rest
                .strip_prefix("omit")
                .or_else(|| rest.strip_prefix("subtract"))
                .or_else(|| rest.strip_prefix("no"))
            {
                let (degree, r) = parse_degree(text, r, DegreeKind::Subtract)?;
                degrees.push(degree);
                rest = r;
            } else {
                return Err(ChordSymbolError::UnexpectedToken {
                    figure: text.to_string(),
                    rest: rest.to_string(),
                });
            }
        }

        let mut semitones: Vec<i32> = intervals.to_vec();
        if let Some(sus) = sus {
            semitones.retain(|&s| s != 3 && s != 4);
            semitones.push(sus);
            if kind == "major" {
                kind = if sus == 5 { "suspended-fourth" } else { "suspended-second" };
            }
        }
        for degree in &degrees {
            let base = degree_semitones(degree.value);
            match degree.kind {
                DegreeKind::Add => semitones.push(base + degree.alter),
                DegreeKind::Alter => {
                    semitones.retain(|&s| s != base);
                    semitones.push(base + degree.alter);
                }
                DegreeKind::Subtract => {
                    let family = degree_family(degree.value);
                    semitones.retain(|s| !family.contains(s));
                }
            }
        }
        semitones.sort_unstable();
        semitones.dedup();

        let pitches = derive_pitches(&root, bass.as_ref(), &semitones);

        Ok(Self {
            figure: text.to_string(),
            root,
            bass,
            kind: kind.to_string(),
            kind_text: body.trim().to_string(),
            degrees,
            pitches,
            id: None,
        })
    }

    /// Rebuild a chord symbol from its MusicXML `<harmony>` parts.
    pub fn from_harmony(
        root: &Pitch,
        kind: &str,
        kind_text: Option<&str>,
        bass: Option<&Pitch>,
    ) -> Result<Self, ChordSymbolError> {
        let bass_suffix = bass.map(|b| format!("/{}", note_name(b))).unwrap_or_default();
        let root_name = note_name(root);
        if let Some(text) = kind_text.filter(|t| !t.trim().is_empty()) {
            if let Ok(cs) = Self::parse(&format!("{root_name}{}{bass_suffix}", text.trim())) {
                return Ok(cs);
            }
        }
        let abbreviation = abbreviation_for_kind(kind).unwrap_or("");
        Self::parse(&format!("{root_name}{abbreviation}{bass_suffix}"))
    }
}

/// Step plus accidentals, with the unparsed remainder.
fn parse_note_name(text: &str) -> Option<(Pitch, &str)> {
    let mut chars = text.char_indices();
    let (_, step) = chars.next()?;
    if !('A'..='G').contains(&step) {
        return None;
    }
    let mut alter = 0;
    let mut end = step.len_utf8();
    for (idx, c) in chars {
        match c {
            '#' => alter += 1,
            'b' | '-' => alter -= 1,
            _ => {
                end = idx;
                break;
            }
        }
        end = idx + c.len_utf8();
    }
    let pitch = Pitch::new(
        step,
        ROOT_OCTAVE,
        if alter == 0 { None } else { Some(alter as f64) },
    );
    Some((pitch, &text[end..]))
}

fn parse_degree<'a>(
    figure: &str,
    text: &'a str,
    kind: DegreeKind,
) -> Result<(Degree, &'a str), ChordSymbolError> {
    let text = text.trim_start();
    let mut alter = 0;
    let mut idx = 0;
    for c in text.chars() {
        match c {
            '#' | '+' => alter += 1,
            'b' | '-' => alter -= 1,
            _ => break,
        }
        idx += c.len_utf8();
    }
    let digits_end = text[idx..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text.len(), |i| idx + i);
    let value: i32 = text[idx..digits_end]
        .parse()
        .map_err(|_| ChordSymbolError::UnexpectedToken {
            figure: figure.to_string(),
            rest: text.to_string(),
        })?;
    if !(2..=13).contains(&value) {
        return Err(ChordSymbolError::UnsupportedDegree(value));
    }
    Ok((Degree { value, alter, kind }, &text[digits_end..]))
}

fn derive_pitches(root: &Pitch, bass: Option<&Pitch>, semitones: &[i32]) -> Vec<Pitch> {
    let root_midi = root.to_midi();
    let prefer_flats = root.alter.unwrap_or(0.0) < 0.0 || (root.step == 'F' && root.alter.is_none());

    let mut pitches: Vec<Pitch> = semitones
        .iter()
        .map(|&s| {
            if s == 0 {
                root.clone()
            } else {
                Pitch::from_midi(root_midi + s, prefer_flats)
            }
        })
        .collect();

    if let Some(bass) = bass {
        if bass.to_midi().rem_euclid(12) != root_midi.rem_euclid(12) {
            let mut placed = bass.in_octave(ROOT_OCTAVE);
            while placed.to_midi() >= root_midi {
                placed.octave -= 1;
            }
            pitches.insert(0, placed);
        }
    }
    pitches
}

/// Chord-symbol spelling of a pitch name ("Bb", "F#").
pub fn note_name(pitch: &Pitch) -> String {
    let alter = pitch.alter.unwrap_or(0.0).round() as i32;
    let accidental = if alter >= 0 {
        "#".repeat(alter as usize)
    } else {
        "b".repeat((-alter) as usize)
    };
    format!("{}{}", pitch.step, accidental)
}

/// Scale degree (1-7) named by a roman-numeral figure ("V7" → 5, "bVII" → 7).
pub fn roman_degree(figure: &str) -> Option<i32> {
    let letters: String = figure
        .trim_start_matches(['b', '#', '-'])
        .chars()
        .take_while(|c| matches!(c.to_ascii_uppercase(), 'I' | 'V'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match letters.as_str() {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        "VI" => Some(6),
        "VII" => Some(7),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Safe construction
// ═══════════════════════════════════════════════════════════════════════

/// Build a chord symbol from user text, never failing.
///
/// The figure is normalized first. When the normalized figure still cannot
/// be parsed, the result is a text annotation carrying the original figure
/// with `default_placement`. Both a normalization change and a fallback are
/// recorded in `warnings`.
pub fn safe_chord_symbol(
    figure: &str,
    default_placement: Placement,
    warnings: &mut WarningLog,
) -> (Element, FigureKind) {
    let normalized = figure::normalize(figure);
    match ChordSymbol::parse(&normalized) {
        Ok(cs) => {
            if normalized != figure {
                warnings.push(format!("Chord figure normalized: '{figure}' -> '{normalized}'"));
            }
            (Element::ChordSymbol(cs), FigureKind::ChordSymbol)
        }
        Err(e) => {
            warnings.push(format!("Invalid chord figure '{figure}', shown as text: {e}"));
            let mut text = TextExpression::new(figure);
            text.placement = Some(default_placement);
            (Element::Text(text), FigureKind::Text)
        }
    }
}

/// Check a chord figure the way the safe constructor would treat it.
pub fn validate_figure(text: &str) -> FigureValidation {
    let text = text.trim();
    if text.is_empty() {
        return FigureValidation {
            valid: false,
            normalized: None,
            error: Some("empty text".to_string()),
        };
    }
    let normalized = figure::normalize(text);
    match ChordSymbol::parse(&normalized) {
        Ok(_) => FigureValidation {
            valid: true,
            normalized: (normalized != text).then_some(normalized),
            error: None,
        },
        Err(e) => FigureValidation {
            valid: false,
            normalized: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn midi(cs: &ChordSymbol) -> Vec<i32> {
        cs.pitches.iter().map(Pitch::to_midi).collect()
    }

    #[test]
    fn parses_basic_qualities() {
        let c = ChordSymbol::parse("C").unwrap();
        assert_eq!(c.kind, "major");
        assert_eq!(midi(&c), vec![48, 52, 55]);

        let am = ChordSymbol::parse("Am").unwrap();
        assert_eq!(am.kind, "minor");
        assert_eq!(midi(&am), vec![57, 60, 64]);

        let g7 = ChordSymbol::parse("G7").unwrap();
        assert_eq!(g7.kind, "dominant");
        assert_eq!(midi(&g7), vec![55, 59, 62, 65]);
    }

    #[test]
    fn parses_normalized_modifiers() {
        let cs = ChordSymbol::parse("Cmaj7 add 9").unwrap();
        assert_eq!(cs.kind, "major-seventh");
        assert_eq!(cs.kind_text, "maj7 add 9");
        assert_eq!(midi(&cs), vec![48, 52, 55, 59, 62]);

        let alt = ChordSymbol::parse("G7 alter b9").unwrap();
        assert_eq!(midi(&alt), vec![55, 59, 62, 65, 68]);

        let half_dim = ChordSymbol::parse("Bm7 alter b5").unwrap();
        assert_eq!(midi(&half_dim), vec![59, 62, 65, 69]);

        let sus = ChordSymbol::parse("Dsus4").unwrap();
        assert_eq!(sus.kind, "suspended-fourth");
        assert_eq!(midi(&sus), vec![50, 55, 57]);
    }

    #[test]
    fn slash_chord_puts_bass_below_root() {
        let cs = ChordSymbol::parse("C/E").unwrap();
        assert_eq!(cs.bass.as_ref().map(|b| b.step), Some('E'));
        assert_eq!(midi(&cs), vec![40, 48, 52, 55]);
    }

    #[test]
    fn flat_roots_spell_with_flats() {
        let cs = ChordSymbol::parse("Bbm7").unwrap();
        let names: Vec<String> = cs.pitches.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["Bb3", "Db4", "F4", "Ab4"]);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(ChordSymbol::parse(""), Err(ChordSymbolError::Empty));
        assert!(matches!(
            ChordSymbol::parse("XXX###"),
            Err(ChordSymbolError::InvalidRoot(_))
        ));
        assert!(ChordSymbol::parse("Cxyz").is_err());
        assert!(matches!(
            ChordSymbol::parse("C add 15"),
            Err(ChordSymbolError::UnsupportedDegree(15))
        ));
    }

    #[test]
    fn safe_constructor_normalizes_and_warns() {
        let mut warnings = WarningLog::new();
        let (element, kind) = safe_chord_symbol("C-7", Placement::Below, &mut warnings);
        assert_eq!(kind, FigureKind::ChordSymbol);
        match element {
            Element::ChordSymbol(cs) => assert_eq!(cs.figure, "Cm7"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn safe_constructor_falls_back_to_text() {
        let mut warnings = WarningLog::new();
        let (element, kind) = safe_chord_symbol("XXX###", Placement::Below, &mut warnings);
        assert_eq!(kind, FigureKind::Text);
        match element {
            Element::Text(t) => {
                assert_eq!(t.content, "XXX###");
                assert_eq!(t.placement, Some(Placement::Below));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!warnings.is_empty());
    }

    #[test]
    fn validation_reports_normalized_form() {
        let v = validate_figure("Dm9");
        assert!(v.valid);
        assert_eq!(v.normalized.as_deref(), Some("Dm7 add 9"));

        let plain = validate_figure("G7");
        assert!(plain.valid);
        assert_eq!(plain.normalized, None);

        let empty = validate_figure("   ");
        assert_eq!(empty.error.as_deref(), Some("empty text"));
    }

    #[test]
    fn rebuilds_from_harmony_parts() {
        let root = Pitch::new('F', 3, Some(1.0));
        let cs = ChordSymbol::from_harmony(&root, "minor-seventh", Some("m7"), None).unwrap();
        assert_eq!(cs.figure, "F#m7");
        let by_kind = ChordSymbol::from_harmony(&root, "minor-seventh", None, None).unwrap();
        assert_eq!(by_kind.figure, "F#m7");
    }

    #[test]
    fn roman_degrees() {
        assert_eq!(roman_degree("V7"), Some(5));
        assert_eq!(roman_degree("ii"), Some(2));
        assert_eq!(roman_degree("bVII"), Some(7));
        assert_eq!(roman_degree("x"), None);
    }
}
