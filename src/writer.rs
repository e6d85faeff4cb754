//! MusicXML writer — serializes a Score as partwise MusicXML 4.0.
//!
//! Durations are written with [`DIVISIONS`] divisions per quarter note, fine
//! enough that annotation offsets one ten-thousandth of a beat apart stay
//! distinct. Notes advance the measure cursor; annotations, chord symbols and
//! tempo marks are written where the cursor is, with an `<offset>` for the
//! remainder, so they never move the cursor.

use crate::error::CodecError;
use crate::harmony::{roman_degree, ChordSymbol};
use crate::model::*;

/// Divisions per quarter note.
pub const DIVISIONS: f64 = 10080.0;

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;
pub const DOCTYPE: &str = r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 4.0 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#;

const SOFTWARE: &str = concat!("scoreprep ", env!("CARGO_PKG_VERSION"));

// ═══════════════════════════════════════════════════════════════════════
// XmlBuilder
// ═══════════════════════════════════════════════════════════════════════

/// Accumulates indented XML lines.
struct XmlBuilder {
    out: String,
    depth: usize,
}

impl XmlBuilder {
    fn new() -> Self {
        let mut out = String::with_capacity(16 * 1024);
        out.push_str(XML_DECLARATION);
        out.push('\n');
        out.push_str(DOCTYPE);
        out.push('\n');
        Self { out, depth: 0 }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, tag: &str, attrs: &[(&str, String)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        push_attrs(&mut self.out, attrs);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push_str(">\n");
    }

    fn leaf(&mut self, tag: &str, attrs: &[(&str, String)], text: &str) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        push_attrs(&mut self.out, attrs);
        self.out.push('>');
        self.out.push_str(&escape(text));
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push_str(">\n");
    }

    fn empty(&mut self, tag: &str, attrs: &[(&str, String)]) {
        self.indent();
        self.out.push('<');
        self.out.push_str(tag);
        push_attrs(&mut self.out, attrs);
        self.out.push_str("/>\n");
    }

    fn build(self) -> String {
        self.out
    }
}

fn push_attrs(out: &mut String, attrs: &[(&str, String)]) {
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape(value));
        out.push('"');
    }
}

/// Escape XML special characters.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn id_attr(id: Option<&str>) -> Vec<(&'static str, String)> {
    id.filter(|i| !i.is_empty())
        .map(|i| vec![("id", i.to_string())])
        .unwrap_or_default()
}

fn divisions(quarter_length: f64) -> i64 {
    (quarter_length * DIVISIONS).round() as i64
}

// ═══════════════════════════════════════════════════════════════════════
// Score
// ═══════════════════════════════════════════════════════════════════════

/// Serialize a score as MusicXML text.
///
/// Fails with [`CodecError::InvalidStructure`] when an offset or duration is
/// negative or not finite.
pub fn to_musicxml(score: &Score) -> Result<String, CodecError> {
    validate(score)?;

    let mut xml = XmlBuilder::new();
    xml.open("score-partwise", &[("version", "4.0".to_string())]);

    if let Some(meta) = &score.metadata {
        if let Some(title) = &meta.title {
            xml.open("work", &[]);
            xml.leaf("work-title", &[], title);
            xml.close("work");
            xml.leaf("movement-title", &[], title);
        }
    }

    xml.open("identification", &[]);
    if let Some(meta) = &score.metadata {
        if let Some(composer) = &meta.composer {
            xml.leaf("creator", &[("type", "composer".to_string())], composer);
        }
        if let Some(arranger) = &meta.arranger {
            xml.leaf("creator", &[("type", "arranger".to_string())], arranger);
        }
    }
    xml.open("encoding", &[]);
    xml.leaf("software", &[], SOFTWARE);
    xml.close("encoding");
    xml.close("identification");

    let ids: Vec<String> = score
        .parts
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.id.is_empty() {
                format!("P{}", i + 1)
            } else {
                p.id.clone()
            }
        })
        .collect();

    xml.open("part-list", &[]);
    for (part, id) in score.parts.iter().zip(&ids) {
        write_score_part(&mut xml, part, id);
    }
    xml.close("part-list");

    for (part, id) in score.parts.iter().zip(&ids) {
        xml.open("part", &[("id", id.clone())]);
        for (idx, measure) in measures_for_writing(part).iter().enumerate() {
            write_measure(&mut xml, measure, idx);
        }
        xml.close("part");
    }

    xml.close("score-partwise");
    Ok(xml.build())
}

fn validate(score: &Score) -> Result<(), CodecError> {
    for part in &score.parts {
        let placed = part
            .measures
            .iter()
            .flat_map(|m| m.elements.iter())
            .chain(part.elements.iter());
        for p in placed {
            if !p.offset.is_finite() || p.offset < 0.0 {
                return Err(CodecError::InvalidStructure(format!(
                    "part '{}': {} at offset {}",
                    part.id,
                    p.element.kind_name(),
                    p.offset
                )));
            }
            let ql = p.element.quarter_length();
            if !ql.is_finite() || ql < 0.0 {
                return Err(CodecError::InvalidStructure(format!(
                    "part '{}': {} with duration {}",
                    part.id,
                    p.element.kind_name(),
                    ql
                )));
            }
            if let Element::Tempo(mark) = &p.element {
                if !mark.per_minute.is_finite() || mark.per_minute <= 0.0 {
                    return Err(CodecError::InvalidStructure(format!(
                        "part '{}': tempo {} per minute",
                        part.id, mark.per_minute
                    )));
                }
            }
        }
        for m in &part.measures {
            if let Some(len) = m.bar_length {
                if !len.is_finite() || len < 0.0 {
                    return Err(CodecError::InvalidStructure(format!(
                        "part '{}': measure {} has bar length {}",
                        part.id, m.number, len
                    )));
                }
            }
        }
    }
    Ok(())
}

fn write_score_part(xml: &mut XmlBuilder, part: &Part, id: &str) {
    xml.open("score-part", &[("id", id.to_string())]);
    let name = if part.name.is_empty() { id } else { part.name.as_str() };
    xml.leaf("part-name", &[], name);
    if let Some(abbr) = &part.abbreviation {
        xml.leaf("part-abbreviation", &[], abbr);
    }
    if part.midi_program.is_some() || part.midi_channel.is_some() {
        let instrument = format!("{id}-I1");
        xml.open("score-instrument", &[("id", instrument.clone())]);
        xml.leaf("instrument-name", &[], name);
        xml.close("score-instrument");
        xml.open("midi-instrument", &[("id", instrument)]);
        if let Some(channel) = part.midi_channel {
            xml.leaf("midi-channel", &[], &channel.to_string());
        }
        if let Some(program) = part.midi_program {
            xml.leaf("midi-program", &[], &program.to_string());
        }
        xml.close("midi-instrument");
    }
    xml.close("score-part");
}

/// The part's measures with loose elements merged into the measure that
/// covers their offset. A part without measures becomes one measure.
fn measures_for_writing(part: &Part) -> Vec<Measure> {
    if part.measures.is_empty() {
        let mut measure = Measure::new(1);
        for p in &part.elements {
            measure.insert(p.offset, p.element.clone());
        }
        return vec![measure];
    }

    let mut measures = part.measures.clone();
    if !part.elements.is_empty() {
        let starts = part.measure_offsets();
        for p in &part.elements {
            let idx = starts.iter().rposition(|s| *s <= p.offset).unwrap_or(0);
            measures[idx].insert(p.offset - starts[idx], p.element.clone());
        }
    }
    measures
}

// ═══════════════════════════════════════════════════════════════════════
// Measure
// ═══════════════════════════════════════════════════════════════════════

fn is_attribute(element: &Element) -> bool {
    matches!(
        element,
        Element::Key(_) | Element::TimeSignature(_) | Element::Clef(_)
    )
}

fn write_measure(xml: &mut XmlBuilder, measure: &Measure, index: usize) {
    let number = if measure.number == 0 && !measure.implicit {
        (index + 1) as i32
    } else {
        measure.number
    };
    let mut attrs = vec![("number", number.to_string())];
    if measure.implicit {
        attrs.push(("implicit", "yes".to_string()));
    }
    xml.open("measure", &attrs);

    // Attributes at offset zero (and divisions in the first measure) lead the measure.
    let leading: Vec<&Element> = measure
        .elements
        .iter()
        .filter(|p| p.offset == 0.0 && is_attribute(&p.element))
        .map(|p| &p.element)
        .collect();
    if index == 0 || !leading.is_empty() {
        write_attributes(xml, &leading, index == 0);
    }

    let mut cursor: i64 = 0;
    let mut written_attribute_offsets: Vec<i64> = vec![0];
    let mut barlines = Vec::new();

    for placed in &measure.elements {
        let target = divisions(placed.offset);
        match &placed.element {
            element if is_attribute(element) => {
                if written_attribute_offsets.contains(&target) {
                    continue;
                }
                move_cursor(xml, &mut cursor, target);
                let group: Vec<&Element> = measure
                    .elements
                    .iter()
                    .filter(|p| divisions(p.offset) == target && is_attribute(&p.element))
                    .map(|p| &p.element)
                    .collect();
                write_attributes(xml, &group, false);
                written_attribute_offsets.push(target);
            }
            Element::Note(note) => {
                move_cursor(xml, &mut cursor, target);
                cursor += write_note(xml, note);
            }
            Element::Chord(chord) => {
                move_cursor(xml, &mut cursor, target);
                cursor += write_chord(xml, chord);
            }
            Element::Rest(rest) => {
                move_cursor(xml, &mut cursor, target);
                cursor += write_rest(xml, rest);
            }
            Element::Text(text) => write_words(xml, text, target - cursor),
            Element::Tempo(mark) => write_tempo(xml, mark, target - cursor),
            Element::ChordSymbol(cs) => write_harmony(xml, cs, target - cursor),
            Element::RomanNumeral(rn) => write_numeral(xml, rn, target - cursor),
            Element::Barline(barline) => barlines.push((placed.offset, barline)),
            _ => {}
        }
    }

    for (offset, barline) in barlines {
        let location = if offset == 0.0 && measure.highest_time() > 0.0 {
            "left"
        } else {
            "right"
        };
        xml.open("barline", &[("location", location.to_string())]);
        xml.leaf("bar-style", &[], &barline.style);
        xml.close("barline");
    }

    xml.close("measure");
}

fn move_cursor(xml: &mut XmlBuilder, cursor: &mut i64, target: i64) {
    if target > *cursor {
        xml.open("forward", &[]);
        xml.leaf("duration", &[], &(target - *cursor).to_string());
        xml.close("forward");
    } else if target < *cursor {
        xml.open("backup", &[]);
        xml.leaf("duration", &[], &(*cursor - target).to_string());
        xml.close("backup");
    }
    *cursor = target;
}

fn write_attributes(xml: &mut XmlBuilder, elements: &[&Element], with_divisions: bool) {
    xml.open("attributes", &[]);
    if with_divisions {
        xml.leaf("divisions", &[], &(DIVISIONS as i64).to_string());
    }
    // MusicXML order: key, time, clef.
    for element in elements {
        if let Element::Key(key) = element {
            xml.open("key", &id_attr(key.id.as_deref()));
            xml.leaf("fifths", &[], &key.fifths.to_string());
            if let Some(mode) = &key.mode {
                xml.leaf("mode", &[], mode);
            }
            xml.close("key");
        }
    }
    for element in elements {
        if let Element::TimeSignature(ts) = element {
            xml.open("time", &id_attr(ts.id.as_deref()));
            xml.leaf("beats", &[], &ts.beats.to_string());
            xml.leaf("beat-type", &[], &ts.beat_type.to_string());
            xml.close("time");
        }
    }
    for element in elements {
        if let Element::Clef(clef) = element {
            xml.open("clef", &id_attr(clef.id.as_deref()));
            xml.leaf("sign", &[], &clef.sign);
            xml.leaf("line", &[], &clef.line.to_string());
            if let Some(change) = clef.octave_change {
                xml.leaf("clef-octave-change", &[], &change.to_string());
            }
            xml.close("clef");
        }
    }
    xml.close("attributes");
}

// ═══════════════════════════════════════════════════════════════════════
// Notes
// ═══════════════════════════════════════════════════════════════════════

struct NoteParts<'a> {
    id: Option<&'a str>,
    quarter_length: f64,
    tie: Option<Tie>,
    stem: Option<Stem>,
    beams: &'a [Beam],
    lyric: Option<&'a str>,
}

/// Write a note, returning the divisions it occupies.
fn write_note(xml: &mut XmlBuilder, note: &Note) -> i64 {
    let parts = NoteParts {
        id: note.id.as_deref(),
        quarter_length: note.quarter_length,
        tie: note.tie,
        stem: note.stem,
        beams: &note.beams,
        lyric: note.lyric.as_deref(),
    };
    write_note_element(xml, &parts, Some(&note.pitch), false, note.velocity)
}

fn write_chord(xml: &mut XmlBuilder, chord: &Chord) -> i64 {
    let parts = NoteParts {
        id: chord.id.as_deref(),
        quarter_length: chord.quarter_length,
        tie: chord.tie,
        stem: chord.stem,
        beams: &chord.beams,
        lyric: chord.lyric.as_deref(),
    };
    let mut advance = 0;
    for (i, pitch) in chord.pitches.iter().enumerate() {
        let member = NoteParts {
            id: if i == 0 { parts.id } else { None },
            beams: if i == 0 { parts.beams } else { &[] },
            lyric: if i == 0 { parts.lyric } else { None },
            ..parts
        };
        let written = write_note_element(xml, &member, Some(pitch), i > 0, chord.velocity);
        if i == 0 {
            advance = written;
        }
    }
    if chord.pitches.is_empty() {
        advance = write_note_element(xml, &parts, None, false, None);
    }
    advance
}

fn write_rest(xml: &mut XmlBuilder, rest: &Rest) -> i64 {
    let parts = NoteParts {
        id: rest.id.as_deref(),
        quarter_length: rest.quarter_length,
        tie: None,
        stem: None,
        beams: &[],
        lyric: None,
    };
    write_note_element(xml, &parts, None, false, None)
}

fn write_note_element(
    xml: &mut XmlBuilder,
    parts: &NoteParts<'_>,
    pitch: Option<&Pitch>,
    chord_member: bool,
    velocity: Option<u8>,
) -> i64 {
    let duration = divisions(parts.quarter_length);
    let mut attrs = id_attr(parts.id);
    if let Some(v) = velocity {
        attrs.push(("dynamics", format!("{:.2}", v as f64 / 0.9)));
    }
    xml.open("note", &attrs);

    // Zero-length notes have no legal <duration>; write them as grace notes.
    let grace = duration == 0 && pitch.is_some();
    if grace {
        xml.empty("grace", &[]);
    }
    if chord_member {
        xml.empty("chord", &[]);
    }
    match pitch {
        Some(p) => {
            xml.open("pitch", &[]);
            xml.leaf("step", &[], &p.step.to_string());
            if let Some(alter) = p.alter.filter(|a| *a != 0.0) {
                xml.leaf("alter", &[], &format_number(alter));
            }
            xml.leaf("octave", &[], &p.octave.to_string());
            xml.close("pitch");
        }
        None => xml.empty("rest", &[]),
    }
    if !grace {
        xml.leaf("duration", &[], &duration.to_string());
    }
    match parts.tie {
        Some(Tie::Start) => xml.empty("tie", &[("type", "start".to_string())]),
        Some(Tie::Stop) => xml.empty("tie", &[("type", "stop".to_string())]),
        Some(Tie::Continue) => {
            xml.empty("tie", &[("type", "stop".to_string())]);
            xml.empty("tie", &[("type", "start".to_string())]);
        }
        None => {}
    }
    xml.leaf("voice", &[], "1");
    let notated = if grace {
        Some(("eighth", 0))
    } else {
        notated_type(parts.quarter_length)
    };
    if let Some((type_name, dots)) = notated {
        xml.leaf("type", &[], type_name);
        for _ in 0..dots {
            xml.empty("dot", &[]);
        }
    }
    if let Some(stem) = parts.stem {
        let s = match stem {
            Stem::Up => "up",
            Stem::Down => "down",
        };
        xml.leaf("stem", &[], s);
    }
    for beam in parts.beams {
        xml.leaf("beam", &[("number", beam.number.to_string())], &beam.beam_type);
    }
    if let Some(tie) = parts.tie {
        xml.open("notations", &[]);
        match tie {
            Tie::Start => xml.empty("tied", &[("type", "start".to_string())]),
            Tie::Stop => xml.empty("tied", &[("type", "stop".to_string())]),
            Tie::Continue => {
                xml.empty("tied", &[("type", "stop".to_string())]);
                xml.empty("tied", &[("type", "start".to_string())]);
            }
        }
        xml.close("notations");
    }
    if let Some(lyric) = parts.lyric {
        xml.open("lyric", &[("number", "1".to_string())]);
        xml.leaf("syllabic", &[], "single");
        xml.leaf("text", &[], lyric);
        xml.close("lyric");
    }
    xml.close("note");

    if grace {
        0
    } else {
        duration
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Directions and harmony
// ═══════════════════════════════════════════════════════════════════════

fn write_offset(xml: &mut XmlBuilder, offset: i64) {
    if offset != 0 {
        xml.leaf("offset", &[], &offset.to_string());
    }
}

fn write_words(xml: &mut XmlBuilder, text: &TextExpression, offset: i64) {
    let mut attrs = Vec::new();
    if let Some(placement) = text.placement {
        attrs.push(("placement", placement.as_str().to_string()));
    }
    attrs.extend(id_attr(text.id.as_deref()));
    xml.open("direction", &attrs);
    xml.open("direction-type", &[]);
    xml.leaf("words", &[], &text.content);
    xml.close("direction-type");
    write_offset(xml, offset);
    xml.close("direction");
}

fn write_tempo(xml: &mut XmlBuilder, mark: &MetronomeMark, offset: i64) {
    let mut attrs = vec![("placement", "above".to_string())];
    attrs.extend(id_attr(mark.id.as_deref()));
    xml.open("direction", &attrs);
    if let Some(text) = &mark.text {
        xml.open("direction-type", &[]);
        xml.leaf("words", &[], text);
        xml.close("direction-type");
    }
    xml.open("direction-type", &[]);
    xml.open("metronome", &[("parentheses", "no".to_string())]);
    xml.leaf("beat-unit", &[], &mark.beat_unit);
    if mark.dotted {
        xml.empty("beat-unit-dot", &[]);
    }
    xml.leaf("per-minute", &[], &format_number(mark.per_minute));
    xml.close("metronome");
    xml.close("direction-type");
    write_offset(xml, offset);
    xml.empty("sound", &[("tempo", format_number(mark.quarter_bpm()))]);
    xml.close("direction");
}

fn write_harmony(xml: &mut XmlBuilder, cs: &ChordSymbol, offset: i64) {
    xml.open("harmony", &id_attr(cs.id.as_deref()));
    xml.open("root", &[]);
    xml.leaf("root-step", &[], &cs.root.step.to_string());
    if let Some(alter) = cs.root.alter.filter(|a| *a != 0.0) {
        xml.leaf("root-alter", &[], &format_number(alter));
    }
    xml.close("root");
    xml.leaf("kind", &[("text", cs.kind_text.clone())], &cs.kind);
    if let Some(bass) = &cs.bass {
        xml.open("bass", &[]);
        xml.leaf("bass-step", &[], &bass.step.to_string());
        if let Some(alter) = bass.alter.filter(|a| *a != 0.0) {
            xml.leaf("bass-alter", &[], &format_number(alter));
        }
        xml.close("bass");
    }
    for degree in &cs.degrees {
        xml.open("degree", &[("print-object", "no".to_string())]);
        xml.leaf("degree-value", &[], &degree.value.to_string());
        xml.leaf("degree-alter", &[], &degree.alter.to_string());
        xml.leaf("degree-type", &[], degree.kind.as_str());
        xml.close("degree");
    }
    write_offset(xml, offset);
    xml.close("harmony");
}

fn write_numeral(xml: &mut XmlBuilder, rn: &RomanNumeral, offset: i64) {
    xml.open("harmony", &id_attr(rn.id.as_deref()));
    xml.open("numeral", &[]);
    let degree = roman_degree(&rn.figure).unwrap_or(1);
    xml.leaf("numeral-root", &[("text", rn.figure.clone())], &degree.to_string());
    if let Some(key) = rn.key.as_deref().and_then(Key::from_tonic) {
        xml.open("numeral-key", &[]);
        xml.leaf("numeral-fifths", &[], &key.fifths.to_string());
        xml.leaf("numeral-mode", &[], key.mode.as_deref().unwrap_or("major"));
        xml.close("numeral-key");
    }
    xml.close("numeral");
    let minor = rn
        .figure
        .trim_start_matches(['b', '#', '-'])
        .starts_with(|c: char| c.is_ascii_lowercase());
    xml.leaf("kind", &[], if minor { "minor" } else { "major" });
    write_offset(xml, offset);
    xml.close("harmony");
}

/// Integers without a trailing ".0", other values as-is.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_musicxml;

    fn one_measure_score(elements: Vec<(f64, Element)>) -> Score {
        let mut measure = Measure::new(1);
        for (offset, element) in elements {
            measure.insert(offset, element);
        }
        let mut part = Part::new("P1");
        part.measures.push(measure);
        let mut score = Score::new();
        score.parts.push(part);
        score
    }

    #[test]
    fn writes_declaration_and_doctype() {
        let xml = to_musicxml(&one_measure_score(vec![])).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<!DOCTYPE score-partwise"));
        assert!(xml.contains("<divisions>10080</divisions>"));
    }

    #[test]
    fn epsilon_offsets_stay_distinct() {
        let text = |s: &str| Element::Text(TextExpression::new(s));
        let score = one_measure_score(vec![(0.0, text("a")), (0.0001, text("b"))]);
        let xml = to_musicxml(&score).unwrap();
        assert!(xml.contains("<offset>1</offset>"));
    }

    #[test]
    fn rejects_negative_offsets() {
        let score = one_measure_score(vec![(-1.0, Element::Text(TextExpression::new("x")))]);
        assert!(matches!(
            to_musicxml(&score),
            Err(CodecError::InvalidStructure(_))
        ));
    }

    #[test]
    fn written_score_parses_back() {
        let mut note = Note::new(Pitch::parse("E-4").unwrap(), 1.5);
        note.lyric = Some(" ".to_string());
        note.id = Some("n1".to_string());
        let mut text = TextExpression::new("Swing & feel");
        text.placement = Some(Placement::Above);
        let cs = ChordSymbol::parse("Ebmaj7 add 9").unwrap();
        let score = one_measure_score(vec![
            (0.0, Element::TimeSignature(TimeSignature::new(3, 4))),
            (0.0, Element::Tempo(MetronomeMark::quarter(72.0))),
            (0.0, Element::ChordSymbol(cs)),
            (0.0, Element::Note(note)),
            (1.5, Element::Text(text)),
            (1.5, Element::Rest(Rest::new(1.5))),
        ]);

        let xml = to_musicxml(&score).unwrap();
        let parsed = parse_musicxml(&xml).unwrap();
        let kinds: Vec<(&str, f64)> = parsed.parts[0].measures[0]
            .elements
            .iter()
            .map(|p| (p.element.kind_name(), p.offset))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("TimeSignature", 0.0),
                ("MetronomeMark", 0.0),
                ("ChordSymbol", 0.0),
                ("Note", 0.0),
                ("TextExpression", 1.5),
                ("Rest", 1.5),
            ]
        );
        match &parsed.parts[0].measures[0].elements[3].element {
            Element::Note(n) => {
                assert_eq!(n.lyric.as_deref(), Some(" "));
                assert_eq!(n.id.as_deref(), Some("n1"));
                assert_eq!(n.pitch.to_midi(), 63);
            }
            other => panic!("expected note, got {other:?}"),
        }
        match &parsed.parts[0].measures[0].elements[2].element {
            Element::ChordSymbol(cs) => assert_eq!(cs.figure, "Ebmaj7 add 9"),
            other => panic!("expected chord symbol, got {other:?}"),
        }
    }

    #[test]
    fn loose_part_elements_become_one_measure() {
        let mut part = Part::new("P1");
        part.append(Element::Note(Note::new(Pitch::parse("C4").unwrap(), 1.0)));
        let mut score = Score::new();
        score.parts.push(part);
        let xml = to_musicxml(&score).unwrap();
        assert_eq!(xml.matches("<measure ").count(), 1);
        assert!(xml.contains("<step>C</step>"));
    }
}
