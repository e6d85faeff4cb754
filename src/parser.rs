//! MusicXML parser — converts partwise MusicXML into the Score data model.
//!
//! Note durations and `<offset>` values are converted from divisions to
//! quarter-lengths; `<backup>`/`<forward>` move the measure cursor, so
//! elements land at their real offsets within the measure.

use roxmltree::{Document, Node};

use crate::error::CodecError;
use crate::harmony::ChordSymbol;
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score, CodecError> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)?;
    let root = doc.root_element();

    // Verify this is a score-partwise document
    if root.tag_name().name() != "score-partwise" {
        return Err(CodecError::UnsupportedRoot(root.tag_name().name().to_string()));
    }

    let mut score = Score::new();
    score.version = root.attribute("version").map(String::from);

    // Parse top-level elements
    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut score),
            "movement-title" => {
                let meta = score.metadata_mut();
                if meta.title.is_none() {
                    meta.title = text_of(&child);
                }
            }
            "identification" => parse_identification(&child, &mut score),
            "credit" => parse_credit(&child, &mut score),
            "part-list" => parse_part_list(&child, &mut score),
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    Ok(score)
}

// ─── Work ────────────────────────────────────────────────────────────

fn parse_work(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" {
            if let Some(title) = text_of(&child) {
                score.metadata_mut().title = Some(title);
            }
        }
    }
}

// ─── Identification ──────────────────────────────────────────────────

fn parse_identification(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "creator" => {
                let text = text_of(&child);
                match child.attribute("type").unwrap_or("") {
                    "composer" => {
                        let meta = score.metadata_mut();
                        if meta.composer.is_none() {
                            meta.composer = text;
                        }
                    }
                    "arranger" => score.metadata_mut().arranger = text,
                    _ => {}
                }
            }
            "encoding" => {
                for enc_child in child.children().filter(|n| n.is_element()) {
                    if enc_child.tag_name().name() == "software" {
                        score.software = text_of(&enc_child);
                    }
                }
            }
            _ => {}
        }
    }
}

// ─── Credits ─────────────────────────────────────────────────────────

fn parse_credit(node: &Node, score: &mut Score) {
    let mut credit_type = String::new();
    let mut credit_text = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "credit-type" => {
                credit_type = child.text().unwrap_or("").trim().to_string();
            }
            "credit-words" => {
                let text = child.text().unwrap_or("").trim();
                if !text.is_empty() {
                    if !credit_text.is_empty() {
                        credit_text.push('\n');
                    }
                    credit_text.push_str(text);
                }
            }
            _ => {}
        }
    }

    if credit_text.is_empty() {
        return;
    }
    // <credit> values take priority over <work-title> and <creator>.
    match credit_type.as_str() {
        "title" => score.metadata_mut().title = Some(credit_text),
        "composer" => score.metadata_mut().composer = Some(credit_text),
        _ => {}
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "score-part" {
            let mut part = Part::new(child.attribute("id").unwrap_or(""));

            for sp_child in child.children().filter(|n| n.is_element()) {
                match sp_child.tag_name().name() {
                    "part-name" => {
                        part.name = sp_child.text().unwrap_or("").trim().to_string();
                    }
                    "part-abbreviation" => {
                        part.abbreviation = text_of(&sp_child);
                    }
                    "midi-instrument" => {
                        for midi in sp_child.children().filter(|n| n.is_element()) {
                            match midi.tag_name().name() {
                                "midi-channel" => part.midi_channel = parse_i32(&midi),
                                "midi-program" => part.midi_program = parse_i32(&midi),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }

            score.parts.push(part);
        }
    }
}

// ─── Part (measures) ─────────────────────────────────────────────────

/// State carried from one measure to the next within a part.
struct PartState {
    divisions: f64,
    bar_length: Option<f64>,
}

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("").to_string();

    let idx = match score.parts.iter().position(|p| p.id == part_id) {
        Some(idx) => idx,
        None => {
            score.parts.push(Part::new(part_id));
            score.parts.len() - 1
        }
    };

    let mut state = PartState {
        divisions: 1.0,
        bar_length: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            let measure = parse_measure(&child, &mut state);
            score.parts[idx].measures.push(measure);
        }
    }
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node, state: &mut PartState) -> Measure {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let mut measure = Measure::new(number);
    measure.implicit = node.attribute("implicit") == Some("yes");

    // Cursor position in quarter notes; `last_onset` is where the previous
    // note started, the anchor for <chord/> members.
    let mut cursor = 0.0;
    let mut last_onset = 0.0;
    let mut barlines = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => {
                for element in parse_attributes(&child, state) {
                    measure.insert(cursor, element);
                }
            }
            "note" => {
                let parsed = parse_note(&child, state.divisions);
                if parsed.is_chord_member {
                    merge_into_chord(&mut measure, last_onset, parsed.element);
                } else {
                    let duration = parsed.element.quarter_length();
                    measure.insert(cursor, parsed.element);
                    last_onset = cursor;
                    cursor += duration;
                }
            }
            "backup" => {
                cursor = (cursor - child_duration(&child, state.divisions)).max(0.0);
            }
            "forward" => {
                cursor += child_duration(&child, state.divisions);
            }
            "harmony" => {
                let offset = cursor + offset_child(&child, state.divisions);
                if let Some(element) = parse_harmony(&child) {
                    measure.insert(offset.max(0.0), element);
                }
            }
            "direction" => {
                let offset = cursor + offset_child(&child, state.divisions);
                for element in parse_direction(&child) {
                    measure.insert(offset.max(0.0), element);
                }
            }
            "sound" => {
                // <sound> can appear directly in <measure> (not inside <direction>)
                if let Some(tempo) = child.attribute("tempo").and_then(|t| t.parse::<f64>().ok()) {
                    measure.insert(cursor, Element::Tempo(MetronomeMark::quarter(tempo)));
                }
            }
            "barline" => {
                if let Some(barline) = parse_barline(&child) {
                    barlines.push(barline);
                }
            }
            _ => {}
        }
    }

    if !measure.implicit {
        measure.bar_length = state.bar_length;
    }
    let end = measure.duration();
    for (location, barline) in barlines {
        let offset = if location == "left" { 0.0 } else { end };
        measure.insert(offset, Element::Barline(barline));
    }

    measure
}

/// Add a `<chord/>` note to the note or chord that started at `onset`.
fn merge_into_chord(measure: &mut Measure, onset: f64, element: Element) {
    let Element::Note(member) = element else {
        return;
    };
    let anchor = measure
        .elements
        .iter()
        .rposition(|p| p.offset == onset && p.element.is_pitched());
    let Some(idx) = anchor else {
        measure.insert(onset, Element::Note(member));
        return;
    };
    let placed = &mut measure.elements[idx];
    match &mut placed.element {
        Element::Chord(chord) => chord.pitches.push(member.pitch),
        Element::Note(first) => {
            let mut chord = Chord::new(vec![first.pitch.clone(), member.pitch], first.quarter_length);
            chord.id = first.id.clone();
            chord.lyric = first.lyric.clone();
            chord.velocity = first.velocity;
            chord.tie = first.tie;
            chord.stem = first.stem;
            chord.beams = std::mem::take(&mut first.beams);
            placed.element = Element::Chord(chord);
        }
        _ => {}
    }
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(node: &Node, state: &mut PartState) -> Vec<Element> {
    let mut elements = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                if let Some(d) = parse_f64(&child).filter(|d| *d > 0.0) {
                    state.divisions = d;
                }
            }
            "key" => elements.push(Element::Key(parse_key(&child))),
            "time" => {
                let ts = parse_time(&child);
                state.bar_length = ts.bar_length();
                elements.push(Element::TimeSignature(ts));
            }
            "clef" => elements.push(Element::Clef(parse_clef(&child))),
            _ => {}
        }
    }

    elements
}

fn parse_key(node: &Node) -> Key {
    let mut key = Key {
        fifths: 0,
        mode: None,
        id: node.attribute("id").map(String::from),
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "fifths" => key.fifths = parse_i32(&child).unwrap_or(0),
            "mode" => key.mode = text_of(&child),
            _ => {}
        }
    }
    key
}

fn parse_time(node: &Node) -> TimeSignature {
    let mut ts = TimeSignature::new(4, 4);
    ts.id = node.attribute("id").map(String::from);
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beats" => ts.beats = parse_i32(&child).unwrap_or(4),
            "beat-type" => ts.beat_type = parse_i32(&child).unwrap_or(4),
            _ => {}
        }
    }
    ts
}

fn parse_clef(node: &Node) -> Clef {
    let mut clef = Clef::treble();
    clef.id = node.attribute("id").map(String::from);
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "sign" => {
                clef.sign = child.text().unwrap_or("G").trim().to_string();
            }
            "line" => clef.line = parse_i32(&child).unwrap_or(2),
            "clef-octave-change" => clef.octave_change = parse_i32(&child),
            _ => {}
        }
    }
    clef
}

// ─── Note ────────────────────────────────────────────────────────────

struct ParsedNote {
    element: Element,
    is_chord_member: bool,
}

fn parse_note(node: &Node, divisions: f64) -> ParsedNote {
    let mut pitch = None;
    let mut duration = 0.0;
    let mut is_rest = false;
    let mut is_chord_member = false;
    let mut tie_start = false;
    let mut tie_stop = false;
    let mut stem = None;
    let mut beams = Vec::new();
    let mut lyric = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => pitch = Some(parse_pitch(&child)),
            "duration" => duration = parse_f64(&child).unwrap_or(0.0) / divisions,
            "rest" => is_rest = true,
            "chord" => is_chord_member = true,
            "stem" => {
                stem = match child.text().map(str::trim) {
                    Some("up") => Some(Stem::Up),
                    Some("down") => Some(Stem::Down),
                    _ => None,
                };
            }
            "beam" => {
                let number = child
                    .attribute("number")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(1);
                let beam_type = child.text().unwrap_or("").trim().to_string();
                beams.push(Beam { number, beam_type });
            }
            "tie" => match child.attribute("type") {
                Some("start") => tie_start = true,
                Some("stop") => tie_stop = true,
                _ => {}
            },
            "lyric" => {
                if lyric.is_none() {
                    lyric = child
                        .children()
                        .find(|n| n.is_element() && n.tag_name().name() == "text")
                        .and_then(|t| t.text())
                        .filter(|t| !t.is_empty())
                        .map(String::from);
                }
            }
            _ => {}
        }
    }

    let tie = match (tie_start, tie_stop) {
        (true, true) => Some(Tie::Continue),
        (true, false) => Some(Tie::Start),
        (false, true) => Some(Tie::Stop),
        (false, false) => None,
    };
    let id = node.attribute("id").map(String::from);

    let element = match pitch {
        Some(pitch) if !is_rest => Element::Note(Note {
            pitch,
            quarter_length: duration,
            id,
            lyric,
            velocity: node
                .attribute("dynamics")
                .and_then(|d| d.parse::<f64>().ok())
                .map(|d| (d * 0.9).round().clamp(1.0, 127.0) as u8),
            tie,
            stem,
            beams,
        }),
        _ => Element::Rest(Rest {
            quarter_length: duration,
            id,
        }),
    };

    ParsedNote {
        element,
        is_chord_member,
    }
}

fn parse_pitch(node: &Node) -> Pitch {
    let mut pitch = Pitch::new('C', 4, None);
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "step" => {
                pitch.step = child
                    .text()
                    .and_then(|t| t.trim().chars().next())
                    .unwrap_or('C');
            }
            "octave" => pitch.octave = parse_i32(&child).unwrap_or(4),
            "alter" => pitch.alter = parse_f64(&child).filter(|a| *a != 0.0),
            _ => {}
        }
    }
    pitch
}

// ─── Harmony ─────────────────────────────────────────────────────────

fn parse_harmony(node: &Node) -> Option<Element> {
    let id = node.attribute("id").map(String::from);
    let mut root = None;
    let mut bass = None;
    let mut kind = "major".to_string();
    let mut kind_text = None;
    let mut numeral = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "root" => root = Some(parse_step_alter(&child, "root-step", "root-alter")),
            "bass" => bass = Some(parse_step_alter(&child, "bass-step", "bass-alter")),
            "kind" => {
                kind = child.text().unwrap_or("major").trim().to_string();
                kind_text = child.attribute("text").map(String::from);
            }
            "numeral" => {
                numeral = child
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == "numeral-root")
                    .and_then(|n| n.attribute("text").map(String::from).or_else(|| text_of(&n)));
            }
            _ => {}
        }
    }

    if let Some(figure) = numeral {
        return Some(Element::RomanNumeral(RomanNumeral {
            figure,
            key: None,
            id,
        }));
    }

    let root = root?;
    match ChordSymbol::from_harmony(&root, &kind, kind_text.as_deref(), bass.as_ref()) {
        Ok(mut cs) => {
            cs.id = id;
            Some(Element::ChordSymbol(cs))
        }
        Err(e) => {
            tracing::debug!(kind = %kind, "skipping unreadable harmony: {e}");
            None
        }
    }
}

fn parse_step_alter(node: &Node, step_tag: &str, alter_tag: &str) -> Pitch {
    let mut pitch = Pitch::new('C', 3, None);
    for child in node.children().filter(|n| n.is_element()) {
        let name = child.tag_name().name();
        if name == step_tag {
            pitch.step = child
                .text()
                .and_then(|t| t.trim().chars().next())
                .unwrap_or('C');
        } else if name == alter_tag {
            pitch.alter = parse_f64(&child).filter(|a| *a != 0.0);
        }
    }
    pitch
}

// ─── Barline ─────────────────────────────────────────────────────────

fn parse_barline(node: &Node) -> Option<(String, Barline)> {
    let location = node.attribute("location").unwrap_or("right").to_string();
    let style = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "bar-style")
        .and_then(|n| text_of(&n))?;
    Some((
        location,
        Barline {
            style,
            id: node.attribute("id").map(String::from),
        },
    ))
}

// ─── Direction ───────────────────────────────────────────────────────

fn parse_direction(node: &Node) -> Vec<Element> {
    let placement = node.attribute("placement").and_then(Placement::parse);
    let id = node.attribute("id").map(String::from);

    let mut words: Vec<String> = Vec::new();
    let mut metronome = None;
    let mut sound_tempo = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt_child in child.children().filter(|n| n.is_element()) {
                    match dt_child.tag_name().name() {
                        "metronome" => metronome = Some(parse_metronome(&dt_child)),
                        "words" => {
                            if let Some(text) = text_of(&dt_child) {
                                words.push(text);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "sound" => {
                sound_tempo = child.attribute("tempo").and_then(|t| t.parse::<f64>().ok());
            }
            _ => {}
        }
    }

    let mut elements = Vec::new();
    match (metronome, sound_tempo) {
        (Some(mut mark), _) => {
            // Words next to a metronome mark are its label ("Allegro").
            if !words.is_empty() {
                mark.text = Some(words.join(" "));
                words.clear();
            }
            mark.id = id.clone();
            elements.push(Element::Tempo(mark));
        }
        (None, Some(tempo)) => {
            let mut mark = MetronomeMark::quarter(tempo);
            if !words.is_empty() {
                mark.text = Some(words.join(" "));
                words.clear();
            }
            mark.id = id.clone();
            elements.push(Element::Tempo(mark));
        }
        (None, None) => {}
    }

    for content in words {
        elements.push(Element::Text(TextExpression {
            content,
            placement,
            id: id.clone(),
        }));
    }
    elements
}

fn parse_metronome(node: &Node) -> MetronomeMark {
    let mut mark = MetronomeMark::quarter(120.0);

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                mark.beat_unit = child.text().unwrap_or("quarter").trim().to_string();
            }
            "beat-unit-dot" => mark.dotted = true,
            "per-minute" => mark.per_minute = parse_f64(&child).unwrap_or(120.0),
            _ => {}
        }
    }

    mark
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn parse_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

fn text_of(node: &Node) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn child_duration(node: &Node, divisions: f64) -> f64 {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == "duration")
        .and_then(|n| parse_f64(&n))
        .map_or(0.0, |d| d / divisions)
}

/// Value of an `<offset>` child, in quarter notes.
fn offset_child(node: &Node, divisions: f64) -> f64 {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == "offset")
        .and_then(|n| parse_f64(&n))
        .map_or(0.0, |d| d / divisions)
}
