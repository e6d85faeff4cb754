//! Accompaniment track generation from chord symbols.
//!
//! Every chord symbol in the score becomes a block chord in a separate,
//! separately identified part, so a MIDI rendering can play the harmony
//! under the written parts.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::harmony::ChordSymbol;
use crate::layout;
use crate::model::{Chord, Element, Part, Score};

/// Identifier of the generated part.
pub const ACCOMPANIMENT_ID: &str = "accompaniment";

/// Chord lengths in auto mode are clamped to this range, in quarter notes.
const AUTO_MIN: f64 = 0.25;
const AUTO_MAX: f64 = 4.0;

// ═══════════════════════════════════════════════════════════════════════
// Rhythm
// ═══════════════════════════════════════════════════════════════════════

/// How long each accompaniment chord sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rhythm {
    /// Until the next chord symbol
    Auto,
    Whole,
    #[default]
    Half,
    Quarter,
}

impl Rhythm {
    /// Constant chord length, `None` for auto.
    pub fn fixed_length(self) -> Option<f64> {
        match self {
            Rhythm::Auto => None,
            Rhythm::Whole => Some(4.0),
            Rhythm::Half => Some(2.0),
            Rhythm::Quarter => Some(1.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rhythm::Auto => "auto",
            Rhythm::Whole => "whole",
            Rhythm::Half => "half",
            Rhythm::Quarter => "quarter",
        }
    }
}

impl FromStr for Rhythm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Rhythm::Auto),
            "whole" => Ok(Rhythm::Whole),
            "half" => Ok(Rhythm::Half),
            "quarter" => Ok(Rhythm::Quarter),
            other => Err(format!(
                "unknown rhythm '{other}', expected auto, whole, half or quarter"
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Chord collection
// ═══════════════════════════════════════════════════════════════════════

/// Every chord symbol in the score with its absolute offset, sorted.
///
/// When all chord symbols of a measure sit at its start, they are spread
/// evenly across the measure instead.
pub fn collect_chord_symbols(score: &Score) -> Vec<(f64, &ChordSymbol)> {
    let mut found = Vec::new();
    for part in &score.parts {
        for (measure, start) in part.measures.iter().zip(part.measure_offsets()) {
            let in_measure: Vec<(f64, &ChordSymbol)> = measure
                .elements
                .iter()
                .filter_map(|p| match &p.element {
                    Element::ChordSymbol(cs) => Some((p.offset, cs)),
                    _ => None,
                })
                .collect();

            let all_at_start = in_measure.len() > 1 && in_measure.iter().all(|(o, _)| *o == 0.0);
            if all_at_start {
                let spacing = measure.duration() / in_measure.len() as f64;
                debug!(measure = measure.number, count = in_measure.len(), spacing, "spreading chord symbols");
                for (i, (_, cs)) in in_measure.into_iter().enumerate() {
                    found.push((start + i as f64 * spacing, cs));
                }
            } else {
                found.extend(in_measure.into_iter().map(|(o, cs)| (start + o, cs)));
            }
        }
        for placed in &part.elements {
            if let Element::ChordSymbol(cs) = &placed.element {
                found.push((placed.offset, cs));
            }
        }
    }
    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    found
}

// ═══════════════════════════════════════════════════════════════════════
// Generation
// ═══════════════════════════════════════════════════════════════════════

/// Build the accompaniment part, or `None` when the score has no chord symbols.
///
/// `velocity` is 0.0 to 1.0; chord pitches are moved into `octave`.
pub fn generate(score: &Score, rhythm: Rhythm, octave: i32, velocity: f64) -> Option<Part> {
    let symbols = collect_chord_symbols(score);
    if symbols.is_empty() {
        info!("no chord symbols, no accompaniment");
        return None;
    }

    let mut part = Part::new(ACCOMPANIMENT_ID);
    part.name = "Accompaniment".to_string();

    if let Some(first) = score.parts.first() {
        let flat = first.flatten();
        if let Some(tempo) = flat.iter().find(|p| matches!(p.element, Element::Tempo(_))) {
            part.insert(0.0, tempo.element.clone());
        }
        if let Some(ts) = flat
            .iter()
            .find(|p| matches!(p.element, Element::TimeSignature(_)))
        {
            part.insert(0.0, ts.element.clone());
        }
    }

    let velocity = (velocity * 127.0).clamp(0.0, 127.0) as u8;
    for (i, (offset, cs)) in symbols.iter().enumerate() {
        if cs.pitches.is_empty() {
            warn!(figure = %cs.figure, "chord symbol has no pitches");
            continue;
        }
        let length = match rhythm.fixed_length() {
            Some(length) => length,
            None => symbols
                .get(i + 1)
                .map_or(AUTO_MAX, |(next, _)| next - offset)
                .clamp(AUTO_MIN, AUTO_MAX),
        };
        let pitches = cs.pitches.iter().map(|p| p.in_octave(octave)).collect();
        let mut chord = Chord::new(pitches, length);
        chord.velocity = Some(velocity);
        debug!(figure = %cs.figure, offset, length, "accompaniment chord");
        part.insert(*offset, Element::Chord(chord));
    }

    match layout::measures_for(&part.elements) {
        Ok(measures) => {
            part.measures = measures;
            part.elements.clear();
        }
        Err(e) => warn!("accompaniment measures not derived: {e}"),
    }

    info!(chords = symbols.len(), "generated accompaniment");
    Some(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Measure, MetronomeMark, Pitch, TimeSignature};
    use pretty_assertions::assert_eq;

    fn symbol(figure: &str) -> Element {
        Element::ChordSymbol(ChordSymbol::parse(figure).unwrap())
    }

    fn lead_sheet(measures: Vec<Measure>) -> Score {
        let mut part = Part::new("P1");
        for m in measures {
            part.append_measure(m);
        }
        let mut score = Score::new();
        score.push_part(part);
        score
    }

    fn chords(part: &Part) -> Vec<(f64, f64, Vec<i32>, Option<u8>)> {
        part.flatten()
            .into_iter()
            .filter_map(|p| match p.element {
                Element::Chord(c) => Some((
                    p.offset,
                    c.quarter_length,
                    c.pitches.iter().map(Pitch::to_midi).collect(),
                    c.velocity,
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_chord_symbols_no_part() {
        let mut m = Measure::new(1);
        m.bar_length = Some(4.0);
        assert_eq!(generate(&lead_sheet(vec![m]), Rhythm::Half, 3, 0.5), None);
    }

    #[test]
    fn chords_at_measure_start_are_spread() {
        let mut m = Measure::new(1);
        m.bar_length = Some(4.0);
        m.insert(0.0, symbol("C"));
        m.insert(0.0, symbol("G"));
        let score = lead_sheet(vec![m]);
        let offsets: Vec<f64> = collect_chord_symbols(&score).iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0.0, 2.0]);
    }

    #[test]
    fn auto_rhythm_clamps_lengths() {
        let mut one = Measure::new(1);
        one.bar_length = Some(4.0);
        one.insert(0.0, symbol("C"));
        one.insert(0.125, symbol("F"));
        let mut two = Measure::new(2);
        two.bar_length = Some(4.0);
        let mut three = Measure::new(3);
        three.bar_length = Some(4.0);
        three.insert(0.0, symbol("G7"));
        let score = lead_sheet(vec![one, two, three]);

        let part = generate(&score, Rhythm::Auto, 3, 0.5).unwrap();
        let lengths: Vec<f64> = chords(&part).iter().map(|c| c.1).collect();
        // 0.125 clamps up; 7.875 clamps down to 4.0 and is tied over the
        // barline; the last chord gets a whole note.
        assert_eq!(lengths, vec![0.25, 3.875, 0.125, 4.0]);
        assert_eq!(part.id, ACCOMPANIMENT_ID);
    }

    #[test]
    fn fixed_rhythm_octave_and_velocity() {
        let mut m = Measure::new(1);
        m.bar_length = Some(4.0);
        m.insert(0.0, Element::TimeSignature(TimeSignature::new(4, 4)));
        m.insert(0.0, Element::Tempo(MetronomeMark::quarter(96.0)));
        m.insert(0.0, symbol("Am"));
        let score = lead_sheet(vec![m]);

        let part = generate(&score, Rhythm::Quarter, 4, 0.5).unwrap();
        assert_eq!(chords(&part), vec![(0.0, 1.0, vec![69, 60, 64], Some(63))]);
        assert!(part.any_element(|e| matches!(e, Element::Tempo(t) if t.per_minute == 96.0)));
        assert!(part.any_element(|e| matches!(e, Element::TimeSignature(_))));
        assert_eq!(part.measures.len(), 1);
    }

    #[test]
    fn rhythm_names_parse() {
        assert_eq!("Whole".parse::<Rhythm>(), Ok(Rhythm::Whole));
        assert!("swing".parse::<Rhythm>().is_err());
        assert_eq!(Rhythm::Auto.as_str(), "auto");
    }
}
