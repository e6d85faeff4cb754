//! Layout engine: measure derivation, stem directions and beaming.
//!
//! - [`make_measures`] partitions loose part-level elements into bars of the
//!   active time signature, tying notes that cross a barline.
//! - [`make_notation`] completes every measure (bar lengths, stems, beams)
//!   and fails as a whole on the first measure it cannot lay out.
//! - [`make_beams`] beams a single measure.

use crate::error::LayoutError;
use crate::model::*;

const EPS: f64 = 1e-9;

/// MIDI number of the middle staff line of the treble clef (B4).
const MIDDLE_LINE_MIDI: i32 = 71;

// ═══════════════════════════════════════════════════════════════════════
// Measure derivation
// ═══════════════════════════════════════════════════════════════════════

/// Derive measures for every part that has loose elements and no measures.
///
/// All-or-nothing: when any part fails, no part is changed.
pub fn make_measures(score: &mut Score) -> Result<(), LayoutError> {
    let mut derived = Vec::new();
    for (idx, part) in score.parts.iter().enumerate() {
        if part.measures.is_empty() && !part.elements.is_empty() {
            derived.push((idx, measures_for(&part.elements)?));
        }
    }
    for (idx, measures) in derived {
        let part = &mut score.parts[idx];
        part.measures = measures;
        part.elements.clear();
    }
    Ok(())
}

/// Partition offset-sorted elements into measures.
pub fn measures_for(elements: &[Placed]) -> Result<Vec<Measure>, LayoutError> {
    for p in elements {
        if !p.offset.is_finite() || !p.element.quarter_length().is_finite() {
            return Err(LayoutError::NonFinite(p.offset));
        }
    }

    let mut meters: Vec<(f64, &TimeSignature)> = elements
        .iter()
        .filter_map(|p| match &p.element {
            Element::TimeSignature(ts) => Some((p.offset, ts)),
            _ => None,
        })
        .collect();
    meters.sort_by(|a, b| a.0.total_cmp(&b.0));

    let end = elements
        .iter()
        .map(|p| p.offset + p.element.quarter_length())
        .fold(0.0, f64::max);
    let last_marking = elements
        .iter()
        .filter(|p| p.element.quarter_length() == 0.0)
        .map(|p| p.offset)
        .fold(f64::NEG_INFINITY, f64::max);

    // Measure boundaries: (start, length).
    let default_meter = TimeSignature::default();
    let mut bars: Vec<(f64, f64)> = Vec::new();
    let mut start = 0.0;
    loop {
        let meter = meters
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= start + EPS)
            .map(|(_, ts)| *ts)
            .or_else(|| meters.first().map(|(_, ts)| *ts))
            .unwrap_or(&default_meter);
        let length = meter
            .bar_length()
            .filter(|l| *l > 0.0)
            .ok_or(LayoutError::InvalidBarLength(meter.beats, meter.beat_type))?;
        bars.push((start, length));
        start += length;
        if start >= end - EPS && start > last_marking + EPS {
            break;
        }
    }

    let mut measures: Vec<Measure> = bars
        .iter()
        .enumerate()
        .map(|(i, (_, length))| {
            let mut m = Measure::new(i as i32 + 1);
            m.bar_length = Some(*length);
            m
        })
        .collect();

    let bar_index = |offset: f64| {
        bars.iter()
            .rposition(|(s, _)| *s <= offset + EPS)
            .unwrap_or(0)
    };

    for placed in elements {
        let mut idx = bar_index(placed.offset);
        let mut offset = placed.offset;
        let mut remaining = placed.element.quarter_length();
        let original_tie = tie_of(&placed.element);
        let mut first = true;

        if remaining <= 0.0 {
            let local = (offset - bars[idx].0).max(0.0);
            measures[idx].insert(local, placed.element.clone());
            continue;
        }

        while remaining > EPS {
            let (bar_start, bar_len) = bars[idx];
            let local = (offset - bar_start).max(0.0);
            let room = bar_len - local;
            let piece_len = remaining.min(room);
            let is_last = remaining <= room + EPS;

            let mut piece = placed.element.clone();
            piece.set_quarter_length(if is_last { remaining } else { piece_len });
            if !(first && is_last) {
                set_tie(&mut piece, split_tie(original_tie, first, is_last));
            }
            measures[idx].insert(local, piece);

            if is_last || idx + 1 >= bars.len() {
                break;
            }
            remaining -= piece_len;
            offset = bars[idx + 1].0;
            idx += 1;
            first = false;
        }
    }

    Ok(measures)
}

fn tie_of(element: &Element) -> Option<Tie> {
    match element {
        Element::Note(n) => n.tie,
        Element::Chord(c) => c.tie,
        _ => None,
    }
}

fn set_tie(element: &mut Element, tie: Tie) {
    match element {
        Element::Note(n) => n.tie = Some(tie),
        Element::Chord(c) => c.tie = Some(tie),
        _ => {}
    }
}

/// Tie of one piece of a note split across barlines.
fn split_tie(original: Option<Tie>, first: bool, last: bool) -> Tie {
    match (first, last) {
        (true, _) => match original {
            None | Some(Tie::Start) => Tie::Start,
            Some(_) => Tie::Continue,
        },
        (false, true) => match original {
            None | Some(Tie::Stop) => Tie::Stop,
            Some(_) => Tie::Continue,
        },
        (false, false) => Tie::Continue,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Notation
// ═══════════════════════════════════════════════════════════════════════

/// Complete the notation of every measure: bar lengths, stems and beams.
///
/// All-or-nothing: the score is only updated when every measure succeeds.
pub fn make_notation(score: &mut Score) -> Result<(), LayoutError> {
    let mut parts = score.parts.clone();
    for part in &mut parts {
        let mut meter: Option<TimeSignature> = None;
        for measure in &mut part.measures {
            if let Some(ts) = measure.time_signature() {
                meter = Some(ts.clone());
            }
            if measure.bar_length.is_none() && !measure.implicit {
                if let Some(ts) = &meter {
                    measure.bar_length = ts.bar_length();
                }
            }
            assign_stems(measure);
            make_beams(measure, meter.as_ref())?;
        }
    }
    score.parts = parts;
    Ok(())
}

fn assign_stems(measure: &mut Measure) {
    for placed in &mut measure.elements {
        match &mut placed.element {
            Element::Note(note) if note.stem.is_none() && note.quarter_length < 4.0 => {
                note.stem = Some(stem_for(&[note.pitch.to_midi()]));
            }
            Element::Chord(chord) if chord.stem.is_none() && chord.quarter_length < 4.0 => {
                let midis: Vec<i32> = chord.pitches.iter().map(Pitch::to_midi).collect();
                if !midis.is_empty() {
                    chord.stem = Some(stem_for(&midis));
                }
            }
            _ => {}
        }
    }
}

/// Down when the note farthest from the middle line sits above it.
fn stem_for(midis: &[i32]) -> Stem {
    let highest = midis.iter().copied().max().unwrap_or(MIDDLE_LINE_MIDI);
    let lowest = midis.iter().copied().min().unwrap_or(MIDDLE_LINE_MIDI);
    if highest - MIDDLE_LINE_MIDI >= MIDDLE_LINE_MIDI - lowest {
        Stem::Down
    } else {
        Stem::Up
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Beaming
// ═══════════════════════════════════════════════════════════════════════

/// Beam eighth notes and shorter within each beat of one measure.
///
/// Fails when a note, chord or rest has a duration with no notated type.
pub fn make_beams(measure: &mut Measure, meter: Option<&TimeSignature>) -> Result<(), LayoutError> {
    let beat = meter.map_or(1.0, TimeSignature::beat_length);

    for placed in &measure.elements {
        if placed.element.is_sounding() {
            let ql = placed.element.quarter_length();
            if ql > 0.0 && notated_type(ql).is_none() {
                return Err(LayoutError::UnbeamableDuration {
                    measure: measure.number,
                    duration: ql,
                });
            }
        }
    }

    // Candidate groups of indices into measure.elements.
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_beat = -1i64;
    let mut expected_next = f64::NAN;

    for (idx, placed) in measure.elements.iter().enumerate() {
        if !placed.element.is_sounding() {
            continue;
        }
        let ql = placed.element.quarter_length();
        let levels = beam_levels(ql);
        let beat_index = ((placed.offset + EPS) / beat).floor() as i64;
        let fits_beat = placed.offset + ql <= (beat_index + 1) as f64 * beat + EPS;
        let beamable = placed.element.is_pitched() && levels > 0 && fits_beat;

        let continues = beamable
            && beat_index == current_beat
            && (placed.offset - expected_next).abs() < EPS;
        if !continues && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
        }
        if beamable {
            current.push(idx);
            current_beat = beat_index;
            expected_next = placed.offset + ql;
        } else {
            current_beat = -1;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    for placed in &mut measure.elements {
        clear_beams(&mut placed.element);
    }

    for group in groups.into_iter().filter(|g| g.len() > 1) {
        let levels: Vec<usize> = group
            .iter()
            .map(|&i| beam_levels(measure.elements[i].element.quarter_length()))
            .collect();
        for (pos, &idx) in group.iter().enumerate() {
            let mut beams = Vec::new();
            for level in 1..=levels[pos] {
                let left = pos > 0 && levels[pos - 1] >= level;
                let right = pos + 1 < group.len() && levels[pos + 1] >= level;
                let beam_type = match (left, right) {
                    (true, true) => "continue",
                    (false, true) => "begin",
                    (true, false) => "end",
                    (false, false) if pos == 0 => "forward hook",
                    (false, false) => "backward hook",
                };
                beams.push(Beam {
                    number: level as i32,
                    beam_type: beam_type.to_string(),
                });
            }
            set_beams(&mut measure.elements[idx].element, beams);
        }
    }

    Ok(())
}

/// Number of beams a duration carries (0 for quarter notes and longer).
fn beam_levels(quarter_length: f64) -> usize {
    match notated_type(quarter_length) {
        Some(("eighth", _)) => 1,
        Some(("16th", _)) => 2,
        Some(("32nd", _)) => 3,
        Some(("64th", _)) => 4,
        _ => 0,
    }
}

fn clear_beams(element: &mut Element) {
    match element {
        Element::Note(n) => n.beams.clear(),
        Element::Chord(c) => c.beams.clear(),
        _ => {}
    }
}

fn set_beams(element: &mut Element, beams: Vec<Beam>) {
    match element {
        Element::Note(n) => n.beams = beams,
        Element::Chord(c) => c.beams = beams,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(name: &str, ql: f64) -> Element {
        Element::Note(Note::new(Pitch::parse(name).unwrap(), ql))
    }

    fn loose_part(elements: Vec<Element>) -> Part {
        let mut part = Part::new("P1");
        for e in elements {
            part.append(e);
        }
        part
    }

    #[test]
    fn splits_into_four_four_bars_by_default() {
        let mut score = Score::new();
        score.parts.push(loose_part(vec![
            note("C4", 2.0),
            note("D4", 2.0),
            note("E4", 4.0),
        ]));
        make_measures(&mut score).unwrap();
        let part = &score.parts[0];
        assert_eq!(part.measures.len(), 2);
        assert!(part.elements.is_empty());
        assert_eq!(part.measures[1].number, 2);
        assert_eq!(part.measures[1].bar_length, Some(4.0));
    }

    #[test]
    fn ties_notes_across_barlines() {
        let mut part = Part::new("P1");
        part.insert(0.0, Element::TimeSignature(TimeSignature::new(3, 4)));
        part.insert(0.0, note("C4", 2.0));
        part.insert(2.0, note("G4", 2.0));
        let mut score = Score::new();
        score.parts.push(part);
        make_measures(&mut score).unwrap();

        let measures = &score.parts[0].measures;
        assert_eq!(measures.len(), 2);
        let ties: Vec<(f64, f64, Option<Tie>)> = measures
            .iter()
            .flat_map(|m| m.elements.iter())
            .filter_map(|p| match &p.element {
                Element::Note(n) => Some((p.offset, n.quarter_length, n.tie)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ties,
            vec![
                (0.0, 2.0, None),
                (2.0, 1.0, Some(Tie::Start)),
                (0.0, 1.0, Some(Tie::Stop)),
            ]
        );
    }

    #[test]
    fn zero_length_meter_is_rejected() {
        let mut score = Score::new();
        score.parts.push(loose_part(vec![
            Element::TimeSignature(TimeSignature::new(0, 4)),
            note("C4", 1.0),
        ]));
        let before = score.clone();
        assert_eq!(
            make_measures(&mut score),
            Err(LayoutError::InvalidBarLength(0, 4))
        );
        assert_eq!(score, before);
    }

    #[test]
    fn beams_eighths_within_beats() {
        let mut m = Measure::new(1);
        for name in ["C5", "D5", "E5", "F5"] {
            m.append(note(name, 0.5));
        }
        m.append(note("G4", 1.0));
        make_beams(&mut m, Some(&TimeSignature::new(4, 4))).unwrap();

        let beams: Vec<Vec<String>> = m
            .elements
            .iter()
            .map(|p| match &p.element {
                Element::Note(n) => n.beams.iter().map(|b| b.beam_type.clone()).collect(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(
            beams,
            vec![
                vec!["begin".to_string()],
                vec!["end".to_string()],
                vec!["begin".to_string()],
                vec!["end".to_string()],
                vec![],
            ]
        );
    }

    #[test]
    fn sixteenths_get_second_beam() {
        let mut m = Measure::new(1);
        m.append(note("C5", 0.5));
        m.append(note("D5", 0.25));
        m.append(note("E5", 0.25));
        make_beams(&mut m, None).unwrap();
        match &m.elements[1].element {
            Element::Note(n) => {
                assert_eq!(n.beams.len(), 2);
                assert_eq!(n.beams[1].beam_type, "begin");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn odd_durations_cannot_be_beamed() {
        let mut m = Measure::new(3);
        m.append(note("C5", 0.3));
        assert_eq!(
            make_beams(&mut m, None),
            Err(LayoutError::UnbeamableDuration {
                measure: 3,
                duration: 0.3
            })
        );
    }

    #[test]
    fn notation_sets_stems_and_bar_lengths() {
        let mut measure = Measure::new(1);
        measure.insert(0.0, Element::TimeSignature(TimeSignature::new(2, 4)));
        measure.append(note("C4", 1.0));
        measure.append(note("D5", 1.0));
        let mut part = Part::new("P1");
        part.measures.push(measure);
        let mut score = Score::new();
        score.parts.push(part);

        make_notation(&mut score).unwrap();
        let m = &score.parts[0].measures[0];
        assert_eq!(m.bar_length, Some(2.0));
        let stems: Vec<Option<Stem>> = m
            .elements
            .iter()
            .filter_map(|p| match &p.element {
                Element::Note(n) => Some(n.stem),
                _ => None,
            })
            .collect();
        assert_eq!(stems, vec![Some(Stem::Up), Some(Stem::Down)]);
    }
}
