//! Notation finalizer: derive measures when there are none, then complete
//! stems and beams. Never fails; every layout failure degrades and is logged.

use tracing::{debug, warn};

use crate::layout;
use crate::model::{Score, TimeSignature};

pub fn finalize_notation(score: &mut Score) {
    if !score.has_measures() {
        match layout::make_measures(score) {
            Ok(()) => debug!(measures = score.measure_count(), "derived measures"),
            Err(e) => warn!("measure derivation failed, continuing without measures: {e}"),
        }
    }

    if let Err(e) = layout::make_notation(score) {
        warn!("notation layout failed, falling back to per-measure beaming: {e}");
        beam_each_measure(score);
    }
}

fn beam_each_measure(score: &mut Score) {
    for part in &mut score.parts {
        let mut meter: Option<TimeSignature> = None;
        for measure in &mut part.measures {
            if let Some(ts) = measure.time_signature() {
                meter = Some(ts.clone());
            }
            if let Err(e) = layout::make_beams(measure, meter.as_ref()) {
                debug!(part = %part.id, measure = measure.number, "beaming skipped: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, Measure, Note, Part, Pitch};

    fn note(name: &str, ql: f64) -> Element {
        Element::Note(Note::new(Pitch::parse(name).unwrap(), ql))
    }

    fn beam_count(measure: &Measure) -> usize {
        measure
            .elements
            .iter()
            .filter(|p| matches!(&p.element, Element::Note(n) if !n.beams.is_empty()))
            .count()
    }

    #[test]
    fn loose_notes_get_measures() {
        let mut part = Part::new("P1");
        for _ in 0..6 {
            part.append(note("C4", 1.0));
        }
        let mut score = Score::new();
        score.push_part(part);
        finalize_notation(&mut score);
        assert_eq!(score.measure_count(), 2);
    }

    #[test]
    fn one_bad_measure_does_not_block_the_rest() {
        let mut bad = Measure::new(1);
        bad.append(note("C4", 0.3));
        let mut good = Measure::new(2);
        good.append(note("C5", 0.5));
        good.append(note("D5", 0.5));

        let mut part = Part::new("P1");
        part.append_measure(bad);
        part.append_measure(good);
        let mut score = Score::new();
        score.push_part(part);

        finalize_notation(&mut score);
        assert_eq!(beam_count(&score.parts[0].measures[0]), 0);
        assert_eq!(beam_count(&score.parts[0].measures[1]), 2);
    }

    #[test]
    fn failed_derivation_leaves_score_usable() {
        let mut part = Part::new("P1");
        part.append(Element::TimeSignature(crate::model::TimeSignature::new(0, 4)));
        part.append(note("C4", 1.0));
        let mut score = Score::new();
        score.push_part(part);
        finalize_notation(&mut score);
        assert!(!score.has_measures());
        assert_eq!(score.parts[0].elements.len(), 2);
    }
}
