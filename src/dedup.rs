//! In-memory deduplicator for text annotations and chord symbols.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::figure;
use crate::model::{Element, Placement, Score};
use crate::warnings::WarningLog;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Signature {
    Text(String, Option<Placement>),
    Chord(String),
}

fn signature(element: &Element) -> Option<Signature> {
    match element {
        Element::Text(t) => Some(Signature::Text(t.content.trim().to_string(), t.placement)),
        Element::ChordSymbol(cs) => Some(Signature::Chord(figure::normalize(&cs.figure))),
        _ => None,
    }
}

/// Remove later repeats of an annotation or chord symbol within each measure.
///
/// Returns the number of removed elements; a non-zero count is also
/// recorded as one summary warning.
pub fn dedup(score: &mut Score, warnings: &mut WarningLog) -> usize {
    let mut removed = 0;
    for part in &mut score.parts {
        for measure in &mut part.measures {
            let number = measure.number;
            let mut seen = HashSet::new();
            let before = measure.elements.len();
            measure.elements.retain(|placed| match signature(&placed.element) {
                Some(sig) => {
                    let first = seen.insert(sig.clone());
                    if !first {
                        debug!(measure = number, offset = placed.offset, ?sig, "removed duplicate");
                    }
                    first
                }
                None => true,
            });
            removed += before - measure.elements.len();
        }
    }
    if removed > 0 {
        info!(removed, "removed duplicate elements");
        warnings.push(format!("{removed} duplicate element(s) removed"));
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmony::ChordSymbol;
    use crate::model::{Measure, Part, TextExpression};
    use pretty_assertions::assert_eq;

    fn text(content: &str, placement: Option<Placement>) -> Element {
        let mut t = TextExpression::new(content);
        t.placement = placement;
        Element::Text(t)
    }

    fn score_with(measures: Vec<Measure>) -> Score {
        let mut part = Part::new("P1");
        for m in measures {
            part.append_measure(m);
        }
        let mut score = Score::new();
        score.push_part(part);
        score
    }

    #[test]
    fn keeps_one_per_signature() {
        let mut m = Measure::new(1);
        m.insert(0.0, text("Swing", Some(Placement::Above)));
        m.insert(0.0001, text(" Swing ", Some(Placement::Above)));
        m.insert(1.0, text("Swing", Some(Placement::Below)));
        m.insert(2.0, text("Coda", Some(Placement::Above)));
        let mut score = score_with(vec![m]);
        let mut w = WarningLog::new();

        assert_eq!(dedup(&mut score, &mut w), 1);
        assert_eq!(score.parts[0].measures[0].elements.len(), 3);
        assert_eq!(w.entries(), ["1 duplicate element(s) removed".to_string()]);
    }

    #[test]
    fn chord_symbols_compare_by_normalized_figure() {
        let mut m = Measure::new(1);
        m.insert(0.0, Element::ChordSymbol(ChordSymbol::parse("Cm7").unwrap()));
        let mut spaced = ChordSymbol::parse("Cm7").unwrap();
        spaced.figure = "C m7".to_string();
        m.insert(2.0, Element::ChordSymbol(spaced));
        let mut score = score_with(vec![m]);
        assert_eq!(dedup(&mut score, &mut WarningLog::new()), 1);
    }

    #[test]
    fn measures_are_independent() {
        let mut a = Measure::new(1);
        a.insert(0.0, text("Solo", None));
        let mut b = Measure::new(2);
        b.insert(0.0, text("Solo", None));
        let mut score = score_with(vec![a, b]);
        let mut w = WarningLog::new();
        assert_eq!(dedup(&mut score, &mut w), 0);
        assert!(w.is_empty());
    }
}
