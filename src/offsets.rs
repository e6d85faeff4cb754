//! Offset disambiguator.
//!
//! Renderers merge text annotations that share an offset. Each annotation in
//! a shared-offset group moves by `index * epsilon`, an imperceptible delta
//! that keeps them apart, and gets an identifier when it has none.

use tracing::{debug, info};

use crate::model::{Element, Measure, Score};

/// Spread co-located text annotations apart within every measure.
///
/// Returns the number of annotations moved.
pub fn disambiguate_offsets(score: &mut Score, epsilon: f64) -> usize {
    let mut moved = 0;
    for (pi, part) in score.parts.iter_mut().enumerate() {
        for (mi, measure) in part.measures.iter_mut().enumerate() {
            moved += spread_measure(measure, mi, pi, epsilon);
        }
    }
    if moved > 0 {
        info!(moved, "spread co-located annotations");
    }
    moved
}

fn spread_measure(measure: &mut Measure, mi: usize, pi: usize, epsilon: f64) -> usize {
    // Annotation indices grouped by exact offset, in first-seen order.
    let mut groups: Vec<(f64, Vec<usize>)> = Vec::new();
    for (idx, placed) in measure.elements.iter().enumerate() {
        if !matches!(placed.element, Element::Text(_)) {
            continue;
        }
        match groups
            .iter_mut()
            .find(|(offset, _)| offset.to_bits() == placed.offset.to_bits())
        {
            Some((_, members)) => members.push(idx),
            None => groups.push((placed.offset, vec![idx])),
        }
    }
    if groups.iter().all(|(_, members)| members.len() < 2) {
        return 0;
    }
    groups.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut taken: Vec<f64> = Vec::new();
    let mut targets: Vec<(usize, f64)> = Vec::new();
    for (offset, members) in &groups {
        let shared = members.len() > 1;
        for (i, &idx) in members.iter().enumerate() {
            let mut target = offset + i as f64 * epsilon;
            while taken.iter().any(|t| t.to_bits() == target.to_bits()) {
                target += epsilon;
            }
            taken.push(target);

            if let Element::Text(text) = &mut measure.elements[idx].element {
                if shared {
                    match &text.id {
                        Some(id) if !id.trim().is_empty() => {
                            debug!(id = %id, "keeping caller identifier");
                        }
                        _ => {
                            let id = format!("{}-m{mi}-p{pi}-{i}", id_stem(&text.content));
                            debug!(id = %id, "assigned annotation identifier");
                            text.id = Some(id);
                        }
                    }
                }
            }
            if target.to_bits() != offset.to_bits() {
                targets.push((idx, target));
            }
        }
    }

    let moved = targets.len();
    // Remove from the back so earlier indices stay valid.
    targets.sort_by(|a, b| b.0.cmp(&a.0));
    let mut reinsert = Vec::with_capacity(moved);
    for (idx, target) in targets {
        let placed = measure.elements.remove(idx);
        debug!(from = placed.offset, to = target, "moved annotation");
        reinsert.push((target, placed.element));
    }
    reinsert.sort_by(|a, b| a.0.total_cmp(&b.0));
    for (target, element) in reinsert {
        measure.insert(target, element);
    }
    moved
}

/// Identifier stem from annotation text.
fn id_stem(content: &str) -> String {
    content
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' => '-',
            '♭' => 'b',
            '♯' => 's',
            other => other,
        })
        .take(20)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, Pitch, TextExpression};
    use pretty_assertions::assert_eq;

    fn text(content: &str, id: Option<&str>) -> Element {
        let mut t = TextExpression::new(content);
        t.id = id.map(str::to_string);
        Element::Text(t)
    }

    fn score_with(measure: Measure) -> Score {
        let mut part = crate::model::Part::new("P1");
        part.append_measure(measure);
        let mut score = Score::new();
        score.push_part(part);
        score
    }

    fn annotations(score: &Score) -> Vec<(f64, String)> {
        score.parts[0].measures[0]
            .elements
            .iter()
            .filter_map(|p| match &p.element {
                Element::Text(t) => Some((p.offset, t.id.clone().unwrap_or_default())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn shared_offsets_are_spread() {
        let mut m = Measure::new(1);
        m.insert(0.0, text("Imaj7 Jonian", None));
        m.insert(0.0, text("Bb/D", None));
        m.insert(0.0, Element::Note(Note::new(Pitch::parse("C4").unwrap(), 4.0)));
        m.insert(2.0, text("rit.", None));
        let mut score = score_with(m);

        assert_eq!(disambiguate_offsets(&mut score, 0.0001), 1);
        assert_eq!(
            annotations(&score),
            vec![
                (0.0, "Imaj7-Jonian-m0-p0-0".to_string()),
                (0.0001, "Bb-D-m0-p0-1".to_string()),
                (2.0, String::new()),
            ]
        );
    }

    #[test]
    fn caller_identifiers_survive() {
        let mut m = Measure::new(1);
        m.insert(1.0, text("A", Some("intro-a")));
        m.insert(1.0, text("B", None));
        let mut score = score_with(m);
        disambiguate_offsets(&mut score, 0.0001);
        let ids: Vec<String> = annotations(&score).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec!["intro-a".to_string(), "B-m0-p0-1".to_string()]);
    }

    #[test]
    fn bumped_offsets_never_collide() {
        let mut m = Measure::new(1);
        m.insert(0.0, text("one", None));
        m.insert(0.0, text("two", None));
        m.insert(0.0001, text("three", None));
        let mut score = score_with(m);
        disambiguate_offsets(&mut score, 0.0001);

        let offsets: Vec<u64> = annotations(&score)
            .iter()
            .map(|(o, _)| o.to_bits())
            .collect();
        let mut unique = offsets.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn id_stem_is_sanitized_and_truncated() {
        assert_eq!(id_stem("  E♭ maj / B♯ long text here "), "Eb-maj---Bs-long-tex");
    }
}
