//! Defaults injector: title, time signature and tempo every score needs.

use tracing::info;

use crate::config::DefaultsConfig;
use crate::model::{Element, Score};
use crate::warnings::WarningLog;

/// Fill in a missing title, and give every part a time signature and a tempo
/// mark at its start when it has none anywhere.
///
/// The injected tempo carries no text label, so renderers never show it twice.
pub fn inject_defaults(score: &mut Score, defaults: &DefaultsConfig, warnings: &mut WarningLog) {
    let metadata = score.metadata_mut();
    let has_title = metadata
        .title
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if !has_title {
        metadata.title = Some(defaults.title.clone());
        warnings.push(format!("Missing title, set to '{}'", defaults.title));
    }

    for part in &mut score.parts {
        if !part.any_element(|e| matches!(e, Element::TimeSignature(_))) {
            let ts = defaults.time_signature();
            info!(part = %part.id, beats = ts.beats, beat_type = ts.beat_type, "adding default time signature");
            warnings.push(format!(
                "Part {}: no time signature, added {}/{}",
                part.id, ts.beats, ts.beat_type
            ));
            part.insert_at_start(Element::TimeSignature(ts));
        }
        if !part.any_element(|e| matches!(e, Element::Tempo(_))) {
            let tempo = defaults.tempo();
            info!(part = %part.id, bpm = tempo.per_minute, "adding default tempo");
            warnings.push(format!(
                "Part {}: no tempo, added quarter = {}",
                part.id, tempo.per_minute
            ));
            part.insert_at_start(Element::Tempo(tempo));
        }
    }
}
