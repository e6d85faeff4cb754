//! Integration tests for the accompaniment generator and MIDI export.

use pretty_assertions::assert_eq;
use scoreprep::accompaniment::{self, Rhythm, ACCOMPANIMENT_ID};
use scoreprep::midi::{score_to_midi, write_midi};
use scoreprep::{
    export_midi, ChordSymbol, Element, Measure, MidiExportOptions, Note, Part, PipelineConfig,
    Pitch, Score, TimeSignature,
};

const LEAD_SHEET: &str = r#"let m = stream::Measure(1);
m.append(meter::TimeSignature("4/4"));
m.insert(0.0, harmony::ChordSymbol("C"));
m.insert(2.0, harmony::ChordSymbol("G7"));
m.append(note::Note("E4", 2));
m.append(note::Note("D4", 2));
show(m);"#;

fn track_count(smf: &[u8]) -> u16 {
    u16::from_be_bytes([smf[10], smf[11]])
}

fn lead_sheet() -> Score {
    let mut measure = Measure::new(1);
    measure.insert(0.0, Element::TimeSignature(TimeSignature::new(4, 4)));
    measure.insert(0.0, Element::ChordSymbol(ChordSymbol::parse("C").unwrap()));
    measure.insert(0.0, Element::Note(Note::new(Pitch::parse("E4").unwrap(), 4.0)));
    measure.bar_length = Some(4.0);
    let mut part = Part::new("P1");
    part.append_measure(measure);
    let mut score = Score::new();
    score.push_part(part);
    score
}

#[test]
fn export_with_and_without_chords() {
    let config = PipelineConfig::default();
    let plain = export_midi(LEAD_SHEET, &MidiExportOptions::default(), &config).unwrap();
    assert_eq!(&plain[0..4], b"MThd");
    assert_eq!(track_count(&plain), 2);

    let options = MidiExportOptions {
        include_chords: true,
        ..MidiExportOptions::default()
    };
    let with_chords = export_midi(LEAD_SHEET, &options, &config).unwrap();
    assert_eq!(track_count(&with_chords), 3);
}

#[test]
fn chords_requested_but_absent() {
    let options = MidiExportOptions {
        include_chords: true,
        rhythm: Rhythm::Auto,
        ..MidiExportOptions::default()
    };
    let smf = export_midi(
        "let n = note::Note(\"C5\");",
        &options,
        &PipelineConfig::default(),
    )
    .unwrap();
    assert_eq!(track_count(&smf), 2);
}

#[test]
fn script_errors_stop_the_export() {
    let err = export_midi(
        "let n = ;",
        &MidiExportOptions::default(),
        &PipelineConfig::default(),
    );
    assert!(matches!(err, Err(scoreprep::PipelineError::Script(_))));
}

#[test]
fn accompaniment_plays_chord_tones() {
    let mut score = lead_sheet();
    let part = accompaniment::generate(&score, Rhythm::Whole, 3, 0.5).unwrap();
    assert_eq!(part.id, ACCOMPANIMENT_ID);
    score.push_part(part);

    let smf = score_to_midi(&score);
    assert_eq!(track_count(&smf), 3);
    // Second part plays on channel 1: C3 at velocity 63
    assert!(smf.windows(3).any(|w| w == [0x91, 48, 63]));
}

#[test]
fn written_file_matches_encoded_bytes() {
    let score = lead_sheet();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mid");
    write_midi(&score, &path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), score_to_midi(&score));
}
