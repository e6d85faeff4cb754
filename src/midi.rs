//! MIDI file generation from a score.
//!
//! Produces a Standard MIDI File (SMF) Type 1 as raw bytes.
//! Track 0 is the tempo map (tempo and time-signature meta events from the
//! first part); each part follows as its own track on its own channel.
//! Channel 10 (index 9) is left to percussion.

use std::path::Path;

use tracing::debug;

use crate::model::{Element, Part, Score, Tie};

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// A single MIDI event (note on/off, program change, meta event)
#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    /// Absolute time in ticks from the start of the track
    pub tick: u32,
    /// Raw message bytes (status + data)
    pub bytes: Vec<u8>,
}

/// Ticks per quarter note in our MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

/// Velocity of notes that carry none.
pub const DEFAULT_VELOCITY: u8 = 80;

const PERCUSSION_CHANNEL: u8 = 9;

/// Generate a complete Standard MIDI File (SMF Type 1).
pub fn score_to_midi(score: &Score) -> Vec<u8> {
    let mut tracks: Vec<Vec<u8>> = Vec::new();

    // ── Track 0: Tempo map ──────────────────────────────────────────
    tracks.push(build_tempo_track(score.parts.first()));

    // ── Track 1+ : one per part ────────────────────────────────────
    for (idx, part) in score.parts.iter().enumerate() {
        let channel = channel_for(part, idx);
        let mut events = Vec::new();
        if let Some(program) = part.midi_program {
            // MusicXML programs are 1-based
            let program = (program - 1).clamp(0, 127) as u8;
            events.push(MidiEvent {
                tick: 0,
                bytes: vec![0xC0 | channel, program],
            });
        }
        events.extend(part_events(part, channel));
        debug!(part = %part.id, channel, events = events.len(), "encoded MIDI track");
        let name = if part.name.is_empty() { part.id.as_str() } else { part.name.as_str() };
        tracks.push(encode_track(&events, name));
    }

    build_smf(&tracks)
}

/// Write a score as a Standard MIDI File.
pub fn write_midi(score: &Score, path: &Path) -> std::io::Result<()> {
    std::fs::write(path, score_to_midi(score))
}

/// Part's own channel when it names one, otherwise one per part index,
/// skipping the percussion channel.
fn channel_for(part: &Part, idx: usize) -> u8 {
    if let Some(ch) = part.midi_channel {
        return (ch - 1).clamp(0, 15) as u8;
    }
    let ch = if idx < PERCUSSION_CHANNEL as usize { idx } else { idx + 1 };
    ch.min(15) as u8
}

fn to_ticks(quarter_length: f64) -> u32 {
    (quarter_length.max(0.0) * TICKS_PER_QUARTER as f64).round() as u32
}

// ═══════════════════════════════════════════════════════════════════════
// Note extraction
// ═══════════════════════════════════════════════════════════════════════

/// Note-on/off events for every note and chord of a part.
///
/// Tied notes sound once: a note continuing a tie emits no note-on, a note
/// starting or continuing one emits no note-off.
fn part_events(part: &Part, channel: u8) -> Vec<MidiEvent> {
    let mut events = Vec::new();
    for placed in part.flatten() {
        let (midis, ql, velocity, tie): (Vec<i32>, f64, Option<u8>, Option<Tie>) =
            match &placed.element {
                Element::Note(n) => (vec![n.pitch.to_midi()], n.quarter_length, n.velocity, n.tie),
                Element::Chord(c) => (
                    c.pitches.iter().map(|p| p.to_midi()).collect(),
                    c.quarter_length,
                    c.velocity,
                    c.tie,
                ),
                _ => continue,
            };
        if ql <= 0.0 {
            continue;
        }
        let on_tick = to_ticks(placed.offset);
        let off_tick = to_ticks(placed.offset + ql);
        let velocity = velocity.unwrap_or(DEFAULT_VELOCITY).min(127);
        let sounds = !matches!(tie, Some(Tie::Stop) | Some(Tie::Continue));
        let releases = !matches!(tie, Some(Tie::Start) | Some(Tie::Continue));

        for midi in midis {
            let key = midi.clamp(0, 127) as u8;
            if sounds {
                events.push(MidiEvent {
                    tick: on_tick,
                    bytes: vec![0x90 | channel, key, velocity],
                });
            }
            if releases {
                events.push(MidiEvent {
                    tick: off_tick,
                    bytes: vec![0x80 | channel, key, 0],
                });
            }
        }
    }
    events
}

// ═══════════════════════════════════════════════════════════════════════
// SMF byte encoding
// ═══════════════════════════════════════════════════════════════════════

/// Build the complete Standard MIDI File bytes.
fn build_smf(tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();

    // MThd header
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes()); // header length
    out.extend_from_slice(&1u16.to_be_bytes()); // format type 1
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&TICKS_PER_QUARTER.to_be_bytes());

    // Track chunks
    for track_data in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        out.extend_from_slice(track_data);
    }

    out
}

/// Build the tempo track (track 0) from the tempo and meter marks of a part.
fn build_tempo_track(part: Option<&Part>) -> Vec<u8> {
    let mut events: Vec<MidiEvent> = Vec::new();
    let mut last_tempo: f64 = 0.0;

    for placed in part.map(Part::flatten).unwrap_or_default() {
        let tick = to_ticks(placed.offset);
        match &placed.element {
            Element::Tempo(mark) => {
                let bpm = mark.quarter_bpm();
                if bpm <= 0.0 || (bpm - last_tempo).abs() <= 0.01 {
                    continue;
                }
                let uspq = (60_000_000.0 / bpm) as u32; // microseconds per quarter
                // Meta event: FF 51 03 tt tt tt
                events.push(MidiEvent {
                    tick,
                    bytes: vec![
                        0xFF,
                        0x51,
                        0x03,
                        ((uspq >> 16) & 0xFF) as u8,
                        ((uspq >> 8) & 0xFF) as u8,
                        (uspq & 0xFF) as u8,
                    ],
                });
                last_tempo = bpm;
            }
            Element::TimeSignature(ts) if ts.beats > 0 && ts.beat_type > 0 => {
                // Meta event: FF 58 04 nn dd cc bb
                let denominator = (ts.beat_type as u32).trailing_zeros() as u8;
                events.push(MidiEvent {
                    tick,
                    bytes: vec![0xFF, 0x58, 0x04, ts.beats.min(255) as u8, denominator, 24, 8],
                });
            }
            _ => {}
        }
    }

    encode_track(&events, "Tempo")
}

/// Encode a track's events into raw MTrk bytes (delta-time encoded).
fn encode_track(events: &[MidiEvent], name: &str) -> Vec<u8> {
    let mut data = Vec::new();

    // Track name meta event
    let name_bytes = name.as_bytes();
    data.extend_from_slice(&[0x00]); // delta time 0
    data.push(0xFF);
    data.push(0x03); // track name
    write_vlq(&mut data, name_bytes.len() as u32);
    data.extend_from_slice(name_bytes);

    // Stable sort keeps note-offs ahead of note-ons queued later at the same tick
    let mut sorted: Vec<&MidiEvent> = events.iter().collect();
    sorted.sort_by_key(|e| (e.tick, e.bytes[0] & 0xF0 == 0x90));

    let mut last_tick: u32 = 0;
    for event in &sorted {
        let delta = event.tick.saturating_sub(last_tick);
        write_vlq(&mut data, delta);
        data.extend_from_slice(&event.bytes);
        last_tick = event.tick;
    }

    // End of track
    data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    data
}

/// Write a variable-length quantity (VLQ) to a byte vector.
fn write_vlq(out: &mut Vec<u8>, mut value: u32) {
    if value == 0 {
        out.push(0);
        return;
    }
    let mut buf = [0u8; 5];
    let mut i = 0;
    while value > 0 {
        buf[i] = (value & 0x7F) as u8;
        value >>= 7;
        if i > 0 {
            buf[i] |= 0x80;
        }
        i += 1;
    }
    // Write in reverse order
    for j in (0..i).rev() {
        out.push(buf[j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Measure, MetronomeMark, Note, Pitch};

    fn note(name: &str, ql: f64, tie: Option<Tie>) -> Element {
        let mut n = Note::new(Pitch::parse(name).unwrap(), ql);
        n.tie = tie;
        Element::Note(n)
    }

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);
    }

    #[test]
    fn smf_header_valid() {
        let track = encode_track(&[], "Test");
        let smf = build_smf(&[track]);
        assert_eq!(&smf[0..4], b"MThd");
        assert_eq!(&smf[8..10], &1u16.to_be_bytes()); // format 1
        assert_eq!(&smf[12..14], &TICKS_PER_QUARTER.to_be_bytes());
        assert!(smf.windows(4).any(|w| w == b"MTrk"));
    }

    #[test]
    fn tied_notes_sound_once() {
        let mut part = Part::new("P1");
        let mut m1 = Measure::new(1);
        m1.bar_length = Some(1.0);
        m1.append(note("C4", 1.0, Some(Tie::Start)));
        let mut m2 = Measure::new(2);
        m2.bar_length = Some(1.0);
        m2.append(note("C4", 1.0, Some(Tie::Stop)));
        part.append_measure(m1);
        part.append_measure(m2);

        let events = part_events(&part, 0);
        assert_eq!(
            events,
            vec![
                MidiEvent { tick: 0, bytes: vec![0x90, 60, DEFAULT_VELOCITY] },
                MidiEvent { tick: 960, bytes: vec![0x80, 60, 0] },
            ]
        );
    }

    #[test]
    fn channels_skip_percussion() {
        let part = Part::new("P");
        assert_eq!(channel_for(&part, 8), 8);
        assert_eq!(channel_for(&part, 9), 10);
        let mut named = Part::new("Q");
        named.midi_channel = Some(3);
        assert_eq!(channel_for(&named, 0), 2);
    }

    #[test]
    fn tempo_track_carries_tempo() {
        let mut part = Part::new("P1");
        part.append(Element::Tempo(MetronomeMark::quarter(120.0)));
        let track = build_tempo_track(Some(&part));
        // 500000 us per quarter
        assert!(track.windows(6).any(|w| w == [0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]));
    }

    #[test]
    fn one_track_per_part_plus_tempo() {
        let mut score = Score::new();
        for id in ["P1", "P2"] {
            let mut part = Part::new(id);
            part.append(note("E4", 1.0, None));
            score.push_part(part);
        }
        let smf = score_to_midi(&score);
        assert_eq!(&smf[10..12], &3u16.to_be_bytes());
    }
}
