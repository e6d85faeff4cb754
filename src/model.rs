//! Data model for a notation document.
//!
//! A [`Score`] owns [`Part`]s, a part owns [`Measure`]s, and a measure owns
//! offset-addressed [`Placed`] elements. Offsets and durations are
//! quarter-lengths (`1.0` = one quarter note) measured from the start of the
//! containing measure. Parts may also hold loose elements at part-level
//! offsets until measures are derived for them.

use serde::{Deserialize, Serialize};

use crate::error::PitchError;
use crate::harmony::ChordSymbol;

/// A complete notation document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Title/composer block; absent until created by a script or the defaults injector
    pub metadata: Option<Metadata>,
    /// Musical parts (instruments)
    pub parts: Vec<Part>,
    /// MusicXML version of the source file, if parsed
    pub version: Option<String>,
    /// Software that created the source file, if parsed
    pub software: Option<String>,
}

/// Descriptive metadata of a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub composer: Option<String>,
    pub arranger: Option<String>,
}

/// A musical part (one instrument or voice).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name (e.g., "Piano")
    pub name: String,
    /// Abbreviated name (e.g., "Pno.")
    pub abbreviation: Option<String>,
    /// MIDI program number
    pub midi_program: Option<i32>,
    /// MIDI channel
    pub midi_channel: Option<i32>,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
    /// Elements not yet assigned to a measure, at part-level offsets
    pub elements: Vec<Placed>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number
    pub number: i32,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Nominal length in quarter notes, set once the active meter is known
    pub bar_length: Option<f64>,
    /// Elements in offset order
    pub elements: Vec<Placed>,
}

/// A generic container of measures and loose elements, the shape a script
/// builds when it does not commit to a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub measures: Vec<Measure>,
    pub elements: Vec<Placed>,
}

/// An element at an offset within its container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placed {
    pub offset: f64,
    pub element: Element,
}

/// Every musical object a measure can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Note(Note),
    Rest(Rest),
    Chord(Chord),
    TimeSignature(TimeSignature),
    Clef(Clef),
    Key(Key),
    Tempo(MetronomeMark),
    Text(TextExpression),
    ChordSymbol(ChordSymbol),
    RomanNumeral(RomanNumeral),
    Barline(Barline),
}

/// A single pitched note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: Pitch,
    /// Duration in quarter notes
    pub quarter_length: f64,
    pub id: Option<String>,
    pub lyric: Option<String>,
    /// MIDI velocity (1-127)
    pub velocity: Option<u8>,
    pub tie: Option<Tie>,
    pub stem: Option<Stem>,
    #[serde(default)]
    pub beams: Vec<Beam>,
}

/// A rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub quarter_length: f64,
    pub id: Option<String>,
}

/// Several pitches sounding together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub pitches: Vec<Pitch>,
    pub quarter_length: f64,
    pub id: Option<String>,
    pub lyric: Option<String>,
    pub velocity: Option<u8>,
    pub tie: Option<Tie>,
    pub stem: Option<Stem>,
    #[serde(default)]
    pub beams: Vec<Beam>,
}

/// Time signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
    pub id: Option<String>,
}

/// Clef definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clef {
    /// Clef sign: "G" (treble), "F" (bass), "C" (alto/tenor)
    pub sign: String,
    /// Staff line the clef sits on
    pub line: i32,
    /// Octave transposition (e.g., -1 for guitar's octave-lower treble clef)
    pub octave_change: Option<i32>,
    pub id: Option<String>,
}

/// Key signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Number of sharps (positive) or flats (negative)
    pub fifths: i32,
    /// Mode (e.g., "major", "minor")
    pub mode: Option<String>,
    pub id: Option<String>,
}

/// Tempo marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetronomeMark {
    /// Beat unit name: "quarter", "half", "eighth", ...
    pub beat_unit: String,
    pub dotted: bool,
    /// Beats per minute of the beat unit
    pub per_minute: f64,
    /// Optional text label ("Allegro")
    pub text: Option<String>,
    pub id: Option<String>,
}

/// Free text attached at an offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExpression {
    pub content: String,
    pub placement: Option<Placement>,
    pub id: Option<String>,
}

/// Roman-numeral analysis label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomanNumeral {
    pub figure: String,
    /// Key context, e.g. "C" or "a"
    pub key: Option<String>,
    pub id: Option<String>,
}

/// A barline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barline {
    /// Visual style: "regular", "light-light", "light-heavy", "heavy-light", ...
    pub style: String,
    pub id: Option<String>,
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: char,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp
    pub alter: Option<f64>,
}

/// Beam grouping information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// Beam level (1 = eighth-note beam, 2 = sixteenth-note beam, etc.)
    pub number: i32,
    /// Beam type: "begin", "continue", "end"
    pub beam_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tie {
    Start,
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stem {
    Up,
    Down,
}

impl Placement {
    pub fn as_str(self) -> &'static str {
        match self {
            Placement::Above => "above",
            Placement::Below => "below",
        }
    }

    pub fn parse(s: &str) -> Option<Placement> {
        match s.trim() {
            "above" => Some(Placement::Above),
            "below" => Some(Placement::Below),
            _ => None,
        }
    }
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of measures in the first part.
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// The score title, if any.
    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }

    /// Metadata block, created empty if missing.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        self.metadata.get_or_insert_with(Metadata::default)
    }

    /// Whether any part holds at least one measure.
    pub fn has_measures(&self) -> bool {
        self.parts.iter().any(|p| !p.measures.is_empty())
    }

    /// Visit every note and chord in the score.
    pub fn for_each_sounding_mut(&mut self, mut f: impl FnMut(&mut Element)) {
        for part in &mut self.parts {
            part.for_each_sounding_mut(&mut f);
        }
    }

    /// Add a part, assigning it an id when it has none.
    pub fn push_part(&mut self, mut part: Part) {
        if part.id.is_empty() {
            part.id = format!("P{}", self.parts.len() + 1);
        }
        self.parts.push(part);
    }
}

impl Part {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Insert a loose element at a part-level offset.
    pub fn insert(&mut self, offset: f64, element: Element) {
        insert_sorted(&mut self.elements, offset, element);
    }

    /// Append a loose element after the last sounding loose element.
    pub fn append(&mut self, element: Element) {
        let offset = highest_time(&self.elements);
        self.insert(offset, element);
    }

    /// Append a measure, numbering it when it carries no number.
    pub fn append_measure(&mut self, mut measure: Measure) {
        if measure.number == 0 && !measure.implicit {
            measure.number = self.measures.len() as i32 + 1;
        }
        self.measures.push(measure);
    }

    /// Start offset of every measure, accumulated from measure durations.
    pub fn measure_offsets(&self) -> Vec<f64> {
        let mut offsets = Vec::with_capacity(self.measures.len());
        let mut cursor = 0.0;
        for measure in &self.measures {
            offsets.push(cursor);
            cursor += measure.duration();
        }
        offsets
    }

    /// Every element of the part at its absolute offset, in offset order.
    pub fn flatten(&self) -> Vec<Placed> {
        let mut flat = Vec::new();
        for (measure, start) in self.measures.iter().zip(self.measure_offsets()) {
            for placed in &measure.elements {
                flat.push(Placed {
                    offset: start + placed.offset,
                    element: placed.element.clone(),
                });
            }
        }
        flat.extend(self.elements.iter().cloned());
        flat.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        flat
    }

    /// Whether any element anywhere in the part satisfies `pred`.
    pub fn any_element(&self, pred: impl Fn(&Element) -> bool) -> bool {
        self.measures
            .iter()
            .flat_map(|m| m.elements.iter())
            .chain(self.elements.iter())
            .any(|p| pred(&p.element))
    }

    /// Insert an element at the very start of the part: into the first
    /// measure when measures exist, otherwise as a loose element.
    pub fn insert_at_start(&mut self, element: Element) {
        match self.measures.first_mut() {
            Some(first) => first.insert_front(element),
            None => self.elements.insert(0, Placed { offset: 0.0, element }),
        }
    }

    pub fn for_each_sounding_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for measure in &mut self.measures {
            for placed in &mut measure.elements {
                if placed.element.is_pitched() {
                    f(&mut placed.element);
                }
            }
        }
        for placed in &mut self.elements {
            if placed.element.is_pitched() {
                f(&mut placed.element);
            }
        }
    }
}

impl Measure {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// Insert at `offset`, after any elements already at that offset.
    pub fn insert(&mut self, offset: f64, element: Element) {
        insert_sorted(&mut self.elements, offset, element);
    }

    /// Insert at offset zero ahead of everything already there.
    pub fn insert_front(&mut self, element: Element) {
        self.elements.insert(0, Placed { offset: 0.0, element });
    }

    /// Append after the last sounding element.
    pub fn append(&mut self, element: Element) {
        let offset = highest_time(&self.elements);
        self.insert(offset, element);
    }

    /// End of the last element in quarter notes.
    pub fn highest_time(&self) -> f64 {
        highest_time(&self.elements)
    }

    /// Nominal bar length when known, otherwise the extent of the content.
    pub fn duration(&self) -> f64 {
        self.bar_length.unwrap_or_else(|| self.highest_time())
    }

    /// The first time signature in this measure.
    pub fn time_signature(&self) -> Option<&TimeSignature> {
        self.elements.iter().find_map(|p| match &p.element {
            Element::TimeSignature(ts) => Some(ts),
            _ => None,
        })
    }
}

impl Stream {
    pub fn append(&mut self, element: Element) {
        let offset = highest_time(&self.elements);
        insert_sorted(&mut self.elements, offset, element);
    }

    pub fn insert(&mut self, offset: f64, element: Element) {
        insert_sorted(&mut self.elements, offset, element);
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty() && self.elements.is_empty()
    }
}

impl Element {
    /// Type name used in warnings and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Note(_) => "Note",
            Element::Rest(_) => "Rest",
            Element::Chord(_) => "Chord",
            Element::TimeSignature(_) => "TimeSignature",
            Element::Clef(_) => "Clef",
            Element::Key(_) => "Key",
            Element::Tempo(_) => "MetronomeMark",
            Element::Text(_) => "TextExpression",
            Element::ChordSymbol(_) => "ChordSymbol",
            Element::RomanNumeral(_) => "RomanNumeral",
            Element::Barline(_) => "Barline",
        }
    }

    /// Sounding duration; zero for markings.
    pub fn quarter_length(&self) -> f64 {
        match self {
            Element::Note(n) => n.quarter_length,
            Element::Rest(r) => r.quarter_length,
            Element::Chord(c) => c.quarter_length,
            _ => 0.0,
        }
    }

    pub fn set_quarter_length(&mut self, ql: f64) {
        match self {
            Element::Note(n) => n.quarter_length = ql,
            Element::Rest(r) => r.quarter_length = ql,
            Element::Chord(c) => c.quarter_length = ql,
            _ => {}
        }
    }

    /// Notes and chords.
    pub fn is_pitched(&self) -> bool {
        matches!(self, Element::Note(_) | Element::Chord(_))
    }

    /// Notes, chords and rests.
    pub fn is_sounding(&self) -> bool {
        matches!(self, Element::Note(_) | Element::Chord(_) | Element::Rest(_))
    }

    /// Give notes and chords without a usable duration one quarter note.
    pub fn ensure_duration(&mut self) {
        if self.is_pitched() {
            let ql = self.quarter_length();
            if !ql.is_finite() || ql <= 0.0 {
                self.set_quarter_length(1.0);
            }
        }
    }

    pub fn id(&self) -> Option<&str> {
        let id = match self {
            Element::Note(n) => &n.id,
            Element::Rest(r) => &r.id,
            Element::Chord(c) => &c.id,
            Element::TimeSignature(t) => &t.id,
            Element::Clef(c) => &c.id,
            Element::Key(k) => &k.id,
            Element::Tempo(t) => &t.id,
            Element::Text(t) => &t.id,
            Element::ChordSymbol(c) => &c.id,
            Element::RomanNumeral(r) => &r.id,
            Element::Barline(b) => &b.id,
        };
        id.as_deref()
    }

    pub fn lyric(&self) -> Option<&str> {
        match self {
            Element::Note(n) => n.lyric.as_deref(),
            Element::Chord(c) => c.lyric.as_deref(),
            _ => None,
        }
    }

    pub fn set_lyric(&mut self, lyric: impl Into<String>) {
        match self {
            Element::Note(n) => n.lyric = Some(lyric.into()),
            Element::Chord(c) => c.lyric = Some(lyric.into()),
            _ => {}
        }
    }
}

impl Note {
    pub fn new(pitch: Pitch, quarter_length: f64) -> Self {
        Self {
            pitch,
            quarter_length,
            id: None,
            lyric: None,
            velocity: None,
            tie: None,
            stem: None,
            beams: Vec::new(),
        }
    }
}

impl Rest {
    pub fn new(quarter_length: f64) -> Self {
        Self { quarter_length, id: None }
    }
}

impl Chord {
    pub fn new(pitches: Vec<Pitch>, quarter_length: f64) -> Self {
        Self {
            pitches,
            quarter_length,
            id: None,
            lyric: None,
            velocity: None,
            tie: None,
            stem: None,
            beams: Vec::new(),
        }
    }
}

impl TimeSignature {
    pub fn new(beats: i32, beat_type: i32) -> Self {
        Self { beats, beat_type, id: None }
    }

    /// Parse "3/4"-style text.
    pub fn parse(text: &str) -> Option<Self> {
        let (beats, beat_type) = text.trim().split_once('/')?;
        let beats: i32 = beats.trim().parse().ok()?;
        let beat_type: i32 = beat_type.trim().parse().ok()?;
        if beats <= 0 || beat_type <= 0 || !(beat_type as u32).is_power_of_two() {
            return None;
        }
        Some(Self::new(beats, beat_type))
    }

    /// Bar length in quarter notes, `None` if the signature is degenerate.
    pub fn bar_length(&self) -> Option<f64> {
        if self.beats <= 0 || self.beat_type <= 0 {
            return None;
        }
        Some(self.beats as f64 * 4.0 / self.beat_type as f64)
    }

    /// Beat grouping length used for beaming (dotted beats in compound meters).
    pub fn beat_length(&self) -> f64 {
        let unit = 4.0 / self.beat_type.max(1) as f64;
        if self.beat_type >= 8 && self.beats % 3 == 0 && self.beats > 3 {
            unit * 3.0
        } else {
            unit
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl Clef {
    pub fn new(sign: &str, line: i32) -> Self {
        Self {
            sign: sign.to_string(),
            line,
            octave_change: None,
            id: None,
        }
    }

    pub fn treble() -> Self {
        Self::new("G", 2)
    }

    pub fn bass() -> Self {
        Self::new("F", 4)
    }

    pub fn alto() -> Self {
        Self::new("C", 3)
    }
}

impl Key {
    /// Build a key from a tonic name: upper-case tonic = major, lower-case =
    /// minor ("G", "e", "B-", "f#").
    pub fn from_tonic(name: &str) -> Option<Self> {
        let name = name.trim();
        let first = name.chars().next()?;
        let minor = first.is_ascii_lowercase();
        let pitch = Pitch::parse(&format!("{name}4")).ok()?;
        let pc = (pitch.to_midi()).rem_euclid(12);
        // Position on the circle of fifths for each pitch class, major keys.
        const MAJOR_FIFTHS: [i32; 12] = [0, -5, 2, -3, 4, -1, 6, 1, -4, 3, -2, 5];
        let spelled_flat = pitch.alter.unwrap_or(0.0) < 0.0;
        let tonic_pc = if minor { (pc + 3) % 12 } else { pc };
        let mut fifths = MAJOR_FIFTHS[tonic_pc as usize];
        if spelled_flat && fifths > 0 {
            fifths -= 12;
        } else if pitch.alter.unwrap_or(0.0) > 0.0 && fifths < 0 {
            fifths += 12;
        }
        Some(Self {
            fifths,
            mode: Some(if minor { "minor" } else { "major" }.to_string()),
            id: None,
        })
    }
}

impl MetronomeMark {
    pub fn quarter(per_minute: f64) -> Self {
        Self {
            beat_unit: "quarter".to_string(),
            dotted: false,
            per_minute,
            text: None,
            id: None,
        }
    }

    /// Tempo in quarter notes per minute.
    pub fn quarter_bpm(&self) -> f64 {
        let mut unit = beat_unit_quarter_length(&self.beat_unit).unwrap_or(1.0);
        if self.dotted {
            unit *= 1.5;
        }
        self.per_minute * unit
    }
}

impl TextExpression {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            placement: None,
            id: None,
        }
    }
}

impl Barline {
    pub fn new(style: &str) -> Self {
        let style = match style {
            "final" => "light-heavy",
            "double" => "light-light",
            "heavy" => "heavy",
            "dashed" => "dashed",
            "none" => "none",
            "regular" => "regular",
            other => other,
        };
        Self {
            style: style.to_string(),
            id: None,
        }
    }
}

impl Pitch {
    pub fn new(step: char, octave: i32, alter: Option<f64>) -> Self {
        Self { step, octave, alter }
    }

    /// Parse a pitch name such as "C4", "F#5", "B-3", "Eb" (octave defaults to 4).
    pub fn parse(name: &str) -> Result<Self, PitchError> {
        let err = || PitchError(name.to_string());
        let trimmed = name.trim();
        let mut chars = trimmed.chars().peekable();
        let step = chars
            .next()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| ('A'..='G').contains(c))
            .ok_or_else(err)?;

        let mut alter = 0.0;
        while let Some(&c) = chars.peek() {
            match c {
                '#' => alter += 1.0,
                '-' | 'b' => alter -= 1.0,
                'n' => {}
                _ => break,
            }
            chars.next();
        }

        let rest: String = chars.collect();
        let octave = if rest.is_empty() {
            4
        } else {
            rest.parse::<i32>().map_err(|_| err())?
        };

        Ok(Self {
            step,
            octave,
            alter: if alter == 0.0 { None } else { Some(alter) },
        })
    }

    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let alter = self.alter.unwrap_or(0.0).round() as i32;
        (self.octave + 1) * 12 + step_semitone(self.step) + alter
    }

    /// Spell a MIDI note number, preferring flats or sharps for black keys.
    pub fn from_midi(midi: i32, prefer_flats: bool) -> Self {
        const SHARPS: [(char, f64); 12] = [
            ('C', 0.0), ('C', 1.0), ('D', 0.0), ('D', 1.0), ('E', 0.0), ('F', 0.0),
            ('F', 1.0), ('G', 0.0), ('G', 1.0), ('A', 0.0), ('A', 1.0), ('B', 0.0),
        ];
        const FLATS: [(char, f64); 12] = [
            ('C', 0.0), ('D', -1.0), ('D', 0.0), ('E', -1.0), ('E', 0.0), ('F', 0.0),
            ('G', -1.0), ('G', 0.0), ('A', -1.0), ('A', 0.0), ('B', -1.0), ('B', 0.0),
        ];
        let pc = midi.rem_euclid(12) as usize;
        let (step, alter) = if prefer_flats { FLATS[pc] } else { SHARPS[pc] };
        Self {
            step,
            octave: midi.div_euclid(12) - 1,
            alter: if alter == 0.0 { None } else { Some(alter) },
        }
    }

    /// The same pitch name placed in another octave.
    pub fn in_octave(&self, octave: i32) -> Self {
        Self {
            octave,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alter = self.alter.unwrap_or(0.0).round() as i32;
        let accidental = match alter {
            a if a > 0 => "#".repeat(a as usize),
            a if a < 0 => "b".repeat((-a) as usize),
            _ => String::new(),
        };
        write!(f, "{}{}{}", self.step, accidental, self.octave)
    }
}

/// Outcome of checking a note name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteValidation {
    pub valid: bool,
    pub error: Option<String>,
}

/// Check whether `text` names a pitch.
pub fn validate_pitch(text: &str) -> NoteValidation {
    let text = text.trim();
    if text.is_empty() {
        return NoteValidation {
            valid: false,
            error: Some("empty text".to_string()),
        };
    }
    match Pitch::parse(text) {
        Ok(_) => NoteValidation { valid: true, error: None },
        Err(e) => NoteValidation {
            valid: false,
            error: Some(format!("Invalid note: {e}")),
        },
    }
}

pub(crate) fn step_semitone(step: char) -> i32 {
    match step {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => 0,
    }
}

/// Quarter-length of a MusicXML note-type / beat-unit name.
pub fn beat_unit_quarter_length(unit: &str) -> Option<f64> {
    Some(match unit {
        "breve" => 8.0,
        "whole" => 4.0,
        "half" => 2.0,
        "quarter" => 1.0,
        "eighth" => 0.5,
        "16th" => 0.25,
        "32nd" => 0.125,
        "64th" => 0.0625,
        _ => return None,
    })
}

/// Notated type and dot count for a quarter-length, if it has one.
pub fn notated_type(quarter_length: f64) -> Option<(&'static str, u8)> {
    const TYPES: [(&str, f64); 8] = [
        ("breve", 8.0),
        ("whole", 4.0),
        ("half", 2.0),
        ("quarter", 1.0),
        ("eighth", 0.5),
        ("16th", 0.25),
        ("32nd", 0.125),
        ("64th", 0.0625),
    ];
    for (name, base) in TYPES {
        for (dots, factor) in [(0u8, 1.0), (1, 1.5), (2, 1.75)] {
            if (quarter_length - base * factor).abs() < 1e-6 {
                return Some((name, dots));
            }
        }
    }
    None
}

fn insert_sorted(elements: &mut Vec<Placed>, offset: f64, element: Element) {
    let idx = elements.partition_point(|p| p.offset <= offset);
    elements.insert(idx, Placed { offset, element });
}

fn highest_time(elements: &[Placed]) -> f64 {
    elements
        .iter()
        .map(|p| p.offset + p.element.quarter_length())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_parsing_accepts_both_flat_spellings() {
        assert_eq!(Pitch::parse("B-3").unwrap().to_midi(), 58);
        assert_eq!(Pitch::parse("Bb3").unwrap().to_midi(), 58);
        assert_eq!(Pitch::parse("C4").unwrap().to_midi(), 60);
        assert_eq!(Pitch::parse("F#").unwrap().to_midi(), 66);
        assert!(Pitch::parse("H2").is_err());
        assert!(Pitch::parse("C4x").is_err());
    }

    #[test]
    fn from_midi_round_trips_through_to_midi() {
        for midi in [36, 49, 60, 70, 83] {
            assert_eq!(Pitch::from_midi(midi, true).to_midi(), midi);
            assert_eq!(Pitch::from_midi(midi, false).to_midi(), midi);
        }
    }

    #[test]
    fn measure_insert_keeps_offset_order_and_is_stable() {
        let mut m = Measure::new(1);
        m.insert(1.0, Element::Text(TextExpression::new("b")));
        m.insert(0.0, Element::Text(TextExpression::new("a")));
        m.insert(1.0, Element::Text(TextExpression::new("c")));
        let texts: Vec<_> = m
            .elements
            .iter()
            .map(|p| match &p.element {
                Element::Text(t) => t.content.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn append_places_after_sounding_content() {
        let mut m = Measure::new(1);
        m.append(Element::Note(Note::new(Pitch::parse("C4").unwrap(), 1.5)));
        m.append(Element::Note(Note::new(Pitch::parse("D4").unwrap(), 0.5)));
        assert_eq!(m.elements[1].offset, 1.5);
        assert_eq!(m.highest_time(), 2.0);
    }

    #[test]
    fn key_from_tonic() {
        assert_eq!(Key::from_tonic("G").unwrap().fifths, 1);
        assert_eq!(Key::from_tonic("F").unwrap().fifths, -1);
        assert_eq!(Key::from_tonic("B-").unwrap().fifths, -2);
        let e_minor = Key::from_tonic("e").unwrap();
        assert_eq!(e_minor.fifths, 1);
        assert_eq!(e_minor.mode.as_deref(), Some("minor"));
    }

    #[test]
    fn notated_types() {
        assert_eq!(notated_type(1.0), Some(("quarter", 0)));
        assert_eq!(notated_type(1.5), Some(("quarter", 1)));
        assert_eq!(notated_type(0.3), None);
    }

    #[test]
    fn note_validation() {
        assert!(validate_pitch("C#5").valid);
        let bad = validate_pitch("Q9");
        assert!(!bad.valid);
        assert!(bad.error.unwrap().starts_with("Invalid note: "));
        assert!(!validate_pitch("  ").valid);
    }
}
