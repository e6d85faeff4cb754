//! The script vocabulary: notation constructors grouped into static modules,
//! plus properties and container methods on the notation types.
//!
//! The `harmony::ChordSymbol` constructor is the safe one from the start;
//! scripts cannot reach a constructor that raises on a bad figure.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, ImmutableString, Module};
use tracing::info;

use crate::codec::{self, Parsed};
use crate::harmony::{safe_chord_symbol, ChordSymbol};
use crate::model::*;
use crate::shape::looks_like_document;
use crate::warnings::WarningLog;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Shared slot written by `show(x)`.
pub type ResultSlot = Rc<RefCell<Option<Dynamic>>>;

/// A note value, assignable to the `duration` of notes, rests and chords.
#[derive(Debug, Clone, PartialEq)]
pub struct Duration {
    pub quarter_length: f64,
}

/// Build an engine with the full notation vocabulary.
pub fn build_engine(warnings: Rc<RefCell<WarningLog>>, slot: ResultSlot) -> Engine {
    let mut engine = Engine::new();
    engine.on_print(|text| info!(target: "scoreprep::script", "{text}"));
    engine.on_debug(|text, _, pos| info!(target: "scoreprep::script", %pos, "{text}"));

    register_types(&mut engine);
    register_properties(&mut engine);
    register_containers(&mut engine);

    engine.register_static_module("stream", stream_module().into());
    engine.register_static_module("note", note_module().into());
    engine.register_static_module("chord", chord_module().into());
    engine.register_static_module("meter", meter_module().into());
    engine.register_static_module("clef", clef_module().into());
    engine.register_static_module("key", key_module().into());
    engine.register_static_module("tempo", tempo_module().into());
    engine.register_static_module("expressions", expressions_module().into());
    engine.register_static_module("harmony", harmony_module(warnings).into());
    engine.register_static_module("metadata", metadata_module().into());
    engine.register_static_module("duration", duration_module().into());
    engine.register_static_module("roman", roman_module().into());
    engine.register_static_module("bar", bar_module().into());
    engine.register_static_module("converter", converter_module().into());

    engine.register_fn("show", move |value: Dynamic| {
        *slot.borrow_mut() = Some(value);
    });

    engine
}

// ═══════════════════════════════════════════════════════════════════════
// Value conversion
// ═══════════════════════════════════════════════════════════════════════

/// A number argument, integer or float.
fn number(value: &Dynamic, what: &str) -> ScriptResult<f64> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f64);
    }
    Err(format!("{what} must be a number, got {}", value.type_name()).into())
}

fn optional(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn pitch(name: &str) -> ScriptResult<Pitch> {
    Pitch::parse(name).map_err(|e| e.to_string().into())
}

/// The notation element a script value holds, if any.
pub fn element_of(value: &Dynamic) -> Option<Element> {
    macro_rules! cast {
        ($($ty:ty => $variant:ident),+ $(,)?) => {$(
            if value.is::<$ty>() {
                return value.clone().try_cast::<$ty>().map(Element::$variant);
            }
        )+};
    }
    cast!(
        Note => Note,
        Rest => Rest,
        Chord => Chord,
        TimeSignature => TimeSignature,
        Clef => Clef,
        Key => Key,
        MetronomeMark => Tempo,
        TextExpression => Text,
        ChordSymbol => ChordSymbol,
        RomanNumeral => RomanNumeral,
        Barline => Barline,
    );
    None
}

fn parsed_to_dynamic(parsed: Parsed) -> Dynamic {
    match parsed {
        Parsed::Score(s) => Dynamic::from(s),
        Parsed::Part(p) => Dynamic::from(p),
        Parsed::Measure(m) => Dynamic::from(m),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Types and properties
// ═══════════════════════════════════════════════════════════════════════

fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<Score>("Score")
        .register_type_with_name::<Part>("Part")
        .register_type_with_name::<Measure>("Measure")
        .register_type_with_name::<Stream>("Stream")
        .register_type_with_name::<Metadata>("Metadata")
        .register_type_with_name::<Note>("Note")
        .register_type_with_name::<Rest>("Rest")
        .register_type_with_name::<Chord>("Chord")
        .register_type_with_name::<TimeSignature>("TimeSignature")
        .register_type_with_name::<Clef>("Clef")
        .register_type_with_name::<Key>("Key")
        .register_type_with_name::<MetronomeMark>("MetronomeMark")
        .register_type_with_name::<TextExpression>("TextExpression")
        .register_type_with_name::<ChordSymbol>("ChordSymbol")
        .register_type_with_name::<RomanNumeral>("RomanNumeral")
        .register_type_with_name::<Barline>("Barline")
        .register_type_with_name::<Duration>("Duration");
}

fn register_properties(engine: &mut Engine) {
    macro_rules! id_property {
        ($($ty:ty),+) => {$(
            engine.register_get_set(
                "id",
                |x: &mut $ty| -> ImmutableString { x.id.clone().unwrap_or_default().into() },
                |x: &mut $ty, id: ImmutableString| x.id = optional(&id),
            );
        )+};
    }
    id_property!(
        Note, Rest, Chord, TimeSignature, Clef, Key, MetronomeMark, TextExpression, ChordSymbol,
        RomanNumeral, Barline
    );

    macro_rules! length_property {
        ($($ty:ty),+) => {$(
            engine.register_get("quarter_length", |x: &mut $ty| x.quarter_length);
            engine.register_set(
                "quarter_length",
                |x: &mut $ty, value: Dynamic| -> ScriptResult<()> {
                    x.quarter_length = number(&value, "quarter_length")?;
                    Ok(())
                },
            );
            engine.register_set("duration", |x: &mut $ty, d: Duration| {
                x.quarter_length = d.quarter_length;
            });
        )+};
    }
    length_property!(Note, Rest, Chord);

    macro_rules! lyric_property {
        ($($ty:ty),+) => {$(
            engine.register_get_set(
                "lyric",
                |x: &mut $ty| -> ImmutableString { x.lyric.clone().unwrap_or_default().into() },
                |x: &mut $ty, lyric: ImmutableString| x.lyric = Some(lyric.to_string()),
            );
        )+};
    }
    lyric_property!(Note, Chord);

    engine.register_get("name", |n: &mut Note| n.pitch.to_string());
    engine.register_get_set(
        "placement",
        |t: &mut TextExpression| -> ImmutableString { t.placement.map(|p| p.as_str()).unwrap_or_default().into() },
        |t: &mut TextExpression, value: ImmutableString| -> ScriptResult<()> {
            t.placement = match value.trim() {
                "" => None,
                other => Some(
                    Placement::parse(other)
                        .ok_or_else(|| format!("placement must be 'above' or 'below', got '{other}'"))?,
                ),
            };
            Ok(())
        },
    );
    engine.register_get_set(
        "content",
        |t: &mut TextExpression| -> ImmutableString { t.content.as_str().into() },
        |t: &mut TextExpression, value: ImmutableString| t.content = value.to_string(),
    );
    engine.register_get("figure", |c: &mut ChordSymbol| c.figure.clone());
    engine.register_get("figure", |r: &mut RomanNumeral| r.figure.clone());
    engine.register_get("quarter_length", |d: &mut Duration| d.quarter_length);
    engine.register_get("number", |t: &mut MetronomeMark| t.per_minute);

    engine.register_get_set(
        "id",
        |p: &mut Part| -> ImmutableString { p.id.as_str().into() },
        |p: &mut Part, id: ImmutableString| p.id = id.to_string(),
    );
    engine.register_get_set(
        "name",
        |p: &mut Part| -> ImmutableString { p.name.as_str().into() },
        |p: &mut Part, name: ImmutableString| p.name = name.to_string(),
    );
    engine.register_get_set(
        "number",
        |m: &mut Measure| m.number as i64,
        |m: &mut Measure, n: i64| m.number = n as i32,
    );

    engine.register_get_set(
        "metadata",
        |s: &mut Score| -> ScriptResult<Metadata> {
            s.metadata
                .clone()
                .ok_or_else(|| "score has no metadata, assign metadata::Metadata() first".into())
        },
        |s: &mut Score, md: Metadata| s.metadata = Some(md),
    );
    engine.register_get_set(
        "title",
        |m: &mut Metadata| -> ImmutableString { m.title.clone().unwrap_or_default().into() },
        |m: &mut Metadata, v: ImmutableString| m.title = optional(&v),
    );
    engine.register_get_set(
        "composer",
        |m: &mut Metadata| -> ImmutableString { m.composer.clone().unwrap_or_default().into() },
        |m: &mut Metadata, v: ImmutableString| m.composer = optional(&v),
    );
}

// ═══════════════════════════════════════════════════════════════════════
// Containers
// ═══════════════════════════════════════════════════════════════════════

fn register_containers(engine: &mut Engine) {
    engine.register_fn("append", |s: &mut Score, value: Dynamic| -> ScriptResult<()> {
        match value.try_cast::<Part>() {
            Some(part) => {
                s.push_part(part);
                Ok(())
            }
            None => Err("Score.append expects a Part".into()),
        }
    });
    engine.register_fn(
        "insert",
        |s: &mut Score, _offset: Dynamic, value: Dynamic| -> ScriptResult<()> {
            match value.try_cast::<Part>() {
                Some(part) => {
                    s.push_part(part);
                    Ok(())
                }
                None => Err("Score.insert expects a Part".into()),
            }
        },
    );

    engine.register_fn("append", |p: &mut Part, value: Dynamic| -> ScriptResult<()> {
        if value.is::<Measure>() {
            if let Some(measure) = value.try_cast::<Measure>() {
                p.append_measure(measure);
            }
            return Ok(());
        }
        p.append(placeable(&value, "Part")?);
        Ok(())
    });
    engine.register_fn(
        "insert",
        |p: &mut Part, offset: Dynamic, value: Dynamic| -> ScriptResult<()> {
            let offset = number(&offset, "offset")?;
            p.insert(offset, placeable(&value, "Part")?);
            Ok(())
        },
    );

    engine.register_fn("append", |m: &mut Measure, value: Dynamic| -> ScriptResult<()> {
        m.append(placeable(&value, "Measure")?);
        Ok(())
    });
    engine.register_fn(
        "insert",
        |m: &mut Measure, offset: Dynamic, value: Dynamic| -> ScriptResult<()> {
            let offset = number(&offset, "offset")?;
            m.insert(offset, placeable(&value, "Measure")?);
            Ok(())
        },
    );

    engine.register_fn("append", |s: &mut Stream, value: Dynamic| -> ScriptResult<()> {
        if value.is::<Measure>() {
            if let Some(measure) = value.try_cast::<Measure>() {
                s.measures.push(measure);
            }
            return Ok(());
        }
        s.append(placeable(&value, "Stream")?);
        Ok(())
    });
    engine.register_fn(
        "insert",
        |s: &mut Stream, offset: Dynamic, value: Dynamic| -> ScriptResult<()> {
            let offset = number(&offset, "offset")?;
            s.insert(offset, placeable(&value, "Stream")?);
            Ok(())
        },
    );
}

fn placeable(value: &Dynamic, container: &str) -> ScriptResult<Element> {
    element_of(value).ok_or_else(|| {
        format!(
            "{container} cannot hold a value of type {}",
            value.type_name()
        )
        .into()
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════

fn stream_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Score", || -> ScriptResult<Score> { Ok(Score::new()) });
    m.set_native_fn("Part", || -> ScriptResult<Part> { Ok(Part::new("")) });
    m.set_native_fn("Part", |id: ImmutableString| -> ScriptResult<Part> {
        Ok(Part::new(id.as_str()))
    });
    m.set_native_fn("Measure", || -> ScriptResult<Measure> { Ok(Measure::new(0)) });
    m.set_native_fn("Measure", |number: i64| -> ScriptResult<Measure> {
        Ok(Measure::new(number as i32))
    });
    m.set_native_fn("Stream", || -> ScriptResult<Stream> { Ok(Stream::default()) });
    m
}

fn note_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Note", |name: ImmutableString| -> ScriptResult<Note> {
        Ok(Note::new(pitch(&name)?, 1.0))
    });
    m.set_native_fn("Note", |name: ImmutableString, ql: Dynamic| -> ScriptResult<Note> {
        Ok(Note::new(pitch(&name)?, number(&ql, "quarter_length")?))
    });
    m.set_native_fn("Rest", || -> ScriptResult<Rest> { Ok(Rest::new(1.0)) });
    m.set_native_fn("Rest", |ql: Dynamic| -> ScriptResult<Rest> {
        Ok(Rest::new(number(&ql, "quarter_length")?))
    });
    m
}

fn chord_pitches(names: &Array) -> ScriptResult<Vec<Pitch>> {
    names
        .iter()
        .map(|n| match n.clone().into_string() {
            Ok(name) => pitch(&name),
            Err(found) => Err(format!("chord members must be pitch names, got {found}").into()),
        })
        .collect()
}

fn chord_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Chord", |names: Array| -> ScriptResult<Chord> {
        Ok(Chord::new(chord_pitches(&names)?, 1.0))
    });
    m.set_native_fn("Chord", |names: Array, ql: Dynamic| -> ScriptResult<Chord> {
        Ok(Chord::new(chord_pitches(&names)?, number(&ql, "quarter_length")?))
    });
    m
}

fn meter_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("TimeSignature", |text: ImmutableString| -> ScriptResult<TimeSignature> {
        TimeSignature::parse(&text).ok_or_else(|| format!("invalid time signature '{text}'").into())
    });
    m
}

fn clef_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("TrebleClef", || -> ScriptResult<Clef> { Ok(Clef::treble()) });
    m.set_native_fn("BassClef", || -> ScriptResult<Clef> { Ok(Clef::bass()) });
    m.set_native_fn("AltoClef", || -> ScriptResult<Clef> { Ok(Clef::alto()) });
    m.set_native_fn("Clef", |sign: ImmutableString, line: i64| -> ScriptResult<Clef> {
        Ok(Clef::new(sign.as_str(), line as i32))
    });
    m
}

fn key_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Key", |tonic: ImmutableString| -> ScriptResult<Key> {
        Key::from_tonic(&tonic).ok_or_else(|| format!("invalid key tonic '{tonic}'").into())
    });
    m.set_native_fn("KeySignature", |fifths: i64| -> ScriptResult<Key> {
        if !(-7..=7).contains(&fifths) {
            return Err(format!("key signature fifths out of range: {fifths}").into());
        }
        Ok(Key {
            fifths: fifths as i32,
            mode: None,
            id: None,
        })
    });
    m
}

fn tempo_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("MetronomeMark", |bpm: Dynamic| -> ScriptResult<MetronomeMark> {
        Ok(MetronomeMark::quarter(number(&bpm, "number")?))
    });
    m.set_native_fn(
        "MetronomeMark",
        |text: ImmutableString, bpm: Dynamic| -> ScriptResult<MetronomeMark> {
            let mut mark = MetronomeMark::quarter(number(&bpm, "number")?);
            mark.text = optional(&text);
            Ok(mark)
        },
    );
    m
}

fn expressions_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("TextExpression", |content: ImmutableString| -> ScriptResult<TextExpression> {
        Ok(TextExpression::new(content.as_str()))
    });
    m
}

fn harmony_module(warnings: Rc<RefCell<WarningLog>>) -> Module {
    let mut m = Module::new();
    m.set_native_fn("ChordSymbol", move |figure: ImmutableString| -> ScriptResult<Dynamic> {
        let (element, _) =
            safe_chord_symbol(&figure, Placement::Above, &mut warnings.borrow_mut());
        Ok(match element {
            Element::ChordSymbol(cs) => Dynamic::from(cs),
            Element::Text(text) => Dynamic::from(text),
            other => Dynamic::from(other),
        })
    });
    m
}

fn metadata_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Metadata", || -> ScriptResult<Metadata> { Ok(Metadata::default()) });
    m
}

fn duration_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Duration", |value: Dynamic| -> ScriptResult<Duration> {
        if let Ok(name) = value.clone().into_string() {
            let quarter_length = beat_unit_quarter_length(name.trim())
                .ok_or_else(|| format!("unknown duration type '{name}'"))?;
            return Ok(Duration { quarter_length });
        }
        Ok(Duration {
            quarter_length: number(&value, "duration")?,
        })
    });
    m
}

fn roman_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("RomanNumeral", |figure: ImmutableString| -> ScriptResult<RomanNumeral> {
        Ok(RomanNumeral {
            figure: figure.to_string(),
            key: None,
            id: None,
        })
    });
    m.set_native_fn(
        "RomanNumeral",
        |figure: ImmutableString, key: ImmutableString| -> ScriptResult<RomanNumeral> {
            Ok(RomanNumeral {
                figure: figure.to_string(),
                key: optional(&key),
                id: None,
            })
        },
    );
    m
}

fn bar_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("Barline", || -> ScriptResult<Barline> { Ok(Barline::new("regular")) });
    m.set_native_fn("Barline", |style: ImmutableString| -> ScriptResult<Barline> {
        Ok(Barline::new(style.as_str()))
    });
    m
}

fn converter_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("parse", |source: Dynamic| -> ScriptResult<Dynamic> {
        let parsed = if source.is::<Blob>() {
            let bytes = source.try_cast::<Blob>().unwrap_or_default();
            codec::parse_bytes(&bytes, None)
        } else {
            let text = source.into_string().map_err(|found| {
                format!("converter::parse expects text, a path or a blob, got {found}")
            })?;
            if looks_like_document(&text) {
                codec::parse_str(&text)
            } else {
                codec::parse_file(text.trim())
            }
        };
        parsed.map(parsed_to_dynamic).map_err(|e| e.to_string().into())
    });
    m
}
