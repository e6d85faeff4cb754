//! scoreprep - notation normalization from the command line
//!
//! Subcommands:
//! - `scoreprep render <script>` - Run a notation script, print MusicXML
//! - `scoreprep file <path>` - Normalize a score file
//! - `scoreprep xml <file>` - Serve document text the way a request would
//! - `scoreprep midi <script> -o <out>` - Export a script's result as MIDI
//! - `scoreprep edit <xml> <edits>` - Apply position edits to MusicXML
//! - `scoreprep chord <figure>` / `scoreprep note <name>` - Validate input

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use scoreprep::accompaniment::Rhythm;
use scoreprep::edits::{apply_position_edits, PositionEdit};
use scoreprep::harmony::validate_figure;
use scoreprep::model::validate_pitch;
use scoreprep::{
    export_midi, render_request, MidiExportOptions, PipelineConfig, RenderResponse, Request,
    SideChannel,
};

#[derive(Parser)]
#[command(name = "scoreprep")]
#[command(about = "Normalize notation scripts and scores into clean MusicXML")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notation script and print the resulting MusicXML
    Render {
        /// Script file
        script: PathBuf,
    },

    /// Normalize a score file (.musicxml, .xml, .mxl, .json)
    File {
        path: PathBuf,
    },

    /// Serve MusicXML text as given
    Xml {
        file: PathBuf,
    },

    /// Export a script's result as a Standard MIDI File
    Midi {
        /// Script file
        script: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Add an accompaniment track from the chord symbols
        #[arg(long)]
        chords: bool,

        /// Accompaniment rhythm: auto, whole, half, quarter
        #[arg(long)]
        rhythm: Option<Rhythm>,

        /// Base octave of accompaniment chords
        #[arg(long)]
        octave: Option<i32>,

        /// Accompaniment velocity, 0.0 to 1.0
        #[arg(long)]
        velocity: Option<f64>,
    },

    /// Apply position edits (JSON object of id → {x_tenths, y_tenths})
    Edit {
        xml: PathBuf,
        edits: PathBuf,
    },

    /// Check a chord figure
    Chord {
        figure: String,
    },

    /// Check a note name
    Note {
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    debug!(?config, "configuration");

    match cli.command {
        Commands::Render { script } => {
            let script = read(&script)?;
            respond(render_request(Request::Script(script), &config)?, &config)
        }
        Commands::File { path } => respond(render_request(Request::Path(path), &config)?, &config),
        Commands::Xml { file } => {
            let text = read(&file)?;
            respond(render_request(Request::Xml(text), &config)?, &config)
        }
        Commands::Midi {
            script,
            output,
            chords,
            rhythm,
            octave,
            velocity,
        } => {
            let script = read(&script)?;
            let defaults = MidiExportOptions::from_config(&config.accompaniment);
            let options = MidiExportOptions {
                include_chords: chords,
                rhythm: rhythm.unwrap_or(defaults.rhythm),
                octave: octave.unwrap_or(defaults.octave),
                velocity: velocity.unwrap_or(defaults.velocity),
            };
            let bytes = export_midi(&script, &options, &config)?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            eprintln!("wrote {} bytes to {}", bytes.len(), output.display());
            Ok(())
        }
        Commands::Edit { xml, edits } => {
            let text = read(&xml)?;
            let edits: BTreeMap<String, PositionEdit> = serde_json::from_str(&read(&edits)?)
                .context("edits must be a JSON object of id → {x_tenths, y_tenths}")?;
            println!("{}", apply_position_edits(&text, &edits)?);
            Ok(())
        }
        Commands::Chord { figure } => {
            println!("{}", serde_json::to_string_pretty(&validate_figure(&figure))?);
            Ok(())
        }
        Commands::Note { name } => {
            println!("{}", serde_json::to_string_pretty(&validate_pitch(&name))?);
            Ok(())
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Document on stdout, side channel on stderr.
fn respond(response: RenderResponse, config: &PipelineConfig) -> Result<()> {
    let side = SideChannel::from_response(&response, &config.warnings);
    if let Some(summary) = &side.warnings {
        eprintln!("warnings ({}): {summary}", side.warnings_count);
    }
    if let Some(map) = &side.element_line_map {
        eprintln!("element lines: {map}");
    }
    println!("{}", response.document);
    Ok(())
}
