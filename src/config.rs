//! Process-wide pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields the fixed
//! constants the pipeline is specified with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::accompaniment::Rhythm;
use crate::error::ConfigError;
use crate::model::{MetronomeMark, TimeSignature};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub defaults: DefaultsConfig,
    pub offsets: OffsetConfig,
    pub warnings: WarningConfig,
    pub accompaniment: AccompanimentConfig,
}

/// Values the defaults injector fills in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub title: String,
    pub time_signature: String,
    pub tempo_bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetConfig {
    /// Offset delta between colliding annotations, in quarter notes
    pub epsilon: f64,
}

/// Side-channel summary limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    pub max_entries: usize,
    pub max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccompanimentConfig {
    pub rhythm: Rhythm,
    pub octave: i32,
    pub velocity: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            time_signature: "4/4".to_string(),
            tempo_bpm: 72.0,
        }
    }
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self { epsilon: 0.0001 }
    }
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            max_entries: 3,
            max_chars: 500,
        }
    }
}

impl Default for AccompanimentConfig {
    fn default() -> Self {
        Self {
            rhythm: Rhythm::Half,
            octave: 3,
            velocity: 0.5,
        }
    }
}

impl DefaultsConfig {
    /// The default time signature, falling back to 4/4 when the configured
    /// text does not parse.
    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::parse(&self.time_signature).unwrap_or_default()
    }

    /// The default tempo mark, deliberately without a text label.
    pub fn tempo(&self) -> MetronomeMark {
        MetronomeMark::quarter(self.tempo_bpm)
    }
}

impl PipelineConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse config from TOML text and check its values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if TimeSignature::parse(&self.defaults.time_signature).is_none() {
            return Err(ConfigError::Invalid(format!(
                "defaults.time_signature '{}' is not a valid meter",
                self.defaults.time_signature
            )));
        }
        if !(self.defaults.tempo_bpm.is_finite() && self.defaults.tempo_bpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "defaults.tempo_bpm must be positive, got {}",
                self.defaults.tempo_bpm
            )));
        }
        if !(self.offsets.epsilon.is_finite() && self.offsets.epsilon > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "offsets.epsilon must be positive, got {}",
                self.offsets.epsilon
            )));
        }
        if self.warnings.max_chars < 3 {
            return Err(ConfigError::Invalid(
                "warnings.max_chars must be at least 3".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.accompaniment.velocity) {
            return Err(ConfigError::Invalid(format!(
                "accompaniment.velocity must be within 0.0..=1.0, got {}",
                self.accompaniment.velocity
            )));
        }
        Ok(())
    }
}
