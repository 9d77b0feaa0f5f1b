//! Generation request types and input normalization.
//!
//! Front-ends hand over loosely typed values (JSON numbers, slider floats,
//! free text). They are carried as [`LooseNumber`] until the request handler
//! coerces them into [`GenerationParams`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::{DaemonConfig, DEFAULT_SAVE_NAME};
use crate::error::{DaemonError, Result};

use super::resource::ResourceSettings;

/// File extension every generated file carries.
pub const OUTPUT_EXTENSION: &str = ".mp3";

/// A numeric input that has not been coerced yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LooseNumber {
    /// Coerces to a non-negative integer.
    ///
    /// Floats are truncated toward zero. Text must spell an integer.
    pub fn to_u32(&self, name: &str) -> Result<u32> {
        const EXPECTED: &str = "a non-negative integer";

        let value = match self {
            LooseNumber::Int(i) => *i,
            LooseNumber::Float(f) if f.is_finite() => f.trunc() as i64,
            LooseNumber::Float(_) => {
                return Err(DaemonError::invalid_parameter(name, self, EXPECTED))
            }
            LooseNumber::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| DaemonError::invalid_parameter(name, self, EXPECTED))?,
        };

        u32::try_from(value).map_err(|_| DaemonError::invalid_parameter(name, self, EXPECTED))
    }

    /// Coerces to a finite float.
    pub fn to_f32(&self, name: &str) -> Result<f32> {
        const EXPECTED: &str = "a number";

        let value = match self {
            LooseNumber::Int(i) => *i as f32,
            LooseNumber::Float(f) => *f as f32,
            LooseNumber::Text(s) => s
                .trim()
                .parse::<f32>()
                .map_err(|_| DaemonError::invalid_parameter(name, self, EXPECTED))?,
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(DaemonError::invalid_parameter(name, self, EXPECTED))
        }
    }
}

impl fmt::Display for LooseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LooseNumber::Int(i) => write!(f, "{}", i),
            LooseNumber::Float(v) => write!(f, "{}", v),
            LooseNumber::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u32> for LooseNumber {
    fn from(value: u32) -> Self {
        LooseNumber::Int(value as i64)
    }
}

impl From<i64> for LooseNumber {
    fn from(value: i64) -> Self {
        LooseNumber::Int(value)
    }
}

impl From<f32> for LooseNumber {
    fn from(value: f32) -> Self {
        LooseNumber::Float(value as f64)
    }
}

impl From<f64> for LooseNumber {
    fn from(value: f64) -> Self {
        LooseNumber::Float(value)
    }
}

impl From<&str> for LooseNumber {
    fn from(value: &str) -> Self {
        LooseNumber::Text(value.to_string())
    }
}

/// Coerced numeric generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    /// Upper bound on the generated audio length, in milliseconds.
    pub max_audio_length_ms: u32,
    /// Top-k sampling cutoff.
    pub topk: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Classifier-free guidance scale.
    pub cfg_scale: f32,
}

/// One generation call as submitted by a front-end.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Lyrics, optionally with section markers like `[Verse]`.
    pub lyrics: String,
    /// Style tags, e.g. `piano,ballad`.
    pub tags: String,
    /// Desired output file name; defaulted and normalized by the handler.
    pub save_name: Option<String>,
    pub max_audio_length_ms: LooseNumber,
    pub topk: LooseNumber,
    pub temperature: LooseNumber,
    pub cfg_scale: LooseNumber,
    /// Construction parameters for the pipeline.
    pub resource: ResourceSettings,
}

impl GenerationRequest {
    /// Creates a request whose every other field comes from `config`.
    pub fn with_defaults(
        lyrics: impl Into<String>,
        tags: impl Into<String>,
        config: &DaemonConfig,
    ) -> Self {
        let defaults = &config.generation;
        Self {
            lyrics: lyrics.into(),
            tags: tags.into(),
            save_name: Some(defaults.save_name.clone()),
            max_audio_length_ms: defaults.max_audio_length_ms.into(),
            topk: defaults.topk.into(),
            temperature: defaults.temperature.into(),
            cfg_scale: defaults.cfg_scale.into(),
            resource: ResourceSettings::from_config(config),
        }
    }

    /// Coerces the numeric fields, reporting the first offending value.
    pub fn params(&self) -> Result<GenerationParams> {
        Ok(GenerationParams {
            max_audio_length_ms: self.max_audio_length_ms.to_u32("max_audio_length_ms")?,
            topk: self.topk.to_u32("topk")?,
            temperature: self.temperature.to_f32("temperature")?,
            cfg_scale: self.cfg_scale.to_f32("cfg_scale")?,
        })
    }
}

/// Strips trailing whitespace and terminates the text with a single newline.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = text.trim_end().to_string();
    normalized.push('\n');
    normalized
}

/// Resolves the output file name for a request.
///
/// Missing or blank names fall back to the default; only the final path
/// component is kept so a name cannot escape the output directory; the
/// `.mp3` extension is appended unless already present in any case.
pub fn normalize_save_name(save_name: Option<&str>) -> String {
    let trimmed = save_name.map(str::trim).unwrap_or_default();

    let base = Path::new(trimmed)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_SAVE_NAME);

    if base.to_lowercase().ends_with(OUTPUT_EXTENSION) {
        base.to_string()
    } else {
        format!("{}{}", base, OUTPUT_EXTENSION)
    }
}
