//! Terminal result of one generation request.
//!
//! Reports are structured values; `Display` renders them into the log text a
//! front-end shows next to the audio player.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, ErrorCategory, ErrorCode};

use super::request::GenerationParams;
use super::resource::ResourceConfig;

/// Hint attached to every successful report.
pub const OOM_HINT: &str =
    "If you run out of GPU memory, lower max_audio_length_ms and/or enable lazy_load.";

/// Checklist attached to every failure that reached staging or the pipeline.
pub const REMEDIATION_CHECKLIST: &[&str] = &[
    "Try a lower max_audio_length_ms (e.g. 10000)",
    "Try lazy_load=true",
    "Use a GPU with >= 12GB of memory (24GB recommended for 3B)",
];

/// Options offered when CUDA was requested but is not available.
pub const CAPABILITY_REMEDIATION: &[&str] = &[
    "Run on a machine with a working NVIDIA GPU and CUDA (e.g. a Linux + CUDA cloud instance)",
    "Or set mula_device and codec_device to cpu",
];

/// Report for a successful generation.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessReport {
    /// Durable location of the generated file.
    pub output: PathBuf,
    /// Wall-clock seconds spent on the request.
    pub elapsed_sec: f64,
    /// Configuration the pipeline was built with.
    pub config: ResourceConfig,
    /// Parameters the pipeline was invoked with.
    pub params: GenerationParams,
    pub hint: &'static str,
}

impl SuccessReport {
    pub fn new(
        output: PathBuf,
        elapsed: Duration,
        config: ResourceConfig,
        params: GenerationParams,
    ) -> Self {
        Self {
            output,
            elapsed_sec: elapsed.as_secs_f64(),
            config,
            params,
            hint: OOM_HINT,
        }
    }
}

impl fmt::Display for SuccessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OK")?;
        writeln!(f, "- output: {}", self.output.display())?;
        writeln!(f, "- time: {:.2} s", self.elapsed_sec)?;
        writeln!(f, "- model_path: {}", self.config.model_path().display())?;
        writeln!(f, "- version: {}", self.config.version())?;
        writeln!(
            f,
            "- devices: mula={}, codec={}",
            self.config.mula_device(),
            self.config.codec_device()
        )?;
        writeln!(
            f,
            "- dtypes: mula={}, codec={}",
            self.config.mula_dtype(),
            self.config.codec_dtype()
        )?;
        writeln!(f, "- max_audio_length_ms: {}", self.params.max_audio_length_ms)?;
        writeln!(
            f,
            "- topk: {}, temperature: {}, cfg_scale: {}",
            self.params.topk, self.params.temperature, self.params.cfg_scale
        )?;
        writeln!(f, "- lazy_load: {}", self.config.lazy_load())?;
        writeln!(f)?;
        write!(f, "Tip: {}", self.hint)
    }
}

/// Report for a rejected or failed generation.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    /// Wall-clock seconds spent up to the failure.
    pub elapsed_sec: f64,
    pub category: ErrorCategory,
    pub code: ErrorCode,
    pub message: String,
    /// Targeted hint for the specific error code.
    pub hint: &'static str,
    pub remediation: &'static [&'static str],
}

impl FailureReport {
    /// Builds a report from the error that ended the request.
    pub fn from_error(error: &DaemonError, elapsed: Duration) -> Self {
        let remediation = match error.code {
            ErrorCode::CudaUnavailable => CAPABILITY_REMEDIATION,
            _ => REMEDIATION_CHECKLIST,
        };

        Self {
            elapsed_sec: elapsed.as_secs_f64(),
            category: error.category(),
            code: error.code,
            message: error.message.clone(),
            hint: error.code.recovery_hint(),
            remediation,
        }
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error")?;
        writeln!(f, "- time: {:.2} s", self.elapsed_sec)?;
        writeln!(f, "- message: {}: {}", self.category, self.message)?;
        writeln!(f, "- code: {} ({})", self.code, self.code.description())?;
        writeln!(f, "- hint: {}", self.hint)?;
        writeln!(f)?;
        match self.category {
            ErrorCategory::Capability => {
                writeln!(f, "Generation on the requested devices needs CUDA:")?
            }
            _ => writeln!(f, "If this is a CUDA/VRAM error:")?,
        }
        for item in self.remediation {
            writeln!(f, "- {}", item)?;
        }
        Ok(())
    }
}

/// Outcome of one request: a durable path with a report, or a failure report.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded {
        path: PathBuf,
        report: SuccessReport,
    },
    Failed {
        report: FailureReport,
    },
}

impl Outcome {
    /// Builds a failure outcome from an error.
    pub fn failure(error: &DaemonError, elapsed: Duration) -> Self {
        Outcome::Failed {
            report: FailureReport::from_error(error, elapsed),
        }
    }

    /// Returns the output path on success.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Outcome::Succeeded { path, .. } => Some(path),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    /// Returns the success report, if any.
    pub fn success(&self) -> Option<&SuccessReport> {
        match self {
            Outcome::Succeeded { report, .. } => Some(report),
            Outcome::Failed { .. } => None,
        }
    }

    /// Returns the failure report, if any.
    pub fn failure_report(&self) -> Option<&FailureReport> {
        match self {
            Outcome::Succeeded { .. } => None,
            Outcome::Failed { report } => Some(report),
        }
    }

    /// Renders the human-readable log.
    pub fn log(&self) -> String {
        match self {
            Outcome::Succeeded { report, .. } => report.to_string(),
            Outcome::Failed { report } => report.to_string(),
        }
    }
}
