//! CLI argument parser.
//!
//! One-shot mode generates a single song and exits; `--daemon` starts the
//! JSON-RPC server instead. Flags left unset fall back to the environment
//! configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::GenerationRequest;

/// heartmula-daemon: lyrics-to-song generation with a resident pipeline
#[derive(Parser, Debug)]
#[command(name = "heartmula-daemon")]
#[command(about = "Lyrics-to-song generation daemon with a cached HeartMuLa pipeline")]
#[command(version)]
pub struct Cli {
    /// Lyrics text, section markers like [Verse] allowed
    #[arg(short, long, conflicts_with = "lyrics_file")]
    pub lyrics: Option<String>,

    /// Read lyrics from a file
    #[arg(long, value_name = "PATH")]
    pub lyrics_file: Option<PathBuf>,

    /// Comma-separated style tags, e.g. "piano,happy,wedding"
    #[arg(short, long)]
    pub tags: Option<String>,

    /// Output file name (".mp3" is appended when missing)
    #[arg(short, long, value_name = "NAME")]
    pub output: Option<String>,

    /// Directory generated files are copied into
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint directory
    #[arg(short, long, value_name = "DIR")]
    pub model_path: Option<PathBuf>,

    /// Model version tag, e.g. 3B
    #[arg(long)]
    pub model_version: Option<String>,

    /// Device for the language model (cpu, cuda, cuda:N, mps, xpu, ...)
    #[arg(long)]
    pub mula_device: Option<String>,

    /// Device for the audio codec (cpu, cuda, cuda:N, mps, xpu, ...)
    #[arg(long)]
    pub codec_device: Option<String>,

    /// Precision for the language model (bf16, fp16, fp32)
    #[arg(long)]
    pub mula_dtype: Option<String>,

    /// Precision for the audio codec (bf16, fp16, fp32)
    #[arg(long)]
    pub codec_dtype: Option<String>,

    /// Load sub-models lazily to reduce peak memory
    #[arg(long, value_name = "BOOL")]
    pub lazy_load: Option<bool>,

    /// Upper bound on the song length in milliseconds (5000-240000)
    #[arg(long, value_parser = clap::value_parser!(u32).range(5000..=240000))]
    pub max_audio_length_ms: Option<u32>,

    /// Top-k sampling cutoff (1-200)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=200))]
    pub topk: Option<u32>,

    /// Sampling temperature (0.1-2.0)
    #[arg(long, value_parser = parse_temperature)]
    pub temperature: Option<f32>,

    /// Classifier-free guidance scale (0.0-5.0)
    #[arg(long, value_parser = parse_cfg_scale)]
    pub cfg_scale: Option<f32>,

    /// Worker command line, whitespace separated
    #[arg(long, value_name = "COMMAND")]
    pub worker: Option<String>,

    /// Run in daemon mode (JSON-RPC over stdio)
    #[arg(long)]
    pub daemon: bool,
}

fn parse_temperature(s: &str) -> std::result::Result<f32, String> {
    parse_f32_in_range(s, 0.1, 2.0)
}

fn parse_cfg_scale(s: &str) -> std::result::Result<f32, String> {
    parse_f32_in_range(s, 0.0, 5.0)
}

fn parse_f32_in_range(s: &str, min: f32, max: f32) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} is not in {}..={}", value, min, max))
    }
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if running in CLI mode (not daemon mode).
    pub fn is_cli_mode(&self) -> bool {
        !self.daemon && (self.lyrics.is_some() || self.lyrics_file.is_some())
    }

    /// Returns true if running in daemon mode.
    pub fn is_daemon_mode(&self) -> bool {
        self.daemon
    }

    /// Applies process-wide overrides (output directory, worker command) to
    /// `config`.
    pub fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(ref dir) = self.output_dir {
            config.output_path = Some(dir.clone());
        }
        if let Some(ref worker) = self.worker {
            let parts: Vec<String> = worker.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                config.worker_command = parts;
            }
        }
    }

    /// Builds the one-shot generation request, reading `--lyrics-file` if
    /// given.
    pub fn to_request(&self, config: &DaemonConfig) -> Result<GenerationRequest> {
        let lyrics = match (&self.lyrics, &self.lyrics_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                DaemonError::with_source(
                    ErrorCode::InvalidParameter,
                    format!("cannot read lyrics file {}: {}", path.display(), e),
                    e,
                )
            })?,
            (None, None) => String::new(),
        };

        let mut request =
            GenerationRequest::with_defaults(lyrics, self.tags.clone().unwrap_or_default(), config);

        if self.output.is_some() {
            request.save_name = self.output.clone();
        }
        if let Some(ms) = self.max_audio_length_ms {
            request.max_audio_length_ms = ms.into();
        }
        if let Some(topk) = self.topk {
            request.topk = topk.into();
        }
        if let Some(temperature) = self.temperature {
            request.temperature = temperature.into();
        }
        if let Some(cfg_scale) = self.cfg_scale {
            request.cfg_scale = cfg_scale.into();
        }

        let resource = &mut request.resource;
        if let Some(ref path) = self.model_path {
            resource.model_path = path.clone();
        }
        if let Some(ref version) = self.model_version {
            resource.version = version.clone();
        }
        if let Some(ref device) = self.mula_device {
            resource.mula_device = device.clone();
        }
        if let Some(ref device) = self.codec_device {
            resource.codec_device = device.clone();
        }
        if let Some(ref dtype) = self.mula_dtype {
            resource.mula_dtype = dtype.clone();
        }
        if let Some(ref dtype) = self.codec_dtype {
            resource.codec_dtype = dtype.clone();
        }
        if let Some(lazy) = self.lazy_load {
            resource.lazy_load = lazy;
        }

        Ok(request)
    }
}
