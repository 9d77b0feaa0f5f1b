//! Daemon configuration module.
//!
//! Contains the runtime configuration for the heartmula-daemon: device and
//! precision selection for both sub-models, path configuration, the worker
//! command, and the defaults applied to generation requests.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution device for one of the pipeline's sub-models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "String", try_from = "String")]
pub enum Device {
    /// CPU execution. Universally available, slowest.
    Cpu,

    /// NVIDIA GPU through CUDA, optionally pinned to a device ordinal.
    #[default]
    Cuda,

    /// A specific CUDA device (`cuda:N`).
    CudaOrdinal(u32),

    /// Apple Metal Performance Shaders.
    Mps,

    /// Any other torch device string (`xpu`, `xpu:1`, ...), passed through
    /// to the pipeline untouched.
    Other(String),
}

impl Device {
    /// Parses a device from a string such as `cpu`, `cuda`, `cuda:1`, `mps`
    /// or `xpu:0`.
    ///
    /// Anything starting with `cuda` must be `cuda` or `cuda:N`. Other names
    /// are accepted as `Other` when shaped like a torch device (`name` or
    /// `name:N`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => Some(Device::Cpu),
            "cuda" => Some(Device::Cuda),
            "mps" => Some(Device::Mps),
            _ if s.starts_with("cuda") => s
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse::<u32>().ok())
                .map(Device::CudaOrdinal),
            _ if is_device_name(&s) => Some(Device::Other(s)),
            _ => None,
        }
    }

    /// Returns true if this device needs a working CUDA runtime.
    pub fn requires_cuda(&self) -> bool {
        matches!(self, Device::Cuda | Device::CudaOrdinal(_))
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::CudaOrdinal(n) => write!(f, "cuda:{}", n),
            Device::Mps => write!(f, "mps"),
            Device::Other(name) => write!(f, "{}", name),
        }
    }
}

/// `name` or `name:N`, where `name` is lowercase letters, digits or `_` and
/// starts with a letter.
fn is_device_name(s: &str) -> bool {
    let (name, ordinal) = match s.split_once(':') {
        Some((name, ordinal)) => (name, Some(ordinal)),
        None => (s, None),
    };
    let name_ok = name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    let ordinal_ok = ordinal.map_or(true, |n| n.parse::<u32>().is_ok());
    name_ok && ordinal_ok
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl TryFrom<String> for Device {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Device::parse(&value).ok_or_else(|| format!("unknown device: {}", value))
    }
}

/// Numeric precision for one of the pipeline's sub-models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// bfloat16.
    Bf16,
    /// IEEE half precision.
    Fp16,
    /// IEEE single precision.
    Fp32,
}

impl Precision {
    /// Returns the string representation of the precision.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Bf16 => "bf16",
            Precision::Fp16 => "fp16",
            Precision::Fp32 => "fp32",
        }
    }

    /// Parses a precision from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bf16" | "bfloat16" => Some(Precision::Bf16),
            "fp16" | "float16" | "half" => Some(Precision::Fp16),
            "fp32" | "float32" | "float" => Some(Precision::Fp32),
            _ => None,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default output file name when a request does not provide one.
pub const DEFAULT_SAVE_NAME: &str = "output_ui.mp3";

/// Defaults applied to generation requests that leave a field unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    /// Maximum audio length in milliseconds.
    /// Default: 20000
    pub max_audio_length_ms: u32,

    /// Top-k sampling cutoff.
    /// Default: 50
    pub topk: u32,

    /// Sampling temperature.
    /// Default: 1.0
    pub temperature: f32,

    /// Classifier-free guidance scale.
    /// Default: 1.5
    pub cfg_scale: f32,

    /// Output file name.
    pub save_name: String,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_audio_length_ms: 20_000,
            topk: 50,
            temperature: 1.0,
            cfg_scale: 1.5,
            save_name: DEFAULT_SAVE_NAME.to_string(),
        }
    }
}

/// Runtime configuration for the daemon.
///
/// This configuration is typically loaded from command-line arguments
/// or environment variables at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory containing the pipeline checkpoints.
    pub model_path: PathBuf,

    /// Model version tag passed to the pipeline (e.g. "3B").
    pub version: String,

    /// Device for the language model.
    pub mula_device: Device,

    /// Device for the audio codec.
    pub codec_device: Device,

    /// Precision for the language model.
    pub mula_dtype: Precision,

    /// Precision for the audio codec.
    pub codec_dtype: Precision,

    /// Load sub-models on first use instead of at construction.
    pub lazy_load: bool,

    /// Directory for generated files.
    /// If None, uses the platform-specific default location.
    pub output_path: Option<PathBuf>,

    /// Command line used to start the pipeline worker (program followed by arguments).
    pub worker_command: Vec<String>,

    /// Defaults for per-request generation parameters.
    pub generation: GenerationDefaults,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a DaemonConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `HEARTMULA_MODEL_PATH` - Checkpoint directory
    /// - `HEARTMULA_VERSION` - Model version tag
    /// - `HEARTMULA_MULA_DEVICE` / `HEARTMULA_CODEC_DEVICE` - Devices (cpu, cuda, cuda:N, mps, or any torch device name)
    /// - `HEARTMULA_MULA_DTYPE` / `HEARTMULA_CODEC_DTYPE` - Precisions (bf16, fp16, fp32)
    /// - `HEARTMULA_LAZY_LOAD` - Lazy loading (true/false/1/0)
    /// - `HEARTMULA_OUTPUT_PATH` - Output directory
    /// - `HEARTMULA_WORKER` - Worker command line, whitespace separated
    ///
    /// Falls back to defaults for unset or unparseable variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("HEARTMULA_MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }

        if let Some(version) = lookup("HEARTMULA_VERSION") {
            if !version.trim().is_empty() {
                config.version = version.trim().to_string();
            }
        }

        if let Some(device) = lookup("HEARTMULA_MULA_DEVICE").and_then(|s| Device::parse(&s)) {
            config.mula_device = device;
        }

        if let Some(device) = lookup("HEARTMULA_CODEC_DEVICE").and_then(|s| Device::parse(&s)) {
            config.codec_device = device;
        }

        if let Some(dtype) = lookup("HEARTMULA_MULA_DTYPE").and_then(|s| Precision::parse(&s)) {
            config.mula_dtype = dtype;
        }

        if let Some(dtype) = lookup("HEARTMULA_CODEC_DTYPE").and_then(|s| Precision::parse(&s)) {
            config.codec_dtype = dtype;
        }

        if let Some(lazy) = lookup("HEARTMULA_LAZY_LOAD").and_then(|s| parse_bool(&s)) {
            config.lazy_load = lazy;
        }

        if let Some(path) = lookup("HEARTMULA_OUTPUT_PATH") {
            config.output_path = Some(PathBuf::from(path));
        }

        if let Some(command) = lookup("HEARTMULA_WORKER") {
            let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if !parts.is_empty() {
                config.worker_command = parts;
            }
        }

        config
    }

    /// Returns the effective output directory, using platform defaults if not specified.
    pub fn effective_output_path(&self) -> PathBuf {
        if let Some(ref path) = self.output_path {
            path.clone()
        } else {
            default_output_path()
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.worker_command.is_empty() {
            return Some("worker command must not be empty".to_string());
        }

        if self.version.trim().is_empty() {
            return Some("version must not be empty".to_string());
        }

        None
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./ckpt"),
            version: "3B".to_string(),
            mula_device: Device::Cuda,
            codec_device: Device::Cuda,
            mula_dtype: Precision::Bf16,
            codec_dtype: Precision::Fp32,
            lazy_load: true,
            output_path: None,
            worker_command: vec!["heartmula-worker".to_string()],
            generation: GenerationDefaults::default(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns the platform-specific default output directory.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Application Support/heartmula/outputs
/// - Linux: ~/.local/share/heartmula/outputs
/// - Windows: C:\Users\<user>\AppData\Roaming\heartmula\data\outputs
fn default_output_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "heartmula") {
        proj_dirs.data_dir().join("outputs")
    } else {
        // Fallback to current directory
        PathBuf::from("./ui_outputs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn device_parsing() {
        assert_eq!(Device::parse("cpu"), Some(Device::Cpu));
        assert_eq!(Device::parse("CUDA"), Some(Device::Cuda));
        assert_eq!(Device::parse("cuda:1"), Some(Device::CudaOrdinal(1)));
        assert_eq!(Device::parse(" mps "), Some(Device::Mps));
        assert_eq!(Device::parse("cuda:x"), None);
        assert_eq!(Device::parse("cudax"), None);
        assert_eq!(Device::parse(""), None);
        assert_eq!(Device::parse("not a device"), None);
        assert_eq!(Device::parse("xpu:x"), None);
    }

    #[test]
    fn unknown_torch_devices_pass_through() {
        assert_eq!(Device::parse("xpu"), Some(Device::Other("xpu".to_string())));
        assert_eq!(Device::parse("XPU:1"), Some(Device::Other("xpu:1".to_string())));
        assert_eq!(Device::parse("gpu"), Some(Device::Other("gpu".to_string())));
        assert!(!Device::parse("xpu").unwrap().requires_cuda());
    }

    #[test]
    fn device_display_round_trips() {
        for device in [
            Device::Cpu,
            Device::Cuda,
            Device::CudaOrdinal(3),
            Device::Mps,
            Device::Other("xpu:0".to_string()),
        ] {
            assert_eq!(Device::parse(&device.to_string()), Some(device));
        }
    }

    #[test]
    fn only_cuda_devices_require_cuda() {
        assert!(Device::Cuda.requires_cuda());
        assert!(Device::CudaOrdinal(0).requires_cuda());
        assert!(!Device::Cpu.requires_cuda());
        assert!(!Device::Mps.requires_cuda());
    }

    #[test]
    fn precision_parsing() {
        assert_eq!(Precision::parse("bf16"), Some(Precision::Bf16));
        assert_eq!(Precision::parse("float16"), Some(Precision::Fp16));
        assert_eq!(Precision::parse("FP32"), Some(Precision::Fp32));
        assert_eq!(Precision::parse("int8"), None);
    }

    #[test]
    fn defaults_match_ui() {
        let config = DaemonConfig::new();
        assert_eq!(config.model_path, PathBuf::from("./ckpt"));
        assert_eq!(config.version, "3B");
        assert_eq!(config.mula_device, Device::Cuda);
        assert_eq!(config.mula_dtype, Precision::Bf16);
        assert_eq!(config.codec_dtype, Precision::Fp32);
        assert!(config.lazy_load);
        assert_eq!(config.generation.max_audio_length_ms, 20_000);
        assert_eq!(config.generation.topk, 50);
        assert_eq!(config.generation.save_name, DEFAULT_SAVE_NAME);
    }

    #[test]
    fn config_validation() {
        let mut config = DaemonConfig::new();
        assert!(config.validate().is_none());

        config.worker_command.clear();
        assert!(config.validate().is_some());
    }

    #[test]
    fn effective_output_path_prefers_override() {
        let mut config = DaemonConfig::new();
        assert!(!config.effective_output_path().as_os_str().is_empty());

        config.output_path = Some(PathBuf::from("/srv/songs"));
        assert_eq!(config.effective_output_path(), PathBuf::from("/srv/songs"));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = DaemonConfig::from_lookup(lookup_from(&[
            ("HEARTMULA_MODEL_PATH", "/models/heartmula"),
            ("HEARTMULA_MULA_DEVICE", "cuda:1"),
            ("HEARTMULA_CODEC_DEVICE", "cpu"),
            ("HEARTMULA_CODEC_DTYPE", "bf16"),
            ("HEARTMULA_LAZY_LOAD", "no"),
            ("HEARTMULA_WORKER", "python3 -m heartlib_worker"),
        ]));

        assert_eq!(config.model_path, PathBuf::from("/models/heartmula"));
        assert_eq!(config.mula_device, Device::CudaOrdinal(1));
        assert_eq!(config.codec_device, Device::Cpu);
        assert_eq!(config.codec_dtype, Precision::Bf16);
        assert!(!config.lazy_load);
        assert_eq!(
            config.worker_command,
            vec!["python3", "-m", "heartlib_worker"]
        );
    }

    #[test]
    fn lookup_ignores_garbage() {
        let config = DaemonConfig::from_lookup(lookup_from(&[
            ("HEARTMULA_MULA_DEVICE", "cuda:abacus"),
            ("HEARTMULA_LAZY_LOAD", "maybe"),
            ("HEARTMULA_WORKER", "   "),
        ]));

        assert_eq!(config.mula_device, Device::Cuda);
        assert!(config.lazy_load);
        assert_eq!(config.worker_command, vec!["heartmula-worker"]);
    }
}
