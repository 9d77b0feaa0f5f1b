//! Resource configuration identifying one pipeline instance.
//!
//! A [`ResourceConfig`] is the cache key of the resource cache: two configs
//! compare equal iff every field is equal after normalization, so a relative
//! and an absolute spelling of the same model directory hit the same entry.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::config::{DaemonConfig, Device, Precision};
use crate::error::{DaemonError, ErrorCode, Result};

/// Normalized construction parameters for the generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceConfig {
    model_path: PathBuf,
    version: String,
    mula_device: Device,
    codec_device: Device,
    mula_dtype: Precision,
    codec_dtype: Precision,
    lazy_load: bool,
}

impl ResourceConfig {
    /// Creates a config, resolving `model_path` to an absolute, lexically
    /// normalized path relative to the current directory.
    pub fn new(
        model_path: impl AsRef<Path>,
        version: impl Into<String>,
        mula_device: Device,
        codec_device: Device,
        mula_dtype: Precision,
        codec_dtype: Precision,
        lazy_load: bool,
    ) -> Result<Self> {
        let model_path = absolute_path(model_path.as_ref()).map_err(|e| {
            DaemonError::with_source(
                ErrorCode::InvalidParameter,
                format!(
                    "cannot resolve model path '{}': {}",
                    model_path.as_ref().display(),
                    e
                ),
                e,
            )
        })?;

        Ok(Self {
            model_path,
            version: version.into(),
            mula_device,
            codec_device,
            mula_dtype,
            codec_dtype,
            lazy_load,
        })
    }

    /// Absolute checkpoint directory.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn mula_device(&self) -> &Device {
        &self.mula_device
    }

    pub fn codec_device(&self) -> &Device {
        &self.codec_device
    }

    pub fn mula_dtype(&self) -> Precision {
        self.mula_dtype
    }

    pub fn codec_dtype(&self) -> Precision {
        self.codec_dtype
    }

    pub fn lazy_load(&self) -> bool {
        self.lazy_load
    }

    /// Returns true if either sub-model is placed on a CUDA device.
    pub fn requires_cuda(&self) -> bool {
        self.mula_device.requires_cuda() || self.codec_device.requires_cuda()
    }
}

/// Unvalidated construction parameters as they arrive from a front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSettings {
    pub model_path: PathBuf,
    pub version: String,
    pub mula_device: String,
    pub codec_device: String,
    pub mula_dtype: String,
    pub codec_dtype: String,
    pub lazy_load: bool,
}

impl ResourceSettings {
    /// Settings matching the daemon's configured defaults.
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            version: config.version.clone(),
            mula_device: config.mula_device.to_string(),
            codec_device: config.codec_device.to_string(),
            mula_dtype: config.mula_dtype.to_string(),
            codec_dtype: config.codec_dtype.to_string(),
            lazy_load: config.lazy_load,
        }
    }

    /// Parses devices and precisions and normalizes the model path.
    pub fn resolve(&self) -> Result<ResourceConfig> {
        ResourceConfig::new(
            &self.model_path,
            self.version.trim(),
            parse_device("mula_device", &self.mula_device)?,
            parse_device("codec_device", &self.codec_device)?,
            parse_precision("mula_dtype", &self.mula_dtype)?,
            parse_precision("codec_dtype", &self.codec_dtype)?,
            self.lazy_load,
        )
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

fn parse_device(name: &str, value: &str) -> Result<Device> {
    Device::parse(value)
        .ok_or_else(|| DaemonError::invalid_parameter(name, value, "cpu, cuda, cuda:N, mps or another torch device"))
}

fn parse_precision(name: &str, value: &str) -> Result<Precision> {
    Precision::parse(value)
        .ok_or_else(|| DaemonError::invalid_parameter(name, value, "bf16, fp16 or fp32"))
}

/// Makes `path` absolute and removes `.` and `..` components without
/// touching the filesystem.
fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never pops past the root
                if !matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}
