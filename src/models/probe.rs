//! GPU capability probing.
//!
//! The probe answers one question before any work starts: can a CUDA device
//! be used right now? Probe failures count as "no".

use std::process::{Command, Stdio};

/// Reports whether CUDA execution is available.
pub trait GpuProbe {
    fn cuda_available(&self) -> bool;
}

/// Probe backed by the NVIDIA driver tooling.
///
/// Honors `CUDA_VISIBLE_DEVICES` hiding every GPU, then asks `nvidia-smi -L`
/// for the device list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGpuProbe;

impl GpuProbe for SystemGpuProbe {
    fn cuda_available(&self) -> bool {
        let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
        if hides_all_devices(visible.as_deref()) {
            tracing::debug!("CUDA_VISIBLE_DEVICES hides all GPUs");
            return false;
        }

        match Command::new("nvidia-smi")
            .arg("-L")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) if output.status.success() => {
                lists_gpu(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!(status = %output.status, "nvidia-smi reported no usable GPU");
                false
            }
            Err(error) => {
                tracing::debug!(%error, "nvidia-smi not available");
                false
            }
        }
    }
}

/// Probe with a fixed answer, for hosts that already know the capability.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl GpuProbe for StaticProbe {
    fn cuda_available(&self) -> bool {
        self.0
    }
}

fn hides_all_devices(visible: Option<&str>) -> bool {
    matches!(visible.map(str::trim), Some("") | Some("-1"))
}

/// `nvidia-smi -L` prints one `GPU <n>: <name> (UUID: ...)` line per device.
fn lists_gpu(stdout: &str) -> bool {
    stdout.lines().any(|line| line.trim_start().starts_with("GPU "))
}
