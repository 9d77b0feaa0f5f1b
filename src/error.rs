//! Error types for the heartmula-daemon.
//!
//! Defines all error codes and types used throughout the daemon for
//! consistent error handling and reporting.

use std::fmt;

use serde::Serialize;

/// Broad failure category reported to callers.
///
/// Every [`ErrorCode`] belongs to exactly one category. Reports carry the
/// category so a front-end can react to the class of failure without parsing
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Requested device class is not available on this machine.
    Capability,
    /// Request parameters could not be coerced or parsed.
    Validation,
    /// The generation resource failed to build.
    Construction,
    /// The generation resource failed after it was built.
    Invocation,
    /// Staging or persistence of files failed.
    Io,
}

impl ErrorCategory {
    /// Returns the display name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Capability => "CapabilityError",
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::Construction => "ConstructionError",
            ErrorCategory::Invocation => "InvocationError",
            ErrorCategory::Io => "IOError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error codes returned by the daemon in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A CUDA device was requested but CUDA is not usable.
    /// Trigger: no driver, no GPU, or CUDA_VISIBLE_DEVICES hides all GPUs.
    CudaUnavailable,

    /// A request parameter could not be coerced to its required type.
    /// Trigger: non-numeric temperature, unknown device string, etc.
    InvalidParameter,

    /// The pipeline failed to load.
    /// Trigger: bad model path, missing checkpoint files, worker refused `load`.
    ModelLoadFailed,

    /// The worker process could not be started or stopped responding.
    /// Trigger: worker command not found, worker crashed mid-request.
    WorkerFailed,

    /// Generation failed after the pipeline was loaded.
    /// Trigger: decoding failure, malformed worker reply, missing output file.
    InferenceFailed,

    /// The device ran out of memory during generation.
    OutOfMemory,

    /// Writing the per-request input files failed.
    StagingFailed,

    /// Copying the generated file to the output directory failed.
    PersistFailed,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CudaUnavailable => "CUDA_UNAVAILABLE",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorCode::WorkerFailed => "WORKER_FAILED",
            ErrorCode::InferenceFailed => "INFERENCE_FAILED",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::StagingFailed => "STAGING_FAILED",
            ErrorCode::PersistFailed => "PERSIST_FAILED",
        }
    }

    /// Returns the category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::CudaUnavailable => ErrorCategory::Capability,
            ErrorCode::InvalidParameter => ErrorCategory::Validation,
            ErrorCode::ModelLoadFailed => ErrorCategory::Construction,
            ErrorCode::WorkerFailed | ErrorCode::InferenceFailed | ErrorCode::OutOfMemory => {
                ErrorCategory::Invocation
            }
            ErrorCode::StagingFailed | ErrorCode::PersistFailed => ErrorCategory::Io,
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::CudaUnavailable => "CUDA was requested but is not available",
            ErrorCode::InvalidParameter => "A request parameter has an invalid value",
            ErrorCode::ModelLoadFailed => "Failed to load the generation pipeline",
            ErrorCode::WorkerFailed => "The pipeline worker process failed",
            ErrorCode::InferenceFailed => "Generation failed",
            ErrorCode::OutOfMemory => "The device ran out of memory during generation",
            ErrorCode::StagingFailed => "Failed to write request input files",
            ErrorCode::PersistFailed => "Failed to save the generated file",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::CudaUnavailable => {
                "Run on a machine with a working NVIDIA GPU and CUDA driver, \
                 or set both devices to cpu"
            }
            ErrorCode::InvalidParameter => {
                "Check that numeric fields are numbers and devices are cpu, cuda, cuda:N or mps"
            }
            ErrorCode::ModelLoadFailed => {
                "Verify the model path points at a complete checkpoint directory \
                 and that the version matches it"
            }
            ErrorCode::WorkerFailed => {
                "Check that the worker command is installed and on PATH (HEARTMULA_WORKER)"
            }
            ErrorCode::InferenceFailed => {
                "Try reducing max_audio_length_ms or restart the daemon"
            }
            ErrorCode::OutOfMemory => {
                "Lower max_audio_length_ms, enable lazy_load, or use a GPU with more memory"
            }
            ErrorCode::StagingFailed => "Check free space in the system temporary directory",
            ErrorCode::PersistFailed => {
                "Check that the output directory is writable and has free space"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Creates a CUDA_UNAVAILABLE error naming the offending devices.
    pub fn cuda_unavailable(devices: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CudaUnavailable,
            format!(
                "CUDA is not available on this machine (requested devices: {})",
                devices.into()
            ),
        )
    }

    /// Creates an INVALID_PARAMETER error that quotes the offending value.
    pub fn invalid_parameter(name: &str, value: impl fmt::Display, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidParameter,
            format!("invalid {}: '{}' (expected {})", name, value, expected),
        )
    }

    /// Creates a MODEL_LOAD_FAILED error.
    pub fn model_load_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelLoadFailed,
            format!("Failed to load pipeline: {}", reason.into()),
        )
    }

    /// Creates a WORKER_FAILED error.
    pub fn worker_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::WorkerFailed,
            format!("Worker failed: {}", reason.into()),
        )
    }

    /// Creates an INFERENCE_FAILED error, or OUT_OF_MEMORY when the reason
    /// reads like a device allocation failure.
    pub fn inference_failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if is_out_of_memory(&reason) {
            return Self::new(
                ErrorCode::OutOfMemory,
                format!("Out of memory: {}", reason),
            );
        }
        Self::new(
            ErrorCode::InferenceFailed,
            format!("Generation failed: {}", reason),
        )
    }

    /// Creates a STAGING_FAILED error from an I/O failure.
    pub fn staging_failed(what: impl Into<String>, source: std::io::Error) -> Self {
        let what = what.into();
        Self::with_source(
            ErrorCode::StagingFailed,
            format!("{}: {}", what, source),
            source,
        )
    }

    /// Creates a PERSIST_FAILED error from an I/O failure.
    pub fn persist_failed(what: impl Into<String>, source: std::io::Error) -> Self {
        let what = what.into();
        Self::with_source(
            ErrorCode::PersistFailed,
            format!("{}: {}", what, source),
            source,
        )
    }
}

/// Returns true if an error message looks like a device out-of-memory condition.
///
/// Worker errors only reach us as text, so this matches on the phrases torch
/// and CUDA use for allocation failures.
pub fn is_out_of_memory(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("out of memory")
        || msg.contains("outofmemory")
        || msg.contains("cuda_error_out_of_memory")
        || msg.contains("failed to allocate")
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
