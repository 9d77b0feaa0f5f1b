//! JSON-RPC types for the daemon protocol.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::DaemonConfig;
use crate::types::{
    FailureReport, GenerationRequest, LooseNumber, Outcome, ResourceConfig, SuccessReport,
};

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Integer(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A JSON-RPC request wrapper.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC response wrapper.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn new(id: RequestId, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

/// A JSON-RPC error object.
///
/// Only protocol-level problems become errors. A generation that fails is a
/// normal `generate` result with `status: "failed"`.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    /// Creates a parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
        }
    }

    /// Creates an invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    /// Creates a method not found error (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
        }
    }

    /// Creates an invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }

    /// Creates an internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
        }
    }
}

// ============================================================================
// generate
// ============================================================================

/// Parameters for a generate request.
///
/// Every field is optional; missing ones come from the daemon configuration.
/// Numeric fields accept JSON numbers or strings.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub tags: String,
    pub save_name: Option<String>,

    pub max_audio_length_ms: Option<LooseNumber>,
    pub topk: Option<LooseNumber>,
    pub temperature: Option<LooseNumber>,
    pub cfg_scale: Option<LooseNumber>,

    pub model_path: Option<PathBuf>,
    pub version: Option<String>,
    pub mula_device: Option<String>,
    pub codec_device: Option<String>,
    pub mula_dtype: Option<String>,
    pub codec_dtype: Option<String>,
    pub lazy_load: Option<bool>,
}

impl GenerateParams {
    /// Fills the gaps from `config` and builds the request.
    pub fn into_request(self, config: &DaemonConfig) -> GenerationRequest {
        let mut request = GenerationRequest::with_defaults(self.lyrics, self.tags, config);

        if self.save_name.is_some() {
            request.save_name = self.save_name;
        }
        if let Some(value) = self.max_audio_length_ms {
            request.max_audio_length_ms = value;
        }
        if let Some(value) = self.topk {
            request.topk = value;
        }
        if let Some(value) = self.temperature {
            request.temperature = value;
        }
        if let Some(value) = self.cfg_scale {
            request.cfg_scale = value;
        }

        let resource = &mut request.resource;
        if let Some(path) = self.model_path {
            resource.model_path = path;
        }
        if let Some(version) = self.version {
            resource.version = version;
        }
        if let Some(device) = self.mula_device {
            resource.mula_device = device;
        }
        if let Some(device) = self.codec_device {
            resource.codec_device = device;
        }
        if let Some(dtype) = self.mula_dtype {
            resource.mula_dtype = dtype;
        }
        if let Some(dtype) = self.codec_dtype {
            resource.codec_dtype = dtype;
        }
        if let Some(lazy) = self.lazy_load {
            resource.lazy_load = lazy;
        }

        request
    }
}

/// Terminal status of a generate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Succeeded,
    Failed,
}

/// Structured report attached to a generate result.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GenerationReport {
    Success(SuccessReport),
    Failure(FailureReport),
}

/// Response for a generate request.
#[derive(Debug, Serialize)]
pub struct GenerateResult {
    pub status: GenerationStatus,

    /// Durable output path; null on failure.
    pub path: Option<PathBuf>,

    /// Human-readable log for display.
    pub log: String,

    pub report: GenerationReport,
}

impl From<Outcome> for GenerateResult {
    fn from(outcome: Outcome) -> Self {
        let log = outcome.log();
        match outcome {
            Outcome::Succeeded { path, report } => Self {
                status: GenerationStatus::Succeeded,
                path: Some(path),
                log,
                report: GenerationReport::Success(report),
            },
            Outcome::Failed { report } => Self {
                status: GenerationStatus::Failed,
                path: None,
                log,
                report: GenerationReport::Failure(report),
            },
        }
    }
}

// ============================================================================
// status / unload
// ============================================================================

/// Response for a status request.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Whether a pipeline is resident.
    pub loaded: bool,

    /// Configuration of the resident pipeline.
    pub config: Option<ResourceConfig>,

    /// Successful constructions since startup.
    pub constructions: u64,

    pub output_dir: PathBuf,
}

/// Response for an unload request.
#[derive(Debug, Serialize)]
pub struct UnloadResult {
    /// False if nothing was loaded.
    pub unloaded: bool,
}
