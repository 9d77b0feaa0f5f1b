//! JSON-RPC method handlers.
//!
//! Implements the handlers for all supported JSON-RPC methods.

use crate::models::{GenerationBackend, GpuProbe};

use super::server::ServerState;
use super::types::{GenerateParams, GenerateResult, JsonRpcError, StatusResult, UnloadResult};

/// Handles a JSON-RPC method call.
pub fn handle_request<B: GenerationBackend, P: GpuProbe>(
    method: &str,
    params: serde_json::Value,
    state: &mut ServerState<B, P>,
) -> Result<serde_json::Value, JsonRpcError> {
    match method {
        "generate" => handle_generate(params, state),
        "status" => handle_status(state),
        "unload" => handle_unload(state),
        "ping" => handle_ping(),
        "shutdown" => handle_shutdown(state),
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

/// Handles the ping method for health checks.
fn handle_ping() -> Result<serde_json::Value, JsonRpcError> {
    Ok(serde_json::json!({ "status": "ok" }))
}

/// Handles the shutdown method.
fn handle_shutdown<B: GenerationBackend, P: GpuProbe>(
    state: &mut ServerState<B, P>,
) -> Result<serde_json::Value, JsonRpcError> {
    state.shutdown();
    Ok(serde_json::json!({ "status": "shutting_down" }))
}

/// Handles the generate method.
///
/// Runs the request to completion before answering. A failed generation is
/// still a successful RPC call carrying `status: "failed"`.
fn handle_generate<B: GenerationBackend, P: GpuProbe>(
    params: serde_json::Value,
    state: &mut ServerState<B, P>,
) -> Result<serde_json::Value, JsonRpcError> {
    let params: GenerateParams = if params.is_null() {
        GenerateParams::default()
    } else {
        serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?
    };

    let request = params.into_request(&state.config);
    let outcome = state.handler.handle(&request);

    to_value(GenerateResult::from(outcome))
}

/// Handles the status method.
fn handle_status<B: GenerationBackend, P: GpuProbe>(
    state: &ServerState<B, P>,
) -> Result<serde_json::Value, JsonRpcError> {
    let cache = state.handler.cache();
    to_value(StatusResult {
        loaded: cache.is_loaded(),
        config: cache.current_config().cloned(),
        constructions: cache.constructions(),
        output_dir: state.handler.output_dir().to_path_buf(),
    })
}

/// Handles the unload method.
fn handle_unload<B: GenerationBackend, P: GpuProbe>(
    state: &mut ServerState<B, P>,
) -> Result<serde_json::Value, JsonRpcError> {
    let unloaded = state.handler.cache_mut().unload();
    to_value(UnloadResult { unloaded })
}

fn to_value(result: impl serde::Serialize) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}
