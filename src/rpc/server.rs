//! JSON-RPC server over stdin/stdout.
//!
//! Implements the JSON-RPC 2.0 protocol for daemon communication. One request
//! per line in, one response per line out; logs go to stderr.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::generation::RequestHandler;
use crate::models::{GenerationBackend, GpuProbe, SystemGpuProbe};

use super::methods::handle_request;
use super::types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};

/// State shared across all request handlers.
pub struct ServerState<B: GenerationBackend, P: GpuProbe = SystemGpuProbe> {
    /// Request handler owning the pipeline cache.
    pub handler: RequestHandler<B, P>,
    /// Daemon configuration, the source of per-request defaults.
    pub config: DaemonConfig,
    /// Flag to signal server shutdown.
    shutdown: Arc<AtomicBool>,
}

impl<B: GenerationBackend, P: GpuProbe> ServerState<B, P> {
    /// Creates new server state.
    pub fn new(handler: RequestHandler<B, P>, config: DaemonConfig) -> Self {
        Self {
            handler,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Runs the JSON-RPC server, reading from stdin and writing to stdout.
pub fn run_server<B: GenerationBackend, P: GpuProbe>(mut state: ServerState<B, P>) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(stdin.lock(), stdout.lock(), &mut state)
}

/// Serves requests from `reader` until EOF or a shutdown request.
pub fn serve<B, P, R, W>(reader: R, mut writer: W, state: &mut ServerState<B, P>) -> Result<()>
where
    B: GenerationBackend,
    P: GpuProbe,
    R: BufRead,
    W: Write,
{
    tracing::info!("JSON-RPC server started, waiting for requests");

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "error reading stdin");
                break;
            }
        };

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let response = process_request(&line, state);
        if let Err(e) = writeln!(writer, "{}", response).and_then(|_| writer.flush()) {
            tracing::error!(error = %e, "error writing response, stopping");
            break;
        }

        if state.is_shutdown() {
            tracing::info!("server shutdown requested");
            break;
        }
    }

    tracing::info!("JSON-RPC server stopped");
    Ok(())
}

/// Processes a single JSON-RPC request line into a response line.
fn process_request<B: GenerationBackend, P: GpuProbe>(
    line: &str,
    state: &mut ServerState<B, P>,
) -> String {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return error_line(None, JsonRpcError::parse_error(format!("Invalid JSON: {}", e)));
        }
    };

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return error_line(
                None,
                JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
            );
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return error_line(
            Some(request.id),
            JsonRpcError::invalid_request("Invalid JSON-RPC version (expected 2.0)"),
        );
    }

    tracing::debug!(method = %request.method, id = ?request.id, "request received");

    match handle_request(&request.method, request.params, state) {
        Ok(result) => serde_json::to_string(&JsonRpcResponse::new(request.id, result))
            .unwrap_or_default(),
        Err(error) => error_line(Some(request.id), error),
    }
}

fn error_line(id: Option<RequestId>, error: JsonRpcError) -> String {
    tracing::debug!(code = error.code, message = %error.message, "request rejected");
    serde_json::to_string(&JsonRpcErrorResponse::new(id, error)).unwrap_or_default()
}
