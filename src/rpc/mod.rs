//! JSON-RPC module for daemon communication.
//!
//! Provides the JSON-RPC 2.0 server implementation for:
//! - `generate`: Generate one song and wait for the outcome
//! - `status`: Report the resident pipeline
//! - `unload`: Release the resident pipeline
//! - `ping`: Health check
//! - `shutdown`: Graceful shutdown

pub mod methods;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use server::{run_server, serve, ServerState};
pub use types::{
    GenerateParams, GenerateResult, GenerationReport, GenerationStatus, JsonRpcError,
    JsonRpcErrorResponse, JsonRpcRequest, JsonRpcResponse, RequestId, StatusResult, UnloadResult,
};
