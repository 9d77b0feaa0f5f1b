//! heartmula-daemon: lyrics-to-song generation around a cached pipeline.
//!
//! Building the generation pipeline is expensive (gigabytes of weights on a
//! GPU), so the daemon keeps one instance resident and rebuilds it only when a
//! request asks for a different configuration. Each request is validated,
//! staged in a private temporary directory, run, and its audio copied into a
//! durable output directory.
//!
//! # Modules
//!
//! - [`cache`]: Single-slot pipeline cache (ResourceCache)
//! - [`generation`]: Request handling (RequestHandler, SharedHandler)
//! - [`models`]: Pipeline backends and GPU probing
//! - [`types`]: Core data types (ResourceConfig, GenerationRequest, Outcome)
//! - [`config`]: Runtime configuration (DaemonConfig, Device, Precision)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//! - [`rpc`]: JSON-RPC server over stdio
//! - [`cli`]: Command-line interface
//!
//! # Example
//!
//! ```rust,ignore
//! use heartmula_daemon::{
//!     config::DaemonConfig,
//!     generation::RequestHandler,
//!     models::{SystemGpuProbe, WorkerBackend},
//!     types::GenerationRequest,
//! };
//!
//! let config = DaemonConfig::from_env();
//! let mut handler = RequestHandler::new(
//!     WorkerBackend::new(config.worker_command.clone()),
//!     SystemGpuProbe,
//!     config.effective_output_path(),
//! );
//!
//! let request = GenerationRequest::with_defaults("[Verse]\nhello", "piano,happy", &config);
//! let outcome = handler.handle(&request);
//! println!("{}", outcome.log());
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod models;
pub mod rpc;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use cache::ResourceCache;
pub use config::{DaemonConfig, Device, Precision};
pub use error::{DaemonError, ErrorCategory, ErrorCode, Result};
pub use generation::{RequestHandler, SharedHandler};
pub use types::{GenerationRequest, Outcome, ResourceConfig};
