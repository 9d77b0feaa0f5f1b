//! Generation pipeline backends.
//!
//! - [`backend`]: The `construct` / `generate` capability interface
//! - [`worker`]: Production backend driving an external worker process
//! - [`probe`]: CUDA availability probing

pub mod backend;
pub mod probe;
pub mod worker;

// Re-export commonly used types
pub use backend::{GenerationBackend, GenerationResource, Invocation};
pub use probe::{GpuProbe, StaticProbe, SystemGpuProbe};
pub use worker::{WorkerBackend, WorkerPipeline};
