//! Backend abstraction for the generation pipeline.
//!
//! The pipeline is an opaque collaborator reached through two operations:
//! [`GenerationBackend::construct`] builds a resident pipeline for a
//! [`ResourceConfig`], and [`GenerationResource::generate`] renders one song
//! into a file. The resource cache and the request handler only talk to these
//! traits, so any concrete pipeline (the worker process, a test stub) fits.

use std::path::Path;

use crate::error::Result;
use crate::types::{GenerationParams, ResourceConfig};

/// Inputs for one pipeline invocation.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// File holding the normalized lyrics.
    pub lyrics: &'a Path,
    /// File holding the normalized tags.
    pub tags: &'a Path,
    /// Where the pipeline must write the generated audio.
    pub save_path: &'a Path,
    /// Coerced sampling parameters.
    pub params: GenerationParams,
}

/// A constructed, resident pipeline.
pub trait GenerationResource {
    /// Generates one song, writing it to `invocation.save_path`.
    ///
    /// Nothing is returned; the file on disk is the result.
    fn generate(&mut self, invocation: &Invocation<'_>) -> Result<()>;
}

/// Factory for pipeline instances.
///
/// Construction may allocate gigabytes of device memory and take minutes;
/// callers go through [`ResourceCache`](crate::cache::ResourceCache) to avoid
/// building twice for the same configuration.
pub trait GenerationBackend {
    /// The resident pipeline this backend builds.
    type Resource: GenerationResource;

    /// Builds a pipeline for `config`.
    fn construct(&self, config: &ResourceConfig) -> Result<Self::Resource>;
}
