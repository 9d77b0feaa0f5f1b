//! Single-slot cache for the resident generation pipeline.
//!
//! Building a pipeline loads gigabytes of weights onto a device, so the
//! daemon keeps the last one and rebuilds only when the requested
//! [`ResourceConfig`] changes. The cache holds exactly one entry: a new
//! configuration replaces the old pipeline wholesale.
//!
//! Not thread-safe. Hosts that serve requests concurrently must serialize
//! access (see [`SharedHandler`](crate::generation::SharedHandler)).

use std::time::Instant;

use crate::error::Result;
use crate::models::GenerationBackend;
use crate::types::ResourceConfig;

/// The cached pipeline and the configuration it was built from.
struct CacheEntry<R> {
    config: ResourceConfig,
    resource: R,
    built_at: Instant,
}

/// Memoizes one pipeline instance keyed by its configuration.
pub struct ResourceCache<B: GenerationBackend> {
    backend: B,
    slot: Option<CacheEntry<B::Resource>>,
    constructions: u64,
}

impl<B: GenerationBackend> ResourceCache<B> {
    /// Creates an empty cache that builds pipelines with `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: None,
            constructions: 0,
        }
    }

    /// Returns the pipeline for `config`, building it if the cache is empty
    /// or holds a different configuration.
    ///
    /// The replacement is committed only after construction succeeds: on
    /// error the previous pipeline (if any) stays cached and the error is
    /// returned unchanged.
    pub fn acquire(&mut self, config: &ResourceConfig) -> Result<&mut B::Resource> {
        let entry = match self.slot.take() {
            Some(entry) if entry.config == *config => {
                tracing::debug!(
                    model_path = %config.model_path().display(),
                    age_sec = entry.built_at.elapsed().as_secs(),
                    "reusing cached pipeline"
                );
                entry
            }
            previous => {
                if let Some(ref previous) = previous {
                    tracing::info!(previous = ?previous.config, "configuration changed, rebuilding pipeline");
                }
                tracing::info!(
                    model_path = %config.model_path().display(),
                    version = config.version(),
                    mula_device = %config.mula_device(),
                    codec_device = %config.codec_device(),
                    lazy_load = config.lazy_load(),
                    "building pipeline"
                );

                let started = Instant::now();
                match self.backend.construct(config) {
                    Ok(resource) => {
                        self.constructions += 1;
                        tracing::info!(
                            elapsed_sec = started.elapsed().as_secs_f32(),
                            "pipeline ready"
                        );
                        CacheEntry {
                            config: config.clone(),
                            resource,
                            built_at: Instant::now(),
                        }
                    }
                    Err(e) => {
                        self.slot = previous;
                        return Err(e);
                    }
                }
            }
        };

        Ok(&mut self.slot.insert(entry).resource)
    }

    /// Configuration of the cached pipeline, if any.
    pub fn current_config(&self) -> Option<&ResourceConfig> {
        self.slot.as_ref().map(|entry| &entry.config)
    }

    /// Returns true if a pipeline is cached.
    pub fn is_loaded(&self) -> bool {
        self.slot.is_some()
    }

    /// Number of successful constructions since the cache was created.
    pub fn constructions(&self) -> u64 {
        self.constructions
    }

    /// Drops the cached pipeline, releasing its resources.
    ///
    /// Returns true if something was cached.
    pub fn unload(&mut self) -> bool {
        match self.slot.take() {
            Some(entry) => {
                tracing::info!(model_path = %entry.config.model_path().display(), "unloading pipeline");
                true
            }
            None => false,
        }
    }
}
