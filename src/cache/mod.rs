//! Cache module for the resident pipeline.
//!
//! Provides a single-slot cache keyed by pipeline configuration.

pub mod resource;

// Re-export commonly used types
pub use resource::ResourceCache;
