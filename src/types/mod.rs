//! Core types for the heartmula-daemon.
//!
//! This module re-exports all the core data types used throughout the daemon:
//! - [`ResourceConfig`]: Normalized pipeline construction parameters (the cache key)
//! - [`GenerationRequest`]: One generation call with loosely typed numeric inputs
//! - [`Outcome`]: Terminal result of a request with its structured report

mod outcome;
mod request;
mod resource;

// Re-export all types at the module level
pub use outcome::{
    FailureReport, Outcome, SuccessReport, CAPABILITY_REMEDIATION, OOM_HINT, REMEDIATION_CHECKLIST,
};
pub use request::{
    normalize_save_name, normalize_text, GenerationParams, GenerationRequest, LooseNumber,
    OUTPUT_EXTENSION,
};
pub use resource::{ResourceConfig, ResourceSettings};
