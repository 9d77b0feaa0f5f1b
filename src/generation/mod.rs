//! Request handling around the cached generation pipeline.
//!
//! [`RequestHandler`] validates a request, stages its inputs, runs the
//! pipeline from the [`ResourceCache`](crate::cache::ResourceCache) and copies
//! the result into the output directory. [`SharedHandler`] wraps it for
//! multi-threaded hosts.

pub mod handler;
pub mod staging;

// Re-export commonly used items
pub use handler::{RequestHandler, SharedHandler};
pub use staging::{StagingArea, LYRICS_FILE, TAGS_FILE};
