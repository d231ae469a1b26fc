//! Shared domain types for the Growbal discovery platform.
//!
//! Everything the other crates agree on lives here: the error taxonomy,
//! configuration, the core pipeline data model, LLM stream events, and the
//! cancellation token threaded through every request.

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod stream;

pub use cancel::CancelToken;
pub use error::{Error, Result};
