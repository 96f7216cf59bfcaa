//! Harbor - single-build coordination and response caching
//!
//! Lets many worker processes of a multi-process host start the same web
//! application at once: exactly one of them builds it, the rest wait for
//! that build, and every worker serves through a shared response cache.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod lock;
pub mod server;

pub use error::{HarborError, HarborResult};
