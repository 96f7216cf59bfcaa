//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod verify;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use verify::execute as verify;

use crate::error::{HarborError, HarborResult};
use std::path::PathBuf;

/// Application directory for a command, defaulting to the current directory
///
/// Existing paths are canonicalized so every worker derives the same lock.
pub async fn application_dir(dir: Option<&PathBuf>) -> HarborResult<PathBuf> {
    let dir = match dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| HarborError::io("getting current directory", e))?,
    };

    Ok(tokio::fs::canonicalize(&dir).await.unwrap_or(dir))
}
