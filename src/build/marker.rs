//! Build marker freshness
//!
//! The build command leaves a marker file in its output (for Next.js,
//! `.next/BUILD_ID`). Its mtime tells waiting processes whether someone else
//! finished a build after they started waiting.

use crate::error::{HarborError, HarborResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

/// Freshness of a build marker relative to a reference time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No marker exists yet
    Missing,
    /// Written before `reference - tolerance`
    Stale,
    /// Written within the tolerance window before the reference
    RaceWindow,
    /// Written after the reference
    Fresh,
}

impl Freshness {
    /// Whether a build can be skipped
    ///
    /// A marker in the race window was written by the race the caller is part
    /// of, so it counts as fresh.
    pub fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh | Self::RaceWindow)
    }
}

/// Marker file produced by the build command
#[derive(Debug, Clone)]
pub struct BuildMarker {
    path: PathBuf,
}

impl BuildMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn modified_at(&self) -> HarborResult<Option<SystemTime>> {
        match fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => Ok(Some(modified)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HarborError::io(
                format!("reading build marker {}", self.path.display()),
                e,
            )),
        }
    }

    pub async fn freshness(
        &self,
        reference: SystemTime,
        tolerance: Duration,
    ) -> HarborResult<Freshness> {
        Ok(classify(self.modified_at().await?, reference, tolerance))
    }
}

fn classify(modified: Option<SystemTime>, reference: SystemTime, tolerance: Duration) -> Freshness {
    let Some(modified) = modified else {
        return Freshness::Missing;
    };

    if modified > reference {
        return Freshness::Fresh;
    }

    let window_start = reference.checked_sub(tolerance).unwrap_or(reference);
    if modified > window_start {
        Freshness::RaceWindow
    } else {
        Freshness::Stale
    }
}
