//! Filesystem mutex shared by independent processes
//!
//! A lock is a plain file created with `O_CREAT | O_EXCL`. Whoever creates it
//! holds it until the file is removed. A holder that crashed leaves the file
//! behind, so other processes compare its mtime against the time they began
//! waiting and discard it once it is older than that, minus a tolerance.
//!
//! Discarding is serialized through a second exclusive-create file next to
//! the lock (`<lock>.reap`). Only the process holding it may delete the lock,
//! and it re-checks the lock's age first, so a lock that a new holder created
//! after someone else's staleness check is never removed.

use crate::error::{HarborError, HarborResult};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Result of checking a lock held by someone else
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleCheck {
    /// The lock predated the reference time and was deleted
    Removed,
    /// The lock is recent and presumably held by a live process, or another
    /// process is already discarding it
    Held,
    /// The lock disappeared before it could be inspected or deleted
    Vanished,
}

/// Exclusive-create lock file
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Lock scoped to one application, so different applications never contend
    pub fn for_application(lock_dir: &Path, app_name: &str) -> Self {
        Self::new(lock_dir.join(lock_file_name(app_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Guard that serializes stale-lock removal
    pub fn reaper_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".reap");
        PathBuf::from(name)
    }

    /// Try to create the lock file, writing `holder` into it
    ///
    /// Returns `Ok(false)` if the file already exists.
    pub async fn try_acquire(&self, holder: &str) -> HarborResult<bool> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(HarborError::lock(&self.path, e)),
        };

        self.record_holder(&mut file, holder).await?;

        debug!("Acquired lock {} as {}", self.path.display(), holder);
        Ok(true)
    }

    /// Write the holder id into a lock this process just created
    ///
    /// On failure the lock file is removed again; nobody else would release it.
    async fn record_holder<W>(&self, out: &mut W, holder: &str) -> HarborResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let written = match out.write_all(holder.as_bytes()).await {
            Ok(()) => out.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&self.path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(
                        "Failed to remove half-created lock {}: {}",
                        self.path.display(),
                        cleanup
                    );
                }
            }
            return Err(HarborError::lock(&self.path, e));
        }
        Ok(())
    }

    /// Remove the lock file; an already missing file is not an error
    pub async fn release(&self) -> HarborResult<()> {
        remove_lock_file(&self.path).await.map(|_| {
            debug!("Released lock {}", self.path.display());
        })
    }

    /// Whether the lock was created before `reference - tolerance`
    ///
    /// `None` when there is no lock file.
    pub async fn is_stale(
        &self,
        reference: SystemTime,
        tolerance: Duration,
    ) -> HarborResult<Option<bool>> {
        file_is_stale(&self.path, reference, tolerance).await
    }

    /// Delete the lock if it is stale relative to `reference`
    ///
    /// The age is checked again while holding the reaper guard, immediately
    /// before deleting. A process that loses the race for the guard reports
    /// `Held` and retries later.
    pub async fn remove_if_stale(
        &self,
        reference: SystemTime,
        tolerance: Duration,
    ) -> HarborResult<StaleCheck> {
        match self.is_stale(reference, tolerance).await? {
            None => return Ok(StaleCheck::Vanished),
            Some(false) => return Ok(StaleCheck::Held),
            Some(true) => {}
        }

        let reaper = self.reaper_path();
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&reaper)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.discard_abandoned_reaper(&reaper, reference, tolerance)
                    .await?;
                return Ok(StaleCheck::Held);
            }
            Err(e) => return Err(HarborError::lock(&reaper, e)),
        }

        let result = self.reap(reference, tolerance).await;
        let released = remove_lock_file(&reaper).await;

        match (result, released) {
            (Ok(check), Ok(_)) => Ok(check),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Failed to release reaper guard after error: {}", release_err);
                Err(e)
            }
        }
    }

    /// Runs while holding the reaper guard
    async fn reap(&self, reference: SystemTime, tolerance: Duration) -> HarborResult<StaleCheck> {
        match self.is_stale(reference, tolerance).await? {
            None => Ok(StaleCheck::Vanished),
            Some(false) => Ok(StaleCheck::Held),
            Some(true) => {
                if remove_lock_file(&self.path).await? {
                    info!("Removed stale lock {}", self.path.display());
                    Ok(StaleCheck::Removed)
                } else {
                    Ok(StaleCheck::Vanished)
                }
            }
        }
    }

    /// A reaper that crashed mid-removal leaves its guard behind
    async fn discard_abandoned_reaper(
        &self,
        reaper: &Path,
        reference: SystemTime,
        tolerance: Duration,
    ) -> HarborResult<()> {
        if file_is_stale(reaper, reference, tolerance).await? == Some(true)
            && remove_lock_file(reaper).await?
        {
            info!("Removed abandoned reaper guard {}", reaper.display());
        }
        Ok(())
    }

    /// Read the holder id written by the current holder
    pub async fn holder(&self) -> HarborResult<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HarborError::lock(&self.path, e)),
        }
    }
}

async fn file_is_stale(
    path: &Path,
    reference: SystemTime,
    tolerance: Duration,
) -> HarborResult<Option<bool>> {
    let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HarborError::lock(path, e)),
    };

    let cutoff = reference.checked_sub(tolerance).unwrap_or(reference);
    Ok(Some(modified < cutoff))
}

/// Delete a lock file; returns whether it existed
async fn remove_lock_file(path: &Path) -> HarborResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HarborError::lock(path, e)),
    }
}

/// `.harbor-build-<name>-<hash>.lock`, with the name reduced to safe characters
fn lock_file_name(app_name: &str) -> String {
    let safe: Vec<char> = app_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Keep the tail; for paths that is the most specific part
    let tail: String = safe[safe.len().saturating_sub(48)..].iter().collect();
    let safe = tail.trim_matches('_');

    // Two names may sanitize to the same string
    let digest = Sha256::digest(app_name.as_bytes());
    format!(".harbor-build-{}-{}.lock", safe, hex::encode(&digest[..6]))
}
