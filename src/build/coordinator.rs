//! Single-build coordination across racing processes
//!
//! Every worker process calls [`BuildCoordinator::coordinate`] on startup.
//! The first to create the application's lock file checks the build marker
//! and builds if needed; the others wait for the lock, then find a marker at
//! least as fresh as their own start time and skip the build.

use crate::build::marker::BuildMarker;
use crate::build::runner::{BuildCommand, BuildRunner, ShellBuildRunner};
use crate::config::BuildConfig;
use crate::error::HarborResult;
use crate::lock::{FileLock, StaleCheck};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a coordination attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// This process ran the build command
    Built { duration: Duration },
    /// The marker was already fresh; no build ran
    AlreadyFresh,
}

/// Build timing handed to an observer, e.g. for host analytics
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub application: String,
    pub duration: Duration,
}

pub type BuildObserver = Arc<dyn Fn(&BuildReport) + Send + Sync>;

/// Coordinates one build of one application directory
pub struct BuildCoordinator {
    app_dir: PathBuf,
    command: BuildCommand,
    marker: BuildMarker,
    lock: FileLock,
    holder: String,
    tolerance: Duration,
    retry_interval: Duration,
    runner: Arc<dyn BuildRunner>,
    observer: Option<BuildObserver>,
}

impl BuildCoordinator {
    /// Create a coordinator for `app_dir` using the shell runner
    pub fn new(app_dir: impl Into<PathBuf>, config: &BuildConfig) -> HarborResult<Self> {
        let app_dir = app_dir.into();
        let command = BuildCommand::parse(&config.command)?;
        let marker = BuildMarker::new(app_dir.join(&config.marker));
        let lock = FileLock::for_application(&config.lock_dir(), &app_dir.to_string_lossy());

        Ok(Self {
            app_dir,
            command,
            marker,
            lock,
            holder: format!("{}:{}", std::process::id(), Uuid::new_v4()),
            tolerance: config.tolerance(),
            retry_interval: config.retry_interval(),
            runner: Arc::new(ShellBuildRunner::new()),
            observer: None,
        })
    }

    /// Replace the build runner
    pub fn with_runner(mut self, runner: Arc<dyn BuildRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Notify `observer` after every completed build
    pub fn with_observer(mut self, observer: BuildObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    pub fn marker(&self) -> &BuildMarker {
        &self.marker
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Build unless another process already produced a fresh build
    ///
    /// Waits as long as a live holder keeps the lock; there is no timeout.
    pub async fn coordinate(&self) -> HarborResult<BuildOutcome> {
        // Shared reference point for every staleness check in this attempt
        let start = SystemTime::now();

        self.acquire(start).await?;

        let result = self.build_locked(start).await;
        let released = self.lock.release().await;

        match (result, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Failed to release build lock after error: {}", release_err);
                Err(e)
            }
        }
    }

    async fn acquire(&self, start: SystemTime) -> HarborResult<()> {
        loop {
            if self.lock.try_acquire(&self.holder).await? {
                return Ok(());
            }

            match self.lock.remove_if_stale(start, self.tolerance).await? {
                StaleCheck::Removed | StaleCheck::Vanished => continue,
                StaleCheck::Held => {
                    debug!(
                        "Build lock {} is held, retrying in {:?}",
                        self.lock.path().display(),
                        self.retry_interval
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    async fn build_locked(&self, start: SystemTime) -> HarborResult<BuildOutcome> {
        let freshness = self.marker.freshness(start, self.tolerance).await?;
        if freshness.is_fresh() {
            info!(
                "Build marker {} is fresh ({:?}), skipping build",
                self.marker.path().display(),
                freshness
            );
            return Ok(BuildOutcome::AlreadyFresh);
        }

        info!("Building {} with: {}", self.app_dir.display(), self.command);
        let output = self.runner.run(&self.command, &self.app_dir).await?;
        info!(
            "The build took {:.2} seconds",
            output.duration.as_secs_f64()
        );

        if let Some(observer) = &self.observer {
            observer(&BuildReport {
                application: application_name(&self.app_dir),
                duration: output.duration,
            });
        }

        Ok(BuildOutcome::Built {
            duration: output.duration,
        })
    }
}

/// Last path component of the application directory
pub fn application_name(app_dir: &Path) -> String {
    app_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| app_dir.display().to_string())
}
