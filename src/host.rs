//! Host integration
//!
//! The host runtime calls [`Extension::setup_directory`] once before forking
//! workers, then [`Extension::handle_directory`] in every worker. The wrapped
//! web framework sits behind [`ApplicationEngine`].

use crate::build::{BuildCoordinator, BuildObserver, BuildOutcome, BuildRunner};
use crate::cache::{CacheOutcome, ResponseCache};
use crate::config::schema::ServerConfig;
use crate::config::{Config, ResolvedMode};
use crate::error::{HarborError, HarborResult};
use crate::server::{Request, RequestHandler, ResponseSink};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info};

/// Framework config files that identify an application
const CONFIG_FILES: &[&str] = &["next.config.js", "next.config.mjs", "next.config.ts"];

/// `package.json` sections that may declare the framework
const DEPENDENCY_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Upgrade path owned by the development server's hot reloader
pub const HOT_RELOAD_PATH: &str = "/_next/webpack-hmr";

/// The wrapped web framework
#[async_trait]
pub trait ApplicationEngine: Send + Sync {
    /// Get the application ready to serve
    async fn prepare(&self) -> HarborResult<()>;

    fn request_handler(&self) -> Arc<dyn RequestHandler>;

    /// Handler for protocol upgrades, if the framework has one
    fn upgrade_handler(&self) -> Option<Arc<dyn UpgradeHandler>>;
}

/// Takes over a connection that asked for a protocol upgrade
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    async fn upgrade(&self, request: &Request) -> HarborResult<()>;
}

/// Whether an upgrade reached the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Handled,
    Ignored,
}

/// Result of the once-per-host setup hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Build-only mode finished; the host should exit successfully
    BuildOnlyComplete(BuildOutcome),
    /// Workers may start
    Ready,
}

/// Check that `dir` holds an application the engine can serve
pub async fn verify_application(dir: &Path) -> HarborResult<()> {
    debug!("Verifying {} is an application directory", dir.display());

    let metadata = match fs::metadata(dir).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(HarborError::PathNotFound(dir.to_path_buf()))
        }
        Err(e) => return Err(HarborError::io(format!("inspecting {}", dir.display()), e)),
    };
    if !metadata.is_dir() {
        return Err(not_an_application(dir, "not a directory"));
    }

    for name in CONFIG_FILES {
        if path_exists(&dir.join(name)).await? {
            return Ok(());
        }
    }

    if declares_framework(&dir.join("package.json")).await? {
        return Ok(());
    }

    let err = not_an_application(
        dir,
        "missing both a next.config file and a \"next\" dependency in package.json",
    );
    error!("{}", err);
    Err(err)
}

/// Only a missing path is `false`; anything that prevents looking is an error
async fn path_exists(path: &Path) -> HarborResult<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| HarborError::io(format!("inspecting {}", path.display()), e))
}

async fn declares_framework(package_json: &Path) -> HarborResult<bool> {
    let content = match fs::read(package_json).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(HarborError::io(
                format!("reading {}", package_json.display()),
                e,
            ))
        }
    };

    let manifest: Value = serde_json::from_slice(&content).map_err(|e| {
        let dir = package_json.parent().unwrap_or(package_json);
        not_an_application(dir, &format!("package.json is not valid JSON: {e}"))
    })?;

    Ok(DEPENDENCY_SECTIONS.iter().any(|section| {
        manifest
            .get(section)
            .and_then(|deps| deps.get("next"))
            .is_some_and(is_declared)
    }))
}

fn is_declared(version: &Value) -> bool {
    match version {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn not_an_application(dir: &Path, reason: &str) -> HarborError {
    HarborError::NotAnApplication {
        path: dir.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Host-facing entry point, constructed once per process
pub struct Extension {
    config: Config,
    mode: ResolvedMode,
    runner: Option<Arc<dyn BuildRunner>>,
    observer: Option<BuildObserver>,
}

impl Extension {
    pub fn new(config: Config, mode: ResolvedMode) -> Self {
        Self {
            config,
            mode,
            runner: None,
            observer: None,
        }
    }

    /// Replace the shell build runner
    pub fn with_runner(mut self, runner: Arc<dyn BuildRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Receive a report after every build this process runs
    pub fn with_observer(mut self, observer: BuildObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> ResolvedMode {
        self.mode
    }

    /// Create the build coordinator for `dir`
    pub fn coordinator(&self, dir: &Path) -> HarborResult<BuildCoordinator> {
        let mut coordinator = BuildCoordinator::new(dir, &self.config.build)?;
        if let Some(runner) = &self.runner {
            coordinator = coordinator.with_runner(Arc::clone(runner));
        }
        if let Some(observer) = &self.observer {
            coordinator = coordinator.with_observer(Arc::clone(observer));
        }
        Ok(coordinator)
    }

    /// Runs once per host before workers start
    pub async fn setup_directory(&self, dir: &Path) -> HarborResult<SetupOutcome> {
        verify_application(dir).await?;

        if self.mode.build_only {
            let outcome = self.coordinator(dir)?.coordinate().await?;
            info!("Build-only mode is enabled, {} is built", dir.display());
            return Ok(SetupOutcome::BuildOnlyComplete(outcome));
        }

        Ok(SetupOutcome::Ready)
    }

    /// Runs in every worker; returns the worker's request entry point
    pub async fn handle_directory(
        &self,
        dir: &Path,
        engine: Arc<dyn ApplicationEngine>,
    ) -> HarborResult<Worker> {
        verify_application(dir).await?;

        if self.mode.prebuilt {
            let output_dir = dir.join(&self.config.build.output_dir);
            if !path_exists(&output_dir).await? {
                return Err(HarborError::PrebuiltOutputMissing(output_dir));
            }
        } else if !self.mode.dev {
            self.coordinator(dir)?.coordinate().await?;
        }

        engine.prepare().await?;

        let cache = if self.config.cache.enabled {
            Some(ResponseCache::from_config(&self.config.cache).await?)
        } else {
            None
        };

        let upgrade = if self.mode.dev {
            engine.upgrade_handler()
        } else {
            None
        };

        info!("Serving {}", dir.display());
        Ok(Worker {
            app_dir: dir.to_path_buf(),
            handler: engine.request_handler(),
            upgrade,
            cache,
            server: self.config.server.clone(),
        })
    }
}

/// One worker's view of a prepared application
pub struct Worker {
    app_dir: PathBuf,
    handler: Arc<dyn RequestHandler>,
    upgrade: Option<Arc<dyn UpgradeHandler>>,
    cache: Option<ResponseCache>,
    server: ServerConfig,
}

impl Worker {
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Ports requested from the host server
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Serve a request, through the response cache when one is enabled
    pub async fn serve(
        &self,
        request: &Request,
        sink: &mut dyn ResponseSink,
    ) -> HarborResult<CacheOutcome> {
        match &self.cache {
            Some(cache) => cache.handle(request, self.handler.as_ref(), sink).await,
            None => {
                self.handler.handle(request, sink).await?;
                Ok(CacheOutcome::Passthrough)
            }
        }
    }

    /// Route a protocol upgrade to the engine
    ///
    /// Only development workers carry an upgrade handler, and the hot
    /// reloader's own path is left to the development server.
    pub async fn upgrade(&self, request: &Request) -> HarborResult<UpgradeOutcome> {
        let Some(handler) = &self.upgrade else {
            return Ok(UpgradeOutcome::Ignored);
        };
        if request.path() == HOT_RELOAD_PATH {
            return Ok(UpgradeOutcome::Ignored);
        }

        handler.upgrade(request).await?;
        Ok(UpgradeOutcome::Handled)
    }
}

#[async_trait]
impl RequestHandler for Worker {
    async fn handle(&self, request: &Request, sink: &mut dyn ResponseSink) -> HarborResult<()> {
        self.serve(request, sink).await.map(|_| ())
    }
}
