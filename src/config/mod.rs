//! Configuration management for Harbor

pub mod schema;

pub use schema::{BuildConfig, CacheConfig, Config, Mode};

use crate::build::BuildCommand;
use crate::error::{HarborError, HarborResult};
use http::HeaderName;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable overriding the configured mode
pub const MODE_ENV: &str = "HARBOR_MODE";

/// Project-local configuration file name
pub const LOCAL_CONFIG_FILE: &str = "harbor.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("harbor")
            .join("config.toml")
    }

    /// Find a project-local config in the application directory
    pub fn find_local_config(app_dir: &Path) -> Option<PathBuf> {
        let path = app_dir.join(LOCAL_CONFIG_FILE);
        path.is_file().then_some(path)
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> HarborResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> HarborResult<Config> {
        let value = read_table(path).await?;
        value.try_into().map_err(|e: toml::de::Error| HarborError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the global config with a project-local config layered on top
    ///
    /// Tables are merged key by key; scalar values in the local file win.
    pub async fn load_merged(&self, local: Option<&Path>) -> HarborResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut merged = if self.config_path.exists() {
            read_table(&self.config_path).await?
        } else {
            toml::Value::Table(Default::default())
        };
        merge_values(&mut merged, read_table(local).await?);

        merged.try_into().map_err(|e: toml::de::Error| HarborError::ConfigInvalid {
            path: local.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> HarborResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            HarborError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> HarborResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HarborError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_table(path: &Path) -> HarborResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| HarborError::io(format!("reading config from {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| HarborError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Effective run flags after applying the environment override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMode {
    pub dev: bool,
    pub build_only: bool,
    pub prebuilt: bool,
}

impl ResolvedMode {
    /// Resolve from config and the `HARBOR_MODE` environment variable
    pub fn from_env(config: &Config) -> Self {
        Self::resolve(config, std::env::var(MODE_ENV).ok().as_deref())
    }

    /// Resolve from config and an explicit override; unknown overrides are ignored
    pub fn resolve(config: &Config, env_mode: Option<&str>) -> Self {
        let mode = match env_mode {
            Some("dev") => Mode::Dev,
            Some("build") => Mode::Build,
            Some("prod") => Mode::Prod,
            Some(other) => {
                debug!("Ignoring unknown {}={}", MODE_ENV, other);
                config.general.mode
            }
            None => config.general.mode,
        };

        match mode {
            Mode::Dev => Self {
                dev: true,
                build_only: false,
                prebuilt: config.build.prebuilt,
            },
            Mode::Build => Self {
                dev: false,
                build_only: true,
                prebuilt: false,
            },
            Mode::Prod => Self {
                dev: false,
                build_only: false,
                prebuilt: config.build.prebuilt,
            },
        }
    }
}

/// Check settings that serde cannot express
pub fn validate(config: &Config) -> HarborResult<()> {
    if config.build.retry_interval_ms == 0 {
        return Err(HarborError::SettingInvalid {
            setting: "build.retry_interval_ms".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    BuildCommand::parse(&config.build.command)?;

    HeaderName::try_from(config.cache.status_header.as_str()).map_err(|e| {
        HarborError::SettingInvalid {
            setting: "cache.status_header".to_string(),
            reason: e.to_string(),
        }
    })?;

    if !config.cache.invalidate_path.starts_with('/') {
        return Err(HarborError::SettingInvalid {
            setting: "cache.invalidate_path".to_string(),
            reason: "must start with '/'".to_string(),
        });
    }

    Ok(())
}
