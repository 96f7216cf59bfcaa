//! Configuration schema for Harbor
//!
//! Global configuration is stored at `~/.config/harbor/config.toml`; an
//! application may carry its own `harbor.toml` which takes precedence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build coordination settings
    pub build: BuildConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Ports handed to the host server
    pub server: ServerConfig,
}

/// Run mode of the extension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Build once, then serve the production output
    #[default]
    Prod,
    /// Serve through the development server; never build
    Dev,
    /// Build and exit without serving
    Build,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Run mode, overridden by `HARBOR_MODE`
    pub mode: Mode,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            mode: Mode::Prod,
        }
    }
}

/// Build coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build command, shell-parsed into program and arguments
    pub command: String,

    /// Build marker, relative to the application directory
    pub marker: PathBuf,

    /// Build output directory, relative to the application directory
    pub output_dir: PathBuf,

    /// Directory holding build lock files (defaults to the system temp dir)
    pub lock_dir: Option<PathBuf>,

    /// Skip building; the output directory must already exist
    pub prebuilt: bool,

    /// Timestamp tolerance for lock staleness and marker freshness
    pub tolerance_ms: u64,

    /// Wait between lock acquisition attempts
    pub retry_interval_ms: u64,
}

impl BuildConfig {
    /// Lock directory, falling back to the system temp dir
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: "npx next build".to_string(),
            marker: PathBuf::from(".next/BUILD_ID"),
            output_dir: PathBuf::from(".next"),
            lock_dir: None,
            prebuilt: false,
            tolerance_ms: 100,
            retry_interval_ms: 1000,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching (default: false)
    pub enabled: bool,

    /// Directory for the file-backed store; in-memory when unset
    pub store_dir: Option<PathBuf>,

    /// Response header carrying HIT or MISS
    pub status_header: String,

    /// Route that clears the cache on POST
    pub invalidate_path: String,

    /// Request headers that take part in the cache key
    pub vary_headers: Vec<String>,

    /// Path prefixes that are never cached
    pub bypass_prefixes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store_dir: None,
            status_header: "X-Cache".to_string(),
            invalidate_path: "/invalidate".to_string(),
            vary_headers: vec![],
            bypass_prefixes: vec![],
        }
    }
}

/// Ports for the host HTTP server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP port (host default when unset)
    pub port: Option<u16>,

    /// HTTPS port (host default when unset)
    pub secure_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[cache]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.command, "npx next build");
        assert_eq!(config.build.marker, PathBuf::from(".next/BUILD_ID"));
        assert!(!config.cache.enabled);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [general]
            mode = "dev"

            [cache]
            enabled = true
            vary_headers = ["Accept-Encoding"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.general.mode, Mode::Dev);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.status_header, "X-Cache"); // default preserved
        assert_eq!(config.build.tolerance(), Duration::from_millis(100));
    }
}
