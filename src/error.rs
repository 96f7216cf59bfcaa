//! Error types for Harbor
//!
//! All modules use `HarborResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Harbor operations
pub type HarborResult<T> = Result<T, HarborError>;

/// All errors that can occur in Harbor
#[derive(Error, Debug)]
pub enum HarborError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid setting {setting}: {reason}")]
    SettingInvalid { setting: String, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Application errors
    #[error("Not an application directory: {path}: {reason}")]
    NotAnApplication { path: PathBuf, reason: String },

    #[error("Prebuilt mode is enabled, but the build output {0} does not exist")]
    PrebuiltOutputMissing(PathBuf),

    // Lock errors
    #[error("Build lock error at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Build errors
    #[error("Invalid build command: {0:?}")]
    BuildCommandInvalid(String),

    #[error("Failed to start build command: {command}")]
    BuildSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command failed: {command}, exit code: {code:?}\n{stderr}")]
    BuildFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    // Cache errors
    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Response sink error: {0}")]
    Sink(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl HarborError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a lock filesystem error
    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lock {
            path: path.into(),
            source,
        }
    }

    /// Create a cache store error
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store(reason.into())
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotAnApplication { .. } => {
                Some("Add a next.config.js or list \"next\" in package.json dependencies")
            }
            Self::PrebuiltOutputMissing(_) => {
                Some("Run: harbor build, or disable build.prebuilt in the configuration")
            }
            Self::Lock { .. } => {
                Some("Check permissions on build.lock_dir; a stuck lock blocks every start")
            }
            Self::BuildCommandInvalid(_) => Some("Set build.command, e.g. \"npx next build\""),
            _ => None,
        }
    }
}
