//! Build command execution
//!
//! Provides a trait for running the external build so the coordinator can be
//! exercised without spawning real processes.

use crate::error::{HarborError, HarborResult};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info};

/// A build command split into program and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    program: String,
    args: Vec<String>,
}

impl BuildCommand {
    /// Split a command line the way a POSIX shell would
    pub fn parse(line: &str) -> HarborResult<Self> {
        let mut words = shell_words::split(line)
            .map_err(|e| HarborError::BuildCommandInvalid(format!("{line}: {e}")))?
            .into_iter();

        let program = words
            .next()
            .ok_or_else(|| HarborError::BuildCommandInvalid(line.to_string()))?;

        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = vec![self.program.as_str()];
        words.extend(self.args.iter().map(String::as_str));
        write!(f, "{}", shell_words::join(words))
    }
}

/// Captured output of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Abstract build executor
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Run `command` in `workdir` to completion
    ///
    /// A non-zero exit is reported as `HarborError::BuildFailed`.
    async fn run(&self, command: &BuildCommand, workdir: &Path) -> HarborResult<BuildOutput>;
}

/// Runs the build as a child process with captured output
#[derive(Debug, Default)]
pub struct ShellBuildRunner;

impl ShellBuildRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildRunner for ShellBuildRunner {
    async fn run(&self, command: &BuildCommand, workdir: &Path) -> HarborResult<BuildOutput> {
        debug!("Executing build: {} in {}", command, workdir.display());

        let started = Instant::now();
        let output = Command::new(command.program())
            .args(command.args())
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| HarborError::BuildSpawn {
                command: command.to_string(),
                source: e,
            })?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            if !stdout.trim().is_empty() {
                info!("{}", stdout.trim_end());
            }
            Ok(BuildOutput {
                stdout,
                stderr,
                duration,
            })
        } else {
            if !stderr.trim().is_empty() {
                error!("{}", stderr.trim_end());
            }
            Err(HarborError::BuildFailed {
                command: command.to_string(),
                code: output.status.code(),
                stdout,
                stderr,
            })
        }
    }
}
