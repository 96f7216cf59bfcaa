//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Harbor - single-build coordination and response caching
///
/// Builds a web application exactly once no matter how many workers start
/// at the same time, and manages the response cache they share.
#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HARBOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip the application's harbor.toml
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an application unless a fresh build already exists
    Build(BuildArgs),

    /// Check that a directory holds an application
    Verify(VerifyArgs),

    /// Inspect or clear a file-backed response cache
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),
}

impl Commands {
    /// Application directory the command works on, if any
    pub fn app_dir(&self) -> Option<&PathBuf> {
        match self {
            Commands::Build(args) => args.dir.as_ref(),
            Commands::Verify(args) => args.dir.as_ref(),
            Commands::Cache(_) | Commands::Config(_) => None,
        }
    }
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Application directory (defaults to current directory)
    pub dir: Option<PathBuf>,

    /// Build command, overriding build.command
    #[arg(long)]
    pub command: Option<String>,

    /// Directory for the build lock, overriding build.lock_dir
    #[arg(long)]
    pub lock_dir: Option<PathBuf>,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Application directory (defaults to current directory)
    pub dir: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached responses
    List {
        /// Store directory (defaults to cache.store_dir)
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove every cached response
    Clear {
        /// Store directory (defaults to cache.store_dir)
        #[arg(short, long)]
        store: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_build() {
        let cli = Cli::parse_from(["harbor", "build", "apps/shop", "--command", "npm run build"]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.dir, Some(PathBuf::from("apps/shop")));
                assert_eq!(args.command.as_deref(), Some("npm run build"));
                assert!(args.lock_dir.is_none());
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn cli_parses_build_without_dir() {
        let cli = Cli::parse_from(["harbor", "build"]);
        assert!(cli.command.app_dir().is_none());
    }

    #[test]
    fn cli_parses_verify() {
        let cli = Cli::parse_from(["harbor", "verify", "site"]);
        assert_eq!(cli.command.app_dir(), Some(&PathBuf::from("site")));
    }

    #[test]
    fn cli_parses_cache_list() {
        let cli = Cli::parse_from(["harbor", "cache", "list", "--store", "/tmp/c", "-f", "json"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::List { store, format },
            }) => {
                assert_eq!(store, Some(PathBuf::from("/tmp/c")));
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected Cache List command"),
        }
    }

    #[test]
    fn cli_parses_cache_clear() {
        let cli = Cli::parse_from(["harbor", "cache", "clear"]);
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheArgs {
                action: CacheAction::Clear { store: None }
            })
        ));
    }

    #[test]
    fn cli_parses_config_default_action() {
        let cli = Cli::parse_from(["harbor", "config"]);
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs { action: None })
        ));
    }

    #[test]
    fn cli_verbose_and_config_are_global() {
        let cli = Cli::parse_from(["harbor", "verify", "-vv", "--config", "/etc/harbor.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/harbor.toml")));
    }
}
