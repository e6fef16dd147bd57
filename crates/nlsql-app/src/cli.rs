//! CLI argument definitions for the nlsql binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nlsql: non-SQL answer notification service and local tooling.
#[derive(Parser, Debug)]
#[command(name = "nlsql", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with every default filled in.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Run the notification service until interrupted.
    ///
    /// Reads non-SQL answers as JSON lines on stdin and runs a notification
    /// cycle on every trigger.
    Notify {
        /// Seconds between self-published triggers (0 disables); overrides
        /// `notify.trigger_every_secs`.
        #[arg(long = "trigger-every")]
        trigger_every: Option<u64>,
    },
    /// Publish non-SQL answers from a JSON-lines file and run one notification cycle.
    Replay {
        /// File with one NonSqlAnswer JSON object per line.
        file: PathBuf,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > NLSQL_CONFIG env var > ~/.nlsql/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("NLSQL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".nlsql").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".nlsql").join("config.toml");
    }
    PathBuf::from("config.toml")
}
