//! Command-line interface for the fleet controller.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };
            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for `fctl`, the fleet controller.
#[derive(Parser)]
#[command(name = "fctl", version, author)]
#[command(about = "Supervises a fleet of long-running agent processes", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the declarative config file. Defaults to
    /// `<config_dir>/fleet.toml`.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the mail service then every configured agent, and enter the
    /// dashboard. Exits 0 on clean shutdown, 1 on startup failure.
    Up,

    /// Stop every recorded process. Exits 0 even if nothing was running.
    Down,

    /// Manage just the mail service.
    Services {
        #[command(subcommand)]
        action: ServicesAction,
    },

    /// Validate config, secrets, and external dependencies. Exits 0 if all
    /// checks pass, 1 otherwise.
    Check,

    /// Manage the secrets envelope.
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },

    /// Prune log files older than the given number of days.
    Cleanup {
        /// Delete log files whose last modification is older than this many
        /// days.
        #[arg(long, value_name = "N")]
        days: u64,
    },
}

/// `services` subcommands.
#[derive(Subcommand)]
pub enum ServicesAction {
    /// Start the mail service, if not already running.
    Start,
    /// Stop the mail service.
    Stop,
    /// Report whether the mail service is running.
    Status,
}

/// `secrets` subcommands.
#[derive(Subcommand)]
pub enum SecretsAction {
    /// Generate a fresh identity key.
    Init,
    /// Encrypt a plaintext secrets file.
    Encrypt {
        /// Path to the plaintext `KEY=VALUE` file.
        path: String,
    },
    /// Decrypt an encrypted secrets companion.
    Decrypt {
        /// Path to the `.age` file.
        path: String,
    },
    /// Rotate the identity key, re-encrypting the given files.
    Rotate {
        /// Paths to the `.age` files to re-encrypt under the new key.
        paths: Vec<String>,
    },
    /// Report the current key's recipient and age.
    Status,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
