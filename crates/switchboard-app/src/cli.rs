//! CLI argument definitions for the Switchboard binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Switchboard - validated action gateway for a live broadcast.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Address for the HTTP server, e.g. 127.0.0.1:8787.
    #[arg(short = 'b', long = "bind")]
    pub bind: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SWITCHBOARD_CONFIG env var > ~/.switchboard/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SWITCHBOARD_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the bind address.
    ///
    /// Priority: --bind flag > SWITCHBOARD_BIND env var > config file value.
    pub fn resolve_bind(&self, config_bind: &str) -> String {
        if let Some(ref b) = self.bind {
            return b.clone();
        }
        if let Ok(b) = std::env::var("SWITCHBOARD_BIND") {
            if !b.trim().is_empty() {
                return b;
            }
        }
        config_bind.to_string()
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

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".switchboard").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let args = CliArgs::try_parse_from([
            "switchboard",
            "--config",
            "/etc/switchboard.toml",
            "--bind",
            "0.0.0.0:9000",
            "-l",
            "debug",
        ])
        .unwrap();
        assert_eq!(
            args.resolve_config_path(),
            PathBuf::from("/etc/switchboard.toml")
        );
        assert_eq!(args.resolve_bind("127.0.0.1:8787"), "0.0.0.0:9000");
        assert_eq!(args.resolve_log_level("info"), "debug");
    }

    #[test]
    fn test_log_level_falls_back_to_config() {
        let args = CliArgs::try_parse_from(["switchboard"]).unwrap();
        assert_eq!(args.resolve_log_level("warn"), "warn");
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(CliArgs::try_parse_from(["switchboard", "--port", "1"]).is_err());
    }
}
