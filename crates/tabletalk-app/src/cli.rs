//! CLI argument definitions for the Tabletalk server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Tabletalk - conversational analysis of tabular datasets over HTTP.
#[derive(Parser, Debug)]
#[command(name = "tabletalk", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TABLETALK_CONFIG env var > ~/.tabletalk/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(std::env::var("TABLETALK_CONFIG").ok())
    }

    fn resolve_config_path_with(&self, env: Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > TABLETALK_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.resolve_port_with(std::env::var("TABLETALK_PORT").ok(), config_port)
    }

    fn resolve_port_with(&self, env: Option<String>, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = env.and_then(|val| val.parse::<u16>().ok()) {
            return p;
        }
        config_port
    }

    /// Resolve the log filter directive.
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
        return PathBuf::from(home).join(".tabletalk").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".tabletalk").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("tabletalk").chain(args.iter().copied()))
    }

    #[test]
    fn test_flag_overrides_env_and_config() {
        let args = parse(&["--port", "4000"]);
        assert_eq!(args.resolve_port_with(Some("5000".into()), 3040), 4000);
    }

    #[test]
    fn test_env_overrides_config() {
        let args = parse(&[]);
        assert_eq!(args.resolve_port_with(Some("5000".into()), 3040), 5000);
        assert_eq!(args.resolve_port_with(Some("junk".into()), 3040), 3040);
        assert_eq!(args.resolve_port_with(None, 3040), 3040);
    }

    #[test]
    fn test_config_path_priority() {
        let args = parse(&["-c", "/tmp/a.toml"]);
        assert_eq!(
            args.resolve_config_path_with(Some("/tmp/b.toml".into())),
            PathBuf::from("/tmp/a.toml")
        );
        let args = parse(&[]);
        assert_eq!(
            args.resolve_config_path_with(Some("/tmp/b.toml".into())),
            PathBuf::from("/tmp/b.toml")
        );
    }

    #[test]
    fn test_log_level_falls_back_to_config() {
        assert_eq!(parse(&[]).resolve_log_level("warn"), "warn");
        assert_eq!(parse(&["-l", "debug"]).resolve_log_level("warn"), "debug");
    }
}
