//! Configuration module for the frameshift server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Port used when none (or an unparsable one) is given.
pub const DEFAULT_PORT: u16 = 9090;

/// How connections are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Single thread, readiness multiplexing over all connections.
    #[default]
    Multiplexed,
    /// One connection at a time, blocking I/O.
    Sequential,
    /// One OS thread per connection.
    Threaded,
    /// Connections dispatched onto a fixed pool of worker threads.
    Pool,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "frameshift")]
#[command(author = "frameshift authors")]
#[command(version = "0.1.0")]
#[command(about = "A readiness-multiplexed ^...$ shift server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (falls back to 9090 when absent or invalid)
    pub port: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Connection handling strategy
    #[arg(short, long, value_enum)]
    pub mode: Option<ServerMode>,

    /// Worker threads for the pool mode
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum number of simultaneously open connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Per-connection output buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Readiness events fetched per poll
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: ServerMode::default(),
            workers: default_workers(),
            max_connections: default_max_connections(),
        }
    }
}

/// Event loop tuning
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Output buffer capacity per connection, also the receive chunk size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Capacity of the readiness event batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_workers() -> usize {
    64
}

fn default_max_connections() -> usize {
    16 * 1024
}

fn default_buffer_size() -> usize {
    1024
}

fn default_batch_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: ServerMode,
    pub workers: usize,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub log_level: String,
    /// Port argument that could not be parsed and was replaced by the default.
    pub rejected_port: Option<String>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let (port, rejected_port) = match cli.port {
            Some(raw) => match parse_port(&raw) {
                Some(port) => (port, None),
                None => (DEFAULT_PORT, Some(raw)),
            },
            None => (toml_config.server.port, None),
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            buffer_size: cli
                .buffer_size
                .unwrap_or(toml_config.runtime.buffer_size),
            batch_size: cli.batch_size.unwrap_or(toml_config.runtime.batch_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            rejected_port,
        };

        config.validate()?;
        Ok(config)
    }

    /// Address string handed to the listener bootstrap.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        Ok(())
    }
}

/// Parse a port argument, `None` when it is not a valid `u16`.
fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse().ok()
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("frameshift").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.mode, ServerMode::Multiplexed);
        assert_eq!(config.server.max_connections, 16 * 1024);
        assert_eq!(config.runtime.buffer_size, 1024);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            mode = "pool"
            workers = 8

            [runtime]
            buffer_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.mode, ServerMode::Pool);
        assert_eq!(config.server.workers, 8);
        assert_eq!(config.runtime.buffer_size, 4096);
        assert_eq!(config.runtime.batch_size, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_arguments_uses_defaults() {
        let config = Config::from_args(cli(&[])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.mode, ServerMode::Multiplexed);
        assert_eq!(config.listen_addr(), "0.0.0.0:9090");
        assert!(config.rejected_port.is_none());
    }

    #[test]
    fn test_positional_port() {
        let config = Config::from_args(cli(&["7070"])).unwrap();
        assert_eq!(config.port, 7070);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Config::from_args(cli(&["not-a-port"])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.rejected_port.as_deref(), Some("not-a-port"));

        let config = Config::from_args(cli(&["70000"])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_cli_flags() {
        let config = Config::from_args(cli(&[
            "--mode",
            "threaded",
            "--host",
            "127.0.0.1",
            "--buffer-size",
            "16",
        ]))
        .unwrap();
        assert_eq!(config.mode, ServerMode::Threaded);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.buffer_size, 16);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let err = Config::from_args(cli(&["--buffer-size", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    /// Write `contents` to a per-test file under the temp dir.
    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "frameshift-{}-{name}.toml",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_cli_log_level_overrides_file() {
        let path = write_config("log-level", "[logging]\nlevel = \"debug\"\n");
        let path_arg = path.to_str().unwrap();

        let config = Config::from_args(cli(&["--config", path_arg])).unwrap();
        assert_eq!(config.log_level, "debug");

        // An explicit value wins even when it equals the built-in default.
        let config =
            Config::from_args(cli(&["--config", path_arg, "--log-level", "info"])).unwrap();
        assert_eq!(config.log_level, "info");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_log_level_default() {
        let config = Config::from_args(cli(&[])).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_args(cli(&["--config", "/nonexistent/frameshift.toml"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
