//! Configuration module for hixie-gateway.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the gateway
#[derive(Parser, Debug, Default)]
#[command(name = "hixie-gateway")]
#[command(author = "hixie-gateway authors")]
#[command(version = "0.1.0")]
#[command(about = "A legacy WebSocket to TCP gateway", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host the WebSocket listener binds to and advertises
    #[arg(long)]
    pub ws_host: Option<String>,

    /// Port the WebSocket listener binds to and advertises
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Path advertised in Sec-WebSocket-Location
    #[arg(long)]
    pub ws_path: Option<String>,

    /// Host of the page origin advertised in Sec-WebSocket-Origin
    #[arg(long)]
    pub http_host: Option<String>,

    /// Port of the page origin advertised in Sec-WebSocket-Origin
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Listen backlog for the WebSocket socket
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent sessions (unbounded when unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Close a session after this many seconds without inbound bytes
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WebSocket listener configuration
#[derive(Debug, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_host")]
    pub host: String,
    #[serde(default = "default_ws_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub path: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: default_ws_host(),
            port: default_ws_port(),
            path: default_ws_path(),
            backlog: default_backlog(),
        }
    }
}

/// Origin of the page hosting the browser script.
///
/// Only echoed into the handshake response; nothing is served from here.
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    /// Number of worker threads
    pub workers: Option<usize>,
}

/// Optional session limits, all disabled by default
#[derive(Debug, Deserialize, Default)]
pub struct LimitsConfig {
    pub max_connections: Option<usize>,
    pub read_timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_ws_host() -> String {
    "localhost".to_string()
}

fn default_ws_port() -> u16 {
    9001
}

fn default_ws_path() -> String {
    "/".to_string()
}

fn default_backlog() -> i32 {
    5
}

fn default_http_host() -> String {
    "localhost".to_string()
}

fn default_http_port() -> u16 {
    9000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Host, port and path values rendered into the handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub ws_host: String,
    pub ws_port: u16,
    pub ws_path: String,
    pub http_host: String,
    pub http_port: u16,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Arc<Endpoints>,
    pub backlog: i32,
    pub workers: Option<usize>,
    pub max_connections: Option<usize>,
    pub read_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let endpoints = Endpoints {
            ws_host: cli.ws_host.unwrap_or(toml_config.websocket.host),
            ws_port: cli.ws_port.unwrap_or(toml_config.websocket.port),
            ws_path: cli.ws_path.unwrap_or(toml_config.websocket.path),
            http_host: cli.http_host.unwrap_or(toml_config.http.host),
            http_port: cli.http_port.unwrap_or(toml_config.http.port),
        };

        Config {
            endpoints: Arc::new(endpoints),
            backlog: cli.backlog.unwrap_or(toml_config.websocket.backlog),
            workers: cli.workers.or(toml_config.server.workers),
            // Zero disables a limit rather than blocking every connection.
            max_connections: cli
                .max_connections
                .or(toml_config.limits.max_connections)
                .filter(|&n| n > 0),
            read_timeout: cli
                .read_timeout_secs
                .or(toml_config.limits.read_timeout_secs)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.endpoints.ws_host, self.endpoints.ws_port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliArgs {
        CliArgs {
            log_level: "info".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.websocket.host, "localhost");
        assert_eq!(config.websocket.port, 9001);
        assert_eq!(config.websocket.path, "/");
        assert_eq!(config.websocket.backlog, 5);
        assert_eq!(config.http.port, 9000);
        assert!(config.limits.max_connections.is_none());
        assert!(config.limits.read_timeout_secs.is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [websocket]
            host = "0.0.0.0"
            port = 8081
            path = "/mpd"

            [http]
            host = "example.org"
            port = 8080

            [limits]
            max_connections = 64
            read_timeout_secs = 30

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.websocket.host, "0.0.0.0");
        assert_eq!(config.websocket.port, 8081);
        assert_eq!(config.websocket.path, "/mpd");
        assert_eq!(config.websocket.backlog, 5);
        assert_eq!(config.http.host, "example.org");
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.limits.max_connections, Some(64));
        assert_eq!(config.limits.read_timeout_secs, Some(30));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [websocket]
            port = 8081
            path = "/mpd"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let args = CliArgs {
            ws_port: Some(7000),
            http_host: Some("10.0.0.1".to_string()),
            read_timeout_secs: Some(5),
            ..cli()
        };

        let config = Config::merge(args, toml_config);
        assert_eq!(config.endpoints.ws_port, 7000);
        assert_eq!(config.endpoints.ws_path, "/mpd");
        assert_eq!(config.endpoints.http_host, "10.0.0.1");
        assert_eq!(config.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.listen_addr(), "localhost:7000");
    }

    #[test]
    fn test_zero_limits_are_disabled() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [limits]
            max_connections = 0
            read_timeout_secs = 0
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(), toml_config);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.read_timeout, None);

        let args = CliArgs {
            max_connections: Some(0),
            read_timeout_secs: Some(0),
            ..cli()
        };
        let config = Config::merge(args, TomlConfig::default());
        assert_eq!(config.max_connections, None);
        assert_eq!(config.read_timeout, None);
    }
}
