//! Configuration module for sortbench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::server::ServerKind;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_NAIVE_BLOCKING_PORT: u16 = 12345;
pub const DEFAULT_BLOCKING_PORT: u16 = 12346;
pub const DEFAULT_ASYNC_PORT: u16 = 12347;
pub const DEFAULT_NON_BLOCKING_PORT: u16 = 12348;
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sortbench")]
#[command(version = "0.1.0")]
#[command(about = "Compare TCP server concurrency architectures under a sort workload", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run all four server architectures side by side
    Serve(ServeArgs),
    /// Drive one server with concurrent clients and export the results
    Bench(BenchArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host to bind every server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the naive thread-per-connection server
    #[arg(long)]
    pub naive_port: Option<u16>,

    /// Port for the thread-per-connection server with a worker pool
    #[arg(long)]
    pub pooled_port: Option<u16>,

    /// Port for the async completion server
    #[arg(long)]
    pub async_port: Option<u16>,

    /// Port for the readiness-multiplexed server
    #[arg(long)]
    pub readiness_port: Option<u16>,

    /// Number of worker pool threads
    #[arg(short = 'w', long)]
    pub threads: Option<usize>,

    /// Worker pool queue capacity
    #[arg(long)]
    pub queue_capacity: Option<usize>,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Target the default port of this architecture (naive-blocking, blocking,
    /// non-blocking, async) when no port is given
    #[arg(short = 's', long)]
    pub server: Option<ServerKind>,

    /// Requests per client per scenario
    #[arg(short = 'n', long)]
    pub requests: Option<usize>,

    /// Array sizes, one per scenario (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub elements: Vec<usize>,

    /// Concurrent client counts, one per scenario (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub clients: Vec<usize>,

    /// Delays between a client's requests in ms, one per scenario (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub intervals: Vec<u64>,

    /// CSV output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub bench: BenchSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_naive_port")]
    pub naive_port: u16,
    #[serde(default = "default_pooled_port")]
    pub pooled_port: u16,
    #[serde(default = "default_async_port")]
    pub async_port: u16,
    #[serde(default = "default_readiness_port")]
    pub readiness_port: u16,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            naive_port: DEFAULT_NAIVE_BLOCKING_PORT,
            pooled_port: DEFAULT_BLOCKING_PORT,
            async_port: DEFAULT_ASYNC_PORT,
            readiness_port: DEFAULT_NON_BLOCKING_PORT,
            threads: DEFAULT_THREADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Benchmark-related configuration
#[derive(Debug, Deserialize)]
pub struct BenchSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_naive_port")]
    pub port: u16,
    #[serde(default = "default_requests")]
    pub requests: usize,
    #[serde(default)]
    pub elements: Vec<usize>,
    #[serde(default)]
    pub clients: Vec<usize>,
    #[serde(default)]
    pub intervals: Vec<u64>,
    pub output: Option<PathBuf>,
}

impl Default for BenchSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_NAIVE_BLOCKING_PORT,
            requests: default_requests(),
            elements: Vec::new(),
            clients: Vec::new(),
            intervals: Vec::new(),
            output: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_naive_port() -> u16 {
    DEFAULT_NAIVE_BLOCKING_PORT
}

fn default_pooled_port() -> u16 {
    DEFAULT_BLOCKING_PORT
}

fn default_async_port() -> u16 {
    DEFAULT_ASYNC_PORT
}

fn default_readiness_port() -> u16 {
    DEFAULT_NON_BLOCKING_PORT
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_requests() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Everything a server constructor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker pool size. Ignored by the naive server.
    pub threads: usize,
    /// Worker pool queue bound.
    pub queue_capacity: usize,
}

impl ServerConfig {
    /// Config for `host:port` with default pool sizing.
    pub fn new(host: impl Into<String>, port: u16, threads: usize) -> Self {
        Self {
            host: host.into(),
            port,
            threads,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Resolve the bind address. Host names such as `localhost` are allowed.
    pub fn addr(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for host '{}'", self.host),
                )
            })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_NAIVE_BLOCKING_PORT, DEFAULT_THREADS)
    }
}

/// Resolved `serve` configuration
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub naive_port: u16,
    pub pooled_port: u16,
    pub async_port: u16,
    pub readiness_port: u16,
    pub threads: usize,
    pub queue_capacity: usize,
}

impl ServeConfig {
    /// Server config for one architecture.
    pub fn server(&self, kind: ServerKind) -> ServerConfig {
        let port = match kind {
            ServerKind::NaiveBlocking => self.naive_port,
            ServerKind::PooledBlocking => self.pooled_port,
            ServerKind::ReadinessMultiplexed => self.readiness_port,
            ServerKind::AsyncCompletion => self.async_port,
        };
        ServerConfig {
            host: self.host.clone(),
            port,
            threads: self.threads,
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Resolved `bench` configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub host: String,
    pub port: u16,
    pub requests: usize,
    pub elements: Vec<usize>,
    pub clients: Vec<usize>,
    pub intervals: Vec<u64>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Serve(ServeConfig),
    Bench(BenchConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            toml_config.logging.level
        };

        let mode = match cli.command {
            Command::Serve(args) => {
                let file = toml_config.server;
                Mode::Serve(ServeConfig {
                    host: args.host.unwrap_or(file.host),
                    naive_port: args.naive_port.unwrap_or(file.naive_port),
                    pooled_port: args.pooled_port.unwrap_or(file.pooled_port),
                    async_port: args.async_port.unwrap_or(file.async_port),
                    readiness_port: args.readiness_port.unwrap_or(file.readiness_port),
                    threads: args.threads.unwrap_or(file.threads),
                    queue_capacity: args.queue_capacity.unwrap_or(file.queue_capacity),
                })
            }
            Command::Bench(args) => {
                let file = toml_config.bench;
                Mode::Bench(BenchConfig {
                    host: args.host.unwrap_or(file.host),
                    port: args
                        .port
                        .or(args.server.map(default_port))
                        .unwrap_or(file.port),
                    requests: args.requests.unwrap_or(file.requests),
                    elements: non_empty_or(args.elements, file.elements),
                    clients: non_empty_or(args.clients, file.clients),
                    intervals: non_empty_or(args.intervals, file.intervals),
                    output: args.output.or(file.output),
                })
            }
        };

        Ok(Config { log_level, mode })
    }
}

/// Port `serve` binds `kind` to when nothing overrides it.
pub fn default_port(kind: ServerKind) -> u16 {
    match kind {
        ServerKind::NaiveBlocking => DEFAULT_NAIVE_BLOCKING_PORT,
        ServerKind::PooledBlocking => DEFAULT_BLOCKING_PORT,
        ServerKind::ReadinessMultiplexed => DEFAULT_NON_BLOCKING_PORT,
        ServerKind::AsyncCompletion => DEFAULT_ASYNC_PORT,
    }
}

fn non_empty_or<T>(cli: Vec<T>, file: Vec<T>) -> Vec<T> {
    if cli.is_empty() {
        file
    } else {
        cli
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}'", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}'", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.naive_port, 12345);
        assert_eq!(config.server.pooled_port, 12346);
        assert_eq!(config.server.async_port, 12347);
        assert_eq!(config.server.readiness_port, 12348);
        assert_eq!(config.server.threads, 4);
        assert_eq!(config.bench.requests, 20);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            naive_port = 20000
            threads = 8

            [bench]
            port = 20001
            requests = 10
            elements = [100, 200]
            clients = [5, 5]
            intervals = [0, 10]

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.naive_port, 20000);
        assert_eq!(config.server.pooled_port, 12346);
        assert_eq!(config.server.threads, 8);
        assert_eq!(config.bench.port, 20001);
        assert_eq!(config.bench.elements, vec![100, 200]);
        assert_eq!(config.bench.intervals, vec![0, 10]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = CliArgs::parse_from([
            "sortbench",
            "bench",
            "--port",
            "9999",
            "--elements",
            "10,20,30",
            "--clients",
            "1,2,3",
        ]);

        let config = Config::from_args(cli).unwrap();
        match config.mode {
            Mode::Bench(bench) => {
                assert_eq!(bench.host, "localhost");
                assert_eq!(bench.port, 9999);
                assert_eq!(bench.requests, 20);
                assert_eq!(bench.elements, vec![10, 20, 30]);
                assert_eq!(bench.clients, vec![1, 2, 3]);
                assert!(bench.intervals.is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bench_server_kind_selects_default_port() {
        let cli = CliArgs::parse_from(["sortbench", "bench", "--server", "non-blocking"]);
        match Config::from_args(cli).unwrap().mode {
            Mode::Bench(bench) => assert_eq!(bench.port, 12348),
            other => panic!("unexpected: {:?}", other),
        }

        let cli = CliArgs::parse_from(["sortbench", "bench", "-s", "async", "-p", "7000"]);
        match Config::from_args(cli).unwrap().mode {
            Mode::Bench(bench) => assert_eq!(bench.port, 7000),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_serve_ports_per_kind() {
        let cli = CliArgs::parse_from(["sortbench", "serve", "--async-port", "4000", "-w", "2"]);
        let config = Config::from_args(cli).unwrap();
        match config.mode {
            Mode::Serve(serve) => {
                assert_eq!(serve.server(ServerKind::AsyncCompletion).port, 4000);
                assert_eq!(serve.server(ServerKind::NaiveBlocking).port, 12345);
                assert_eq!(serve.server(ServerKind::PooledBlocking).threads, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_config_error_reports_cause_once() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ConfigError::FileRead(PathBuf::from("/etc/sortbench.toml"), cause);

        let message = err.to_string();
        assert!(message.contains("/etc/sortbench.toml"));
        assert!(!message.contains("no such file"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "no such file");
    }

    #[test]
    fn test_missing_config_file_is_read_error() {
        let cli = CliArgs::parse_from(["sortbench", "-c", "/nonexistent/sortbench.toml", "serve"]);
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(..))
        ));
    }

    #[test]
    fn test_server_config_resolves_host_names() {
        let config = ServerConfig::new("localhost", 0, 1);
        assert!(config.addr().unwrap().ip().is_loopback());
    }
}
