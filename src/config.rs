//! Server Configuration
//!
//! Settings come from two layers, later ones winning:
//!
//! 1. An optional redis.conf-style file (`redis.conf` in the working directory
//!    is picked up automatically if present)
//! 2. Command-line flags
//!
//! ## File Format
//!
//! ```text
//! # comments start with '#'
//! bind 0.0.0.0
//! port 6399
//! databases 16
//! appendonly yes
//! appendfilename appendonly.aof
//! self 127.0.0.1:6399
//! peers 127.0.0.1:7379,127.0.0.1:8379
//! ```

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read when none is given explicitly and it exists.
pub const DEFAULT_CONFIG_FILE: &str = "redis.conf";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("cannot read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A directive this server does not know
    #[error("line {line}: unknown directive '{key}'")]
    UnknownKey { line: usize, key: String },

    /// A directive without a value
    #[error("line {line}: directive '{key}' needs a value")]
    MissingValue { line: usize, key: String },

    /// A directive whose value does not parse
    #[error("line {line}: invalid value '{value}' for '{key}'")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind: String,
    pub port: u16,
    /// Number of numbered databases
    pub databases: usize,
    /// Whether write commands are persisted to the AOF
    pub appendonly: bool,
    pub appendfilename: PathBuf,
    /// This node's address as peers see it; empty outside cluster mode
    pub self_addr: String,
    /// Addresses of the other cluster nodes
    pub peers: Vec<String>,
    /// Maximum simultaneous connections to each peer
    pub max_peer_connections: usize,
    pub peer_connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            databases: 16,
            appendonly: false,
            appendfilename: PathBuf::from("appendonly.aof"),
            self_addr: String::new(),
            peers: Vec::new(),
            max_peer_connections: 16,
            peer_connect_timeout: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    /// Reads a config file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::default();
        config.apply_str(&contents)?;
        Ok(config)
    }

    /// Builds the configuration from parsed command-line flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        cli.apply(&mut config);
        Ok(config)
    }

    /// Applies `name value` directives from a redis.conf-style string.
    pub fn apply_str(&mut self, contents: &str) -> Result<(), ConfigError> {
        for (i, raw) in contents.lines().enumerate() {
            let line = i + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (key, value) = match trimmed.split_once(char::is_whitespace) {
                Some((key, value)) => (key.to_ascii_lowercase(), value.trim()),
                None => {
                    return Err(ConfigError::MissingValue {
                        line,
                        key: trimmed.to_ascii_lowercase(),
                    })
                }
            };

            let invalid = || ConfigError::InvalidValue {
                line,
                key: key.clone(),
                value: value.to_string(),
            };

            match key.as_str() {
                "bind" => self.bind = value.to_string(),
                "port" => self.port = value.parse().map_err(|_| invalid())?,
                "databases" => {
                    self.databases = match value.parse() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(invalid()),
                    }
                }
                "appendonly" => self.appendonly = parse_yes_no(value).map_err(|_| invalid())?,
                "appendfilename" => self.appendfilename = PathBuf::from(value),
                "self" => self.self_addr = value.to_string(),
                "peers" => self.peers = split_peers(value),
                "max-peer-connections" => {
                    self.max_peer_connections = match value.parse() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(invalid()),
                    }
                }
                "peer-connect-timeout" => {
                    let millis: u64 = value.parse().map_err(|_| invalid())?;
                    self.peer_connect_timeout = Duration::from_millis(millis);
                }
                _ => {
                    return Err(ConfigError::UnknownKey {
                        line,
                        key: key.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// The `host:port` the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn aof_path(&self) -> &Path {
        &self.appendfilename
    }

    /// Cluster mode needs both an own address and at least one peer.
    pub fn is_cluster(&self) -> bool {
        !self.self_addr.is_empty() && !self.peers.is_empty()
    }
}

fn split_peers(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_yes_no(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" => Ok(true),
        "no" | "false" | "off" => Ok(false),
        _ => Err(format!("expected yes or no, got '{}'", value)),
    }
}

/// Command-line flags. Every flag overrides the matching config-file directive.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "A Redis-compatible key-value server with AOF persistence and consistent-hash clustering", long_about = None)]
pub struct Cli {
    /// Path to a redis.conf-style config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of databases.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub databases: Option<u32>,

    /// Enable or disable the append-only file (yes/no).
    #[arg(long, value_parser = parse_yes_no)]
    pub appendonly: Option<bool>,

    /// Path of the append-only file.
    #[arg(long)]
    pub appendfilename: Option<PathBuf>,

    /// This node's address in the cluster.
    #[arg(long = "self")]
    pub self_addr: Option<String>,

    /// Comma-separated addresses of the other cluster nodes.
    #[arg(long, value_delimiter = ',')]
    pub peers: Option<Vec<String>>,

    /// Maximum connections kept to each peer.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_peer_connections: Option<u32>,

    /// Peer connect timeout in milliseconds.
    #[arg(long)]
    pub peer_connect_timeout: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(databases) = self.databases {
            config.databases = databases as usize;
        }
        if let Some(appendonly) = self.appendonly {
            config.appendonly = appendonly;
        }
        if let Some(path) = &self.appendfilename {
            config.appendfilename = path.clone();
        }
        if let Some(self_addr) = &self.self_addr {
            config.self_addr = self_addr.clone();
        }
        if let Some(peers) = &self.peers {
            config.peers = peers.iter().filter(|p| !p.is_empty()).cloned().collect();
        }
        if let Some(max) = self.max_peer_connections {
            config.max_peer_connections = max as usize;
        }
        if let Some(millis) = self.peer_connect_timeout {
            config.peer_connect_timeout = Duration::from_millis(millis);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.databases, 16);
        assert!(!config.appendonly);
        assert!(!config.is_cluster());
    }

    #[test]
    fn test_parse_file_contents() {
        let mut config = ServerConfig::default();
        config
            .apply_str(
                "# sample\n\
                 bind 0.0.0.0\n\
                 port 6399\n\
                 \n\
                 databases 4\n\
                 appendonly yes\n\
                 appendfilename data.aof\n\
                 self 127.0.0.1:6399\n\
                 peers 127.0.0.1:7379, 127.0.0.1:8379\n\
                 peer-connect-timeout 500\n",
            )
            .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:6399");
        assert_eq!(config.databases, 4);
        assert!(config.appendonly);
        assert_eq!(config.aof_path(), Path::new("data.aof"));
        assert_eq!(config.peers, vec!["127.0.0.1:7379", "127.0.0.1:8379"]);
        assert_eq!(config.peer_connect_timeout, Duration::from_millis(500));
        assert!(config.is_cluster());
    }

    #[test]
    fn test_parse_errors() {
        let mut config = ServerConfig::default();
        assert!(matches!(
            config.apply_str("port abc"),
            Err(ConfigError::InvalidValue { line: 1, .. })
        ));
        assert!(matches!(
            config.apply_str("\nmaxmemory 1gb"),
            Err(ConfigError::UnknownKey { line: 2, .. })
        ));
        assert!(matches!(
            config.apply_str("bind"),
            Err(ConfigError::MissingValue { .. })
        ));
        assert!(matches!(
            config.apply_str("appendonly maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply_str("databases 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_self_without_peers_is_standalone() {
        let mut config = ServerConfig::default();
        config.apply_str("self 127.0.0.1:6379").unwrap();
        assert!(!config.is_cluster());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis.conf");
        std::fs::write(&path, "port 7000\nappendonly no\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 7000);

        assert!(matches!(
            ServerConfig::from_file(dir.path().join("missing.conf")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.conf");
        std::fs::write(&path, "port 7000\nappendonly yes\npeers a:1\n").unwrap();

        let cli = Cli::parse_from([
            "ringkv",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7001",
            "--appendonly",
            "no",
            "--self",
            "b:2",
            "--peers",
            "a:1,c:3",
        ]);
        let config = ServerConfig::load(&cli).unwrap();

        assert_eq!(config.port, 7001);
        assert!(!config.appendonly);
        assert_eq!(config.self_addr, "b:2");
        assert_eq!(config.peers, vec!["a:1", "c:3"]);
        assert!(config.is_cluster());
    }
}
