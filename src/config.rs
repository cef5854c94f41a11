//! Configuration loading and management.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no servers configured")]
    NoServers,
}

/// Bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Who we are on the network.
    pub identity: IdentityConfig,
    /// Servers to try, in order.
    pub servers: Vec<ServerEntry>,
    /// Channels to join once registration completes.
    #[serde(default)]
    pub autojoin: Vec<AutojoinEntry>,
    /// Command dispatch settings.
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Reply pacing and pagination settings.
    #[serde(default)]
    pub spool: SpoolConfig,
}

/// Identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Primary nickname.
    pub nick: String,
    /// Fallback nickname when the primary is taken.
    pub altnick: Option<String>,
    /// Ident (username) sent at registration.
    pub ident: String,
    /// Real name sent at registration.
    pub realname: String,
    /// User modes requested after welcome (e.g. "+ix").
    pub modes: Option<String>,
    /// Connection password (PASS), if the server requires one.
    pub serverpw: Option<String>,
}

/// One server to connect to.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    /// Hostname or address.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    #[serde(default)]
    pub tls: bool,
    /// Whether to verify the server certificate. Disabling verification is
    /// not supported; `false` is logged and ignored.
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

/// An autojoin channel, with or without a key.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AutojoinEntry {
    /// Keyless channel, written as a bare string.
    Plain(String),
    /// Channel requiring a key (+k).
    Keyed {
        /// Channel name.
        channel: String,
        /// Channel key.
        key: String,
    },
}

impl AutojoinEntry {
    /// The channel name.
    pub fn channel(&self) -> &str {
        match self {
            AutojoinEntry::Plain(c) => c,
            AutojoinEntry::Keyed { channel, .. } => channel,
        }
    }

    /// The key, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            AutojoinEntry::Plain(_) => None,
            AutojoinEntry::Keyed { key, .. } => Some(key),
        }
    }
}

/// Command dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    /// Address-to-bot sigil. Doubling it enables nested expansion.
    #[serde(default = "default_prefix")]
    pub prefix: char,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        CommandsConfig {
            prefix: default_prefix(),
        }
    }
}

/// Reply pacing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    /// Wire line budget in bytes, framing included.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks delivered immediately before pagination kicks in.
    #[serde(default = "default_instant_threshold")]
    pub instant_threshold: usize,
    /// Total chunks tolerated before escalating to a paste.
    #[serde(default = "default_more_threshold")]
    pub more_threshold: usize,
    /// Seconds before withheld chunks expire.
    #[serde(default = "default_more_ttl")]
    pub more_ttl_secs: u64,
    /// Paste service API endpoint.
    #[serde(default = "default_paste_url")]
    pub paste_url: String,
    /// Minimum seconds between paste uploads.
    #[serde(default = "default_paste_grace")]
    pub paste_grace_secs: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        SpoolConfig {
            chunk_size: default_chunk_size(),
            instant_threshold: default_instant_threshold(),
            more_threshold: default_more_threshold(),
            more_ttl_secs: default_more_ttl(),
            paste_url: default_paste_url(),
            paste_grace_secs: default_paste_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> char {
    ')'
}

fn default_chunk_size() -> usize {
    512
}

fn default_instant_threshold() -> usize {
    7
}

fn default_more_threshold() -> usize {
    7
}

fn default_more_ttl() -> u64 {
    3600
}

fn default_paste_url() -> String {
    "https://dpaste.org/api/".to_string()
}

fn default_paste_grace() -> u64 {
    4
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        if config.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        Ok(config)
    }
}
