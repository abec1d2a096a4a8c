//! Agent configuration.
//!
//! Loaded once from TOML and shared read-only as `Arc<Config>`. Every field
//! has a default, so an empty file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity presented to every server.
    pub irc: IrcConfig,
    /// Wait durations for retries and anti-flood.
    pub timeouts: Timeouts,
    /// Where downloads are assembled and delivered.
    pub storage: StorageConfig,
    /// Servers to seed the tree with.
    pub servers: Vec<ServerConfig>,
    /// Case-insensitive substrings; matching announced packets are enabled.
    pub wanted: Vec<String>,
}

/// Registration details.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcConfig {
    pub nick: String,
    pub username: String,
    pub realname: String,
    /// Sent as `PASS` before registration when set.
    pub password: Option<String>,
    /// CTCP VERSION reply.
    pub version: String,
}

impl Default for IrcConfig {
    fn default() -> Self {
        IrcConfig {
            nick: "slirc-xdcc".to_string(),
            username: "xdcc".to_string(),
            realname: "slirc-xdcc".to_string(),
            password: None,
            version: concat!("slirc-xdcc ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Wait durations, in seconds unless the name says otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Re-check after a command the bot may silently ignore.
    pub command_wait: u64,
    /// Re-check after a packet request.
    pub bot_wait: u64,
    pub channel_wait_short: u64,
    pub channel_wait_medium: u64,
    pub channel_wait_long: u64,
    pub reconnect_wait: u64,
    pub reconnect_wait_long: u64,
    /// Anti-flood window per normalized file name.
    pub same_packet_request: u64,
    /// Bound on every TCP connect.
    pub connect: u64,
    /// Deadline polling interval in milliseconds.
    pub tick_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            command_wait: 15,
            bot_wait: 240,
            channel_wait_short: 60,
            channel_wait_medium: 300,
            channel_wait_long: 900,
            reconnect_wait: 60,
            reconnect_wait_long: 300,
            same_packet_request: 10,
            connect: 30,
            tick_ms: 500,
        }
    }
}

impl Timeouts {
    pub fn command_wait(&self) -> Duration {
        Duration::from_secs(self.command_wait)
    }

    pub fn bot_wait(&self) -> Duration {
        Duration::from_secs(self.bot_wait)
    }

    pub fn same_packet_request(&self) -> Duration {
        Duration::from_secs(self.same_packet_request)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Temp and ready directories for the disk allocator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub temp_dir: PathBuf,
    pub ready_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            temp_dir: PathBuf::from("temp"),
            ready_dir: PathBuf::from("ready"),
        }
    }
}

/// One `[[servers]]` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enabled: bool,
    /// Channels joined on connect.
    pub channels: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: String::new(),
            port: 6667,
            enabled: true,
            channels: Vec::new(),
        }
    }
}

impl Config {
    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Whether an announced packet name matches a `wanted` pattern.
    pub fn is_wanted(&self, packet_name: &str) -> bool {
        let name = packet_name.to_lowercase();
        self.wanted
            .iter()
            .any(|w| !w.is_empty() && name.contains(&w.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeouts.command_wait(), Duration::from_secs(15));
        assert_eq!(config.timeouts.tick(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r##"
            wanted = ["Ubuntu"]

            [irc]
            nick = "leech"

            [timeouts]
            bot_wait = 30

            [[servers]]
            host = "irc.example.net"
            channels = ["#xdcc"]
            "##,
        )
        .unwrap();
        assert_eq!(config.irc.nick, "leech");
        assert_eq!(config.irc.username, "xdcc");
        assert_eq!(config.timeouts.bot_wait, 30);
        assert_eq!(config.timeouts.command_wait, 15);
        assert_eq!(config.servers[0].port, 6667);
        assert!(config.servers[0].enabled);
        assert!(config.is_wanted("ubuntu-24.04.iso"));
        assert!(!config.is_wanted("debian.iso"));
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Config::load("/nonexistent/slirc-xdcc.toml"),
            Err(ConfigError::Read { .. })
        ));
        assert!(matches!(
            Config::from_toml("timeouts = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
