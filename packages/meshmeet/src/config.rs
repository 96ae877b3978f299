use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use mesh_protocol::NodeConfig;
use rendezvous::BeaconConfig;
use serde::{Deserialize, Serialize};

// =============================================================================
// Unified config (figment-deserialized from defaults / meshmeet.toml / env vars)
// =============================================================================
//
//   meshmeet.toml:   [node]
//                    handshake_timeout_secs = 10
//
//   env var:         MESHMEET_NODE__HANDSHAKE_TIMEOUT_SECS=10   (double underscore = nesting)

pub const CONFIG_FILE: &str = "meshmeet.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub node: NodeFileConfig,
    #[serde(default)]
    pub rendezvous: RendezvousFileConfig,
}

/// Protocol engine tunables (lives under `[node]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeFileConfig {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// How long a duplicate Conversation that lost the tie-break is still read.
    #[serde(default = "default_duplicate_linger_ms")]
    pub duplicate_linger_ms: u64,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for NodeFileConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            duplicate_linger_ms: default_duplicate_linger_ms(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// Beacon location, for clients and for `meshmeet beacon` (lives under
/// `[rendezvous]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RendezvousFileConfig {
    /// Beacon clients connect to when issuing invitations.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

impl Default for RendezvousFileConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
        }
    }
}

fn default_handshake_timeout_secs() -> u64 {
    30
}
fn default_duplicate_linger_ms() -> u64 {
    500
}
fn default_command_buffer() -> usize {
    256
}
fn default_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}
fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    8080
}

impl NodeFileConfig {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            duplicate_linger: Duration::from_millis(self.duplicate_linger_ms),
            command_buffer: self.command_buffer,
        }
    }
}

impl RendezvousFileConfig {
    pub fn beacon_config(&self) -> BeaconConfig {
        BeaconConfig {
            host: self.bind_host.clone(),
            port: self.bind_port,
        }
    }
}

/// Build a figment that layers: defaults → meshmeet.toml → MESHMEET_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE)))
        .merge(Env::prefixed("MESHMEET_").split("__"))
}

/// Resolved configuration plus where it was read from.
#[derive(Clone, Debug)]
pub struct MeshmeetConfig {
    pub config_dir: PathBuf,
    pub file: FileConfig,
}

impl MeshmeetConfig {
    /// The directory does not have to exist; a missing `meshmeet.toml`
    /// just means defaults.
    pub fn load(custom_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".meshmeet"),
        };
        let file: FileConfig = load_config(&config_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {}", config_dir.display()))?;
        Ok(Self { config_dir, file })
    }

    pub fn node(&self) -> NodeConfig {
        self.file.node.node_config()
    }

    pub fn beacon(&self) -> BeaconConfig {
        self.file.rendezvous.beacon_config()
    }

    pub fn rendezvous_url(&self) -> &str {
        &self.file.rendezvous.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.node.handshake_timeout_secs, 30);
        assert_eq!(fc.node.duplicate_linger_ms, 500);
        assert_eq!(fc.node.command_buffer, 256);
        assert_eq!(fc.rendezvous.url, "ws://127.0.0.1:8080");
        assert_eq!(fc.rendezvous.bind_port, 8080);
    }

    #[test]
    fn test_node_config_from_file() {
        let fc = NodeFileConfig {
            handshake_timeout_secs: 5,
            duplicate_linger_ms: 250,
            command_buffer: 16,
        };
        let nc = fc.node_config();
        assert_eq!(nc.handshake_timeout, Duration::from_secs(5));
        assert_eq!(nc.duplicate_linger, Duration::from_millis(250));
        assert_eq!(nc.command_buffer, 16);
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MeshmeetConfig::load(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.node().handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.beacon().host, "127.0.0.1");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "[node]\nhandshake_timeout_secs = 3\n\n[rendezvous]\nurl = \"ws://beacon.lan:9000\"\nbind_port = 9000\n",
        )
        .unwrap();

        let config = MeshmeetConfig::load(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.node().handshake_timeout, Duration::from_secs(3));
        // untouched keys keep their defaults
        assert_eq!(config.node().command_buffer, 256);
        assert_eq!(config.rendezvous_url(), "ws://beacon.lan:9000");
        assert_eq!(config.beacon().port, 9000);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "[node]\nhandshake_timeout_secs = \"soon\"\n",
        )
        .unwrap();
        assert!(MeshmeetConfig::load(Some(tmp.path().to_path_buf())).is_err());
    }
}
