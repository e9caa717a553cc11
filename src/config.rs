//! Node configuration: a TOML file with defaults, loaded at startup and validated before
//! any subsystem is constructed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory the RocksDB store lives under.
    pub data_dir: PathBuf,

    /// Port the P2P server listens on.
    pub p2p_port: u16,

    /// Peers to dial on startup, as `host:port` strings.
    #[serde(default)]
    pub seed_peers: Vec<String>,

    /// `env_logger` filter level: error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Address to credit block rewards to. Mining runs only when this is set.
    #[serde(default)]
    pub miner_address: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("./data"),
            p2p_port: 9000,
            seed_peers: Vec::new(),
            log_level: default_log_level(),
            miner_address: None,
        }
    }
}

impl NodeConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let content = fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        let config: NodeConfig =
            toml::from_str(&content).map_err(|e| NodeError::Config(format!("failed to parse config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), NodeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| NodeError::Config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| NodeError::Config(format!("failed to create config directory: {e}")))?;
        }
        fs::write(path, content).map_err(|e| NodeError::Config(format!("failed to write config file: {e}")))?;
        Ok(())
    }

    /// Reads the config file path from the first CLI argument (falling back to
    /// `pali-node.toml`) and loads it if present, otherwise writes and returns the
    /// default configuration at that path. This is the only argument the binary reads;
    /// no other flag parsing is implemented here.
    pub fn load_default() -> Result<Self, NodeError> {
        let path = std::env::args().nth(1).unwrap_or_else(|| "pali-node.toml".to_string());
        if Path::new(&path).exists() {
            return Self::load_from_file(&path);
        }

        let config = Self::default();
        if let Err(e) = config.save_to_file(&path) {
            log::warn!("failed to save default config: {e}");
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.p2p_port == 0 {
            return Err(NodeError::Config("p2p_port cannot be zero".to_string()));
        }
        match self.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(NodeError::Config(format!("invalid log level: {other}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = NodeConfig::default();
        config.p2p_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let mut config = NodeConfig::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pali-node.toml");

        let mut config = NodeConfig::default();
        config.p2p_port = 7070;
        config.seed_peers.push("127.0.0.1:9001".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.p2p_port, 7070);
        assert_eq!(loaded.seed_peers, vec!["127.0.0.1:9001".to_string()]);
    }

    #[test]
    fn miner_address_defaults_to_none_and_round_trips_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pali-node.toml");

        let mut config = NodeConfig::default();
        assert_eq!(config.miner_address, None);

        config.miner_address = Some("miner-address".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.miner_address, Some("miner-address".to_string()));
    }
}
