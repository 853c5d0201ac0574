use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::consensus::types::PlayerId;
use crate::crypto::CryptoConfig;

/// Protocol settings, usually read from a TOML file.
///
/// ```toml
/// local_player_id = "node-1"
/// timeout_factor = 3
///
/// [crypto]
/// digest_algorithm = "SHA-512"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Random id when unset.
    pub local_player_id: Option<PlayerId>,
    pub crypto: CryptoConfig,
    /// Iteration timer length in multiples of the network delta.
    pub timeout_factor: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { local_player_id: None, crypto: CryptoConfig::default(), timeout_factor: 3 }
    }
}

impl ProtocolConfig {
    /// Load config from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: ProtocolConfig = toml::from_str(data)?;
        anyhow::ensure!(cfg.timeout_factor > 0, "timeout_factor must be at least 1");
        Ok(cfg)
    }

    /// The configured id, or a fresh random 32-hex-char id.
    pub fn player_id(&self) -> PlayerId {
        match &self.local_player_id {
            Some(id) => id.clone(),
            None => hex::encode(rand::random::<[u8; 16]>()),
        }
    }
}
