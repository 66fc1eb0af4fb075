use std::{fs, path::Path, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;
use voxsync_core::OwnerId;
use voxsync_world::{GameMode, StoneReskin, Viewer};

/// Tunables of the chunk synchronization client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a suspect chunk or an unanswered super-chunk request waits
    /// before its request is sent again.
    pub checksum_timeout_ms: u64,
    /// Suspect chunks whose header checksum is not the CRC32 of their payload.
    /// Off unless the server is known to checksum payloads that way.
    pub verify_payload_checksum: bool,
    /// Re-skin about one stone voxel in this many; 0 disables.
    pub stone_variant_one_in: u32,
    /// Resident chunk limit before least recently used chunks are evicted.
    pub chunk_capacity: usize,
    /// Cached super-chunk summaries before least recently used ones are dropped.
    pub super_chunk_capacity: usize,
    pub player_id: OwnerId,
    /// Admin and test accounts.
    pub privileged: bool,
    pub construction_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checksum_timeout_ms: 5000,
            verify_payload_checksum: false,
            stone_variant_one_in: 10,
            chunk_capacity: 4096,
            super_chunk_capacity: 256,
            player_id: 0,
            privileged: false,
            construction_mode: false,
        }
    }
}

impl SyncConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<SyncConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    SyncConfig::default()
                }
            },
            Err(err) => {
                warn!("Failed to read {}: {err}. Using defaults", path.display());
                SyncConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn checksum_timeout(&self) -> Duration {
        Duration::from_millis(self.checksum_timeout_ms)
    }

    pub fn reskin(&self) -> StoneReskin {
        StoneReskin::from_ratio(self.stone_variant_one_in)
    }

    pub fn viewer(&self) -> Viewer {
        Viewer {
            player: self.player_id,
            privileged: self.privileged,
            mode: if self.construction_mode {
                GameMode::Construction
            } else {
                GameMode::Normal
            },
        }
    }
}
