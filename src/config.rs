//! Follower configuration (spec §6 "Configuration").
//!
//! Grounded in `config/datastore.rs`'s pattern: a `lazy_static!`-backed
//! parse of a single on-disk file, saved back atomically through
//! [`crate::tools::file_set_contents`]. The teacher's datastore config
//! uses its own ini-like `SectionConfig` format; this crate uses
//! `serde_json` instead, consistent with the rest of its wire/storage
//! choices (see `DESIGN.md`), since `SectionConfig` is not part of the
//! retrieved source set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

const REPLICATION_CONFIG_FILENAME: &str = "/etc/image-replicator/replication.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// `host:port` of the master image server. Empty disables
    /// replication entirely (§6).
    #[serde(default)]
    pub replication_master: String,
    #[serde(default)]
    pub archive_mode: bool,
    #[serde(default)]
    pub archive_expiring_images: bool,
    pub object_store_root: PathBuf,
    pub image_database_root: PathBuf,
    /// `host:port` this follower's own RPC surface binds to, so a master
    /// (or another follower chained behind this one) can dial in.
    #[serde(default = "default_listen")]
    pub listen_address: String,
}

fn default_listen() -> String {
    "0.0.0.0:8001".to_string()
}

impl ReplicationConfig {
    pub fn replication_enabled(&self) -> bool {
        !self.replication_master.is_empty()
    }
}

lazy_static! {
    static ref CONFIG_PATH: PathBuf = PathBuf::from(
        std::env::var("IMAGE_REPLICATOR_CONFIG")
            .unwrap_or_else(|_| REPLICATION_CONFIG_FILENAME.to_string())
    );
}

pub fn config() -> Result<ReplicationConfig, Error> {
    load(&CONFIG_PATH)
}

pub fn load(path: &Path) -> Result<ReplicationConfig, Error> {
    let data = std::fs::read(path)
        .with_context(|| format!("unable to read config {:?}", path))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing config {:?}", path))
}

pub fn save_config(config: &ReplicationConfig) -> Result<(), Error> {
    save(&CONFIG_PATH, config)
}

pub fn save(path: &Path, config: &ReplicationConfig) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(config)?;
    crate::tools::file_set_contents(path, &data, Some(0o640))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.json");

        let config = ReplicationConfig {
            replication_master: "master.example:8001".into(),
            archive_mode: true,
            archive_expiring_images: false,
            object_store_root: dir.path().join("objects"),
            image_database_root: dir.path().join("images"),
            listen_address: "127.0.0.1:9001".into(),
        };

        save(&path, &config).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.replication_master, config.replication_master);
        assert!(loaded.archive_mode);
        assert!(loaded.replication_enabled());
    }

    #[test]
    fn empty_master_disables_replication() {
        let config = ReplicationConfig {
            replication_master: String::new(),
            archive_mode: false,
            archive_expiring_images: false,
            object_store_root: PathBuf::from("/tmp/objects"),
            image_database_root: PathBuf::from("/tmp/images"),
            listen_address: default_listen(),
        };
        assert!(!config.replication_enabled());
    }
}
