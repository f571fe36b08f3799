//! Namespace node carrying access metadata (§3 `Directory`).
//!
//! No single teacher file owns this exact shape; it is modeled after the
//! directory-tree-backed persistence idiom in `config/datastore.rs`
//! (a namespace is just a path prefix with metadata, upserted wholesale).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Directory {
    pub name: String,
    #[serde(default)]
    pub owner_group: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    0o755
}
