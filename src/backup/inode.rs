//! Tagged inode variants (§3 `Inode`).

use serde::{Deserialize, Serialize};

use super::hash::Hash;

/// Identifies an inode within a [`super::filesystem::FileSystem`]'s
/// `InodeTable`. Edges are represented by id rather than by owning
/// reference, per the §9 design note on cyclic inode graphs.
pub type InodeId = u64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inode {
    Regular {
        hash: Hash,
        #[serde(default)]
        size: u64,
    },
    Symlink {
        #[serde(default)]
        target: String,
    },
    Special,
    Directory {
        #[serde(default)]
        entries: Vec<DirectoryEntry>,
    },
}

impl Inode {
    /// Regular inodes with `size > 0` are the only ones that induce an
    /// object reference (§3 invariant).
    pub fn referenced_hash(&self) -> Option<&Hash> {
        match self {
            Inode::Regular { hash, size } if *size > 0 => Some(hash),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode_id: InodeId,
}
