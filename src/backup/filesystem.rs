//! A tree of inodes (§3 `FileSystem`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::hash::Hash;
use super::inode::{Inode, InodeId};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileSystem {
    pub inode_table: HashMap<InodeId, Inode>,
    pub root_inode_id: InodeId,
}

impl FileSystem {
    pub fn new(root_inode_id: InodeId) -> Self {
        FileSystem {
            inode_table: HashMap::new(),
            root_inode_id,
        }
    }

    /// Derived count of regular inodes, as named in §3.
    pub fn num_regular_inodes(&self) -> usize {
        self.inode_table
            .values()
            .filter(|inode| matches!(inode, Inode::Regular { .. }))
            .count()
    }

    /// Every hash referenced by a Regular inode with `size > 0`, in
    /// `InodeTable` iteration order. This is the input to object-closure
    /// checks (§4.4 step 3) and bulk object fetch (§4.6.3).
    pub fn referenced_hashes(&self) -> Vec<Hash> {
        self.inode_table
            .values()
            .filter_map(|inode| inode.referenced_hash())
            .cloned()
            .collect()
    }

    /// Parent/child linkage is recorded by [`InodeId`] rather than by
    /// owning reference (§9 design note), so there is nothing to
    /// reconstruct after deserialization: the table already denotes every
    /// edge. Retained as a named hook so callers can keep calling it
    /// exactly where the teacher/original would, without special-casing
    /// the no-op (see DESIGN.md).
    pub fn rebuild_inode_pointers(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::inode::DirectoryEntry;

    fn regular(hash_byte: u8, size: u64) -> Inode {
        Inode::Regular {
            hash: Hash([hash_byte; 64]),
            size,
        }
    }

    #[test]
    fn counts_regular_inodes_and_ignores_zero_size() {
        let mut fs = FileSystem::new(0);
        fs.inode_table.insert(
            0,
            Inode::Directory {
                entries: vec![DirectoryEntry {
                    name: "a".into(),
                    inode_id: 1,
                }],
            },
        );
        fs.inode_table.insert(1, regular(1, 100));
        fs.inode_table.insert(2, regular(2, 0));

        assert_eq!(fs.num_regular_inodes(), 2);
        assert_eq!(fs.referenced_hashes(), vec![Hash([1u8; 64])]);
    }
}
