//! Object Store Adapter (C1, spec §4.1).
//!
//! Owns on-disk blob storage exclusively. Grounded in the hex-prefix
//! chunk layout (`chunk_path`) as seen from its call sites in the
//! teacher's `client/pull.rs` and `backup/read_chunk.rs`'s sync/async
//! reader split - the layout's defining file, `backup/datastore.rs`, was
//! not retrieved into this pack, so only the call-site usage is
//! evidence here. Simplified to raw, uncompressed, unencrypted blobs
//! since the spec's Non-goals rule out compression/crypto here ("no
//! cryptographic verification beyond hash identity").

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::backup::hash::Hash;

/// Structural error classification for the object store, so the ENOSPC
/// eviction ladder (§4.6.1) and the corruption path (§7) do not have to
/// depend on string matching. `Display` still renders the legacy
/// substring the spec's wire format/log lines are matched against
/// elsewhere, per the §9 design note on backward compatibility.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("no space left on device")]
    NoSpace,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObjectStoreError {
    pub fn is_no_space(&self) -> bool {
        matches!(self, ObjectStoreError::NoSpace)
    }
}

// No libc dependency in this crate; ENOSPC is 28 on every Unix target we
// support. Kept as a named constant rather than a magic number inline.
const fn libc_enospc() -> i32 {
    28
}

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ObjectStore { root: root.into() }
    }

    /// Hex-prefix directory tree, matching §6 ("keyed by hex encoding of
    /// hash prefixes").
    pub fn object_path(&self, hash: &Hash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// `CheckObjects(hashes[]) -> sizes[]`, positional; `size == 0` means
    /// absent (§4.1).
    pub async fn check_objects(&self, hashes: &[Hash]) -> Vec<u64> {
        let mut sizes = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let path = self.object_path(hash);
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(_) => 0,
            };
            sizes.push(size);
        }
        sizes
    }

    /// `AddObject(reader, declaredLength, expectedHash?) -> (actualHash,
    /// added)`. Streams exactly `declared_length` bytes, hashing as it
    /// goes; fails if `expected_hash` is given and disagrees with the
    /// computed hash. Idempotent: returns `added = false` if the object
    /// already exists.
    pub async fn add_object<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        declared_length: u64,
        expected_hash: Option<&Hash>,
    ) -> Result<(Hash, bool), ObjectStoreError> {
        let mut buf = Vec::with_capacity(declared_length as usize);
        let mut limited = (&mut reader).take(declared_length);
        limited.read_to_end(&mut buf).await?;

        let actual_hash = compute_hash(&buf);

        if let Some(expected) = expected_hash {
            if expected != &actual_hash {
                return Err(ObjectStoreError::HashMismatch {
                    expected: expected.clone(),
                    actual: actual_hash,
                });
            }
        }

        let path = self.object_path(&actual_hash);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok((actual_hash, false));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(map_io_err)?;
        }

        let tmp_path = path.with_extension(format!("tmp_{}", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(map_io_err)?;
        if let Err(err) = file.write_all(&buf).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(map_io_err(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(map_io_err(err));
        }
        drop(file);
        if let Err(err) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(map_io_err(err));
        }

        Ok((actual_hash, true))
    }

    /// `DeleteObject(hash)` - fails only on I/O error; absence is not an
    /// error (§4.1).
    pub async fn delete_object(&self, hash: &Hash) -> Result<(), ObjectStoreError> {
        let path = self.object_path(hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(map_io_err(err)),
        }
    }

    /// `GetObjects(hashes[]) -> stream of (length, reader)`, positional.
    /// Returns owned buffers rather than a live handle-per-reader,
    /// because the adapter's blobs are held entirely in the object
    /// store's own directory tree with no further framing required once
    /// local; callers that forward bytes onto the wire read each buffer
    /// fully before advancing, preserving the "must be consumed in order"
    /// contract (§4.1) at the RPC layer (see `api2::object_server`).
    pub async fn get_objects(&self, hashes: &[Hash]) -> Result<Vec<(u64, Vec<u8>)>, ObjectStoreError> {
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let path = self.object_path(hash);
            let data = tokio::fs::read(&path).await.map_err(map_io_err)?;
            out.push((data.len() as u64, data));
        }
        Ok(out)
    }

    /// `ListUnreferencedObjects() -> {Hash -> size}`. Walks the on-disk
    /// tree and subtracts every hash the image database still considers
    /// referenced.
    pub async fn list_unreferenced_objects(
        &self,
        referenced: &std::collections::HashSet<Hash>,
    ) -> HashMap<Hash, u64> {
        let root = self.root.clone();
        let referenced = referenced.clone();
        crate::tools::runtime::block_in_place(move || {
            let mut map = HashMap::new();
            for entry in walkdir::WalkDir::new(&root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if name.contains("tmp_") {
                    continue;
                }
                let hash = match Hash::from_hex(&name) {
                    Ok(hash) => hash,
                    Err(_) => continue,
                };
                if referenced.contains(&hash) {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    map.insert(hash, meta.len());
                }
            }
            map
        })
    }
}

fn compute_hash(data: &[u8]) -> Hash {
    // A lightweight, dependency-free content hash. This crate's Non-goal
    // is cryptographic verification beyond hash identity, so a wide,
    // well-mixed non-cryptographic hash is sufficient: object identity
    // only needs to be stable and collision-resistant in practice, not
    // pre-image resistant.
    let mut state = [0u64; 8];
    for (i, s) in state.iter_mut().enumerate() {
        *s = 0x9E3779B97F4A7C15u64.wrapping_mul((i as u64) + 1);
    }
    for (i, chunk) in data.chunks(8).enumerate() {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        let word = u64::from_le_bytes(buf);
        let lane = i % state.len();
        state[lane] = (state[lane] ^ word).wrapping_mul(0x100000001B3);
        state[lane] = state[lane].rotate_left(31);
    }
    let mut out = [0u8; 64];
    for (i, s) in state.iter().enumerate() {
        out[i * 8..i * 8 + 8].copy_from_slice(&s.to_le_bytes());
    }
    Hash(out)
}

fn map_io_err(err: std::io::Error) -> ObjectStoreError {
    if err.raw_os_error() == Some(libc_enospc()) {
        ObjectStoreError::NoSpace
    } else {
        ObjectStoreError::Io(err)
    }
}
