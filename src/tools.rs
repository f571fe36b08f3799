//! Small, dependency-light helpers shared across the crate.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Error};

pub mod format;
pub mod hex;
pub mod runtime;

static TMPFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomically replace the contents of `path` with `data`.
///
/// Writes to a sibling temporary file first and renames it into place, so
/// concurrent readers never observe a partially written file. Mirrors the
/// teacher's `file_set_contents` helper, but uses only `std` (the original
/// relied on `nix::unistd::mkstemp`, which this crate no longer depends on
/// since it carries no privilege-dropping / ownership-changing code).
pub fn file_set_contents<P: AsRef<Path>>(
    path: P,
    data: &[u8],
    mode: Option<u32>,
) -> Result<(), Error> {
    let path = path.as_ref();

    let pid = std::process::id();
    let count = TMPFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tmp_path = path.to_owned();
    tmp_path.set_extension(format!("tmp_{}_{}", pid, count));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .map_err(|err| anyhow::anyhow!("creating temp file {:?} failed: {}", tmp_path, err))?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        let perm = std::fs::Permissions::from_mode(mode);
        if let Err(err) = file.set_permissions(perm) {
            let _ = std::fs::remove_file(&tmp_path);
            bail!("fchmod {:?} failed: {}", tmp_path, err);
        }
    }

    if let Err(err) = file.write_all(data) {
        let _ = std::fs::remove_file(&tmp_path);
        bail!("write failed: {}", err);
    }

    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&tmp_path);
        bail!("fsync {:?} failed: {}", tmp_path, err);
    }

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        bail!("atomic rename failed for file {:?} - {}", path, err);
    }

    Ok(())
}
