//! Replicator Loop (C5), Image Fetcher (C6), and Initial-Sync
//! Reconciler (C7) - spec §4.5/§4.6/§4.7.
//!
//! Generalizes the teacher's `pull_store`/`pull_group`/`pull_snapshot`
//! pipeline in `examples/original_source/imageserver/rpcd/replicator.go`:
//! where the teacher pulls a tree of backup groups and snapshots, this
//! pulls a flat stream of image-update operations over one long-lived
//! connection. The teacher's per-snapshot `downloaded_chunks` dedup set
//! becomes the injection-registry check (C3) plus `CheckImage` - no
//! separate dedup set is needed, since images (not chunks-within-one
//! transfer) are the unit of work here.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Error;

use crate::api2::image_server;
use crate::api2::types::ImageUpdate;
use crate::api2::ImageServerContext;
use crate::backup::hash::Hash;
use crate::backup::image::{Image, ImageName};
use crate::backup::object_store::ObjectStoreError;
use crate::client::connection::CpuSharer;
use crate::client::image_client;
use crate::server::worker_task::WorkerTask;
use crate::wire::MessageStream;

const MIN_BACKOFF: Duration = Duration::from_secs(15);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const FETCH_DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs the replicator forever. Intended to be spawned as the one
/// long-running task a follower keeps alive after boot (§5). Callers
/// check [`crate::config::ReplicationConfig::replication_enabled`]
/// before spawning this in the first place.
pub async fn run(ctx: ImageServerContext, cpu_sharer: CpuSharer) {
    let worker = WorkerTask::new("replicator", &ctx.config.replication_master);
    let mut timeout = MIN_BACKOFF;

    loop {
        let iteration_start = Instant::now();

        match run_iteration(&ctx, &cpu_sharer, &worker, timeout).await {
            Ok(()) => worker.log("connection closed"),
            Err(err) => worker.warn(format!("replication error: {}", err)),
        }

        let elapsed = iteration_start.elapsed();
        // §9: adopts "ran long enough to elapse the full backoff window"
        // as the reset condition for the ambiguous source comparison.
        timeout = if elapsed >= timeout {
            MIN_BACKOFF
        } else {
            (timeout * 2).min(MAX_BACKOFF)
        };

        let remaining = timeout.saturating_sub(iteration_start.elapsed());
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }
}

/// One dial-stream-consume cycle. `Ok(())` means the stream ended
/// cleanly (EOF/`StreamEnd`); any other outcome is an `Err` the caller
/// logs and treats as a trigger to reconnect, never as fatal (§7).
async fn run_iteration(
    ctx: &ImageServerContext,
    cpu_sharer: &CpuSharer,
    worker: &WorkerTask,
    dial_timeout: Duration,
) -> Result<(), Error> {
    let mut stream = tokio::time::timeout(
        dial_timeout,
        image_client::open_updates_stream(&ctx.config.replication_master, cpu_sharer),
    )
    .await??;

    // §9: the phase is tracked by a nullable accumulator rather than a
    // type-level state machine - `Some` means "still in the initial
    // snapshot", collecting names for C7; `None` means live.
    let mut snapshot: Option<HashSet<ImageName>> = Some(HashSet::new());

    loop {
        let update = match image_client::recv_update(&mut stream).await? {
            Some(update) => update,
            None => return Ok(()),
        };
        apply_update(ctx, cpu_sharer, worker, &mut snapshot, update).await?;
    }
}

/// Applies one frame from the update stream. Per-operation errors
/// propagate (§7: "per-operation errors within a connection abort that
/// connection"), tearing down this connection and driving the caller
/// back to `run`'s backoff/reconnect loop - matching
/// `examples/original_source/imageserver/rpcd/replicator.go`'s
/// `getUpdates`, where an `addImage`/`DeleteImage`/`UpdateDirectory`
/// failure is `return err`-ed rather than logged and skipped.
async fn apply_update(
    ctx: &ImageServerContext,
    cpu_sharer: &CpuSharer,
    worker: &WorkerTask,
    snapshot: &mut Option<HashSet<ImageName>>,
    update: ImageUpdate,
) -> Result<(), Error> {
    match update {
        ImageUpdate::AddImage { name } if name.is_empty() => {
            if let Some(received) = snapshot.take() {
                reconcile(ctx, worker, &received);
            }
            *snapshot = None;
        }
        ImageUpdate::AddImage { name } => {
            if let Some(received) = snapshot.as_mut() {
                received.insert(name.clone());
            }
            fetch_image(ctx, cpu_sharer, worker, &name).await?;
        }
        ImageUpdate::DeleteImage { name } => {
            if ctx.config.archive_mode {
                return Ok(());
            }
            image_server::delete_image(ctx, &name)?;
        }
        ImageUpdate::MakeDirectory { directory } => {
            image_server::make_directory(ctx, directory)?;
        }
    }
    Ok(())
}

/// Image Fetcher (C6, §4.6). Skips images already present or already
/// being pushed locally (C3) - the push will reach the master and loop
/// back through this same update stream, so acting on both concurrently
/// could violate object closure during the overlapping add/delete
/// window (§4.3).
async fn fetch_image(
    ctx: &ImageServerContext,
    cpu_sharer: &CpuSharer,
    worker: &WorkerTask,
    name: &ImageName,
) -> Result<(), Error> {
    if ctx.image_db.check_image(name) || ctx.injection_registry.is_marked(name) {
        return Ok(());
    }

    let mut stream = tokio::time::timeout(
        FETCH_DIAL_TIMEOUT,
        crate::client::connection::dial(&ctx.config.replication_master, cpu_sharer),
    )
    .await??;

    let mut image = match image_client::get_image(&mut stream, name).await? {
        Some(image) => image,
        None => anyhow::bail!("master reports no such image: {}", name),
    };

    if ctx.config.archive_mode && !ctx.config.archive_expiring_images && image.is_expiring() {
        worker.log(format!("skipping expiring image {} in archive mode", name));
        return Ok(());
    }

    image.file_system.rebuild_inode_pointers();

    fetch_missing_objects_with_eviction(ctx, &mut stream, &image).await?;

    ctx.image_db.add_image(image, name)?;
    ctx.notify_added(name);
    crate::task_log!(worker, "replicated image {}", name);

    Ok(())
}

/// The §4.6.1 disk-pressure retry ladder: fetch, evict ~10% (min 1) and
/// retry, evict everything remaining and retry, then surface whatever
/// the third attempt returns.
async fn fetch_missing_objects_with_eviction(
    ctx: &ImageServerContext,
    stream: &mut MessageStream,
    image: &Image,
) -> Result<(), Error> {
    match fetch_missing_objects(ctx, stream, image).await {
        Ok(()) => return Ok(()),
        Err(err) if !is_enospc(&err) => return Err(err),
        Err(first_err) => {
            let deleted = evict_unreferenced(ctx, image, EvictionAmount::TenPercent).await?;
            if deleted == 0 {
                return Err(first_err);
            }
        }
    }

    match fetch_missing_objects(ctx, stream, image).await {
        Ok(()) => return Ok(()),
        Err(err) if !is_enospc(&err) => return Err(err),
        Err(second_err) => {
            let deleted = evict_unreferenced(ctx, image, EvictionAmount::All).await?;
            if deleted == 0 {
                return Err(second_err);
            }
        }
    }

    fetch_missing_objects(ctx, stream, image).await
}

enum EvictionAmount {
    TenPercent,
    All,
}

/// §4.6.2: the eviction candidate set is every object the store
/// considers unreferenced, minus every hash the image *about to be
/// added* references (it is not in C2 yet, so it would otherwise look
/// unreferenced too).
async fn evict_unreferenced(
    ctx: &ImageServerContext,
    image: &Image,
    amount: EvictionAmount,
) -> Result<usize, Error> {
    let mut referenced = ctx.image_db.referenced_hashes();
    referenced.extend(image.file_system.referenced_hashes());

    let candidates = ctx.object_store.list_unreferenced_objects(&referenced).await;
    let to_delete = match amount {
        EvictionAmount::TenPercent => {
            let n = candidates.len();
            if n == 0 {
                0
            } else {
                (n / 10).max(1)
            }
        }
        EvictionAmount::All => candidates.len(),
    };

    delete_candidates(ctx, &candidates, to_delete).await
}

async fn delete_candidates(
    ctx: &ImageServerContext,
    candidates: &HashMap<Hash, u64>,
    count: usize,
) -> Result<usize, Error> {
    let mut deleted = 0;
    for hash in candidates.keys().take(count) {
        ctx.object_store.delete_object(hash).await?;
        deleted += 1;
    }
    Ok(deleted)
}

/// §4.6.3 bulk fetch: `CheckObjects` is against the *local* store (what
/// this follower already holds); missing hashes are fetched from the
/// master over `stream` and written locally via `AddObject`.
async fn fetch_missing_objects(
    ctx: &ImageServerContext,
    stream: &mut MessageStream,
    image: &Image,
) -> Result<(), Error> {
    let hashes = image.file_system.referenced_hashes();
    let sizes = ctx.object_store.check_objects(&hashes).await;

    let missing: Vec<Hash> = hashes
        .iter()
        .zip(sizes.iter())
        .filter(|(_, &size)| size < 1)
        .map(|(hash, _)| hash.clone())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let started = Instant::now();
    let payloads = image_client::get_objects(stream, &missing).await?;

    let mut total_bytes = 0u64;
    for (hash, data) in missing.iter().zip(payloads.into_iter()) {
        total_bytes += data.len() as u64;
        let declared_length = data.len() as u64;
        ctx.object_store
            .add_object(&data[..], declared_length, Some(hash))
            .await
            .map_err(object_store_err_to_anyhow)?;
    }

    log::debug!(
        "fetched {} ({} objects) in {:?}",
        crate::tools::format::format_bytes(total_bytes),
        missing.len(),
        started.elapsed()
    );

    Ok(())
}

fn object_store_err_to_anyhow(err: ObjectStoreError) -> Error {
    Error::new(err)
}

/// §7's "substring match kept for backward compatibility at the
/// boundary": classify structurally first, falling back to the legacy
/// substring match for errors that didn't originate in this crate's own
/// [`ObjectStoreError`] (e.g. ones relayed as plain strings over RPC).
fn is_enospc(err: &Error) -> bool {
    if let Some(store_err) = err.downcast_ref::<ObjectStoreError>() {
        return store_err.is_no_space();
    }
    err.to_string().contains("no space left on device")
}

/// Initial-Sync Reconciler (C7, §4.7). Archive mode suppresses this
/// entirely - archive nodes never forget images, even ones the master
/// has since dropped from its own snapshot.
fn reconcile(ctx: &ImageServerContext, worker: &WorkerTask, received: &HashSet<ImageName>) {
    if ctx.config.archive_mode {
        return;
    }
    for name in ctx.image_db.list_images() {
        if received.contains(&name) {
            continue;
        }
        worker.log(format!("reconciler removing stale image {}", name));
        if let Err(err) = image_server::delete_image(ctx, &name) {
            worker.warn(format!("reconciler failed to delete {}: {}", name, err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::filesystem::FileSystem;
    use crate::backup::image_db::ImageDatabase;
    use crate::backup::object_store::ObjectStore;
    use crate::config::ReplicationConfig;
    use crate::server::InjectionRegistry;
    use std::sync::Arc;

    fn context(dir: &tempfile::TempDir, archive_mode: bool) -> ImageServerContext {
        let object_store = Arc::new(ObjectStore::new(dir.path().join("objects")));
        let image_db = Arc::new(ImageDatabase::open(dir.path().join("images")).unwrap());
        let (updates_tx, _) = tokio::sync::broadcast::channel(64);
        ImageServerContext {
            object_store,
            image_db,
            injection_registry: InjectionRegistry::new(),
            config: ReplicationConfig {
                replication_master: "127.0.0.1:0".into(),
                archive_mode,
                archive_expiring_images: false,
                object_store_root: dir.path().join("objects"),
                image_database_root: dir.path().join("images"),
                listen_address: "127.0.0.1:0".into(),
            },
            updates_tx,
        }
    }

    fn image() -> Image {
        Image {
            file_system: FileSystem::new(0),
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        }
    }

    #[test]
    fn reconciler_deletes_images_absent_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        ctx.image_db.add_image(image(), "team/a").unwrap();
        ctx.image_db.add_image(image(), "team/stale").unwrap();

        let worker = WorkerTask::new("test", "unit");
        let mut received = HashSet::new();
        received.insert("team/a".to_string());
        reconcile(&ctx, &worker, &received);

        assert!(ctx.image_db.check_image("team/a"));
        assert!(!ctx.image_db.check_image("team/stale"));
    }

    #[test]
    fn archive_mode_suppresses_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, true);
        ctx.image_db.add_image(image(), "team/stale").unwrap();

        let worker = WorkerTask::new("test", "unit");
        let received = HashSet::new();
        reconcile(&ctx, &worker, &received);

        assert!(ctx.image_db.check_image("team/stale"));
    }

    #[tokio::test]
    async fn apply_update_archive_mode_skips_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, true);
        ctx.image_db.add_image(image(), "team/a").unwrap();

        let worker = WorkerTask::new("test", "unit");
        let cpu_sharer = CpuSharer::unbounded();
        let mut snapshot = None;
        apply_update(
            &ctx,
            &cpu_sharer,
            &worker,
            &mut snapshot,
            ImageUpdate::DeleteImage {
                name: "team/a".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(ctx.image_db.check_image("team/a"));
    }

    #[tokio::test]
    async fn apply_update_non_archive_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        ctx.image_db.add_image(image(), "team/a").unwrap();

        let worker = WorkerTask::new("test", "unit");
        let cpu_sharer = CpuSharer::unbounded();
        let mut snapshot = None;
        apply_update(
            &ctx,
            &cpu_sharer,
            &worker,
            &mut snapshot,
            ImageUpdate::DeleteImage {
                name: "team/a".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(!ctx.image_db.check_image("team/a"));
    }

    #[tokio::test]
    async fn snapshot_marker_triggers_reconcile_and_clears_phase() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        ctx.image_db.add_image(image(), "team/stale").unwrap();

        let worker = WorkerTask::new("test", "unit");
        let cpu_sharer = CpuSharer::unbounded();
        let mut snapshot = Some(HashSet::new());
        apply_update(
            &ctx,
            &cpu_sharer,
            &worker,
            &mut snapshot,
            ImageUpdate::AddImage {
                name: String::new(),
            },
        )
        .await
        .unwrap();

        assert!(snapshot.is_none());
        assert!(!ctx.image_db.check_image("team/stale"));
    }

    #[tokio::test]
    async fn apply_update_propagates_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);

        let worker = WorkerTask::new("test", "unit");
        let cpu_sharer = CpuSharer::unbounded();
        let mut snapshot = None;
        let result = apply_update(
            &ctx,
            &cpu_sharer,
            &worker,
            &mut snapshot,
            ImageUpdate::AddImage {
                name: "team/unreachable".to_string(),
            },
        )
        .await;

        assert!(
            result.is_err(),
            "a fetch failure must propagate so the caller tears down the connection"
        );
    }

    #[test]
    fn is_enospc_matches_structural_and_legacy_string() {
        let structural = Error::new(ObjectStoreError::NoSpace);
        assert!(is_enospc(&structural));

        let legacy = anyhow::anyhow!("write failed: no space left on device");
        assert!(is_enospc(&legacy));

        let other = anyhow::anyhow!("connection reset");
        assert!(!is_enospc(&other));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eviction_excludes_hashes_the_incoming_image_references() {
        use crate::backup::inode::Inode;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);

        let data_a = b"object-a".to_vec();
        let (hash_a, _) = ctx
            .object_store
            .add_object(&data_a[..], data_a.len() as u64, None)
            .await
            .unwrap();
        let data_b = b"object-b".to_vec();
        let (hash_b, _) = ctx
            .object_store
            .add_object(&data_b[..], data_b.len() as u64, None)
            .await
            .unwrap();

        let mut fs = FileSystem::new(0);
        fs.inode_table.insert(
            0,
            Inode::Regular {
                hash: hash_a.clone(),
                size: data_a.len() as u64,
            },
        );
        let incoming = Image {
            file_system: fs,
            created_by: String::new(),
            created_on: 0,
            expires_at: None,
            release_notes: None,
        };

        let deleted = evict_unreferenced(&ctx, &incoming, EvictionAmount::All)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let sizes = ctx.object_store.check_objects(&[hash_a, hash_b]).await;
        assert!(
            sizes[0] > 0,
            "referenced-by-incoming-image hash must survive eviction"
        );
        assert_eq!(sizes[1], 0, "truly unreferenced hash must be evicted");
    }
}
