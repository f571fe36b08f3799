//! `ImageServer.*` RPC handlers (spec §4.4 Add-Image Path, and the
//! server side of §4.5's `GetImageUpdates` stream).

use anyhow::{bail, Error};

use crate::backup::image::{Image, ImageName};
use crate::wire::MessageStream;

use super::types::{ImageUpdate, Message};
use super::ImageServerContext;

/// `AddImage`/`AddImageTrusted` (spec §4.4). `trusted` mirrors the
/// teacher's split in `examples/original_source/imageserver/rpcd/addImage.go`:
/// `AddImage` stamps `CreatedBy`/`CreatedOn` from the authenticated
/// caller before delegating to the same trusted path `AddImageTrusted`
/// uses directly (e.g. for replicated images, which arrive already
/// stamped).
pub async fn add_image(
    ctx: &ImageServerContext,
    name: &ImageName,
    mut image: Image,
    trusted: bool,
) -> Result<(), Error> {
    // Step 1: reject if the name already exists.
    if ctx.image_db.check_image(name) {
        bail!("image already exists");
    }

    // Step 2: reject if the image or its file system is absent. Our
    // `Image`/`FileSystem` types are non-nullable by construction, so the
    // only residual check is that the root inode table is non-empty,
    // which stands in for the teacher's nil-pointer checks.
    if image.file_system.inode_table.is_empty() {
        bail!("nil file-system");
    }

    if !trusted && image.created_by.is_empty() {
        bail!("nil CreatedBy: AddImage requires an authenticated caller");
    }

    // Step 3: verify object closure against the local store.
    let hashes = image.file_system.referenced_hashes();
    let sizes = ctx.object_store.check_objects(&hashes).await;
    if let Some(missing) = sizes.iter().position(|&size| size == 0) {
        bail!(
            "object closure violated: object {} is not present",
            hashes[missing]
        );
    }

    // Step 4: mark the injection registry for the whole critical section;
    // the guard unmarks on every exit path, including the `?` below.
    let _guard = ctx.injection_registry.guard(name);

    // Step 5: if this server replicates from a master, push the image to
    // the master's trusted-add RPC before committing locally. A failure
    // here aborts the local add (the master is authoritative).
    if ctx.config.replication_enabled() {
        crate::client::image_client::add_image_trusted(
            &ctx.config.replication_master,
            name,
            &image,
        )
        .await?;
    }

    // Step 6: re-link, then commit.
    image.file_system.rebuild_inode_pointers();
    ctx.image_db.add_image(image, name)?;

    ctx.notify_added(name);

    Ok(())
}

/// `GetImageUpdates` (spec §4.5/§4.7, server side): streams one
/// `AddImage` frame per currently held image, then the empty-name
/// snapshot terminator, then forwards subsequent local add/delete/
/// directory-update events live.
pub async fn push_updates(
    ctx: &ImageServerContext,
    stream: &mut MessageStream,
) -> Result<(), Error> {
    let mut live = ctx.subscribe_updates();

    for name in ctx.image_db.list_images() {
        stream
            .send(&Message::ImageUpdateFrame {
                update: ImageUpdate::AddImage { name },
            })
            .await?;
    }
    stream
        .send(&Message::ImageUpdateFrame {
            update: ImageUpdate::AddImage {
                name: String::new(),
            },
        })
        .await?;

    loop {
        match live.recv().await {
            Ok(update) => {
                stream
                    .send(&Message::ImageUpdateFrame { update })
                    .await?;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                stream.send(&Message::StreamEnd).await?;
                return Ok(());
            }
        }
    }
}

/// Deletes a local image and notifies subscribers. Used by the
/// reconciler (§4.7) and, for a server that is itself replicated from
/// further downstream, by anything else that removes images locally.
/// Archive mode (§4.8) never calls this - its callers check
/// `config.archive_mode` first.
pub fn delete_image(ctx: &ImageServerContext, name: &str) -> Result<(), Error> {
    ctx.image_db.delete_image(name)?;
    ctx.notify_deleted(name);
    Ok(())
}

/// Upserts a directory node and notifies subscribers (§4.2/§4.5).
pub fn make_directory(
    ctx: &ImageServerContext,
    directory: crate::backup::directory::Directory,
) -> Result<(), Error> {
    ctx.image_db.update_directory(directory.clone())?;
    ctx.notify_directory(directory);
    Ok(())
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

    fn context(dir: &tempfile::TempDir) -> ImageServerContext {
        let object_store = Arc::new(ObjectStore::new(dir.path().join("objects")));
        let image_db = Arc::new(ImageDatabase::open(dir.path().join("images")).unwrap());
        let (updates_tx, _) = tokio::sync::broadcast::channel(64);
        ImageServerContext {
            object_store,
            image_db,
            injection_registry: InjectionRegistry::new(),
            config: ReplicationConfig {
                replication_master: String::new(),
                archive_mode: false,
                archive_expiring_images: false,
                object_store_root: dir.path().join("objects"),
                image_database_root: dir.path().join("images"),
                listen_address: "127.0.0.1:0".into(),
            },
            updates_tx,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let image = Image {
            file_system: FileSystem::new(0),
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        };
        add_image(&ctx, &"team/app".to_string(), image.clone(), true)
            .await
            .unwrap();
        let err = add_image(&ctx, &"team/app".to_string(), image, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn rejects_missing_object_closure() {
        use crate::backup::hash::Hash;
        use crate::backup::inode::Inode;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let mut fs = FileSystem::new(0);
        fs.inode_table.insert(
            0,
            Inode::Regular {
                hash: Hash([9u8; 64]),
                size: 10,
            },
        );
        let image = Image {
            file_system: fs,
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        };

        let err = add_image(&ctx, &"team/app".to_string(), image, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("object closure"));
    }

    #[tokio::test]
    async fn injection_registry_is_empty_after_add() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let image = Image {
            file_system: FileSystem::new(0),
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        };
        add_image(&ctx, &"team/app".to_string(), image, true)
            .await
            .unwrap();
        assert!(!ctx.injection_registry.is_marked("team/app"));
    }
}
