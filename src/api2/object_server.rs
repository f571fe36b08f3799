//! `ObjectServer.*` RPC handlers: the object-transfer half of the wire
//! surface (spec §4.1/§4.6.3).

use anyhow::Error;

use crate::backup::hash::Hash;
use crate::wire::MessageStream;

use super::types::Message;
use super::ImageServerContext;

/// `GetObjects(hashes[])`: streams one [`Message::ObjectChunk`] per
/// requested hash, in request order, matching §4.1's "must be consumed
/// in order" contract. A missing object is a hard I/O error here rather
/// than a zero-length chunk, since by the time a peer asks for an
/// object by hash it has already confirmed (via `CheckObjects`) that
/// this server holds it; disagreement means the store changed or is
/// corrupt, and the caller is better off aborting than silently
/// accepting a truncated transfer.
pub async fn send_objects(
    ctx: &ImageServerContext,
    stream: &mut MessageStream,
    hashes: &[Hash],
) -> Result<(), Error> {
    let objects = ctx.object_store.get_objects(hashes).await?;
    for (hash, (_len, data)) in hashes.iter().zip(objects.into_iter()) {
        stream
            .send(&Message::ObjectChunk {
                hash: hash.clone(),
                data,
            })
            .await?;
    }
    Ok(())
}

/// `AddObject(data, declaredLength, expectedHash?)`. Unlike
/// [`send_objects`], failures here are reported in-band via
/// [`Message::AddObjectResponse`] rather than aborting the connection -
/// a hash mismatch or ENOSPC from one push should not tear down a
/// connection that may carry many more independent object pushes.
pub async fn add_object(
    ctx: &ImageServerContext,
    declared_length: u64,
    expected_hash: Option<Hash>,
    data: Vec<u8>,
) -> Message {
    match ctx
        .object_store
        .add_object(&data[..], declared_length, expected_hash.as_ref())
        .await
    {
        Ok((hash, added)) => Message::AddObjectResponse {
            hash: Some(hash),
            added,
            error: None,
        },
        Err(err) => Message::AddObjectResponse {
            hash: None,
            added: false,
            error: Some(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn add_object_reports_hash_mismatch_in_band() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let data = b"payload".to_vec();
        let wrong = Hash([7u8; 64]);
        let response = add_object(&ctx, data.len() as u64, Some(wrong), data).await;
        match response {
            Message::AddObjectResponse { error: Some(msg), added, .. } => {
                assert!(!added);
                assert!(msg.contains("hash mismatch"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_object_then_round_trips_through_check_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let data = b"payload".to_vec();
        let response = add_object(&ctx, data.len() as u64, None, data.clone()).await;
        let hash = match response {
            Message::AddObjectResponse { hash: Some(hash), added: true, error: None } => hash,
            other => panic!("unexpected response: {:?}", other),
        };

        let sizes = ctx.object_store.check_objects(&[hash.clone()]).await;
        assert_eq!(sizes, vec![data.len() as u64]);

        let objects = ctx.object_store.get_objects(&[hash]).await.unwrap();
        assert_eq!(objects[0].1, data);
    }
}
