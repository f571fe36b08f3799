//! Client-side stubs for the `ImageServer.*`/`ObjectServer.*` RPCs
//! (spec §6), used by the add-image path (C4, to inject into a
//! configured master) and by the replicator (C5/C6).

use anyhow::{bail, Error};

use crate::api2::types::{ImageUpdate, Message};
use crate::backup::hash::Hash;
use crate::backup::image::{Image, ImageName};
use crate::client::connection::{dial, CpuSharer};
use crate::wire::MessageStream;

/// Pushes an already-stamped image to `master`'s trusted-add RPC (§4.4
/// step 5). Used by the add-image path when this server itself
/// replicates further upstream.
pub async fn add_image_trusted(master: &str, name: &ImageName, image: &Image) -> Result<(), Error> {
    let sharer = CpuSharer::unbounded();
    let mut stream = dial(master, &sharer).await?;
    stream
        .send(&Message::AddImageTrustedRequest {
            name: name.clone(),
            image: image.clone(),
        })
        .await?;
    match stream.recv().await? {
        Some(Message::AddImageResponse { error: None }) => Ok(()),
        Some(Message::AddImageResponse { error: Some(msg) }) => bail!("master rejected image: {}", msg),
        Some(other) => bail!("unexpected response to AddImageTrusted: {:?}", other),
        None => bail!("connection closed before AddImageTrusted response"),
    }
}

pub async fn get_image(stream: &mut MessageStream, name: &ImageName) -> Result<Option<Image>, Error> {
    stream
        .send(&Message::GetImageRequest { name: name.clone() })
        .await?;
    match stream.recv().await? {
        Some(Message::GetImageResponse { image }) => Ok(image),
        Some(other) => bail!("unexpected response to GetImage: {:?}", other),
        None => bail!("connection closed before GetImage response"),
    }
}

pub async fn check_objects(stream: &mut MessageStream, hashes: &[Hash]) -> Result<Vec<u64>, Error> {
    stream
        .send(&Message::CheckObjectsRequest {
            hashes: hashes.to_vec(),
        })
        .await?;
    match stream.recv().await? {
        Some(Message::CheckObjectsResponse { sizes }) => Ok(sizes),
        Some(other) => bail!("unexpected response to CheckObjects: {:?}", other),
        None => bail!("connection closed before CheckObjects response"),
    }
}

/// Requests every object in `hashes` and returns them positionally, in
/// the order requested (§4.1). The caller is expected to have already
/// verified via [`check_objects`] that the master holds every hash.
pub async fn get_objects(stream: &mut MessageStream, hashes: &[Hash]) -> Result<Vec<Vec<u8>>, Error> {
    stream
        .send(&Message::GetObjectsRequest {
            hashes: hashes.to_vec(),
        })
        .await?;
    let mut out = Vec::with_capacity(hashes.len());
    for expected in hashes {
        match stream.recv().await? {
            Some(Message::ObjectChunk { hash, data }) => {
                if &hash != expected {
                    bail!(
                        "object stream out of order: expected {}, got {}",
                        expected,
                        hash
                    );
                }
                out.push(data);
            }
            Some(other) => bail!("unexpected response to GetObjects: {:?}", other),
            None => bail!("connection closed mid GetObjects stream"),
        }
    }
    Ok(out)
}

/// Pushes a single object; returns the hash the remote computed and
/// whether it was newly stored (§4.1's `AddObject` contract).
pub async fn add_object(
    stream: &mut MessageStream,
    data: Vec<u8>,
    expected_hash: Option<Hash>,
) -> Result<(Hash, bool), Error> {
    let declared_length = data.len() as u64;
    stream
        .send(&Message::AddObjectRequest {
            declared_length,
            expected_hash,
            data,
        })
        .await?;
    match stream.recv().await? {
        Some(Message::AddObjectResponse {
            hash: Some(hash),
            added,
            error: None,
        }) => Ok((hash, added)),
        Some(Message::AddObjectResponse { error: Some(msg), .. }) => bail!("AddObject failed: {}", msg),
        Some(other) => bail!("unexpected response to AddObject: {:?}", other),
        None => bail!("connection closed before AddObject response"),
    }
}

/// Opens the long-lived `GetImageUpdates` stream and hands back the raw
/// connection; the replicator (C5) reads [`ImageUpdate`] frames from it
/// directly via [`recv_update`] rather than through a higher-level
/// iterator, since it needs to interleave reconnect/backoff bookkeeping
/// with each frame.
pub async fn open_updates_stream(master: &str, cpu_sharer: &CpuSharer) -> Result<MessageStream, Error> {
    let mut stream = dial(master, cpu_sharer).await?;
    stream.send(&Message::GetImageUpdatesRequest).await?;
    Ok(stream)
}

/// Returns `Ok(None)` once the master has cleanly ended the stream
/// (`StreamEnd` or TCP EOF) - the replicator treats both as "reconnect",
/// matching the teacher's `io.EOF` handling in `replicator.go`.
pub async fn recv_update(stream: &mut MessageStream) -> Result<Option<ImageUpdate>, Error> {
    loop {
        match stream.recv().await? {
            Some(Message::ImageUpdateFrame { update }) => return Ok(Some(update)),
            Some(Message::StreamEnd) | None => return Ok(None),
            Some(other) => bail!("unexpected frame on updates stream: {:?}", other),
        }
    }
}
