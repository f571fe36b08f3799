//! Wire types for the RPC surface (spec §6).
//!
//! One JSON-tagged enum, `Message`, carries every request, response, and
//! push frame exchanged between image servers. Framing is handled by
//! [`crate::wire`]; serde's default behavior for missing struct fields
//! (`#[serde(default)]`) and unknown fields (silently ignored unless
//! `deny_unknown_fields` is set, which nothing here sets) gives the
//! field-level wire compatibility spec §6 asks for without a bespoke
//! schema-tagged binary format.

use serde::{Deserialize, Serialize};

use crate::backup::directory::Directory;
use crate::backup::hash::Hash;
use crate::backup::image::{Image, ImageName};

/// The operation carried by one frame of the `GetImageUpdates` stream
/// (spec §4.5 table). An empty-name `AddImage` is the snapshot
/// terminator (§4.5, §4.7).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "operation")]
pub enum ImageUpdate {
    AddImage {
        #[serde(default)]
        name: ImageName,
    },
    DeleteImage {
        name: ImageName,
    },
    MakeDirectory {
        directory: Directory,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Message {
    AddImageRequest { name: ImageName, image: Image },
    AddImageTrustedRequest { name: ImageName, image: Image },
    AddImageResponse { error: Option<String> },

    GetImageRequest { name: ImageName },
    GetImageResponse { image: Option<Image> },

    GetImageUpdatesRequest,
    ImageUpdateFrame { update: ImageUpdate },
    /// Sent once the server has nothing further to stream right now and
    /// is about to close the connection; distinguishing this from a bare
    /// TCP EOF lets the follower log "connection closed" the way the
    /// teacher's replicator does on `io.EOF` rather than treating it as a
    /// protocol error (§7 Transport).
    StreamEnd,

    CheckObjectsRequest { hashes: Vec<Hash> },
    CheckObjectsResponse { sizes: Vec<u64> },

    GetObjectsRequest { hashes: Vec<Hash> },
    /// One `ObjectChunk` per requested hash, sent in request order
    /// (§4.1's "must be consumed in order" contract).
    ObjectChunk { hash: Hash, data: Vec<u8> },

    AddObjectRequest {
        declared_length: u64,
        #[serde(default)]
        expected_hash: Option<Hash>,
        data: Vec<u8>,
    },
    AddObjectResponse {
        hash: Option<Hash>,
        added: bool,
        error: Option<String>,
    },

    DeleteObjectRequest { hash: Hash },
    DeleteObjectResponse { error: Option<String> },

    /// A generic protocol-level failure (decode errors, nil required
    /// fields) - wrapped as "decode err: ..." at the call site per §7.
    Error { message: String },
}
