//! Length-delimited JSON framing over a `TcpStream` (spec §6 "Wire
//! encoding").
//!
//! Replaces the teacher's HTTP/2-upgrade + schema-macro transport (out of
//! scope here per spec §1 - "TLS/authentication plumbing" and "HTML
//! status pages" are explicitly external collaborators, and so is the
//! router framework that serves them). `tokio_util::codec` is still the
//! teacher's own framing toolkit (see the commented-out
//! `download_chunk_old` in `api2/reader.rs`, which frames chunk bytes
//! with `FramedRead`/`BytesCodec`); this crate swaps `BytesCodec` for
//! `LengthDelimitedCodec` so whole [`crate::api2::types::Message`] values
//! can be framed instead of a raw byte stream.

use anyhow::{format_err, Error};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::api2::types::Message;
use crate::client::connection::CpuSharer;

pub struct MessageStream {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    cpu_sharer: CpuSharer,
}

impl MessageStream {
    /// Equivalent to [`Self::with_cpu_sharer`] with the bracket disabled,
    /// for connections (e.g. server-accepted sockets) that don't share a
    /// `CpuSharer` with anything else.
    pub fn new(stream: TcpStream) -> Self {
        Self::with_cpu_sharer(stream, CpuSharer::unbounded())
    }

    pub fn with_cpu_sharer(stream: TcpStream, cpu_sharer: CpuSharer) -> Self {
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(256 * 1024 * 1024);
        MessageStream {
            framed: Framed::new(stream, codec),
            cpu_sharer,
        }
    }

    /// Brackets the write with the CPU-sharing permit (spec §5: "before a
    /// Dial/Read/Write the caller releases its logical CPU permit; after,
    /// it reacquires"), not just the initial dial.
    pub async fn send(&mut self, message: &Message) -> Result<(), Error> {
        let bytes = serde_json::to_vec(message)
            .map_err(|err| format_err!("encode err: {}", err))?;
        let _permit = self.cpu_sharer.release().await;
        self.framed
            .send(bytes.into())
            .await
            .map_err(|err| format_err!("write err: {}", err))
    }

    /// Returns `Ok(None)` on a clean EOF, matching the teacher's
    /// `io.EOF` handling in `replicator.go`/`getUpdates` (benign,
    /// triggers reconnect rather than being surfaced as an error).
    /// Brackets the read with the CPU-sharing permit, same as `send`.
    pub async fn recv(&mut self) -> Result<Option<Message>, Error> {
        let _permit = self.cpu_sharer.release().await;
        match self.framed.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(format_err!("read err: {}", err)),
            Some(Ok(bytes)) => {
                let message = serde_json::from_slice(&bytes)
                    .map_err(|err| format_err!("decode err: {}", err))?;
                Ok(Some(message))
            }
        }
    }
}
