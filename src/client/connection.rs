//! Dialing a master, and the CPU-sharing bracket (spec §5).
//!
//! Grounded in `examples/original_source/lib/net/cpuSharingDialer.go`:
//! the original releases a logical CPU permit before a blocking
//! Dial/Read/Write and reacquires it after, so many concurrent outbound
//! streams can share a small pool of compute-bound slots. Async Rust's
//! I/O doesn't block an OS thread the way Go's does, so there is no
//! scheduler starvation to avoid by default - but the spec frames the
//! bracket as an explicit, nameable concept (§5), so it is kept as an
//! optional `tokio::sync::Semaphore`-backed RAII guard. [`crate::wire::MessageStream`]
//! carries the `CpuSharer` a connection was dialed with and brackets every
//! `send`/`recv`, not just the initial dial, matching the spec's naming of
//! Dial *and* Read/Write as suspension points.

use std::sync::Arc;

use anyhow::{Context, Error};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::wire::MessageStream;

/// Shared pool of logical CPU permits. `None` disables the bracket
/// entirely, matching the teacher's "optional" framing (§5) - a follower
/// with no configured limit just dials/reads/writes unthrottled.
#[derive(Clone, Default)]
pub struct CpuSharer {
    semaphore: Option<Arc<Semaphore>>,
}

impl CpuSharer {
    pub fn with_permits(permits: usize) -> Self {
        CpuSharer {
            semaphore: Some(Arc::new(Semaphore::new(permits))),
        }
    }

    pub fn unbounded() -> Self {
        CpuSharer { semaphore: None }
    }

    /// Releases the caller's permit for the duration of the guard,
    /// mirroring `ReleaseCpu()`/`defer GrabCpu()`: the bracket is held
    /// for exactly as long as the blocking call takes, then the guard's
    /// drop hands the permit back.
    pub async fn release(&self) -> CpuPermit<'_> {
        let permit = match &self.semaphore {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .expect("CpuSharer semaphore never closes"),
            ),
            None => None,
        };
        CpuPermit { _permit: permit }
    }
}

pub struct CpuPermit<'a> {
    _permit: Option<SemaphorePermit<'a>>,
}

/// Dials `address` and wraps the resulting socket in a [`MessageStream`],
/// bracketed by `cpu_sharer` the way `cpuSharingDialer.Dial` brackets the
/// underlying `net.Dialer.Dial`.
pub async fn dial(address: &str, cpu_sharer: &CpuSharer) -> Result<MessageStream, Error> {
    let _permit = cpu_sharer.release().await;
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("dialing master at {}", address))?;
    Ok(MessageStream::with_cpu_sharer(stream, cpu_sharer.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbounded_sharer_never_blocks() {
        let sharer = CpuSharer::unbounded();
        let _p1 = sharer.release().await;
        let _p2 = sharer.release().await;
    }

    #[tokio::test]
    async fn bounded_sharer_releases_permit_on_drop() {
        let sharer = CpuSharer::with_permits(1);
        {
            let _permit = sharer.release().await;
        }
        // A second acquire must not hang now that the first was dropped.
        let _permit = sharer.release().await;
    }
}
