// Instrumented Link
// Byte-counting relay between one stage's output and the next stage's input

use crate::spec::link_name;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk size for one relay read. Matches the transfer unit of classic pipe
/// relays; a full OS pipe buffer fits in one chunk.
pub const RELAY_CHUNK: usize = 64 * 1024;

/// Monotonic count of bytes delivered downstream over one link.
///
/// Written only by that link's relay task, loaded concurrently by the
/// telemetry sampler. Relaxed ordering is sufficient: each counter has a
/// single writer and only per-counter monotonicity is observable.
#[derive(Debug, Clone, Default)]
pub struct LinkCounter {
    bytes: Arc<AtomicU64>,
}

impl LinkCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` bytes as delivered. Called only after a successful write.
    pub fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Current cumulative total.
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// The monitored connection between two adjacent stages.
#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    counter: LinkCounter,
    closed: Arc<AtomicBool>,
}

impl Link {
    /// Create a link between `upstream` and `downstream`, named
    /// `"<upstream>-to-<downstream>"`.
    pub fn new(upstream: &str, downstream: &str) -> Self {
        Self {
            name: link_name(upstream, downstream),
            counter: LinkCounter::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counter(&self) -> LinkCounter {
        self.counter.clone()
    }

    /// Bytes actually delivered to the downstream stage so far.
    pub fn delivered(&self) -> u64 {
        self.counter.get()
    }

    /// Whether the relay loop for this link has finished, cleanly or not.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Relay bytes from `reader` to `writer`, crediting the link's counter only
/// after each chunk has been fully written downstream.
///
/// On end-of-stream the writer is shut down so the downstream stage sees a
/// clean EOF. Any unrecoverable read or write error closes the link and is
/// returned to the caller. Returns the total number of bytes delivered.
pub async fn relay<R, W>(link: &Link, mut reader: R, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK];
    let result = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                // Upstream EOF: flush and close the write side so the
                // downstream stage's stdin reaches end-of-stream.
                writer.shutdown().await?;
                return Ok(link.delivered());
            }
            // write_all retries partial writes until the chunk is flushed
            // or the destination closes.
            writer.write_all(&buf[..n]).await?;
            link.counter.add(n as u64);
        }
    }
    .await;

    link.mark_closed();
    match &result {
        Ok(total) => tracing::debug!(link = link.name(), bytes = total, "link finished"),
        Err(err) => tracing::warn!(link = link.name(), error = %err, "link relay failed"),
    }
    result
}
