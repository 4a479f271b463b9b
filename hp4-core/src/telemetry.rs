// Telemetry Emitter
// Streams self-contained snapshots of link byte counts as JSON lines

use crate::link::Link;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How often the sampler looks at the link counters.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Bound of the snapshot channel between sampler and writer. When the output
/// channel cannot keep up, intermediate snapshots are coalesced; the final
/// snapshot is never dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// One emitted record: link name to cumulative bytes delivered, at a single
/// point in time. Self-contained, never a delta; a consumer reading only the
/// last line learns the complete outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    counts: BTreeMap<String, u64>,
}

impl Snapshot {
    /// Read every link counter once.
    pub fn sample<'a>(links: impl IntoIterator<Item = &'a Link>) -> Self {
        Self {
            counts: links
                .into_iter()
                .map(|link| (link.name().to_string(), link.delivered()))
                .collect(),
        }
    }

    pub fn get(&self, link: &str) -> Option<u64> {
        self.counts.get(link).copied()
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Emission cadence and backpressure bounds.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub sample_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Samples the link counters on a periodic tick and writes one JSON record
/// per snapshot to the output channel.
pub struct TelemetryEmitter {
    links: Vec<Link>,
    config: TelemetryConfig,
}

/// Handles to the running sampler and writer tasks.
pub struct TelemetryHandle {
    sampler: JoinHandle<()>,
    writer: JoinHandle<io::Result<()>>,
}

impl TelemetryEmitter {
    pub fn new(links: Vec<Link>) -> Self {
        Self::with_config(links, TelemetryConfig::default())
    }

    pub fn with_config(links: Vec<Link>, config: TelemetryConfig) -> Self {
        Self { links, config }
    }

    /// Start the sampler and writer tasks.
    ///
    /// The sampler emits a snapshot whenever a tick observes changed
    /// counters. When `done` flips to true it takes one last sample (by then
    /// every relay has finished, so it carries the exact final totals) and
    /// delivers it without coalescing before both tasks wind down.
    pub fn spawn<W>(self, out: W, done: watch::Receiver<bool>) -> TelemetryHandle
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Snapshot>(self.config.channel_capacity);
        let writer = tokio::spawn(write_records(rx, out));
        let sampler = tokio::spawn(run_sampler(
            self.links,
            self.config.sample_interval,
            tx,
            done,
        ));
        TelemetryHandle { sampler, writer }
    }
}

impl TelemetryHandle {
    /// Wait for the final snapshot to be flushed to the output channel.
    pub async fn finish(self) -> io::Result<()> {
        self.sampler
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        self.writer
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
    }
}

async fn run_sampler(
    links: Vec<Link>,
    sample_interval: Duration,
    tx: mpsc::Sender<Snapshot>,
    mut done: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(sample_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent: Option<Snapshot> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = Snapshot::sample(&links);
                if last_sent.as_ref() == Some(&snapshot) {
                    continue;
                }
                match tx.try_send(snapshot.clone()) {
                    Ok(()) => last_sent = Some(snapshot),
                    // Writer is lagging: coalesce by dropping this sample.
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
            _ = done.changed() => break,
        }
    }

    // The authoritative final record.
    let _ = tx.send(Snapshot::sample(&links)).await;
}

async fn write_records<W>(mut rx: mpsc::Receiver<Snapshot>, mut out: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(snapshot) = rx.recv().await {
        let mut line = serde_json::to_vec(&snapshot).map_err(io::Error::from)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}
