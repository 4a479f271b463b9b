// Pipeline Run
// Wires stages, relay tasks, and telemetry together and finalizes the run

use crate::error::{RunError, RunResult};
use crate::link::{relay, Link};
use crate::spec::PipelineSpec;
use crate::stage::{LinkConduit, StageManager};
use crate::telemetry::{Snapshot, TelemetryConfig, TelemetryEmitter};

use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};

/// Coordinator states of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    AllExited,
    AnyFailed,
    Finalizing,
    Terminated,
}

/// Exit record of one stage process.
#[derive(Debug, Clone)]
pub struct StageExit {
    pub stage: String,
    pub status: ExitStatus,
}

/// The result of a successful run.
#[derive(Debug)]
pub struct RunOutcome {
    pub stages: Vec<StageExit>,
    /// Final byte totals per link, equal to the last emitted snapshot.
    pub totals: Snapshot,
}

/// One pipeline invocation: spawns the stage chain, relays and counts bytes
/// across every link, streams telemetry to `out`, and waits for completion.
pub struct PipelineRun {
    spec: PipelineSpec,
    telemetry: TelemetryConfig,
}

impl PipelineRun {
    pub fn new(spec: PipelineSpec) -> Self {
        Self::with_telemetry(spec, TelemetryConfig::default())
    }

    pub fn with_telemetry(spec: PipelineSpec, telemetry: TelemetryConfig) -> Self {
        Self { spec, telemetry }
    }

    /// Run the pipeline to completion.
    ///
    /// Telemetry records are written to `out` while the run is live; the
    /// final record is flushed before this returns, on success and failure
    /// alike. A spawn failure aborts before any telemetry is emitted.
    pub async fn execute<W>(self, out: W) -> RunResult<RunOutcome>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut manager, conduits) = StageManager::spawn(&self.spec).await?;
        let mut state = RunState::Running;
        tracing::debug!(?state, stages = manager.len(), links = conduits.len());

        let links: Vec<Link> = conduits.iter().map(|c| c.link.clone()).collect();

        // Flipped once on the first fatal condition; every stage not yet
        // reaped is then signalled to terminate, which in turn unblocks any
        // in-flight relay read or write.
        let (kill_tx, kill_rx) = watch::channel(false);
        let kill_tx = Arc::new(kill_tx);

        // One relay task per link. Failures are reported over a channel so
        // teardown can start while other links are still draining.
        let (fail_tx, mut fail_rx) = mpsc::unbounded_channel::<(String, io::Error)>();
        let mut relay_tasks = Vec::with_capacity(conduits.len());
        for conduit in conduits {
            let fail_tx = fail_tx.clone();
            relay_tasks.push(tokio::spawn(async move {
                let LinkConduit {
                    link,
                    reader,
                    writer,
                } = conduit;
                if let Err(err) = relay(&link, reader, writer).await {
                    let _ = fail_tx.send((link.name().to_string(), err));
                }
            }));
        }
        drop(fail_tx);

        let monitor_kill = kill_tx.clone();
        let relay_monitor = tokio::spawn(async move {
            let mut first: Option<(String, io::Error)> = None;
            while let Some((link, err)) = fail_rx.recv().await {
                if first.is_none() {
                    let _ = monitor_kill.send(true);
                    first = Some((link, err));
                }
            }
            first
        });

        let interrupted = Arc::new(AtomicBool::new(false));
        let sig_flag = interrupted.clone();
        let sig_kill = kill_tx.clone();
        let sig_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, terminating pipeline");
                sig_flag.store(true, Ordering::Relaxed);
                let _ = sig_kill.send(true);
            }
        });

        let (done_tx, done_rx) = watch::channel(false);
        let telemetry = TelemetryEmitter::with_config(links.clone(), self.telemetry).spawn(out, done_rx);

        // Completion coordinator: every stage reaped, every link closed.
        let statuses = manager.wait_all(kill_rx).await?;
        for task in relay_tasks {
            let _ = task.await;
        }
        let relay_failure = relay_monitor.await.unwrap_or_default();
        sig_task.abort();

        let was_interrupted = interrupted.load(Ordering::Relaxed);
        let failed_stage = statuses.iter().find(|(_, status)| !status.success());
        state = if was_interrupted || relay_failure.is_some() || failed_stage.is_some() {
            RunState::AnyFailed
        } else {
            RunState::AllExited
        };
        tracing::debug!(?state);

        // Flush buffered telemetry and the authoritative final snapshot;
        // on failure it reflects progress up to the failure point.
        state = RunState::Finalizing;
        tracing::debug!(?state);
        let _ = done_tx.send(true);
        telemetry.finish().await?;

        state = RunState::Terminated;
        tracing::debug!(?state);

        if was_interrupted {
            return Err(RunError::Interrupted);
        }
        if let Some((link, source)) = relay_failure {
            return Err(RunError::RelayIo { link, source });
        }
        if let Some((stage, status)) = failed_stage {
            return Err(RunError::StageExit {
                stage: stage.clone(),
                status: *status,
            });
        }

        Ok(RunOutcome {
            stages: statuses
                .into_iter()
                .map(|(stage, status)| StageExit { stage, status })
                .collect(),
            totals: Snapshot::sample(&links),
        })
    }
}
