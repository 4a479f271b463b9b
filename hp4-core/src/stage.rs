// Stage Process Manager
// Spawns the stage chain with piped stdio and guarantees teardown

use crate::error::{RunError, RunResult};
use crate::link::Link;
use crate::spec::{PipelineSpec, SpecError};

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;

/// One running stage process.
#[derive(Debug)]
pub struct StageProcess {
    pub name: String,
    pub child: Child,
}

/// The conduit of one link: the upstream stage's stdout and the downstream
/// stage's stdin, ready to be driven by a relay task.
#[derive(Debug)]
pub struct LinkConduit {
    pub link: Link,
    pub reader: ChildStdout,
    pub writer: ChildStdin,
}

/// Owns every stage process of a run and reaps them on all paths.
#[derive(Debug)]
pub struct StageManager {
    stages: Vec<StageProcess>,
}

impl StageManager {
    /// Spawn all stages of `spec` in pipeline order and wire up the N-1
    /// link conduits between them.
    ///
    /// Executables are resolved up front, so a missing program anywhere in
    /// the chain fails before any stage has started. If a later spawn fails,
    /// every already-started stage is killed and reaped.
    pub async fn spawn(spec: &PipelineSpec) -> RunResult<(Self, Vec<LinkConduit>)> {
        if spec.stages.is_empty() {
            return Err(RunError::Config(SpecError::Empty));
        }
        let programs = resolve_programs(spec)?;

        let mut stages: Vec<StageProcess> = Vec::with_capacity(spec.stages.len());
        let last = spec.stages.len() - 1;

        for (index, (stage_spec, program)) in spec.stages.iter().zip(&programs).enumerate() {
            let mut cmd = Command::new(program);
            cmd.args(&stage_spec.args);
            // The first stage reads external input on its own (or nothing);
            // the last stage's stdout stays off the telemetry channel.
            cmd.stdin(if index == 0 {
                Stdio::null()
            } else {
                Stdio::piped()
            });
            cmd.stdout(if index == last {
                Stdio::null()
            } else {
                Stdio::piped()
            });
            cmd.kill_on_drop(true);

            match cmd.spawn() {
                Ok(child) => {
                    tracing::debug!(stage = %stage_spec.name, program = %program.display(), "spawned stage");
                    stages.push(StageProcess {
                        name: stage_spec.name.clone(),
                        child,
                    });
                }
                Err(source) => {
                    abort_all(&mut stages).await;
                    return Err(RunError::Spawn {
                        stage: stage_spec.name.clone(),
                        source,
                    });
                }
            }
        }

        let mut conduits = Vec::with_capacity(last);
        for i in 0..last {
            let reader = stages[i].child.stdout.take().expect("stdout was piped");
            let writer = stages[i + 1].child.stdin.take().expect("stdin was piped");
            let link = Link::new(&stages[i].name, &stages[i + 1].name);
            conduits.push(LinkConduit {
                link,
                reader,
                writer,
            });
        }

        Ok((Self { stages }, conduits))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wait for every stage to exit, in pipeline order, and collect their
    /// exit statuses.
    ///
    /// When `kill_rx` flips to true (relay failure or external interrupt),
    /// every stage that has not yet been reaped is signalled to terminate and
    /// the wait continues until all children are reaped.
    pub async fn wait_all(
        &mut self,
        mut kill_rx: watch::Receiver<bool>,
    ) -> io::Result<Vec<(String, ExitStatus)>> {
        let mut results = Vec::with_capacity(self.stages.len());
        let mut killed = *kill_rx.borrow();
        let mut watch_alive = true;

        if killed {
            self.kill_from(0);
        }

        for i in 0..self.stages.len() {
            let name = self.stages[i].name.clone();
            loop {
                let kill_now = tokio::select! {
                    status = self.stages[i].child.wait() => {
                        let status = status?;
                        tracing::debug!(stage = %name, %status, "stage exited");
                        results.push((name.clone(), status));
                        break;
                    }
                    changed = kill_rx.changed(), if watch_alive && !killed => {
                        match changed {
                            Ok(()) => *kill_rx.borrow(),
                            Err(_) => {
                                watch_alive = false;
                                false
                            }
                        }
                    }
                };
                if kill_now {
                    killed = true;
                    self.kill_from(i);
                }
            }
        }

        Ok(results)
    }

    fn kill_from(&mut self, from: usize) {
        for stage in &mut self.stages[from..] {
            // Already-exited children return an error here; nothing to do.
            if stage.child.start_kill().is_ok() {
                tracing::debug!(stage = %stage.name, "terminating stage");
            }
        }
    }
}

/// Resolve every stage command against PATH before anything is spawned.
fn resolve_programs(spec: &PipelineSpec) -> RunResult<Vec<PathBuf>> {
    spec.stages
        .iter()
        .map(|stage| {
            which::which(&stage.command).map_err(|err| RunError::Spawn {
                stage: stage.name.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            })
        })
        .collect()
}

/// Kill and reap every already-started stage after a spawn failure.
async fn abort_all(stages: &mut Vec<StageProcess>) {
    for stage in stages.iter_mut() {
        let _ = stage.child.kill().await;
    }
    stages.clear();
}
