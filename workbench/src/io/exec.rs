//! Execution engine: spawns interpreters and multiplexes run output.
//!
//! Every run gets a monotonic [`RunId`] and a supervisor task. Output chunks
//! from both pipes and the single terminal event of each run are published on
//! one broadcast channel shared by all runs. A run's registry entry is removed
//! before its terminal event is sent, so once a subscriber has seen the
//! terminal event the id is inert.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::interpreter::{Interpreter, LaunchSpec};
use crate::core::run::{RunEvent, RunId, RunStatus, StreamKind};
use crate::error::{Result, WorkbenchError};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Capacity of the shared event channel.
    pub event_capacity: usize,
    /// Maximum bytes per published output chunk.
    pub read_chunk_bytes: usize,
    /// How long to wait for the pipes to drain after the process ends.
    pub drain_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            read_chunk_bytes: 8192,
            drain_grace: Duration::from_secs(2),
        }
    }
}

struct RunEntry {
    status: RunStatus,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct EngineInner {
    next_id: AtomicU64,
    runs: Mutex<HashMap<RunId, RunEntry>>,
    events: broadcast::Sender<RunEvent>,
    options: EngineOptions,
}

impl EngineInner {
    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: RunEvent) {
        // No subscribers is not an error; the event is simply dropped.
        let _ = self.events.send(event);
    }

    fn set_status(&self, run_id: RunId, status: RunStatus) {
        if let Some(entry) = self.runs().get_mut(&run_id) {
            entry.status = status;
        }
    }

    /// Release the run and publish its terminal event, in that order.
    fn finish(&self, run_id: RunId, event: RunEvent) {
        self.runs().remove(&run_id);
        info!(%run_id, status = ?event.terminal_status(), "run finished");
        self.publish(event);
    }
}

/// Spawns runs and owns their process handles.
///
/// Cheap to clone; clones share the registry and the event channel.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(options: EngineOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(EngineInner {
                next_id: AtomicU64::new(1),
                runs: Mutex::new(HashMap::new()),
                events,
                options,
            }),
        }
    }

    /// Subscribe to every run's events. Only events sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Current status of a live run. Finished runs are forgotten.
    pub fn status(&self, run_id: RunId) -> Option<RunStatus> {
        self.inner.runs().get(&run_id).map(|entry| entry.status.clone())
    }

    /// Number of runs that have not reached a terminal state.
    pub fn live_runs(&self) -> usize {
        self.inner.runs().len()
    }

    pub fn start_file(
        &self,
        interpreter: &Interpreter,
        file: &std::path::Path,
        cwd: &std::path::Path,
    ) -> Result<RunId> {
        self.start(LaunchSpec::for_file(interpreter, file, cwd))
    }

    /// Spawn `spec` and return its id before any output is published.
    ///
    /// A spawn failure is returned here and publishes nothing. Failures later
    /// in the process's life only show up as its terminal event. Must be
    /// called from within a Tokio runtime.
    #[instrument(skip_all, fields(program = %spec.program))]
    pub fn start(&self, spec: LaunchSpec) -> Result<RunId> {
        let run_id = RunId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (kill_tx, kill_rx) = oneshot::channel();
        self.inner.runs().insert(
            run_id,
            RunEntry {
                status: RunStatus::Spawned,
                kill_tx: Some(kill_tx),
            },
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.inner.runs().remove(&run_id);
                warn!(%run_id, err = %err, "spawn failed");
                return Err(WorkbenchError::Spawn {
                    program: spec.program,
                    message: err.to_string(),
                });
            }
        };
        info!(%run_id, pid = ?child.id(), cwd = %spec.cwd.display(), "run started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(run_id, StreamKind::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(run_id, StreamKind::Stderr, stderr));
        }
        // tokio offers no separate "started" signal, so the run is Running as
        // soon as the pipes are attached.
        self.inner.set_status(run_id, RunStatus::Running);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(supervise(inner, run_id, child, kill_rx, readers));
        Ok(run_id)
    }

    /// Ask a live run to terminate. Unknown or finished ids are a no-op.
    pub fn kill(&self, run_id: RunId) {
        let kill_tx = self
            .inner
            .runs()
            .get_mut(&run_id)
            .and_then(|entry| entry.kill_tx.take());
        match kill_tx {
            Some(tx) => {
                debug!(%run_id, "kill requested");
                let _ = tx.send(());
            }
            None => debug!(%run_id, "kill ignored, run not live"),
        }
    }

    /// Start a run and get a typed stream of just its events.
    ///
    /// The subscription is taken before spawning, so no event is missed.
    pub fn start_watched(&self, spec: LaunchSpec) -> Result<(RunId, RunEvents)> {
        let rx = self.subscribe();
        let run_id = self.start(spec)?;
        Ok((run_id, RunEvents::new(Arc::clone(&self.inner), run_id, rx)))
    }

    fn spawn_reader<R>(&self, run_id: RunId, stream: StreamKind, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let chunk_bytes = inner.options.read_chunk_bytes.max(1);
            pump(reader, chunk_bytes, |data| {
                inner.publish(RunEvent::Output {
                    run_id,
                    stream,
                    data,
                });
            })
            .await;
        })
    }
}

async fn pump<R, F>(mut reader: R, chunk_bytes: usize, mut emit: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Vec<u8>),
{
    let mut buf = vec![0u8; chunk_bytes];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => emit(buf[..n].to_vec()),
            Err(err) => {
                debug!(err = %err, "pipe read failed");
                break;
            }
        }
    }
}

async fn supervise(
    inner: Arc<EngineInner>,
    run_id: RunId,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    mut readers: Vec<JoinHandle<()>>,
) {
    let terminal = tokio::select! {
        waited = child.wait() => match waited {
            Ok(status) => RunEvent::Exited { run_id, code: status.code() },
            Err(err) => RunEvent::Failed { run_id, reason: err.to_string() },
        },
        Ok(()) = &mut kill_rx => {
            if let Err(err) = child.start_kill() {
                debug!(%run_id, err = %err, "signal failed, process likely gone");
            }
            match child.wait().await {
                Ok(_) => RunEvent::Killed { run_id },
                Err(err) => RunEvent::Failed { run_id, reason: err.to_string() },
            }
        }
    };

    // Output must not trail the terminal event. Grandchildren can keep a pipe
    // open past the child's exit, so draining is bounded.
    let drain = async {
        for reader in &mut readers {
            let _ = reader.await;
        }
    };
    let drained = tokio::time::timeout(inner.options.drain_grace, drain)
        .await
        .is_ok();
    if !drained {
        warn!(%run_id, "output still open after grace period, detaching readers");
        for reader in &readers {
            reader.abort();
        }
    }

    inner.finish(run_id, terminal);
}

/// Events of a single run, ending after its terminal event.
///
/// If the receiver lags, the terminal event may be among the dropped ones.
/// From then on the stream also ends once the buffer is empty and the run is
/// no longer registered.
pub struct RunEvents {
    inner: Arc<EngineInner>,
    run_id: RunId,
    rx: broadcast::Receiver<RunEvent>,
    lagged: bool,
    done: bool,
}

impl RunEvents {
    fn new(inner: Arc<EngineInner>, run_id: RunId, rx: broadcast::Receiver<RunEvent>) -> Self {
        Self {
            inner,
            run_id,
            rx,
            lagged: false,
            done: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next event for this run, or `None` once the terminal event was returned.
    pub async fn next(&mut self) -> Option<RunEvent> {
        if self.done {
            return None;
        }
        loop {
            let received = if self.lagged {
                match self.rx.try_recv() {
                    Ok(event) => Ok(event),
                    Err(TryRecvError::Empty) => {
                        let live = self.inner.runs().contains_key(&self.run_id);
                        if !live {
                            debug!(run_id = %self.run_id, "run ended while lagging, terminal event lost");
                            self.done = true;
                            return None;
                        }
                        self.rx.recv().await
                    }
                    Err(TryRecvError::Lagged(skipped)) => Err(RecvError::Lagged(skipped)),
                    Err(TryRecvError::Closed) => Err(RecvError::Closed),
                }
            } else {
                self.rx.recv().await
            };
            match received {
                Ok(event) if event.run_id() == self.run_id => {
                    if event.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %self.run_id, skipped, "run subscriber lagged");
                    self.lagged = true;
                }
                Err(RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Drain to the end. The terminal event comes last unless a lag dropped it.
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}
