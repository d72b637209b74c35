use crate::error::DaemonResult;
use crate::report::Report;
use crate::routine::RoutineDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::mpsc;

/// The only value ever sent on the command channel is `Abort`; `Continue`
/// exists for completeness and as an explicit no-op a future capability
/// could make use of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Continue,
    Abort,
}

/// `INIT -> RUNNING -> STOPPING -> (removed)`, monotonic, no backward
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Running,
    Stopping,
}

/// Host-side proxy for one worker subprocess. Owns the command/status
/// channels and the OS child handle; created on a `start` request, destroyed
/// after the worker is reaped.
pub struct WorkerHandle {
    pub id: u64,
    pub descriptor: RoutineDescriptor,
    pub group: Option<String>,
    state: WorkerState,
    last_report: Option<Report>,
    command_tx: Option<mpsc::Sender<Command>>,
    status_rx: Option<mpsc::Receiver<Report>>,
    child: Option<Child>,
    worker_bin: PathBuf,
}

impl WorkerHandle {
    pub fn new(
        id: u64,
        descriptor: RoutineDescriptor,
        group: Option<String>,
        worker_bin: PathBuf,
    ) -> Self {
        WorkerHandle {
            id,
            descriptor,
            group,
            state: WorkerState::Init,
            last_report: None,
            command_tx: None,
            status_rx: None,
            child: None,
            worker_bin,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// Spawns the worker subprocess and transitions to `RUNNING`. Idempotent
    /// only from `INIT`. Synchronous: `tokio::process::Command::spawn` does
    /// not itself await anything, which keeps this in step with `tick()`'s
    /// largely synchronous algorithm — only `join()` is a real suspension
    /// point.
    pub fn start(&mut self) -> DaemonResult<()> {
        if self.state != WorkerState::Init {
            return Ok(());
        }

        let mut child = TokioCommand::new(&self.worker_bin)
            .arg("--name")
            .arg(&self.descriptor.name)
            .arg("--taskid")
            .arg(self.id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        // Handshake: the worker's constructor arguments, one JSON line,
        // written by the writer task before it starts forwarding commands.
        let handshake = serde_json::to_string(&self.descriptor.arguments)?;

        let (command_tx, command_rx) = mpsc::channel::<Command>(1);
        let (status_tx, status_rx) = mpsc::channel::<Report>(4);

        tokio::spawn(writer_task(stdin, handshake, command_rx));
        tokio::spawn(reader_task(stdout, status_tx));

        self.command_tx = Some(command_tx);
        self.status_rx = Some(status_rx);
        self.child = Some(child);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Sends one `ABORT` command if `RUNNING`, and transitions to `STOPPING`
    /// regardless. If called in `INIT` the handle never spawned a
    /// subprocess, so it is simply marked for discard.
    pub fn stop(&mut self) {
        if self.state == WorkerState::Running {
            if let Some(tx) = &self.command_tx {
                // best-effort: a full channel here means a command is
                // already in flight, which is enough.
                let _ = tx.try_send(Command::Abort);
            }
        }
        self.state = WorkerState::Stopping;
    }

    /// Drains all pending reports from the status channel, keeps only the
    /// most recent, caches it, and returns the cache. Non-blocking.
    pub fn get_status(&mut self) -> Option<Report> {
        if let Some(rx) = &mut self.status_rx {
            let mut latest = None;
            while let Ok(report) = rx.try_recv() {
                latest = Some(report);
            }
            if let Some(report) = latest {
                self.last_report = Some(report);
            }
        }
        self.last_report.clone()
    }

    /// Returns the cached report without draining the status channel — used
    /// to answer `active` requests with whatever the last `tick()` observed,
    /// rather than mixing drain responsibility into the request path.
    pub fn cached_report(&self) -> Option<Report> {
        self.last_report.clone()
    }

    /// Whether the OS subprocess has exited. A handle that never started
    /// (still `INIT` when `stop()` discarded it) counts as already exited.
    pub fn has_exited(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// Blocks until the subprocess has exited. Must be called before the
    /// handle is released.
    pub async fn join(&mut self) -> DaemonResult<()> {
        if let Some(mut child) = self.child.take() {
            child.wait().await?;
        }
        Ok(())
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> DaemonResult<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

async fn writer_task(mut stdin: ChildStdin, handshake: String, mut command_rx: mpsc::Receiver<Command>) {
    if write_line(&mut stdin, &handshake).await.is_err() {
        tracing::warn!("[worker-handle] error writing handshake to worker stdin");
        return;
    }
    while let Some(command) = command_rx.recv().await {
        let line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("[worker-handle] failed to encode command: {:?}", e);
                break;
            }
        };
        if write_line(&mut stdin, &line).await.is_err() {
            tracing::warn!("[worker-handle] error writing command to worker stdin");
            break;
        }
    }
}

async fn reader_task(stdout: tokio::process::ChildStdout, status_tx: mpsc::Sender<Report>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Report>(&line) {
                Ok(report) => {
                    // drop-newest on full: the host must tolerate a worker
                    // that produces reports faster than it drains them.
                    let _ = status_tx.try_send(report);
                }
                Err(e) => {
                    tracing::warn!("[worker-handle] malformed status line: {:?}", e);
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("[worker-handle] error reading worker stdout: {:?}", e);
                break;
            }
        }
    }
}
