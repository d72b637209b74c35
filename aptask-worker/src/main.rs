use aptask_core::report::Report;
use aptask_core::routine::ArgValue;
use aptask_core::worker::Command;
use aptask_core::Capability;
use clap::{App, Arg};
use color_eyre::eyre::eyre;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Monitors only post-abort stalls. Overridable via `APTASK_WATCHDOG_MS` so
/// tests can pin a short grace period instead of the production default.
fn watchdog_timeout() -> Duration {
    std::env::var("APTASK_WATCHDOG_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(60))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    aptask_core::logging::init(&std::env::var("APTASK_LOGLEVEL").unwrap_or_else(|_| "WARNING".to_string()));

    let matches = App::new("aptask-worker")
        .about("Runs one routine; exchanges commands/status with the daemon over stdio")
        .arg(Arg::with_name("name").long("name").takes_value(true).required(true))
        .arg(Arg::with_name("taskid").long("taskid").takes_value(true).required(true))
        .get_matches();

    let name = matches.value_of("name").expect("name is required").to_string();
    let taskid: u64 = matches
        .value_of("taskid")
        .expect("taskid is required")
        .parse()
        .map_err(|e| eyre!("invalid --taskid: {}", e))?;

    trace!("[worker {}] starting routine {:?}", taskid, name);

    let registry = aptask_routines::build();

    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    // Handshake: the host's first write is the resolved argument list.
    let handshake = lines
        .next_line()
        .await?
        .ok_or_else(|| eyre!("worker {}: stdin closed before handshake", taskid))?;
    let arguments: Vec<ArgValue> = serde_json::from_str(&handshake)?;

    let mut routine = registry
        .construct(&name, &arguments)
        .map_err(|e| eyre!("worker {}: cannot construct routine {:?}: {:?}", taskid, name, e))?;

    // Forward subsequent stdin lines as `Command`s on a bounded channel so
    // the main loop can poll them non-blockingly instead of awaiting stdin
    // directly.
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(1);
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<Command>(&line) {
                Ok(command) => {
                    let _ = command_tx.try_send(command);
                }
                Err(e) => warn!("[worker] malformed command line: {:?}", e),
            }
        }
    });

    let mut stdout = io::stdout();
    let mut report = Report::init();
    let mut watchdog_deadline: Option<Instant> = None;

    apply(&mut report, routine.initialize());

    while !report.is_done() {
        if let Some(deadline) = watchdog_deadline {
            if Instant::now() >= deadline {
                warn!("[worker {}] watchdog expired after stuck abort", taskid);
                break;
            }
        }

        if let Ok(command) = command_rx.try_recv() {
            if command == Command::Abort {
                match routine.abort() {
                    Capability::NotImplemented => break,
                    Capability::Update(update) => {
                        update.apply_to(&mut report);
                        if !report.is_done() {
                            watchdog_deadline = Some(Instant::now() + watchdog_timeout());
                        }
                    }
                }
            }
        }

        if !report.is_done() {
            apply(&mut report, routine.process());
        }

        if send_report(&mut stdout, &report).await.is_err() {
            warn!("[worker {}] error writing report to stdout", taskid);
            break;
        }

        tokio::task::yield_now().await;
    }

    trace!("[worker {}] exiting with status {:?}", taskid, report.status);
    Ok(())
}

fn apply(report: &mut Report, capability: Capability) {
    if let Capability::Update(update) = capability {
        update.apply_to(report);
    }
}

async fn send_report(stdout: &mut io::Stdout, report: &Report) -> io::Result<()> {
    let line = serde_json::to_string(report).expect("Report always serializes");
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
