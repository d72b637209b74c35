// This module contains the net frontend and its session queue.
mod frontend;

use aptask_core::{Config, DaemonError, Manager};
use clap::{App, Arg};
use frontend::ControlMessage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

fn worker_binary_path() -> color_eyre::Result<PathBuf> {
    let mut path = std::env::current_exe()?;
    path.set_file_name(if cfg!(windows) {
        "aptask-worker.exe"
    } else {
        "aptask-worker"
    });
    Ok(path)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let matches = App::new("aptaskd")
        .about("Accepts task-execution requests over TCP and dispatches them to worker subprocesses")
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .required(true)
                .help("path to the JSON configuration file"),
        )
        .arg(
            Arg::with_name("tick-interval-ms")
                .long("tick-interval-ms")
                .takes_value(true)
                .help("scheduler poll cadence in milliseconds (default 50)"),
        )
        .get_matches();

    let config = Config::load(matches.value_of("config").expect("--config is required"))?;
    aptask_core::logging::init(&config.loglevel);

    let tick_interval_ms: u64 = matches
        .value_of("tick-interval-ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);

    info!(
        "[aptaskd] starting on {}:{} (num_procs={})",
        config.host, config.port, config.num_procs
    );

    let worker_bin = worker_binary_path()?;
    let registry = Arc::new(aptask_routines::build());
    let mut manager = Manager::new(
        config.num_procs,
        registry,
        config.keys.users.clone(),
        config.keys.admins.clone(),
        worker_bin,
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| DaemonError::Bind(format!("{}:{}: {}", config.host, config.port, e)))?;

    // The control channel is implemented as two directed mpsc channels
    // rather than one duplex: requests flow frontend -> daemon, responses
    // and `Quit` flow daemon -> frontend. The daemon never writes to client
    // sockets and the frontend never calls into the manager.
    let (to_daemon_tx, mut to_daemon_rx) = mpsc::channel::<(u64, String)>(64);
    let (from_daemon_tx, from_daemon_rx) = mpsc::channel::<ControlMessage>(64);

    let frontend_handle = tokio::spawn(frontend::run(listener, to_daemon_tx, from_daemon_rx));

    let is_running = Arc::new(AtomicBool::new(true));
    {
        let is_running = is_running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                is_running.store(false, Ordering::SeqCst);
            }
        });
    }

    let mut tick = tokio::time::interval(Duration::from_millis(tick_interval_ms));

    while is_running.load(Ordering::SeqCst) {
        tokio::select! {
            received = to_daemon_rx.recv() => {
                match received {
                    Some((sid, payload)) => {
                        let response = manager.handle_request(&payload);
                        if from_daemon_tx
                            .send(ControlMessage::Data { sid, payload: response })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                manager.tick().await;
            }
        }
    }

    info!("[aptaskd] shutting down");
    manager.stop().await;
    let _ = from_daemon_tx.send(ControlMessage::Quit).await;
    let _ = frontend_handle.await;
    Ok(())
}
