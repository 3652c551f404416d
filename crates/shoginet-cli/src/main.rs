mod cli;
mod config;
mod logging;
mod shutdown;

use std::io::IsTerminal as _;

use clap::Parser;

use shoginet_core::ClientInfo;
use shoginet_pool::{start_pool, PoolConfig, PoolEvent, WorkerError};

use crate::cli::Cli;
use crate::logging::EventLogger;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

const CONFIG_EXIT_CODE: i32 = 78;
const UPDATE_REQUIRED_EXIT_CODE: i32 = 70;

fn worker_idx_of(event: &PoolEvent) -> Option<usize> {
    match event {
        PoolEvent::WorkerStarted { worker_idx }
        | PoolEvent::JobAcquired { worker_idx, .. }
        | PoolEvent::JobFinished { worker_idx, .. }
        | PoolEvent::EngineDied { worker_idx } => Some(*worker_idx),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match config::build_settings(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: failed to load configuration: {err:#}");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };
    if let Err(err) = settings.validate() {
        eprintln!("error: {err}");
        std::process::exit(CONFIG_EXIT_CODE);
    }

    let client_info = ClientInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        runtime: "rust".to_string(),
        apikey: settings.key.clone(),
    };

    let pool = start_pool(PoolConfig { settings, client_info })?;
    let mut events = pool.subscribe();

    let use_collapse = !cli.no_collapse && std::io::stdout().is_terminal();
    let mut logger = EventLogger::new(use_collapse);

    let shutdown = std::sync::Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        eprintln!("stop requested — finishing current jobs before exiting (press CTRL+C again to exit immediately)");
                        pool.request_stop_soon();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("stop requested again — exiting immediately");
                        pool.request_stop().await;
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let is_stopped = matches!(evt, PoolEvent::Stopped);
                logger.handle(worker_idx_of(&evt), &evt);
                if is_stopped {
                    break;
                }
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    match pool.wait().await {
        Ok(()) => Ok(()),
        Err(WorkerError::UpdateRequired) => {
            eprintln!("server requires a client restart; exiting to pick up the update");
            std::process::exit(UPDATE_REQUIRED_EXIT_CODE);
        }
        Err(WorkerError::Fatal(err)) => Err(err),
    }
}
