//! Supervisor (spec §4.E): sizes and partitions the worker pool, starts
//! the progress reporter, and runs the stats/shutdown main loop.

use std::time::Duration;

use reqwest::Url;
use shoginet_core::{ClientInfo, Settings};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::events::{LogLevel, PoolEvent};
use crate::reporter::{ProgressHandle, ProgressReporter};
use crate::worker::{Worker, WorkerConfig, WorkerError, WorkerHandle};

const STAT_INTERVAL: Duration = Duration::from_secs(60);

/// Cheaply-cloned control surface for a running [`Supervisor`], usable
/// while the supervisor itself is owned by its `join()` task.
#[derive(Clone)]
pub struct SupervisorControl {
    events: broadcast::Sender<PoolEvent>,
    worker_handles: std::sync::Arc<Vec<WorkerHandle>>,
}

impl SupervisorControl {
    /// Lets every worker finish its in-flight job, report it with
    /// `stop=true`, then exit without acquiring another.
    pub fn stop_soon(&self) {
        let _ = self.events.send(PoolEvent::StopRequested);
        for handle in self.worker_handles.iter() {
            handle.stop_soon();
        }
    }

    /// As [`Self::stop_soon`], but also kills every worker's engines right
    /// away instead of waiting for the current job to finish.
    pub async fn stop(&self) {
        let _ = self.events.send(PoolEvent::StopRequested);
        for handle in self.worker_handles.iter() {
            handle.stop().await;
        }
    }
}

/// Owns every worker task and the reporter task for one pool run.
pub struct Supervisor {
    events: broadcast::Sender<PoolEvent>,
    worker_handles: std::sync::Arc<Vec<WorkerHandle>>,
    workers: JoinSet<Result<(), WorkerError>>,
    progress: ProgressHandle,
    reporter_task: JoinHandle<()>,
}

impl Supervisor {
    /// Validates `settings`, partitions cores into buckets, and starts the
    /// reporter plus one worker per bucket.
    pub fn start(settings: &Settings, client_info: ClientInfo, events: broadcast::Sender<PoolEvent>) -> anyhow::Result<Self> {
        settings.validate()?;
        let endpoint = Url::parse(&settings.endpoint)?;
        let http = reqwest::Client::new();

        let buckets = settings.core_buckets();
        let instances = buckets.len().max(1);

        let reporter = ProgressReporter::new(instances + 4, http.clone(), endpoint.clone(), events.clone());
        let progress = reporter.handle();
        let reporter_task = tokio::spawn(reporter.run());

        let mut worker_handles = Vec::with_capacity(instances);
        let mut workers = JoinSet::new();

        for worker_idx in 0..instances {
            let config = WorkerConfig {
                worker_idx,
                threads: buckets[worker_idx],
                memory_mib: settings.memory / instances as u32,
                std_engine_cmd: settings.std_engine_cmd.clone(),
                variant_engine_cmd: settings.variant_engine_cmd.clone(),
                engine_dir: settings.engine_dir.clone(),
                std_options: settings.engine_std_options.clone(),
                variant_options: settings.engine_variant_options.clone(),
                endpoint: endpoint.clone(),
                client_info: client_info.clone(),
                fixed_backoff: settings.fixed_backoff,
            };
            let (worker, handle) = Worker::new(config, http.clone(), events.clone(), progress.clone());
            worker_handles.push(handle);
            workers.spawn(worker.run());
        }

        let _ = events.send(PoolEvent::Started);

        Ok(Supervisor {
            events,
            worker_handles: std::sync::Arc::new(worker_handles),
            workers,
            progress,
            reporter_task,
        })
    }

    /// Returns a cloneable handle that can stop this supervisor from
    /// outside the task that will eventually own it via [`Self::join`].
    pub fn control(&self) -> SupervisorControl {
        SupervisorControl {
            events: self.events.clone(),
            worker_handles: self.worker_handles.clone(),
        }
    }

    /// Lets every worker finish its in-flight job, report it with
    /// `stop=true`, then exit without acquiring another.
    pub fn stop_soon(&self) {
        let _ = self.events.send(PoolEvent::StopRequested);
        for handle in self.worker_handles.iter() {
            handle.stop_soon();
        }
    }

    /// As [`Self::stop_soon`], but also kills every worker's engines right
    /// away instead of waiting for the current job to finish.
    pub async fn stop(&self) {
        let _ = self.events.send(PoolEvent::StopRequested);
        for handle in self.worker_handles.iter() {
            handle.stop().await;
        }
    }

    /// Runs the `STAT_INTERVAL` heartbeat and waits for every worker to
    /// finish, then stops the reporter. Returns the first
    /// `UpdateRequired`/fatal error a worker raised, if any.
    pub async fn join(mut self) -> Result<(), WorkerError> {
        let mut ticker = tokio::time::interval(STAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut first_error: Option<WorkerError> = None;

        loop {
            if self.workers.is_empty() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.events.send(PoolEvent::Log {
                        level: LogLevel::Info,
                        message: format!("{} worker(s) still running", self.workers.len()),
                    });
                }
                result = self.workers.join_next() => {
                    match result {
                        Some(Ok(Ok(()))) => {}
                        Some(Ok(Err(err))) => {
                            if first_error.is_none() {
                                let message = err.to_string();
                                first_error = Some(err);
                                self.events.send(PoolEvent::Log { level: LogLevel::Error, message }).ok();
                            }
                            self.stop_soon();
                        }
                        Some(Err(join_err)) => {
                            if first_error.is_none() {
                                first_error = Some(WorkerError::Fatal(anyhow::anyhow!("worker task panicked: {join_err}")));
                            }
                            self.stop_soon();
                        }
                        None => {}
                    }
                }
            }
        }

        self.progress.stop().await;
        let _ = self.reporter_task.await;
        let _ = self.events.send(PoolEvent::Stopped);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
