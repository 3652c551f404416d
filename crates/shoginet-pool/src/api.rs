//! Public API types for the shoginet worker pool.

use shoginet_core::{ClientInfo, Settings};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::PoolEvent;
use crate::pool::{Supervisor, SupervisorControl};
use crate::worker::WorkerError;

/// Capacity of the broadcast channel every [`PoolHandle::subscribe`]r reads
/// from; a slow subscriber only ever misses old events, never blocks one.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for one pool run, handed down from the CLI layer after it
/// has merged the INI file, CLI flags and environment overrides.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Validated engine/network/resource settings.
    pub settings: Settings,
    /// Client identity attached to every submission.
    pub client_info: ClientInfo,
}

/// Handle to a running pool: the supervisor and every worker/reporter task
/// it owns.
pub struct PoolHandle {
    events: broadcast::Sender<PoolEvent>,
    control: SupervisorControl,
    join: JoinHandle<Result<(), WorkerError>>,
}

/// Starts the worker pool: validates `config.settings`, spawns the
/// supervisor (reporter plus one worker per core bucket), and returns a
/// handle to observe and stop it.
pub fn start_pool(config: PoolConfig) -> anyhow::Result<PoolHandle> {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let supervisor = Supervisor::start(&config.settings, config.client_info, events.clone())?;
    let control = supervisor.control();
    let join = tokio::spawn(supervisor.join());
    Ok(PoolHandle { events, control, join })
}

impl PoolHandle {
    /// Subscribes to the pool's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Requests a graceful stop: every worker finishes its in-flight job,
    /// reports it with `stop=true`, then exits without acquiring another.
    pub fn request_stop_soon(&self) {
        self.control.stop_soon();
    }

    /// Requests an immediate stop: every worker's engines are killed right
    /// away instead of waiting for the current job to finish.
    pub async fn request_stop(&self) {
        self.control.stop().await;
    }

    /// Waits for the pool to finish, returning the first
    /// `UpdateRequired`/fatal error a worker raised, if any.
    pub async fn wait(self) -> Result<(), WorkerError> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(WorkerError::Fatal(anyhow::anyhow!("supervisor task panicked: {err}"))),
        }
    }
}
