//! The typed event stream the pool broadcasts, standing in for the
//! reference implementation's logging calls (`log.debug`/`log.info`/
//! `log.warning`/`log.error` and its two custom `PROGRESS`/`ENGINE`
//! levels) without the library ever touching stdout itself.

use serde::{Deserialize, Serialize};

/// Severity/channel of a [`PoolEvent::Log`] line, matching the reference
/// implementation's five-plus-two level scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Raw USI traffic (`log.log(ENGINE, ...)` in the reference).
    Engine,
    /// Per-position progress (`log.log(PROGRESS, ...)` in the reference).
    Progress,
    /// `log.debug`.
    Debug,
    /// `log.info`.
    Info,
    /// `log.warning`.
    Warn,
    /// `log.error`/`log.exception`.
    Error,
}

/// One unit of pool-observable state, broadcast from the supervisor,
/// workers and the progress reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PoolEvent {
    /// The pool has finished starting all workers and the reporter.
    Started,
    /// A graceful shutdown was requested.
    StopRequested,
    /// A worker (re)started both engine sessions.
    WorkerStarted {
        /// Worker index (0-based).
        worker_idx: usize,
    },
    /// A worker acquired a new job.
    JobAcquired {
        /// Worker index (0-based).
        worker_idx: usize,
        /// Submission path the job will post to (`analysis/<id>`, ...).
        path: String,
    },
    /// A worker finished reporting a job (successfully or not).
    JobFinished {
        /// Worker index (0-based).
        worker_idx: usize,
        /// Submission path the job was posted to.
        path: String,
    },
    /// One worker's engine pair died and is being respawned.
    EngineDied {
        /// Worker index (0-based).
        worker_idx: usize,
    },
    /// A free-text diagnostic line, already censored.
    Log {
        /// Severity/channel.
        level: LogLevel,
        /// Message text.
        message: String,
    },
    /// Every worker and the reporter have stopped.
    Stopped,
}
