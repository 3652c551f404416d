#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The async worker-pool runtime for the shoginet analysis client: engine
//! subprocess management, the HTTP acquire/report protocol, the progress
//! reporter side channel, and the supervisor that ties them together.
//!
//! `#![forbid(unsafe_code)]` is deliberately not set crate-wide: isolating
//! an engine subprocess into its own process group requires `pre_exec` on
//! unix, confined to [`usi`]'s platform-specific spawn helpers.

/// Public API surface: starts and controls a pool from the binary layer.
pub mod api;

mod backend;
mod events;
mod pool;
mod reporter;
mod usi;
mod worker;

pub use api::{start_pool, PoolConfig, PoolHandle};
pub use events::{LogLevel, PoolEvent};
pub use worker::WorkerError;
