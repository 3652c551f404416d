#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared data model, codecs and settings surface for the shoginet worker pool.
//!
//! This crate has no knowledge of HTTP, subprocesses or tasks — it is the
//! pure, synchronous core that [`shoginet-pool`] builds the runtime around.

mod backoff;
mod censor;
mod envelope;
mod errors;
mod info_table;
mod job;
mod levels;
mod score;
mod settings;
mod win_chances;

pub use backoff::Backoff;
pub use censor::Censor;
pub use envelope::{AnalysisPly, AnalysisResult, ClientInfo, EngineInfo, Envelope, MoveResult, MultiPvAnalysis, PuzzleResult};
pub use errors::ConfigError;
pub use info_table::AnalysisTables;
pub use job::{Clock, EngineFlavor, Job, Variant, Work};
pub use levels::{movetime_ms, LVL_DEPTHS, LVL_MOVETIMES, LVL_NODES, LVL_SKILL};
pub use score::{decode_score, encode_score, Score};
pub use settings::{EngineOptions, Settings};
pub use win_chances::{is_ambiguous, win_chances};
