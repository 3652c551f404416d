use std::path::PathBuf;

use clap::Parser;

fn default_parallel_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Command-line overrides for the INI config file (§6's key table).
///
/// Any flag left unset falls back to the corresponding `[DEFAULT]`/section
/// key already loaded from the config file; see [`crate::config`].
#[derive(Debug, Clone, Parser)]
#[command(name = "shoginet", version, about = "shoginet analysis worker pool")]
pub struct Cli {
    /// Path to the INI config file (default: `$XDG_CONFIG_HOME/shoginet/config.ini`).
    #[arg(long, env = "SHOGINET_CONFIG")]
    pub config: Option<PathBuf>,

    /// API key; rendered into the envelope and censored in logs.
    #[arg(long, env = "SHOGINET_KEY")]
    pub key: Option<String>,

    /// Server base URL, e.g. `https://shoginet.example.org/`.
    #[arg(long, env = "SHOGINET_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Number of CPU cores to partition across engine instances.
    #[arg(long, env = "SHOGINET_CORES", default_value_t = default_parallel_cores())]
    pub cores: u32,

    /// Threads handed to each managed engine.
    #[arg(long, env = "SHOGINET_THREADS")]
    pub threads: Option<u32>,

    /// Total hash-table memory budget (MiB) across all engine instances.
    #[arg(long, env = "SHOGINET_MEMORY")]
    pub memory: Option<u32>,

    /// Working directory for spawned engine processes.
    #[arg(long, env = "SHOGINET_ENGINE_DIR")]
    pub engine_dir: Option<PathBuf>,

    /// Command/path used to start the standard engine.
    #[arg(long, env = "SHOGINET_STD_ENGINE_CMD")]
    pub std_engine_cmd: Option<String>,

    /// Command/path used to start the variant engine.
    #[arg(long, env = "SHOGINET_VARIANT_ENGINE_CMD")]
    pub variant_engine_cmd: Option<String>,

    /// Use jittered-fixed backoff instead of jittered-exponential.
    #[arg(long, env = "SHOGINET_FIXED_BACKOFF")]
    pub fixed_backoff: bool,

    /// Disable the collapsing single-line progress renderer, printing one
    /// line per event instead (useful when stdout isn't a terminal).
    #[arg(long)]
    pub no_collapse: bool,
}
