use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::ConfigError;

/// Custom USI options applied last, after the invariant set, when an
/// engine is started (`[EngineStd]`/`[EngineVariant]` in the reference
/// configuration file).
pub type EngineOptions = BTreeMap<String, String>;

/// The read-only settings object the pool consumes. Built and owned by
/// the binary layer (interactive setup, INI file, CLI overrides are all
/// out of scope here — see the crate's top-level docs).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Working directory for spawned engine processes.
    pub engine_dir: Option<PathBuf>,
    /// Command/path used to start the standard engine.
    pub std_engine_cmd: String,
    /// Command/path used to start the variant engine.
    pub variant_engine_cmd: String,
    /// API key; rendered into the envelope and censored in logs.
    pub key: String,
    /// Number of cores to partition across engine instances.
    pub cores: u32,
    /// Threads-per-engine hint.
    pub threads: u32,
    /// Total memory budget (MiB) across all engine instances.
    pub memory: u32,
    /// HTTPS (or, for local testing, HTTP) base URL, trailing `/`.
    pub endpoint: String,
    /// Use jittered-fixed backoff instead of jittered-exponential.
    pub fixed_backoff: bool,
    /// Custom options applied to the standard engine after the invariant
    /// set.
    pub engine_std_options: EngineOptions,
    /// Custom options applied to the variant engine after the invariant
    /// set.
    pub engine_variant_options: EngineOptions,
}

impl Settings {
    /// Validates the numeric and URL-shaped fields, matching error kind 1
    /// in the error-handling design (surfaced before the pool starts).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::InvalidCores(self.cores.to_string()));
        }
        if self.threads == 0 {
            return Err(ConfigError::InvalidThreads(self.threads.to_string()));
        }
        if self.memory == 0 {
            return Err(ConfigError::InvalidMemory(self.memory.to_string()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.std_engine_cmd.trim().is_empty() {
            return Err(ConfigError::MissingEngineCommand("standard"));
        }
        if self.variant_engine_cmd.trim().is_empty() {
            return Err(ConfigError::MissingEngineCommand("variant"));
        }
        Ok(())
    }

    /// `instances = max(1, cores / threads)`.
    pub fn instances(&self) -> u32 {
        (self.cores / self.threads.max(1)).max(1)
    }

    /// Partitions `cores` into `instances` buckets whose sizes sum to
    /// `cores`, `bucket[i % instances] += 1` for `i in 0..cores`.
    pub fn core_buckets(&self) -> Vec<u32> {
        let instances = self.instances() as usize;
        let mut buckets = vec![0u32; instances];
        for i in 0..self.cores as usize {
            buckets[i % instances] += 1;
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            engine_dir: None,
            std_engine_cmd: "yaneuraou".into(),
            variant_engine_cmd: "fairy".into(),
            key: "k".into(),
            cores: 8,
            threads: 2,
            memory: 2048,
            endpoint: "https://example.test/".into(),
            fixed_backoff: false,
            engine_std_options: EngineOptions::new(),
            engine_variant_options: EngineOptions::new(),
        }
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let mut s = base();
        s.endpoint = "ftp://example.test/".into();
        assert!(matches!(s.validate(), Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn core_buckets_sum_to_cores_and_are_balanced() {
        let mut s = base();
        s.cores = 10;
        s.threads = 3;
        assert_eq!(s.instances(), 3);
        let buckets = s.core_buckets();
        assert_eq!(buckets.iter().sum::<u32>(), 10);
        assert_eq!(buckets, vec![4, 3, 3]);
    }

    #[test]
    fn at_least_one_instance_even_with_few_cores() {
        let mut s = base();
        s.cores = 1;
        s.threads = 4;
        assert_eq!(s.instances(), 1);
        assert_eq!(s.core_buckets(), vec![1]);
    }
}
