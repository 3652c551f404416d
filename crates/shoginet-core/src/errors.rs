/// Configuration errors surfaced before the pool starts (exit code 78 at
/// the binary layer).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `Endpoint` did not parse as an `http(s)://` URL.
    #[error("invalid endpoint {0:?}: must be an http:// or https:// URL")]
    InvalidEndpoint(String),

    /// `Cores` was zero or could not be parsed.
    #[error("invalid cores value {0:?}: must be a positive integer")]
    InvalidCores(String),

    /// `Threads` was zero or could not be parsed.
    #[error("invalid threads value {0:?}: must be a positive integer")]
    InvalidThreads(String),

    /// `Memory` was zero or could not be parsed.
    #[error("invalid memory value {0:?}: must be a positive integer (MiB)")]
    InvalidMemory(String),

    /// The engine command for a given flavor was empty.
    #[error("no engine command configured for {0}")]
    MissingEngineCommand(&'static str),
}
