//! Crate-wide error type.
//!
//! One variant per error kind in the fuzzer's error-handling design: most are
//! recoverable and get logged-and-swallowed by the driver, `InvariantViolation`
//! is fatal and aborts the worker.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FuzzError {
    #[error("failed to spawn target {argv:?}: {source}")]
    TargetSpawnFailure {
        argv: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("target timed out after {timeout_ms}ms")]
    TargetTimeout { timeout_ms: u64 },

    #[error("duplicate corpus entry {id}")]
    CorpusDuplicate { id: String },

    #[error("synchronizer I/O error on {path}: {source}")]
    SyncIO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("minimizer exhausted its execution budget ({budget} executions); kept best candidate")]
    MinimizerBudgetExhausted { budget: u64 },

    #[error("invariant violated: {context}")]
    InvariantViolation { context: String },

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FuzzError>;
