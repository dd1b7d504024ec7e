//! Configuration options the core recognizes (`spec.md` §6). Everything else
//! — CLI ergonomics, dashboards, config-file loading — is an external
//! collaborator's concern; this struct is the narrow interface the core
//! actually reads.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_timeout_ms() -> u64 {
    5000
}

fn default_memory_limit_bytes() -> u64 {
    1 << 30
}

fn default_workers() -> usize {
    1
}

fn default_sync_interval_s() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `[program, arg0, arg1, ...]`; a literal `@@` argument is replaced
    /// per-execution with a path to a temp file holding the mutant.
    pub argv: Vec<String>,

    pub seeds_dir: PathBuf,
    pub crash_dir: PathBuf,
    pub corpus_dir: PathBuf,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,

    pub max_executions: Option<u64>,
    pub max_duration_s: Option<u64>,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_sync_interval_s")]
    pub sync_interval_s: u64,

    #[serde(default = "default_true")]
    pub minimize_crashes: bool,

    #[serde(default = "default_true")]
    pub sanitizers: bool,

    /// Root directory workers publish/import through. `None` means "create
    /// a fresh temp directory" (the supervisor's job).
    pub sync_root: Option<PathBuf>,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_s)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_s.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            argv: Vec::new(),
            seeds_dir: PathBuf::from("seeds"),
            crash_dir: PathBuf::from("crashes"),
            corpus_dir: PathBuf::from("corpus"),
            timeout_ms: default_timeout_ms(),
            memory_limit_bytes: default_memory_limit_bytes(),
            max_executions: None,
            max_duration_s: None,
            workers: default_workers(),
            sync_interval_s: default_sync_interval_s(),
            minimize_crashes: true,
            sanitizers: true,
            sync_root: None,
        }
    }
}
