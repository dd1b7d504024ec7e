//! Worker-to-supervisor stats records (`spec.md` §6) and the aggregate
//! computation the supervisor runs over them.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub executions: u64,
    pub crashes: u64,
    pub hangs: u64,
    pub coverage_edges: HashSet<u64>,
    pub last_update: f64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            executions: 0,
            crashes: 0,
            hangs: 0,
            coverage_edges: HashSet::new(),
            last_update: now_unix_float(),
        }
    }

    pub fn touch(&mut self) {
        self.last_update = now_unix_float();
    }

    /// Atomic write-then-rename, the same publication discipline the
    /// synchronizer uses for corpus entries.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(self)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn now_unix_float() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregateStats {
    pub executions: u64,
    pub crashes: u64,
    pub hangs: u64,
    pub coverage_edges: usize,
    pub active_workers: usize,
    pub inactive_workers: usize,
}

/// Sum per-worker counters and union their edge sets; workers whose
/// `last_update` is older than `inactivity_threshold` are counted as
/// inactive but still contribute their last-known numbers (`spec.md` §4.10:
/// "flagged inactive... but are not killed unless they are also dead").
pub fn aggregate(workers: &[WorkerStats], inactivity_threshold_s: f64) -> AggregateStats {
    let now = now_unix_float();
    let mut edges: HashSet<u64> = HashSet::new();
    let mut agg = AggregateStats::default();
    for w in workers {
        agg.executions += w.executions;
        agg.crashes += w.crashes;
        agg.hangs += w.hangs;
        edges.extend(&w.coverage_edges);
        if now - w.last_update > inactivity_threshold_s {
            agg.inactive_workers += 1;
        } else {
            agg.active_workers += 1;
        }
    }
    agg.coverage_edges = edges.len();
    agg
}
