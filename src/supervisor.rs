//! Supervisor (C10): spawns and monitors N worker processes, aggregates
//! their stats, and enforces the run's overall duration, per `spec.md`
//! §4.10. The teacher's `main()` coordinates worker *threads* sharing an
//! `Arc`'d emulator via `mpsc`; `spec.md` §5 requires OS *processes* instead
//! ("Coverage maps, corpora, schedulers, and strategy weights are strictly
//! process-local"), so the mpsc channel becomes periodic reads of the
//! per-worker stats files each driver already writes through
//! [`crate::stats::WorkerStats::write_atomic`] — a poll is the
//! process-boundary analogue of draining a channel.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{FuzzError, Result};
use crate::logging::{log, LogType};
use crate::mutation::protocol::{Field, Protocol};
use crate::stats::{aggregate, now_unix_float, AggregateStats, WorkerStats};

const STATS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_INACTIVITY_THRESHOLD_S: f64 = 10.0;
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Environment variable a worker process checks on startup; when set it
/// points at a [`WorkerLaunchSpec`] JSON file and the binary runs exactly
/// one driver loop instead of acting as a supervisor.
pub const WORKER_SPEC_ENV: &str = "COVFUZZ_WORKER_SPEC";

/// Everything a re-exec'd worker process needs that can't travel through
/// `argv`: the config (already `Serialize`/`Deserialize`) plus the optional
/// protocol-aware mutation setup.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerLaunchSpec {
    pub worker_id: usize,
    pub config: Config,
    pub protocol: Option<Protocol>,
    pub fields: Vec<Field>,
}

struct WorkerHandle {
    id: usize,
    child: Child,
    spec_path: PathBuf,
}

pub struct Supervisor {
    config: Config,
    protocol: Option<Protocol>,
    fields: Vec<Field>,
    inactivity_threshold_s: f64,
}

impl Supervisor {
    pub fn new(config: Config, protocol: Option<Protocol>, fields: Vec<Field>) -> Self {
        Self {
            config,
            protocol,
            fields,
            inactivity_threshold_s: DEFAULT_INACTIVITY_THRESHOLD_S,
        }
    }

    /// Run until `duration` elapses (if given) or `stop` is flipped — by an
    /// installed signal handler in the common case, or by a caller embedding
    /// the supervisor in its own process. Always cleans up the shared
    /// directory and terminates any still-running workers before returning.
    pub fn run(&self, duration: Option<Duration>, stop: Arc<AtomicBool>) -> Result<AggregateStats> {
        let shared_dir = tempfile::tempdir().map_err(FuzzError::Io)?;
        let sync_root = shared_dir.path().to_path_buf();

        let exe = std::env::current_exe().map_err(FuzzError::Io)?;
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let handle = self.spawn_worker(&exe, &sync_root, id)?;
            handles.push(handle);
        }
        log(
            LogType::Success,
            &format!("spawned {} worker process(es) under {}", handles.len(), sync_root.display()),
        );

        let start = Instant::now();
        let mut last_agg = AggregateStats::default();
        loop {
            std::thread::sleep(STATS_POLL_INTERVAL);

            reap_dead_workers(&mut handles);

            let workers_stats = read_all_stats(&sync_root, &handles);
            last_agg = aggregate(&workers_stats, self.inactivity_threshold_s);

            let stop_requested = stop.load(Ordering::Relaxed);
            let duration_elapsed = duration.map(|d| start.elapsed() >= d).unwrap_or(false);
            let all_dead = handles.is_empty();
            if stop_requested || duration_elapsed || all_dead {
                break;
            }
        }

        self.terminate_all(&mut handles);
        log(
            LogType::Neutral,
            &format!(
                "supervisor stopped: {} execs, {} crashes, {} hangs, {} edges",
                last_agg.executions, last_agg.crashes, last_agg.hangs, last_agg.coverage_edges
            ),
        );
        Ok(last_agg)
    }

    fn spawn_worker(&self, exe: &std::path::Path, sync_root: &std::path::Path, id: usize) -> Result<WorkerHandle> {
        let mut worker_config = self.config.clone();
        worker_config.sync_root = Some(sync_root.to_path_buf());

        let spec = WorkerLaunchSpec {
            worker_id: id,
            config: worker_config,
            protocol: self.protocol,
            fields: self.fields.clone(),
        };
        let spec_path = sync_root.join(format!("worker_{id}.spec.json"));
        let bytes = serde_json::to_vec(&spec)?;
        let mut f = std::fs::File::create(&spec_path).map_err(FuzzError::Io)?;
        f.write_all(&bytes).map_err(FuzzError::Io)?;

        let mut cmd = Command::new(exe);
        cmd.env(WORKER_SPEC_ENV, &spec_path);
        // Each worker gets its own process group so a soft-kill of one
        // never reaches its siblings or the supervisor itself.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().ok();
                Ok(())
            });
        }
        let child = cmd.spawn().map_err(|source| FuzzError::TargetSpawnFailure {
            argv: vec![exe.display().to_string()],
            source,
        })?;
        Ok(WorkerHandle { id, child, spec_path })
    }

    /// Soft signal first, then a bounded grace period, then force-kill —
    /// `spec.md` §4.10's termination contract.
    fn terminate_all(&self, handles: &mut Vec<WorkerHandle>) {
        for h in handles.iter() {
            let pid = Pid::from_raw(h.child.id() as i32);
            let _ = kill(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + TERMINATE_GRACE_PERIOD;
        while Instant::now() < deadline {
            reap_dead_workers(handles);
            if handles.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for h in handles.iter_mut() {
            let pid = Pid::from_raw(h.child.id() as i32);
            let _ = kill(pid, Signal::SIGKILL);
            let _ = h.child.wait();
        }
        handles.clear();
    }
}

fn reap_dead_workers(handles: &mut Vec<WorkerHandle>) {
    handles.retain_mut(|h| match h.child.try_wait() {
        Ok(Some(_status)) => false,
        Ok(None) => true,
        Err(_) => false,
    });
}

fn read_all_stats(sync_root: &std::path::Path, handles: &[WorkerHandle]) -> Vec<WorkerStats> {
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        let path = sync_root.join(format!("worker_{}.stats.json", h.id));
        match WorkerStats::read(&path) {
            Ok(s) => out.push(s),
            Err(_) => {
                // Worker hasn't written its first report yet; synthesize a
                // fresh-looking record so it still counts as active.
                let mut placeholder = WorkerStats::new(h.id);
                placeholder.last_update = now_unix_float();
                out.push(placeholder);
            }
        }
        let _ = &h.spec_path;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn base_config(root: &std::path::Path) -> Config {
        let mut c = Config::default();
        c.argv = vec!["/bin/cat".to_string()];
        c.seeds_dir = root.join("seeds");
        c.crash_dir = root.join("crashes");
        c.corpus_dir = root.join("corpus");
        c.workers = 2;
        c.max_executions = Some(3);
        c.sanitizers = false;
        c.timeout_ms = 1000;
        c
    }

    #[test]
    fn worker_launch_spec_round_trips_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let config = base_config(tmp.path());
        let spec = WorkerLaunchSpec {
            worker_id: 3,
            config,
            protocol: Some(Protocol::Http),
            fields: vec![],
        };
        let bytes = serde_json::to_vec(&spec).unwrap();
        let path = tmp.path().join("spec.json");
        std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();

        let loaded: WorkerLaunchSpec = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.worker_id, 3);
        assert_eq!(loaded.protocol, Some(Protocol::Http));
    }

    #[test]
    fn aggregate_counts_missing_stats_files_as_fresh_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = vec![WorkerStats::new(0), WorkerStats::new(1)];
        let agg = aggregate(&stats, DEFAULT_INACTIVITY_THRESHOLD_S);
        assert_eq!(agg.active_workers, 2);
        assert_eq!(agg.inactive_workers, 0);
        let _ = tmp;
    }
}
