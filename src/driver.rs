//! Fuzz Driver (C8): the per-worker loop composing every other core
//! component, per the canonical step in `spec.md` §4.8. One driver is one
//! OS process; everything it owns is process-local (`spec.md` §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rand::rngs::ThreadRng;
use rand::thread_rng;

use crate::config::Config;
use crate::corpus::{AddOutcome, CorpusStore};
use crate::coverage::CoverageMap;
use crate::crash::CrashStore;
use crate::executor::execute_with_coverage;
use crate::logging::{log, LogType};
use crate::minimizer;
use crate::mutation::protocol::{Field, Protocol};
use crate::mutation::weights::StrategyWeights;
use crate::mutation::MutationContext;
use crate::scheduler::{compute_energy, Scheduler};
use crate::stats::WorkerStats;
use crate::sync::Synchronizer;

/// External stop flag a supervisor (or a signal handler, for a
/// single-process run) can flip to request graceful shutdown.
pub type StopFlag = Arc<AtomicBool>;

pub struct Driver {
    worker_id: usize,
    config: Config,
    coverage: CoverageMap,
    corpus: CorpusStore,
    scheduler: Scheduler,
    crashes: CrashStore,
    synchronizer: Synchronizer,
    stats: WorkerStats,
    rng: ThreadRng,
    protocol: Option<Protocol>,
    fields: Vec<Field>,
    weights: StrategyWeights,
    last_sync: Instant,
    last_import_ts: SystemTime,
    executions: u64,
    start: Instant,
    /// The entry `scheduler.next()` most recently returned, and how many
    /// more mutants to try from it before asking the scheduler again
    /// (`SPEC_FULL.md`'s energy supplement to `spec.md` §4.4).
    current_entry: Option<String>,
    energy_remaining: usize,
}

impl Driver {
    pub fn new(worker_id: usize, config: Config, protocol: Option<Protocol>, fields: Vec<Field>) -> crate::error::Result<Self> {
        let sync_root = config
            .sync_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("covfuzz-sync"));
        let synchronizer = Synchronizer::new(sync_root, worker_id)?;
        let corpus = load_or_seed_corpus(&config)?;
        let mut scheduler = Scheduler::new();
        for entry in corpus.iter_entries() {
            scheduler.add(entry.id.clone());
        }
        let crashes = CrashStore::load_existing(&config.crash_dir)?;
        let weights = StrategyWeights::new(protocol.is_some() && !fields.is_empty());

        Ok(Self {
            worker_id,
            coverage: CoverageMap::new(),
            corpus,
            scheduler,
            crashes,
            synchronizer,
            stats: WorkerStats::new(worker_id),
            rng: thread_rng(),
            protocol,
            fields,
            weights,
            last_sync: Instant::now(),
            // UNIX_EPOCH, not now(): a freshly started (or restarted) worker
            // must catch up on whatever peers already published before it
            // existed, not just what they publish from this point on.
            last_import_ts: SystemTime::UNIX_EPOCH,
            executions: 0,
            start: Instant::now(),
            current_entry: None,
            energy_remaining: 0,
            config,
        })
    }

    /// Number of entries currently in this worker's local corpus.
    pub fn corpus_size(&self) -> usize {
        self.corpus.size()
    }

    fn should_stop(&self, stop: &StopFlag) -> bool {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(max) = self.config.max_executions {
            if self.executions >= max {
                return true;
            }
        }
        if let Some(max_s) = self.config.max_duration_s {
            if self.start.elapsed() >= Duration::from_secs(max_s) {
                return true;
            }
        }
        false
    }

    /// Run the loop until `should_stop()`, then flush a final sync tick and
    /// stats report (`spec.md` §4.8's termination contract).
    pub fn run(&mut self, stop: StopFlag) -> crate::error::Result<()> {
        while !self.should_stop(&stop) {
            self.step()?;
            if self.last_sync.elapsed() >= self.config.sync_interval() {
                self.sync_tick();
                self.last_sync = Instant::now();
            }
        }
        self.sync_tick();
        self.stats.touch();
        self.flush_stats();
        Ok(())
    }

    /// Select a fresh entry (and its energy budget) from the scheduler, or
    /// reuse the one already in flight if it still has energy left.
    fn select_entry(&mut self) -> crate::error::Result<String> {
        if self.energy_remaining == 0 || self.current_entry.is_none() {
            let entry_id = self.scheduler.next(&self.corpus, &mut self.rng)?;
            let entry = self
                .corpus
                .entry(&entry_id)
                .expect("scheduler id always references a live corpus entry");
            self.energy_remaining = compute_energy(entry.new_edges, entry.byte_len(), entry.exec_count, entry.favored);
            self.current_entry = Some(entry_id);
        }
        Ok(self.current_entry.clone().expect("set above"))
    }

    fn step(&mut self) -> crate::error::Result<()> {
        let entry_id = self.select_entry()?;
        self.energy_remaining -= 1;
        let entry_data = self
            .corpus
            .get(&entry_id)
            .expect("scheduler id always references a live corpus entry")
            .to_vec();

        let peers: Vec<Vec<u8>> = self
            .corpus
            .iter_entries()
            .filter(|e| e.id != entry_id)
            .map(|e| e.data.clone())
            .collect();

        let mut ctx = MutationContext::new(&mut self.rng, self.protocol, &self.fields, &mut self.weights);
        let (mutant, strategy) = ctx.mutate(&entry_data, &peers);

        self.coverage.reset();
        let result = execute_with_coverage(&self.config.argv, &mutant, &self.config, &mut self.coverage)?;
        self.executions += 1;
        self.stats.executions += 1;
        if result.is_hang() {
            self.stats.hangs += 1;
        }

        let new_cov = self.coverage.has_new_coverage();

        if let Some(record) = self.crashes.observe(&result, &mutant) {
            self.stats.crashes += 1;
            self.handle_crash(record, mutant.clone())?;
        }

        if new_cov {
            let digest = self.coverage.digest();
            if let AddOutcome::Added(added) = self.corpus.add(mutant, digest, Some(entry_id.clone())) {
                let id = added.id.clone();
                self.scheduler.add(id.clone());
                let new_edges = self.coverage.promote();
                if let Some(added) = self.corpus.entry_mut(&id) {
                    added.new_edges = new_edges;
                }
                self.stats.coverage_edges.insert(digest);
                let _ = self.corpus.persist(&id, &self.config.corpus_dir);
                // SyncIO is logged and skipped for this tick, not propagated
                // (`spec.md` §7): a transient publish failure must not take
                // down the whole worker.
                if let Err(e) = self.synchronizer.publish(self.corpus.get(&id).unwrap_or(&[]), digest) {
                    log(LogType::Failure, &format!("sync publish failed: {e}"));
                }
            }
        }

        if let Some(entry) = self.corpus.entry_mut(&entry_id) {
            entry.exec_count += 1;
        }

        ctx.observe(strategy, success_rate(new_cov), new_cov);
        self.stats.touch();
        Ok(())
    }

    fn handle_crash(&mut self, record: crate::crash::CrashRecord, mutant: Vec<u8>) -> crate::error::Result<()> {
        let minimized = if self.config.minimize_crashes {
            let (min, outcome) = minimizer::minimize(
                &self.config.argv,
                &mutant,
                &record.crash_hash,
                &self.config,
                None,
            );
            if let Err(e) = outcome {
                log(LogType::Failure, &format!("minimizer: {e}"));
            }
            Some(min)
        } else {
            None
        };
        self.crashes.persist(&record, &mutant, minimized.as_deref())?;
        log(
            LogType::Success,
            &format!("worker {}: new crash {} ({})", self.worker_id, record.crash_hash, record.crash_type),
        );
        Ok(())
    }

    /// Publish anything new since the last tick and import peers' new
    /// entries into our own corpus/scheduler.
    fn sync_tick(&mut self) {
        let since = self.last_import_ts;
        let imported = self.synchronizer.import_new(since);
        self.last_import_ts = SystemTime::now();
        for input in imported {
            if let AddOutcome::Added(added) = self.corpus.add(input.data, 0, None) {
                let id = added.id.clone();
                self.scheduler.add(id);
            }
        }
    }

    fn flush_stats(&self) {
        if let Some(root) = &self.config.sync_root {
            let path = root.join(format!("worker_{}.stats.json", self.worker_id));
            if let Err(e) = self.stats.write_atomic(&path) {
                log(LogType::Failure, &format!("stats flush failed: {e}"));
            }
        }
    }
}

fn success_rate(found_new_coverage: bool) -> f64 {
    if found_new_coverage {
        1.0
    } else {
        0.0
    }
}

fn load_or_seed_corpus(config: &Config) -> crate::error::Result<CorpusStore> {
    let mut corpus = CorpusStore::load(&config.corpus_dir)?;
    if corpus.is_empty() {
        if config.seeds_dir.exists() {
            for entry in std::fs::read_dir(&config.seeds_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    let data = std::fs::read(entry.path())?;
                    corpus.add_seed(data);
                }
            }
        }
        if corpus.is_empty() {
            corpus.add_seed(Vec::new());
        }
    }
    Ok(corpus)
}
