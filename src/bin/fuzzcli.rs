//! Command-line front-end for `covfuzz`. Out of the core's scope proper
//! (`spec.md` §1 lists the CLI among the external collaborators), this is
//! the thin layer that turns flags into a [`Config`] and either runs the
//! [`Supervisor`] directly or, when re-exec'd by one, a single [`Driver`].

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use num_format::{Locale, ToFormattedString};

use covfuzz::config::Config;
use covfuzz::driver::Driver;
use covfuzz::logging::{log, LogType};
use covfuzz::mutation::protocol::Protocol;
use covfuzz::supervisor::{Supervisor, WorkerLaunchSpec, WORKER_SPEC_ENV};

#[derive(Debug, Parser)]
#[clap(
    name = "fuzzcli",
    about = "Coverage-guided, mutation-based fuzzer for subprocess targets."
)]
struct Cli {
    /// Path to the target executable.
    #[clap(name = "TARGET", required = true)]
    target: String,

    /// Arguments passed to the target. A literal `@@` is replaced
    /// per-execution with a path to a temp file holding the mutant;
    /// otherwise the mutant is delivered on stdin.
    #[clap(name = "ARGS", multiple_values = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Directory to read initial seed inputs from.
    #[clap(short = 'i', long = "seeds", required = true)]
    seeds_dir: PathBuf,

    /// Directory under which `corpus/`, `crashes/`, and `stats.json` are
    /// written (`spec.md` §6's on-disk layout).
    #[clap(short = 'o', long = "out-dir", required = true)]
    out_dir: PathBuf,

    /// Timeout for a single execution, in milliseconds.
    #[clap(short = 't', long = "timeout", default_value = "5000")]
    timeout_ms: u64,

    /// Per-child memory limit, in bytes.
    #[clap(long = "memory-limit", default_value = "1073741824")]
    memory_limit_bytes: u64,

    /// Stop after this many total executions across all workers.
    #[clap(long = "max-executions")]
    max_executions: Option<u64>,

    /// Stop after this many seconds.
    #[clap(short = 'd', long = "duration")]
    max_duration_s: Option<u64>,

    /// Number of independent worker processes to run.
    #[clap(short = 'w', long = "workers", default_value = "1")]
    workers: usize,

    /// Seconds between corpus-sharing sync ticks.
    #[clap(long = "sync-interval", default_value = "5")]
    sync_interval_s: u64,

    /// Skip delta-debugging minimization of new crashes.
    #[clap(long = "no-minimize")]
    no_minimize: bool,

    /// Don't set sanitizer environment variables for the child.
    #[clap(long = "no-sanitizers")]
    no_sanitizers: bool,

    /// Protocol-aware field mutation to layer on top of havoc/dictionary.
    #[clap(long = "protocol", arg_enum)]
    protocol: Option<ProtocolArg>,
}

#[derive(Debug, Clone, Copy, clap::ArgEnum)]
enum ProtocolArg {
    Http,
    Dns,
    Smtp,
    Generic,
}

impl From<ProtocolArg> for Protocol {
    fn from(p: ProtocolArg) -> Self {
        match p {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Dns => Protocol::Dns,
            ProtocolArg::Smtp => Protocol::Smtp,
            ProtocolArg::Generic => Protocol::Generic,
        }
    }
}

fn install_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    for sig in signal_hook::consts::TERM_SIGNALS {
        let _ = signal_hook::flag::register(*sig, Arc::clone(&stop));
    }
    stop
}

/// Re-exec'd worker entry point: read the launch spec the supervisor wrote,
/// run exactly one [`Driver`] loop, and report its own stop via the same
/// signal convention the supervisor uses to stop the whole fleet.
fn run_worker(spec_path: &str) -> covfuzz::error::Result<()> {
    let bytes = std::fs::read(spec_path)?;
    let spec: WorkerLaunchSpec = serde_json::from_slice(&bytes)?;
    let stop = install_stop_flag();
    let mut driver = Driver::new(spec.worker_id, spec.config, spec.protocol, spec.fields)?;
    driver.run(stop)
}

fn main() {
    if let Ok(spec_path) = std::env::var(WORKER_SPEC_ENV) {
        if let Err(e) = run_worker(&spec_path) {
            log(LogType::Failure, &format!("worker error: {e}"));
            std::process::exit(1);
        }
        return;
    }

    let cli = Cli::parse();

    let mut argv = vec![cli.target];
    argv.extend(cli.args);

    let config = Config {
        argv,
        seeds_dir: cli.seeds_dir,
        crash_dir: cli.out_dir.join("crashes"),
        corpus_dir: cli.out_dir.join("corpus"),
        timeout_ms: cli.timeout_ms,
        memory_limit_bytes: cli.memory_limit_bytes,
        max_executions: cli.max_executions,
        max_duration_s: cli.max_duration_s,
        workers: cli.workers,
        sync_interval_s: cli.sync_interval_s,
        minimize_crashes: !cli.no_minimize,
        sanitizers: !cli.no_sanitizers,
        sync_root: None,
    };

    let protocol = cli.protocol.map(Protocol::from);
    let supervisor = Supervisor::new(config, protocol, Vec::new());
    let stop = install_stop_flag();

    log(LogType::Neutral, "starting fuzzing campaign");
    match supervisor.run(cli.max_duration_s.map(std::time::Duration::from_secs), stop) {
        Ok(stats) => {
            log(
                LogType::Success,
                &format!(
                    "done: {} execs, {} crashes, {} hangs, {} edges",
                    stats.executions.to_formatted_string(&Locale::en),
                    stats.crashes.to_formatted_string(&Locale::en),
                    stats.hangs.to_formatted_string(&Locale::en),
                    stats.coverage_edges.to_formatted_string(&Locale::en),
                ),
            );
            if let Ok(bytes) = serde_json::to_vec_pretty(&stats) {
                let _ = std::fs::write(cli.out_dir.join("stats.json"), bytes);
            }
        }
        Err(e) => {
            log(LogType::Failure, &format!("fatal supervisor error: {e}"));
            std::process::exit(1);
        }
    }
}
