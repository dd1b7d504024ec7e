//! Executor (C5): spawns the target, feeds the mutant, and normalizes the
//! process-group's exit/signal/timeout outcome into an `ExecutionResult`.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::config::Config;
use crate::coverage::{CoverageMap, MAP_SIZE};
use crate::error::{FuzzError, Result};

/// Synthetic signal number reported on a timeout kill, distinct from any
/// real POSIX signal (the highest real one in common use is `SIGRTMAX`,
/// well below this).
pub const TIMEOUT_SIGNAL: i32 = 9000;

/// Environment variable carrying the path to the per-execution coverage
/// region. An instrumented target writes its edge hit counts there instead
/// of this process calling `CoverageMap::record` directly — there is no
/// in-process emulator here, coverage comes from an external, separately
/// built target.
pub const COVERAGE_PATH_ENV: &str = "COVFUZZ_COVERAGE_PATH";

const STDERR_TAIL_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exited_normally: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
}

impl ExecutionResult {
    pub fn is_hang(&self) -> bool {
        self.signal == Some(TIMEOUT_SIGNAL)
    }
}

/// Run `argv` against `stdin_bytes`, replacing a literal `@@` argument with
/// a temp file path holding the mutant (delivered on stdin otherwise).
/// Kills the whole process group on timeout so grandchildren the target
/// spawns don't outlive it.
pub fn execute(
    argv: &[String],
    stdin_bytes: &[u8],
    config: &Config,
) -> Result<ExecutionResult> {
    execute_inner(argv, stdin_bytes, config, None)
}

fn execute_inner(
    argv: &[String],
    stdin_bytes: &[u8],
    config: &Config,
    coverage_path: Option<&std::path::Path>,
) -> Result<ExecutionResult> {
    if argv.is_empty() {
        return Err(FuzzError::InvariantViolation {
            context: "executor called with empty argv".to_string(),
        });
    }

    let mut file_arg = None;
    if argv.iter().any(|a| a == "@@") {
        let mut f = tempfile::NamedTempFile::new().map_err(|source| FuzzError::TargetSpawnFailure {
            argv: argv.to_vec(),
            source,
        })?;
        f.write_all(stdin_bytes)
            .map_err(|source| FuzzError::TargetSpawnFailure {
                argv: argv.to_vec(),
                source,
            })?;
        file_arg = Some(f);
    }

    let mut cmd = Command::new(&argv[0]);
    for arg in &argv[1..] {
        if arg == "@@" {
            cmd.arg(file_arg.as_ref().unwrap().path());
        } else {
            cmd.arg(arg);
        }
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if config.sanitizers {
        cmd.env("ASAN_OPTIONS", "abort_on_error=1:detect_leaks=0");
        cmd.env("MSAN_OPTIONS", "abort_on_error=1:detect_leaks=0");
        cmd.env("UBSAN_OPTIONS", "abort_on_error=1:detect_leaks=0");
    }
    if let Some(path) = coverage_path {
        cmd.env(COVERAGE_PATH_ENV, path);
    }

    let memlimit = config.memory_limit_bytes;
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setsid().ok();
            if memlimit > 0 {
                let rlim = libc_rlimit(memlimit);
                nix::libc::setrlimit(nix::libc::RLIMIT_AS, &rlim);
            }
            Ok(())
        });
    }

    let start = Instant::now();
    let mut child: Child = cmd.spawn().map_err(|source| FuzzError::TargetSpawnFailure {
        argv: argv.to_vec(),
        source,
    })?;

    // Stdin is written, and stdout/stderr are drained, on separate threads
    // concurrently with the wait below. A target that writes more than the
    // pipe buffer's worth of output before finishing reading stdin would
    // otherwise deadlock the parent against the child: writing the whole
    // payload synchronously here, before anything reads the child's pipes,
    // blocks this thread forever on a full pipe while the child blocks on a
    // full stdout/stderr pipe of its own, with `wait_with_timeout` never
    // even getting a chance to enforce `timeout_ms`.
    let stdin_handle = child.stdin.take().map(|mut stdin| {
        let bytes = if file_arg.is_none() {
            stdin_bytes.to_vec()
        } else {
            Vec::new()
        };
        std::thread::spawn(move || {
            let _ = stdin.write_all(&bytes);
            // Dropping `stdin` here closes our end of the pipe, signaling EOF.
        })
    });
    let stdout_handle = child
        .stdout
        .take()
        .map(|stdout| std::thread::spawn(move || read_all(stdout)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|stderr| std::thread::spawn(move || read_all(stderr)));

    let pid = Pid::from_raw(child.id() as i32);
    let outcome = wait_with_timeout(pid, config.timeout());
    let wall_time = start.elapsed();

    // Only join the writer/reader threads once the child is confirmed dead
    // (already exited, or just killed below): joining any sooner, while a
    // hung child still holds its pipe ends open, would block this thread
    // for the same reason a synchronous write used to.
    if let WaitOutcome::TimedOut = outcome {
        let _ = killpg(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
    }

    if let Some(h) = stdin_handle {
        let _ = h.join();
    }
    let stdout = stdout_handle.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr_full = stderr_handle.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = cap_tail(stderr_full, STDERR_TAIL_BYTES);

    match outcome {
        WaitOutcome::Exited(status) => Ok(normalize(status, stdout, stderr, wall_time)),
        WaitOutcome::TimedOut => Ok(ExecutionResult {
            exited_normally: false,
            exit_code: None,
            signal: Some(TIMEOUT_SIGNAL),
            stdout: Vec::new(),
            stderr,
            wall_time,
        }),
    }
}

/// Run `argv` exactly as [`execute`] does, additionally pre-zeroing a
/// coverage scratch file, exporting its path via [`COVERAGE_PATH_ENV`], and
/// loading whatever the target wrote back into `cov` once it exits (or
/// times out — partial coverage from a hung execution still counts).
pub fn execute_with_coverage(
    argv: &[String],
    stdin_bytes: &[u8],
    config: &Config,
    cov: &mut CoverageMap,
) -> Result<ExecutionResult> {
    let shm = tempfile::NamedTempFile::new().map_err(|source| FuzzError::TargetSpawnFailure {
        argv: argv.to_vec(),
        source,
    })?;
    std::fs::write(shm.path(), vec![0u8; MAP_SIZE]).map_err(|source| FuzzError::TargetSpawnFailure {
        argv: argv.to_vec(),
        source,
    })?;

    let result = execute_inner(argv, stdin_bytes, config, Some(shm.path()))?;

    if let Ok(bytes) = std::fs::read(shm.path()) {
        cov.load_external_trace(&bytes);
    }
    Ok(result)
}

fn libc_rlimit(bytes: u64) -> nix::libc::rlimit {
    nix::libc::rlimit {
        rlim_cur: bytes as nix::libc::rlim_t,
        rlim_max: bytes as nix::libc::rlim_t,
    }
}

enum WaitOutcome {
    Exited(WaitStatus),
    TimedOut,
}

fn wait_with_timeout(pid: Pid, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    return WaitOutcome::TimedOut;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(status) => return WaitOutcome::Exited(status),
            Err(_) => return WaitOutcome::TimedOut,
        }
    }
}

fn read_all(mut h: impl std::io::Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = h.read_to_end(&mut buf);
    buf
}

fn cap_tail(mut buf: Vec<u8>, cap: usize) -> Vec<u8> {
    if buf.len() > cap {
        let start = buf.len() - cap;
        buf.drain(0..start);
    }
    buf
}

/// `spec.md` §4.5: "Negative exit codes on platforms that report them as
/// `-signal` are normalized: `signal = |exit_code|` iff `exit_code < 0`,
/// otherwise `signal = None`." `nix::WaitStatus` already separates the two
/// cases, so this just maps them onto that rule.
fn normalize(
    status: WaitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    wall_time: Duration,
) -> ExecutionResult {
    match status {
        WaitStatus::Exited(_, code) => ExecutionResult {
            exited_normally: true,
            exit_code: Some(code),
            signal: None,
            stdout,
            stderr,
            wall_time,
        },
        WaitStatus::Signaled(_, signal, _) => ExecutionResult {
            exited_normally: false,
            exit_code: None,
            signal: Some(signal as i32),
            stdout,
            stderr,
            wall_time,
        },
        _ => ExecutionResult {
            exited_normally: false,
            exit_code: None,
            signal: None,
            stdout,
            stderr,
            wall_time,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        let mut c = Config::default();
        c.sanitizers = false;
        c.timeout_ms = 2000;
        c
    }

    #[test]
    fn empty_stdin_is_accepted() {
        let config = cfg();
        let argv = vec!["/bin/cat".to_string()];
        let result = execute(&argv, &[], &config).unwrap();
        assert!(result.exited_normally);
    }

    #[test]
    fn echoes_stdin_to_stdout() {
        let config = cfg();
        let argv = vec!["/bin/cat".to_string()];
        let result = execute(&argv, b"hello", &config).unwrap();
        assert_eq!(result.stdout, b"hello");
    }

    #[test]
    fn timeout_is_reported_as_synthetic_signal() {
        let mut config = cfg();
        config.timeout_ms = 200;
        let argv = vec!["/bin/sleep".to_string(), "5".to_string()];
        let result = execute(&argv, &[], &config).unwrap();
        assert_eq!(result.signal, Some(TIMEOUT_SIGNAL));
        assert!(result.wall_time < Duration::from_secs(5));
    }

    #[test]
    fn empty_argv_is_an_invariant_violation() {
        let config = cfg();
        let err = execute(&[], &[], &config).unwrap_err();
        matches!(err, FuzzError::InvariantViolation { .. });
    }

    #[test]
    fn large_stdin_and_stdout_do_not_deadlock() {
        // `cat` echoes stdin to stdout; a payload well past the typical
        // 64KiB pipe buffer only completes if the stdin writer and the
        // stdout/stderr readers run concurrently rather than the writer
        // blocking on a full pipe before anything drains stdout.
        let config = cfg();
        let argv = vec!["/bin/cat".to_string()];
        let payload = vec![b'A'; 4 * 1024 * 1024];
        let result = execute(&argv, &payload, &config).unwrap();
        assert!(result.exited_normally);
        assert_eq!(result.stdout.len(), payload.len());
    }

    #[test]
    fn child_can_populate_the_coverage_region_via_env_var() {
        let config = cfg();
        let script = format!("printf '\\x05\\x09' > \"${}\"", COVERAGE_PATH_ENV);
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), script];
        let mut cov = CoverageMap::new();
        execute_with_coverage(&argv, &[], &config, &mut cov).unwrap();
        // load_external_trace copied exactly the two bytes the child wrote.
        assert_eq!(cov.digest(), {
            let mut expected = CoverageMap::new();
            expected.load_external_trace(&[5, 9]);
            expected.digest()
        });
    }
}
