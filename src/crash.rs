//! Crash Detector (C6): classifies an `ExecutionResult`, extracts a best-
//! effort stack trace, computes a dedup hash, and walks the
//! observed→deduped→classified→minimized→persisted state machine.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{FuzzError, Result};
use crate::executor::ExecutionResult;
use crate::hashing::sha256_trunc16;
use crate::timestamp::now_iso8601;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrashType {
    Segv,
    Abrt,
    Ill,
    Fpe,
    Bus,
    Hang,
    Asan,
    Msan,
    Ubsan,
}

impl CrashType {
    fn as_str(self) -> &'static str {
        match self {
            CrashType::Segv => "SEGV",
            CrashType::Abrt => "ABRT",
            CrashType::Ill => "ILL",
            CrashType::Fpe => "FPE",
            CrashType::Bus => "BUS",
            CrashType::Hang => "HANG",
            CrashType::Asan => "ASAN",
            CrashType::Msan => "MSAN",
            CrashType::Ubsan => "UBSAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exploitability {
    High,
    Medium,
    Low,
    None,
}

impl Exploitability {
    fn as_str(self) -> &'static str {
        match self {
            Exploitability::High => "HIGH",
            Exploitability::Medium => "MEDIUM",
            Exploitability::Low => "LOW",
            Exploitability::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    pub addr: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub offset: Option<String>,
}

/// Classify stderr into the crash signal frames, in order of preference:
/// sanitizer-style, then GDB, then LLDB, then Valgrind.
pub fn extract_stack(stderr: &[u8]) -> Vec<StackFrame> {
    let text = String::from_utf8_lossy(stderr);
    let sanitizer = extract_sanitizer_frames(&text);
    if !sanitizer.is_empty() {
        return sanitizer;
    }
    let gdb = extract_gdb_frames(&text);
    if !gdb.is_empty() {
        return gdb;
    }
    let lldb = extract_lldb_frames(&text);
    if !lldb.is_empty() {
        return lldb;
    }
    extract_valgrind_frames(&text)
}

/// `    #0 0x55a1b2 in some_fn /path/to/file.c:42:5`
fn extract_sanitizer_frames(text: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.splitn(2, char::is_whitespace).nth(1) else {
            continue;
        };
        let rest = rest.trim();
        let Some(addr_end) = rest.find(' ') else {
            continue;
        };
        let addr = rest[..addr_end].to_string();
        let rest = rest[addr_end..].trim_start();
        let Some(rest) = rest.strip_prefix("in ") else {
            continue;
        };
        let (function, location) = match rest.rsplit_once(' ') {
            Some((f, loc)) => (f.to_string(), Some(loc.to_string())),
            None => (rest.to_string(), None),
        };
        let (file, line_no) = match &location {
            Some(loc) => split_file_line(loc),
            None => (None, None),
        };
        frames.push(StackFrame {
            addr: Some(addr),
            function: Some(function),
            file,
            line: line_no,
            offset: None,
        });
    }
    frames
}

/// `#0  0x0000000000401136 in vuln_fn (argc=1) at prog.c:10`
fn extract_gdb_frames(text: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with('#') {
            continue;
        }
        let Some(at_idx) = line.find(" at ") else {
            continue;
        };
        let head = &line[..at_idx];
        let location = &line[at_idx + 4..];
        let addr = head
            .split_whitespace()
            .find(|t| t.starts_with("0x"))
            .map(|s| s.to_string());
        let function = head
            .split(" in ")
            .nth(1)
            .and_then(|s| s.split_whitespace().next())
            .map(|s| s.to_string());
        if addr.is_none() && function.is_none() {
            continue;
        }
        let (file, line_no) = split_file_line(location);
        frames.push(StackFrame {
            addr,
            function,
            file,
            line: line_no,
            offset: None,
        });
    }
    frames
}

/// `frame #0: 0x0000000100003f58 a.out`fn_name` + 24 at main.c:12:5`
fn extract_lldb_frames(text: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("frame #") {
            continue;
        }
        let addr = line
            .split_whitespace()
            .find(|t| t.starts_with("0x"))
            .map(|s| s.to_string());
        let function = line
            .split('`')
            .nth(1)
            .map(|s| s.split(" + ").next().unwrap_or(s).to_string());
        let (file, line_no) = match line.find(" at ") {
            Some(idx) => split_file_line(&line[idx + 4..]),
            None => (None, None),
        };
        if addr.is_none() && function.is_none() {
            continue;
        }
        frames.push(StackFrame {
            addr,
            function,
            file,
            line: line_no,
            offset: None,
        });
    }
    frames
}

/// `   at 0x4005F4: vuln (prog.c:10)`
fn extract_valgrind_frames(text: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("at 0x") && !line.starts_with("by 0x") {
            continue;
        }
        let Some(colon) = line.find(": ") else {
            continue;
        };
        let addr = line[..colon].rsplit(' ').next().map(|s| s.to_string());
        let rest = &line[colon + 2..];
        let (function, location) = match rest.rsplit_once(" (") {
            Some((f, loc)) => (f.to_string(), Some(loc.trim_end_matches(')').to_string())),
            None => (rest.to_string(), None),
        };
        let (file, line_no) = match &location {
            Some(loc) => split_file_line(loc),
            None => (None, None),
        };
        frames.push(StackFrame {
            addr,
            function: Some(function),
            file,
            line: line_no,
            offset: None,
        });
    }
    frames
}

fn split_file_line(location: &str) -> (Option<String>, Option<u32>) {
    let location = location.trim().trim_end_matches(')');
    match location.rsplit_once(':') {
        Some((file, rest)) => {
            let line_no = rest.split(':').next().and_then(|s| s.parse().ok());
            (Some(file.to_string()), line_no)
        }
        None => (Some(location.to_string()), None),
    }
}

/// First-match-wins classification over sanitizer patterns, then signal
/// number, then timeout.
pub fn classify(result: &ExecutionResult) -> Option<CrashType> {
    let stderr = String::from_utf8_lossy(&result.stderr);
    if stderr.contains("AddressSanitizer") {
        return Some(CrashType::Asan);
    }
    if stderr.contains("MemorySanitizer") {
        return Some(CrashType::Msan);
    }
    if stderr.contains("UndefinedBehaviorSanitizer") {
        return Some(CrashType::Ubsan);
    }
    if result.is_hang() {
        return Some(CrashType::Hang);
    }
    match result.signal {
        Some(11) => Some(CrashType::Segv),
        Some(6) => Some(CrashType::Abrt),
        Some(4) => Some(CrashType::Ill),
        Some(8) => Some(CrashType::Fpe),
        Some(7) => Some(CrashType::Bus),
        _ => None,
    }
}

pub fn exploitability(crash_type: CrashType, stderr: &[u8]) -> Exploitability {
    let text = String::from_utf8_lossy(stderr);
    let high_patterns = ["heap-use-after-free", "heap-buffer-overflow", "stack-buffer-overflow"];
    if high_patterns.iter().any(|p| text.contains(p)) {
        return Exploitability::High;
    }
    match crash_type {
        CrashType::Segv if text.contains("stack") => Exploitability::High,
        CrashType::Segv | CrashType::Bus | CrashType::Asan => Exploitability::Medium,
        CrashType::Abrt | CrashType::Ill | CrashType::Fpe | CrashType::Hang => Exploitability::Low,
        CrashType::Msan | CrashType::Ubsan => Exploitability::Medium,
    }
}

pub fn crash_hash(crash_type: CrashType, signal: Option<i32>, frames: &[StackFrame], stderr: &[u8]) -> String {
    let mut key = String::new();
    key.push_str(crash_type.as_str());
    key.push('|');
    key.push_str(&signal.map(|s| s.to_string()).unwrap_or_default());
    key.push('|');
    if frames.is_empty() {
        let tail_start = stderr.len().saturating_sub(4096);
        key.push_str(&String::from_utf8_lossy(&stderr[tail_start..]));
    } else {
        for frame in frames.iter().take(5) {
            key.push_str(frame.function.as_deref().unwrap_or(""));
            key.push(';');
        }
    }
    sha256_trunc16(key.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRecord {
    pub crash_hash: String,
    pub bucket_id: String,
    pub crash_type: String,
    pub exploitability: String,
    pub signal_number: Option<i32>,
    pub exit_code: Option<i32>,
    pub first_seen: String,
    pub last_seen: String,
    pub count: u64,
    pub input_size: usize,
    pub minimized_size: Option<usize>,
    pub stack_trace: Option<Vec<StackFrame>>,
    pub stderr_tail: String,
}

/// The crash store's state machine, process-local per worker like every
/// other piece of mutable fuzzing state (`spec.md` §5).
pub struct CrashStore {
    dir: PathBuf,
    known: FxHashMap<String, CrashRecord>,
}

impl CrashStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            known: HashMap::default(),
        }
    }

    /// `observed → deduped → classified`: returns `None` when `result` is
    /// not a crash, or `Some(existing_count_incremented)` / a fresh record
    /// otherwise. Does not touch the filesystem; call [`CrashStore::persist`]
    /// to reach the `minimized → persisted` end of the pipeline.
    pub fn observe(&mut self, result: &ExecutionResult, input: &[u8]) -> Option<CrashRecord> {
        let crash_type = classify(result)?;
        let frames = extract_stack(&result.stderr);
        let hash = crash_hash(crash_type, result.signal, &frames, &result.stderr);
        let now = now_iso8601();

        if let Some(existing) = self.known.get_mut(&hash) {
            existing.count += 1;
            existing.last_seen = now;
            return Some(existing.clone());
        }

        let expl = exploitability(crash_type, &result.stderr);
        let record = CrashRecord {
            crash_hash: hash.clone(),
            bucket_id: format!("{}-{}", crash_type.as_str(), expl.as_str()),
            crash_type: crash_type.as_str().to_string(),
            exploitability: expl.as_str().to_string(),
            signal_number: result.signal,
            exit_code: result.exit_code,
            first_seen: now.clone(),
            last_seen: now,
            count: 1,
            input_size: input.len(),
            minimized_size: None,
            stack_trace: if frames.is_empty() { None } else { Some(frames) },
            stderr_tail: String::from_utf8_lossy(&result.stderr).to_string(),
        };
        self.known.insert(hash, record.clone());
        Some(record)
    }

    /// `minimized → persisted`: write `<hash>.input`/`.min`/`.stderr`/`.json`
    /// into the crash store directory.
    pub fn persist(
        &mut self,
        record: &CrashRecord,
        original_input: &[u8],
        minimized_input: Option<&[u8]>,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let base = self.dir.join(&record.crash_hash);
        fs::write(base.with_extension("input"), original_input)?;
        if let Some(min) = minimized_input {
            fs::write(base.with_extension("min"), min)?;
        }
        fs::write(base.with_extension("stderr"), &record.stderr_tail)?;

        let mut record = record.clone();
        record.minimized_size = minimized_input.map(|m| m.len());
        let json = serde_json::to_vec_pretty(&record).map_err(FuzzError::from)?;
        fs::write(base.with_extension("json"), json)?;
        self.known.insert(record.crash_hash.clone(), record);
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Option<&CrashRecord> {
        self.known.get(hash)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn load_existing(dir: &Path) -> Result<Self> {
        let mut store = Self::new(dir.to_path_buf());
        if !dir.exists() {
            return Ok(store);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let bytes = fs::read(&path)?;
                let record: CrashRecord = serde_json::from_slice(&bytes).map_err(FuzzError::from)?;
                store.known.insert(record.crash_hash.clone(), record);
            }
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn segv_result(stderr: &[u8]) -> ExecutionResult {
        ExecutionResult {
            exited_normally: false,
            exit_code: None,
            signal: Some(11),
            stdout: Vec::new(),
            stderr: stderr.to_vec(),
            wall_time: Duration::from_millis(1),
        }
    }

    #[test]
    fn asan_pattern_wins_over_raw_signal() {
        let result = segv_result(b"==1234==ERROR: AddressSanitizer: heap-buffer-overflow\n");
        assert_eq!(classify(&result), Some(CrashType::Asan));
    }

    #[test]
    fn bare_segv_is_classified_by_signal() {
        let result = segv_result(b"");
        assert_eq!(classify(&result), Some(CrashType::Segv));
    }

    #[test]
    fn hang_classification_takes_priority_over_no_signal() {
        let result = ExecutionResult {
            exited_normally: false,
            exit_code: None,
            signal: Some(crate::executor::TIMEOUT_SIGNAL),
            stdout: Vec::new(),
            stderr: Vec::new(),
            wall_time: Duration::from_secs(5),
        };
        assert_eq!(classify(&result), Some(CrashType::Hang));
    }

    #[test]
    fn equal_crash_type_signal_and_frames_hash_equal() {
        let result_a = segv_result(b"#0 0x1 in vuln_fn file.c:10\n#1 0x2 in main file.c:20\n");
        let result_b = segv_result(b"#0 0x9 in vuln_fn other.c:99\n#1 0x8 in main other.c:1\n");
        let frames_a = extract_stack(&result_a.stderr);
        let frames_b = extract_stack(&result_b.stderr);
        let hash_a = crash_hash(CrashType::Segv, Some(11), &frames_a, &result_a.stderr);
        let hash_b = crash_hash(CrashType::Segv, Some(11), &frames_b, &result_b.stderr);
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn dedup_increments_count_on_repeat_observation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CrashStore::new(dir.path().to_path_buf());
        let result = segv_result(b"#0 0x1 in vuln_fn file.c:10\n");
        let first = store.observe(&result, b"AAAA").unwrap();
        assert_eq!(first.count, 1);
        let second = store.observe(&result, b"BBBB").unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.crash_hash, first.crash_hash);
    }

    #[test]
    fn exploitability_high_for_heap_overflow_patterns() {
        assert_eq!(
            exploitability(CrashType::Asan, b"heap-buffer-overflow detected"),
            Exploitability::High
        );
    }
}
