//! Synchronizer (C9): a filesystem-mediated, eventually-consistent queue
//! that lets independent worker processes exchange corpus entries without
//! any locking, per the concurrency model in `spec.md` §5.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rustc_hash::FxHashSet;

use crate::error::{FuzzError, Result};
use crate::logging::{log, LogType};

#[derive(Debug, Clone)]
pub struct SyncedInput {
    pub data: Vec<u8>,
    pub coverage_hash: String,
    pub source_worker: String,
    pub ts: SystemTime,
}

/// Owns one worker's `<sync_root>/worker_<i>/queue/` directory: writes go
/// only here, reads only ever touch sibling directories.
pub struct Synchronizer {
    sync_root: PathBuf,
    worker_dir: String,
    published: FxHashSet<u64>,
}

impl Synchronizer {
    pub fn new(sync_root: PathBuf, worker_id: usize) -> Result<Self> {
        let worker_dir = format!("worker_{worker_id}");
        let queue_dir = sync_root.join(&worker_dir).join("queue");
        fs::create_dir_all(&queue_dir).map_err(|source| FuzzError::SyncIO {
            path: queue_dir.clone(),
            source,
        })?;
        Ok(Self {
            sync_root,
            worker_dir,
            published: HashSet::default(),
        })
    }

    fn queue_dir(&self) -> PathBuf {
        self.sync_root.join(&self.worker_dir).join("queue")
    }

    /// Write `bytes` to a temp file in the owning queue, then rename into
    /// place as `id_<input_hash>_<cov8>`. Skips a `coverage_hash` already
    /// published by this worker in this process's lifetime.
    pub fn publish(&mut self, bytes: &[u8], coverage_hash: u64) -> Result<()> {
        if !self.published.insert(coverage_hash) {
            return Ok(());
        }
        let queue_dir = self.queue_dir();
        let input_hash = crate::hashing::sha256_trunc16(bytes);
        // coverage_hash is a full u64 digest; the on-disk field is exactly 8
        // hex chars, so truncate rather than let `{:08x}` zero-pad a wider
        // value up to 16 chars.
        let final_name = format!("id_{input_hash}_{:08x}", coverage_hash as u32);
        let final_path = queue_dir.join(&final_name);
        let tmp_path = queue_dir.join(format!(".{final_name}.tmp"));

        let write_result = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();

        write_result.map_err(|source| FuzzError::SyncIO {
            path: final_path,
            source,
        })
    }

    /// Scan peer queue directories for entries with `mtime > since`
    /// (strict, so a tick never re-imports what it just saw). Filenames
    /// are parsed tolerantly: `coverage_hash` is the segment after the
    /// last underscore, and fewer than two underscores leaves it empty.
    pub fn import_new(&self, since: SystemTime) -> Vec<SyncedInput> {
        let mut out = Vec::new();
        let Ok(workers) = fs::read_dir(&self.sync_root) else {
            return out;
        };
        for worker_entry in workers.flatten() {
            let name = worker_entry.file_name().to_string_lossy().to_string();
            if name == self.worker_dir {
                continue; // never read our own queue back
            }
            let queue_dir = worker_entry.path().join("queue");
            let Ok(files) = fs::read_dir(&queue_dir) else {
                continue;
            };
            for file_entry in files.flatten() {
                let path = file_entry.path();
                let Ok(meta) = file_entry.metadata() else {
                    continue;
                };
                let Ok(mtime) = meta.modified() else {
                    continue;
                };
                if mtime <= since {
                    continue;
                }
                let Ok(data) = fs::read(&path) else {
                    continue;
                };
                let filename = path.file_name().unwrap_or_default().to_string_lossy();
                if filename.starts_with('.') {
                    continue; // a publish still mid-rename
                }
                let coverage_hash = parse_coverage_hash(&filename);
                out.push(SyncedInput {
                    data,
                    coverage_hash,
                    source_worker: name.clone(),
                    ts: mtime,
                });
            }
        }
        out
    }

    /// Remove this worker's queue directory on shutdown.
    pub fn cleanup(&self) {
        let dir = self.sync_root.join(&self.worker_dir);
        if let Err(e) = fs::remove_dir_all(&dir) {
            log(
                LogType::Failure,
                &format!("sync cleanup failed for {}: {e}", dir.display()),
            );
        }
    }
}

/// `id_<input_hash>_<cov8>`: `coverage_hash` is the segment after the
/// *last* underscore, not the front-split remainder — the underscore
/// tolerance belongs to `input_hash` (the middle segment), which may
/// itself contain extra underscores. Fewer than two underscores
/// (malformed/foreign file): `coverage_hash` is empty.
fn parse_coverage_hash(filename: &str) -> String {
    match filename.rsplit_once('_') {
        Some((rest, last)) if rest.contains('_') => last.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn publish_then_import_by_a_peer_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let mut worker_a = Synchronizer::new(root.path().to_path_buf(), 0).unwrap();
        let worker_b = Synchronizer::new(root.path().to_path_buf(), 1).unwrap();

        let since = SystemTime::now() - Duration::from_secs(1);
        worker_a.publish(b"hello", 0xDEAD_BEEF).unwrap();

        let imported = worker_b.import_new(since);
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].data, b"hello");
        assert_eq!(imported[0].coverage_hash, format!("{:08x}", 0xDEAD_BEEFu64));
    }

    #[test]
    fn coverage_hash_above_32_bits_is_truncated_to_8_hex_chars_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let mut worker_a = Synchronizer::new(root.path().to_path_buf(), 0).unwrap();
        worker_a.publish(b"wide hash", 0xFEED_FACE_DEAD_BEEFu64).unwrap();

        let entries: Vec<_> = fs::read_dir(worker_a.queue_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let filename = entries[0].as_ref().unwrap().file_name().to_string_lossy().to_string();
        let cov_segment = filename.rsplit_once('_').unwrap().1;
        assert_eq!(cov_segment.len(), 8);
        assert_eq!(cov_segment, format!("{:08x}", 0xDEAD_BEEFu32));
    }

    #[test]
    fn a_worker_never_imports_its_own_queue() {
        let root = tempfile::tempdir().unwrap();
        let mut worker_a = Synchronizer::new(root.path().to_path_buf(), 0).unwrap();
        let since = SystemTime::now() - Duration::from_secs(1);
        worker_a.publish(b"self", 1).unwrap();
        assert!(worker_a.import_new(since).is_empty());
    }

    #[test]
    fn duplicate_coverage_hash_is_not_republished() {
        let root = tempfile::tempdir().unwrap();
        let mut worker_a = Synchronizer::new(root.path().to_path_buf(), 0).unwrap();
        worker_a.publish(b"first", 7).unwrap();
        worker_a.publish(b"second", 7).unwrap();
        let entries: Vec<_> = fs::read_dir(worker_a.queue_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn strict_since_comparison_excludes_entries_from_the_same_instant() {
        let root = tempfile::tempdir().unwrap();
        let mut worker_a = Synchronizer::new(root.path().to_path_buf(), 0).unwrap();
        let worker_b = Synchronizer::new(root.path().to_path_buf(), 1).unwrap();
        worker_a.publish(b"hello", 5).unwrap();
        let mtime = fs::metadata(worker_a.queue_dir().read_dir().unwrap().next().unwrap().unwrap().path())
            .unwrap()
            .modified()
            .unwrap();
        assert!(worker_b.import_new(mtime).is_empty());
    }

    #[test]
    fn filename_parsing_is_tolerant_of_extra_underscores_and_missing_parts() {
        // Extra underscores inside the input_hash segment are tolerated;
        // coverage_hash is always whatever follows the last underscore.
        assert_eq!(
            parse_coverage_hash("id_abc123_extra_under_scores"),
            "scores"
        );
        assert_eq!(parse_coverage_hash("onlyonepart"), "");
        assert_eq!(parse_coverage_hash("two_parts"), "");
    }
}
