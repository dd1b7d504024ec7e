//! Corpus store (C3): a content-addressed set of byte records with
//! metadata and coverage attribution.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FuzzError, Result};
use crate::hashing::sha256_trunc16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub coverage_hash: u64,
    pub new_edges: u32,
    pub exec_count: u64,
    #[serde(skip)]
    pub last_selected_at: Option<SystemTime>,
    pub favored: bool,
}

impl CorpusEntry {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

pub enum AddOutcome<'a> {
    Added(&'a CorpusEntry),
    Duplicate,
}

/// A set, keyed by content-derived id; re-adding the same bytes is a no-op.
pub struct CorpusStore {
    entries: HashMap<String, CorpusEntry>,
    /// Insertion order, so `iter_entries`/the scheduler can break ties
    /// deterministically.
    order: Vec<String>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        data: Vec<u8>,
        coverage_hash: u64,
        parent_id: Option<String>,
    ) -> AddOutcome<'_> {
        let id = sha256_trunc16(&data);
        if self.entries.contains_key(&id) {
            return AddOutcome::Duplicate;
        }
        let depth = parent_id
            .as_ref()
            .and_then(|p| self.entries.get(p))
            .map(|p| p.depth + 1)
            .unwrap_or(0);
        let entry = CorpusEntry {
            id: id.clone(),
            data,
            parent_id,
            depth,
            coverage_hash,
            new_edges: 0,
            exec_count: 0,
            last_selected_at: None,
            favored: false,
        };
        self.entries.insert(id.clone(), entry);
        self.order.push(id.clone());
        AddOutcome::Added(self.entries.get(&id).unwrap())
    }

    /// Load a seed directly as a favored, depth-0 entry.
    pub fn add_seed(&mut self, data: Vec<u8>) -> bool {
        let id = sha256_trunc16(&data);
        if self.entries.contains_key(&id) {
            return false;
        }
        let entry = CorpusEntry {
            id: id.clone(),
            data,
            parent_id: None,
            depth: 0,
            coverage_hash: 0,
            new_edges: 0,
            exec_count: 0,
            last_selected_at: None,
            favored: true,
        };
        self.entries.insert(id.clone(), entry);
        self.order.push(id);
        true
    }

    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.entries.get(id).map(|e| e.data.as_slice())
    }

    pub fn entry(&self, id: &str) -> Option<&CorpusEntry> {
        self.entries.get(id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut CorpusEntry> {
        self.entries.get_mut(id)
    }

    pub fn random<R: Rng>(&self, exclude_id: Option<&str>, rng: &mut R) -> Option<&CorpusEntry> {
        let candidates: Vec<&String> = self
            .order
            .iter()
            .filter(|id| exclude_id != Some(id.as_str()))
            .collect();
        candidates.choose(rng).map(|id| &self.entries[*id])
    }

    pub fn iter_entries(&self) -> impl Iterator<Item = &CorpusEntry> {
        self.order.iter().map(move |id| &self.entries[id])
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn byte_size(&self) -> usize {
        self.entries.values().map(|e| e.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist an entry's bytes and `.meta` sidecar under `corpus_dir`, per
    /// the on-disk layout in `spec.md` §6.
    pub fn persist(&self, id: &str, corpus_dir: &Path) -> Result<()> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| FuzzError::InvariantViolation {
                context: format!("persist() called for unknown corpus id {id}"),
            })?;
        std::fs::create_dir_all(corpus_dir)?;
        std::fs::write(corpus_dir.join(id), &entry.data)?;
        let meta = serde_json::to_vec_pretty(entry)?;
        std::fs::write(corpus_dir.join(format!("{id}.meta")), meta)?;
        Ok(())
    }

    /// Reload a previously persisted corpus directory.
    pub fn load(corpus_dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        if !corpus_dir.exists() {
            return Ok(store);
        }
        let mut ids: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(corpus_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".meta") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        for id in ids {
            let data = std::fs::read(corpus_dir.join(&id))?;
            let meta_bytes = std::fs::read(corpus_dir.join(format!("{id}.meta")))?;
            let mut meta: CorpusEntry = serde_json::from_slice(&meta_bytes)?;
            meta.data = data;
            store.order.push(meta.id.clone());
            store.entries.insert(meta.id.clone(), meta);
        }
        Ok(store)
    }
}

impl Default for CorpusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readding_same_bytes_is_a_noop() {
        let mut store = CorpusStore::new();
        let data = b"hello".to_vec();
        matches!(store.add(data.clone(), 0, None), AddOutcome::Added(_));
        let size_before = store.size();
        matches!(store.add(data, 0, None), AddOutcome::Duplicate);
        assert_eq!(store.size(), size_before);
    }

    #[test]
    fn ids_are_stable_pure_functions_of_content() {
        let mut a = CorpusStore::new();
        let mut b = CorpusStore::new();
        a.add(b"same bytes".to_vec(), 0, None);
        b.add(b"same bytes".to_vec(), 0, None);
        let id_a = a.iter_entries().next().unwrap().id.clone();
        let id_b = b.iter_entries().next().unwrap().id.clone();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn depth_tracks_parent_chain() {
        let mut store = CorpusStore::new();
        store.add_seed(b"seed".to_vec());
        let parent_id = store.iter_entries().next().unwrap().id.clone();
        if let AddOutcome::Added(child) = store.add(b"child".to_vec(), 0, Some(parent_id)) {
            assert_eq!(child.depth, 1);
        } else {
            panic!("expected Added");
        }
    }
}
