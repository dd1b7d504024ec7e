//! Coverage map (C1): a 64 KiB AFL-style edge bitmap with hit-count
//! bucketing and virgin-map bookkeeping.
//!
//! Kept as a plain value owned by its driver (see `spec.md` §9's note on
//! replacing a module-level singleton with a driver-owned struct, passed to
//! the executor/observer by reference).

use crate::hashing::xxh3_64;

pub const MAP_SIZE: usize = 65_536;

/// Maps a raw saturating hit count to one of the nine AFL-style buckets.
/// Bucketing is monotone within a class: `bucket_class(4) == bucket_class(7)`
/// but `bucket_class(7) != bucket_class(8)`.
pub fn bucket_class(count: u8) -> u8 {
    match count {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4..=7 => 4,
        8..=15 => 5,
        16..=31 => 6,
        32..=127 => 7,
        128..=255 => 8,
    }
}

pub struct CoverageMap {
    /// Per-run hit counters, saturating at 255.
    trace: Vec<u8>,
    /// Globally unseen bits; a set bit means that edge has never been
    /// observed in a promoted run. Only ever loses bits.
    virgin: Vec<u8>,
    /// Last block id recorded, right-shifted by one (see `record`).
    prev_block: u16,
    /// Scratch buffer holding the bucketed trace from the most recent
    /// `has_new_coverage` call, reused by `promote`/`digest` so both don't
    /// have to recompute it.
    bucketed: Vec<u8>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self {
            trace: vec![0u8; MAP_SIZE],
            virgin: vec![0xFFu8; MAP_SIZE],
            prev_block: 0,
            bucketed: vec![0u8; MAP_SIZE],
        }
    }

    /// Zero the trace array and reset the edge-hashing cursor.
    pub fn reset(&mut self) {
        self.trace.iter_mut().for_each(|b| *b = 0);
        self.prev_block = 0;
    }

    /// Record a visit to `block_id`, forming an edge with the previously
    /// recorded block.
    ///
    /// The right shift on `prev_block` is essential: without it, edges A->B
    /// and B->A would hash to the same slot.
    pub fn record(&mut self, block_id: u16) {
        let edge = block_id ^ self.prev_block;
        let idx = edge as usize % MAP_SIZE;
        self.trace[idx] = self.trace[idx].saturating_add(1);
        self.prev_block = block_id >> 1;
    }

    /// Overwrite `trace` from an externally instrumented run: the executor
    /// hands back the raw `MAP_SIZE`-byte edge-count region an out-of-
    /// process target wrote into, since there is no in-process emulator to
    /// call `record()` on its behalf. Shorter buffers zero-fill the rest;
    /// longer ones are truncated.
    pub fn load_external_trace(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(MAP_SIZE);
        self.trace[..n].copy_from_slice(&bytes[..n]);
        for b in &mut self.trace[n..] {
            *b = 0;
        }
    }

    fn bucketize_into_scratch(&mut self) {
        for (dst, src) in self.bucketed.iter_mut().zip(self.trace.iter()) {
            *dst = bucket_class(*src);
        }
    }

    /// After hit-count bucketing, is there any edge raised that the virgin
    /// map has not seen before? Word-wise over `u64` chunks, per the
    /// design note on replacing byte-by-byte bitmap comparison.
    pub fn has_new_coverage(&mut self) -> bool {
        self.bucketize_into_scratch();
        self.bucketed
            .chunks_exact(8)
            .zip(self.virgin.chunks_exact(8))
            .any(|(t, v)| {
                let tw = u64::from_ne_bytes(t.try_into().unwrap());
                let vw = u64::from_ne_bytes(v.try_into().unwrap());
                (tw & vw) != 0
            })
    }

    /// Admit the current bucketed trace into the virgin map, returning the
    /// number of bits cleared.
    pub fn promote(&mut self) -> u32 {
        self.bucketize_into_scratch();
        let mut new_edges = 0u32;
        for (v, t) in self.virgin.iter_mut().zip(self.bucketed.iter()) {
            let cleared = *v & *t;
            if cleared != 0 {
                new_edges += cleared.count_ones();
                *v &= !*t;
            }
        }
        new_edges
    }

    /// Stable digest of the bucketed trace, used as `coverage_hash`.
    pub fn digest(&mut self) -> u64 {
        self.bucketize_into_scratch();
        xxh3_64(&self.bucketed)
    }
}

impl Default for CoverageMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_hashing_is_direction_sensitive() {
        let mut cov = CoverageMap::new();
        cov.record(0x1A2B);
        assert_eq!(cov.trace[(0x1A2Busize) % MAP_SIZE], 1);
        cov.record(0x3C4D);
        let expected_idx = (0x3C4Du16 ^ (0x1A2Bu16 >> 1)) as usize % MAP_SIZE;
        assert_eq!(cov.trace[expected_idx], 1);

        let mut reverse = CoverageMap::new();
        reverse.record(0x3C4D);
        reverse.record(0x1A2B);
        let reverse_idx = (0x1A2Bu16 ^ (0x3C4Du16 >> 1)) as usize % MAP_SIZE;
        assert_ne!(expected_idx, reverse_idx);
        assert_eq!(reverse.trace[reverse_idx], 1);
    }

    #[test]
    fn bucketing_matches_fixture() {
        let counts = [0u8, 1, 2, 3, 4, 7, 8, 15, 128];
        let classes: Vec<u8> = counts.iter().map(|c| bucket_class(*c)).collect();
        assert_eq!(classes, vec![0, 1, 2, 3, 4, 4, 5, 5, 8]);
    }

    #[test]
    fn four_to_five_hits_is_not_new_but_seven_to_eight_is() {
        let mut cov = CoverageMap::new();
        for _ in 0..4 {
            cov.record(0x10);
        }
        assert!(cov.has_new_coverage());
        cov.promote();

        let mut cov2 = CoverageMap::new();
        cov2.virgin = cov.virgin.clone();
        for _ in 0..5 {
            cov2.reset();
            for _ in 0..4 {
                cov2.record(0x10);
            }
        }
        // 4 and 5 both bucket to class 4: re-running the same edge 5 times
        // instead of 4 must not look new.
        cov2.reset();
        for _ in 0..5 {
            cov2.record(0x10);
        }
        assert!(!cov2.has_new_coverage());

        let mut cov3 = CoverageMap::new();
        cov3.virgin = cov.virgin.clone();
        for _ in 0..8 {
            cov3.record(0x10);
        }
        assert!(cov3.has_new_coverage());
    }

    #[test]
    fn bucketize_idempotent() {
        // bucketize(bucketize(t)) == bucketize(t): re-bucketizing an
        // already-bucketized trace must be a no-op.
        let mut cov = CoverageMap::new();
        for _ in 0..200 {
            cov.record(0x55);
        }
        cov.bucketize_into_scratch();
        let first = cov.bucketed.clone();
        cov.bucketize_into_scratch();
        assert_eq!(first, cov.bucketed);
    }

    #[test]
    fn virgin_only_loses_bits() {
        let mut cov = CoverageMap::new();
        cov.record(1);
        cov.record(2);
        let before = cov.virgin.clone();
        cov.promote();
        for (b, a) in before.iter().zip(cov.virgin.iter()) {
            // virgin can only lose bits: anything set in `after` must have
            // been set in `before` too.
            assert_eq!(*a & !*b, 0);
        }
    }

    #[test]
    fn external_trace_shorter_than_map_size_zero_fills_the_rest() {
        let mut cov = CoverageMap::new();
        cov.record(0x10); // populate some byte so we can tell it got cleared
        cov.load_external_trace(&[7, 7, 7]);
        assert_eq!(&cov.trace[..3], &[7, 7, 7]);
        assert!(cov.trace[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn last_index_participates() {
        let mut cov = CoverageMap::new();
        // find a block_id that hashes to MAP_SIZE - 1 with prev_block == 0
        let target = (MAP_SIZE - 1) as u16;
        cov.record(target);
        assert_eq!(cov.trace[MAP_SIZE - 1], 1);
        assert!(cov.has_new_coverage());
    }
}
