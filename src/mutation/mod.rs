//! Mutation Engine (C2): deterministic, havoc, dictionary, splice, and
//! protocol-aware stages behind a single `mutate()` entry point, with
//! strategy selection driven by adaptive worker-local weights.

pub mod deterministic;
pub mod dictionary;
pub mod havoc;
pub mod protocol;
pub mod weights;

use rand::Rng;

use deterministic::DeterministicWalk;
use dictionary::dictionary_mutate;
use havoc::havoc;
use protocol::{mutate_field, Field, Protocol};
use weights::{Strategy, StrategyWeights};

/// Per-call mutation context: rng, optional protocol awareness, a
/// reference corpus for splicing, and a borrow of the driver's adaptive
/// strategy weights. `spec.md` §4.2: "Weights are worker-local" — the
/// weights themselves live for the worker's whole run in `Driver`; this
/// context only borrows them for one `mutate`/`observe` pair so a fresh
/// context can be built per call without resetting them.
pub struct MutationContext<'a, R: Rng> {
    pub rng: &'a mut R,
    pub protocol: Option<Protocol>,
    pub fields: &'a [Field],
    pub weights: &'a mut StrategyWeights,
}

impl<'a, R: Rng> MutationContext<'a, R> {
    pub fn new(
        rng: &'a mut R,
        protocol: Option<Protocol>,
        fields: &'a [Field],
        weights: &'a mut StrategyWeights,
    ) -> Self {
        Self {
            rng,
            protocol,
            fields,
            weights,
        }
    }

    /// Produce one mutant of `input`, selecting a strategy via the weighted
    /// draw and falling back to havoc when a stage has nothing to offer
    /// (e.g. deterministic walk already exhausted, or no peer corpus for
    /// splice). Returns the strategy actually used so the caller can feed
    /// coverage feedback back into `observe()`.
    pub fn mutate(&mut self, input: &[u8], peer_corpus: &[Vec<u8>]) -> (Vec<u8>, Strategy) {
        let chosen = self.weights.sample(self.rng);
        match chosen {
            Strategy::Deterministic => {
                let mut walk = DeterministicWalk::new(input.to_vec());
                match walk.next() {
                    Some(out) => (out, Strategy::Deterministic),
                    None => (havoc(input, self.rng), Strategy::Havoc),
                }
            }
            Strategy::Havoc => (havoc(input, self.rng), Strategy::Havoc),
            Strategy::Dictionary => (
                dictionary_mutate(input, self.protocol, self.rng),
                Strategy::Dictionary,
            ),
            Strategy::Splice => match splice(input, peer_corpus, self.rng) {
                Some(out) => (out, Strategy::Splice),
                None => (havoc(input, self.rng), Strategy::Havoc),
            },
            Strategy::ProtocolAware => {
                if self.fields.is_empty() {
                    (havoc(input, self.rng), Strategy::Havoc)
                } else {
                    let field = self.fields[self.rng.gen_range(0..self.fields.len())];
                    (mutate_field(input, field, self.rng), Strategy::ProtocolAware)
                }
            }
        }
    }

    /// Feed back whether the strategy just used turned up new coverage, so
    /// its weight adapts for the next draw.
    pub fn observe(&mut self, strategy: Strategy, success_rate: f64, found_new_coverage: bool) {
        self.weights.observe(strategy, success_rate, found_new_coverage);
    }
}

/// Concatenate a random prefix of `input` with a random suffix of a
/// randomly chosen peer corpus entry. Returns `None` when there is no
/// usable peer (empty corpus, or the only candidate is `input` itself with
/// nothing else to splice against).
fn splice<R: Rng>(input: &[u8], peer_corpus: &[Vec<u8>], rng: &mut R) -> Option<Vec<u8>> {
    if peer_corpus.is_empty() || input.is_empty() {
        return None;
    }
    let peer = &peer_corpus[rng.gen_range(0..peer_corpus.len())];
    if peer.is_empty() {
        return None;
    }
    let split_a = rng.gen_range(1..=input.len());
    let split_b = rng.gen_range(0..peer.len());
    let mut out = Vec::with_capacity(split_a + (peer.len() - split_b));
    out.extend_from_slice(&input[..split_a]);
    out.extend_from_slice(&peer[split_b..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn splice_combines_prefix_and_suffix() {
        let mut rng = thread_rng();
        let input = b"AAAAAAAA".to_vec();
        let peer = vec![b"BBBBBBBB".to_vec()];
        let out = splice(&input, &peer, &mut rng).unwrap();
        assert!(out.iter().any(|b| *b == b'A'));
        assert!(out.iter().any(|b| *b == b'B'));
    }

    #[test]
    fn splice_with_empty_peer_corpus_returns_none() {
        let mut rng = thread_rng();
        assert!(splice(b"AAAA", &[], &mut rng).is_none());
    }

    #[test]
    fn mutate_never_panics_across_strategies() {
        let mut rng = thread_rng();
        let fields = [Field {
            start: 0,
            end: 4,
            kind: protocol::FieldKind::Numeric,
        }];
        let peer = vec![b"peer seed data".to_vec()];
        let mut weights = StrategyWeights::new(true);
        let mut ctx = MutationContext::new(&mut rng, Some(Protocol::Generic), &fields, &mut weights);
        for _ in 0..200 {
            let (out, strategy) = ctx.mutate(b"AAAABBBBCCCC", &peer);
            assert!(!out.is_empty() || strategy == Strategy::Splice);
            ctx.observe(strategy, 0.5, true);
        }
    }
}
