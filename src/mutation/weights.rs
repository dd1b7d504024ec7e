//! Adaptive per-strategy weights.
//!
//! Resolves the first Open Question in `spec.md` §9: the source updates
//! weights multiplicatively with no floor, which can underflow a strategy's
//! weight to effectively zero over a long run. `DESIGN.md` records the
//! decision: cap the minimum weight at `MIN_WEIGHT` so no strategy is ever
//! permanently starved out of the random draw.

use rand::Rng;

pub const ALPHA: f64 = 0.1;
pub const MIN_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Deterministic,
    Havoc,
    Dictionary,
    Splice,
    ProtocolAware,
}

const ALL_STRATEGIES: [Strategy; 5] = [
    Strategy::Deterministic,
    Strategy::Havoc,
    Strategy::Dictionary,
    Strategy::Splice,
    Strategy::ProtocolAware,
];

/// Worker-local weight map, initially uniform.
pub struct StrategyWeights {
    weights: [f64; 5],
    has_protocol: bool,
}

fn idx(strategy: Strategy) -> usize {
    ALL_STRATEGIES.iter().position(|s| *s == strategy).unwrap()
}

impl StrategyWeights {
    pub fn new(has_protocol: bool) -> Self {
        Self {
            weights: [1.0; 5],
            has_protocol,
        }
    }

    /// Weighted random draw over the strategies currently in play
    /// (`ProtocolAware` is excluded unless a protocol parser is
    /// configured).
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Strategy {
        let eligible: Vec<(Strategy, f64)> = ALL_STRATEGIES
            .iter()
            .filter(|s| self.has_protocol || **s != Strategy::ProtocolAware)
            .map(|s| (*s, self.weights[idx(*s)]))
            .collect();
        let total: f64 = eligible.iter().map(|(_, w)| w).sum();
        let mut draw = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
        for (s, w) in &eligible {
            if draw < *w {
                return *s;
            }
            draw -= w;
        }
        eligible.last().unwrap().0
    }

    /// After a strategy is used, report whether it found new coverage and
    /// update its weight multiplicatively, floored at `MIN_WEIGHT`.
    pub fn observe(&mut self, strategy: Strategy, success_rate: f64, found_new_coverage: bool) {
        let i = idx(strategy);
        if found_new_coverage {
            self.weights[i] = (self.weights[i] * (1.0 + ALPHA * success_rate)).max(MIN_WEIGHT);
        }
    }

    pub fn weight_of(&self, strategy: Strategy) -> f64 {
        self.weights[idx(strategy)]
    }
}
