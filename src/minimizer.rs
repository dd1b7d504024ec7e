//! Minimizer (C7): delta-debugging over bytes with adaptive chunk sizing,
//! followed by a byte-level zeroing pass, bounded by a global execution
//! budget.

use crate::config::Config;
use crate::crash;
use crate::error::{FuzzError, Result};
use crate::executor::execute;

const DEFAULT_BUDGET: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservationVerdict {
    Preserved,
    Changed,
    NoCrash,
}

/// Re-execute `candidate` and compare its crash signature against
/// `target_hash`. The invariant is strict: crash type, signal, and stack
/// shape together must be unchanged, which `crash_hash` already folds
/// together (`spec.md` §4.7).
fn check_preserved(
    argv: &[String],
    candidate: &[u8],
    target_hash: &str,
    config: &Config,
) -> Result<PreservationVerdict> {
    let result = execute(argv, candidate, config)?;
    let Some(crash_type) = crash::classify(&result) else {
        return Ok(PreservationVerdict::NoCrash);
    };
    let frames = crash::extract_stack(&result.stderr);
    let hash = crash::crash_hash(crash_type, result.signal, &frames, &result.stderr);
    if hash == target_hash {
        Ok(PreservationVerdict::Preserved)
    } else {
        Ok(PreservationVerdict::Changed)
    }
}

/// Delta-debug `original_bytes` down to the smallest input observed to
/// reproduce `target_crash_hash` against `argv`, within `budget`
/// executions. Returns the reduced candidate; on budget exhaustion returns
/// the best candidate found so far alongside `Err(MinimizerBudgetExhausted)`
/// so the caller can still use the partial result (`spec.md` §7:
/// "Keep best candidate so far; not fatal").
pub fn minimize(
    argv: &[String],
    original_bytes: &[u8],
    target_crash_hash: &str,
    config: &Config,
    budget: Option<u64>,
) -> (Vec<u8>, Result<()>) {
    let budget = budget.unwrap_or(DEFAULT_BUDGET);
    let mut executions = 0u64;
    let mut candidate = original_bytes.to_vec();

    let chunk_result = chunk_removal_pass(argv, &mut candidate, target_crash_hash, config, budget, &mut executions);
    if let Err(e) = chunk_result {
        return (candidate, Err(e));
    }

    let byte_result = zero_byte_pass(argv, &mut candidate, target_crash_hash, config, budget, &mut executions);
    (candidate, byte_result)
}

fn chunk_removal_pass(
    argv: &[String],
    candidate: &mut Vec<u8>,
    target_hash: &str,
    config: &Config,
    budget: u64,
    executions: &mut u64,
) -> Result<()> {
    // Clamped to the starting length: for a 1-byte candidate, n=2 would trip
    // the stop condition below before a single removal is ever attempted,
    // permanently blocking convergence to the 0-byte reproducer.
    let mut n: usize = 2.min(candidate.len().max(1));
    loop {
        if candidate.is_empty() || n > candidate.len() {
            return Ok(());
        }
        if *executions >= budget {
            return Err(FuzzError::MinimizerBudgetExhausted { budget });
        }

        let chunk_len = (candidate.len() + n - 1) / n; // ceil division; last chunk absorbs remainder
        let mut removed_any = false;

        let mut start = 0;
        while start < candidate.len() {
            let end = (start + chunk_len).min(candidate.len());
            let mut reduced = candidate.clone();
            reduced.drain(start..end);

            if *executions >= budget {
                return Err(FuzzError::MinimizerBudgetExhausted { budget });
            }
            *executions += 1;

            // The empty candidate is a legitimate test, not a skip: §8's
            // boundary property requires the minimizer be able to converge
            // on a 0-byte reproducer when the empty input still crashes
            // with the same signature. `check_preserved` already treats an
            // empty `reduced` like any other candidate.
            if let Ok(PreservationVerdict::Preserved) =
                check_preserved(argv, &reduced, target_hash, config)
            {
                *candidate = reduced;
                removed_any = true;
                break;
            }
            start = end;
        }

        if removed_any {
            n = n.saturating_sub(1).max(2);
        } else {
            n = (2 * n).min(candidate.len().max(1));
            if n > candidate.len() {
                return Ok(());
            }
        }
    }
}

fn zero_byte_pass(
    argv: &[String],
    candidate: &mut Vec<u8>,
    target_hash: &str,
    config: &Config,
    budget: u64,
    executions: &mut u64,
) -> Result<()> {
    let mut i = 0;
    while i < candidate.len() {
        if *executions >= budget {
            return Err(FuzzError::MinimizerBudgetExhausted { budget });
        }
        if candidate[i] != 0x00 {
            let original = candidate[i];
            candidate[i] = 0x00;
            *executions += 1;
            match check_preserved(argv, candidate, target_hash, config) {
                Ok(PreservationVerdict::Preserved) => {}
                _ => candidate[i] = original,
            }
        }
        i += 1;
    }
    Ok(())
}
