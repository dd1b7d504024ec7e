//! Protocol-aware field mutation.
//!
//! `spec.md` §9 notes the source's dynamic dispatch over protocol parsers
//! should become a closed sum type in a systems rewrite, not a
//! method-per-subclass hierarchy; `Field`/`Protocol` are that sum type.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::deterministic::{DeterministicWalk, ARITH_DELTAS, INTERESTING_16, INTERESTING_32, INTERESTING_8};
use super::havoc::havoc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Dns,
    Smtp,
    Generic,
    /// A grammar the caller supplies field boundaries for but whose shape
    /// this crate does not otherwise know. Mutated like `Generic`.
    Custom,
}

/// A byte range the caller's narrow field-mutation interface (`spec.md` §1:
/// "the mutation engine consumes [protocol parsers] through a narrow
/// field-mutation interface") has identified within an input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Field {
    pub start: usize,
    pub end: usize,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Numeric,
    String,
    /// A length field describing the size of another part of the payload.
    /// `spec.md` is explicit that this is a deliberate desync target, not
    /// auto-fixed during mutation.
    Length,
}

/// Mutate a single identified field in place, returning the whole mutated
/// buffer. Numeric fields use arithmetic/interesting values; string fields
/// use length-bound corruption (havoc, scoped to the field's byte range);
/// length fields have a mode that intentionally desynchronizes the
/// recorded size from the actual payload size.
pub fn mutate_field<R: Rng>(input: &[u8], field: Field, rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    let slice = &input[field.start..field.end];

    match field.kind {
        FieldKind::Numeric => {
            mutate_numeric_field(&mut out, field, rng);
        }
        FieldKind::String => {
            let mutated = havoc(slice, rng);
            out.splice(field.start..field.end, mutated);
        }
        FieldKind::Length => {
            desynchronize_length(&mut out, field, rng);
        }
    }
    out
}

/// Mutate a numeric field directly with an arithmetic delta or an
/// interesting value (`spec.md` §4.2 item 5: "numeric fields use
/// interesting values and arithmetic"), operating on the widest of
/// `{1, 2, 4}` bytes that fits inside the field, little-endian. A
/// zero-width field is a no-op.
fn mutate_numeric_field<R: Rng>(buf: &mut [u8], field: Field, rng: &mut R) {
    let field_len = field.end - field.start;
    let width = [4usize, 2, 1].into_iter().find(|w| *w <= field_len);
    let Some(width) = width else {
        return;
    };

    let cur = DeterministicWalk::read_le(buf, field.start, width);
    let new_value = if rng.gen_bool(0.5) {
        cur + ARITH_DELTAS[rng.gen_range(0..ARITH_DELTAS.len())] as i64
    } else {
        match width {
            1 => INTERESTING_8[rng.gen_range(0..INTERESTING_8.len())],
            2 => INTERESTING_16[rng.gen_range(0..INTERESTING_16.len())],
            _ => INTERESTING_32[rng.gen_range(0..INTERESTING_32.len())],
        }
    };
    DeterministicWalk::write_le(buf, field.start, width, new_value);
}

/// Overwrite a length field with a value that does not match the actual
/// payload size — desynchronization is the target, not a bug, per
/// `spec.md` §4.2.
fn desynchronize_length<R: Rng>(buf: &mut [u8], field: Field, rng: &mut R) {
    let width = field.end - field.start;
    if width == 0 || width > 8 {
        return;
    }
    let actual: u64 = buf[field.start..field.end]
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64);
    // Pick a value that is provably wrong: either far larger or far
    // smaller than the true size, never the true size itself.
    let desynced = if rng.gen_bool(0.5) {
        actual.wrapping_add(rng.gen_range(1..=4096))
    } else {
        actual.wrapping_sub(rng.gen_range(1..=actual.max(1)))
    };
    let mut v = desynced;
    for byte in &mut buf[field.start..field.end] {
        *byte = (v & 0xFF) as u8;
        v >>= 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn length_field_mutation_changes_the_value() {
        let mut rng = thread_rng();
        let mut input = vec![0u8; 8];
        input[4..8].copy_from_slice(&100u32.to_le_bytes());
        let field = Field {
            start: 4,
            end: 8,
            kind: FieldKind::Length,
        };
        let out = mutate_field(&input, field, &mut rng);
        let new_val = u32::from_le_bytes(out[4..8].try_into().unwrap());
        assert_ne!(new_val, 100);
    }

    #[test]
    fn numeric_field_mutation_stays_in_bounds() {
        let mut rng = thread_rng();
        let input = vec![1, 2, 3, 4, 5];
        let field = Field {
            start: 1,
            end: 3,
            kind: FieldKind::Numeric,
        };
        let out = mutate_field(&input, field, &mut rng);
        assert_eq!(out.len(), input.len());
    }
}
