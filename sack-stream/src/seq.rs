//! Sequence-number space helpers.
//!
//! On the wire every sequence and acknowledgment number is a `u32` that wraps
//! modulo 2^32.  Inside the protocol engine all positions are **absolute
//! stream offsets** (`u64`, counted from the initial sequence number), so the
//! ordered maps keyed by offset stay ordered across a wrap.
//!
//! ```text
//!   wire:    isn ──────────────▶ u32::MAX ─▶ 0 ──────────▶
//!   offset:  0   ──────────────▶ 2^32-isn-1 ─▶ 2^32-isn ─▶
//! ```
//!
//! Conversion back from the wire uses a *checkpoint* (a nearby absolute
//! offset that the caller already knows, e.g. `base` or `expected_seq`) and
//! picks the candidate closest to it.  This is unambiguous as long as the two
//! are less than 2^31 apart, which any sane window guarantees.

const SPAN: u64 = 1 << 32;
const HALF_SPAN: u64 = 1 << 31;

/// Map the absolute stream offset `offset` onto the 32-bit wire space.
#[inline]
pub fn wrap(isn: u32, offset: u64) -> u32 {
    isn.wrapping_add(offset as u32)
}

/// Recover the absolute offset of wire sequence number `seq` that lies
/// closest to `checkpoint`.
pub fn unwrap(isn: u32, checkpoint: u64, seq: u32) -> u64 {
    let relative = u64::from(seq.wrapping_sub(isn));
    let mut candidate = (checkpoint & !(SPAN - 1)) | relative;

    if candidate > checkpoint.saturating_add(HALF_SPAN) && candidate >= SPAN {
        candidate -= SPAN;
    } else if candidate.saturating_add(HALF_SPAN) < checkpoint {
        candidate += SPAN;
    }
    candidate
}

/// Returns `true` when wire sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when wire sequence number `a` is strictly before `b`.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_adds_isn() {
        assert_eq!(wrap(100, 0), 100);
        assert_eq!(wrap(100, 23), 123);
    }

    #[test]
    fn wrap_past_u32_max() {
        let isn = u32::MAX - 5;
        assert_eq!(wrap(isn, 10), 4);
        assert_eq!(wrap(0, SPAN + 7), 7);
    }

    #[test]
    fn unwrap_identity_near_zero() {
        assert_eq!(unwrap(0, 0, 0), 0);
        assert_eq!(unwrap(0, 0, 1234), 1234);
        assert_eq!(unwrap(77, 0, 77 + 10), 10);
    }

    #[test]
    fn unwrap_across_wrap_forward() {
        // Checkpoint just below the first wrap, sequence number just past it.
        let isn = 0;
        let checkpoint = SPAN - 2;
        assert_eq!(unwrap(isn, checkpoint, 3), SPAN + 3);
    }

    #[test]
    fn unwrap_across_wrap_backward() {
        // Checkpoint just past the wrap, sequence number from just before it.
        let checkpoint = SPAN + 3;
        assert_eq!(unwrap(0, checkpoint, u32::MAX - 1), SPAN - 2);
    }

    #[test]
    fn unwrap_inverts_wrap() {
        let isn = u32::MAX - 2;
        for offset in [0u64, 1, 2, 3, 5, 1_000_000, SPAN - 1, SPAN, 3 * SPAN + 17] {
            let seq = wrap(isn, offset);
            assert_eq!(unwrap(isn, offset, seq), offset, "offset {offset}");
            // A checkpoint a little behind still resolves to the same offset.
            assert_eq!(unwrap(isn, offset.saturating_sub(4096), seq), offset);
        }
    }

    #[test]
    fn seq_comparisons_wrap() {
        assert!(seq_le(5, 5));
        assert!(seq_lt(5, 6));
        assert!(!seq_lt(6, 5));
        assert!(seq_lt(u32::MAX - 1, 3));
        assert!(!seq_le(3, u32::MAX - 1));
    }
}
