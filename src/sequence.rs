//! Cyclic comparison of 16-bit sequence numbers.
//!
//! Sequence numbers wrap around, so 0 follows after FFFF. A sequence number is considered
//!  'greater' than another if it is at most half the number range ahead of it - this makes
//!  the comparison total and transitive inside any window of 32768 consecutive numbers,
//!  which is all the protocol ever looks at.

pub const HALF_RANGE: u16 = u16::MAX / 2 + 1;

pub fn seq_gt(a: u16, b: u16) -> bool {
    ((a > b) && (a - b <= HALF_RANGE)) || ((a < b) && (b - a > HALF_RANGE))
}

pub fn seq_lt(a: u16, b: u16) -> bool {
    seq_gt(b, a)
}

pub fn seq_lte(a: u16, b: u16) -> bool {
    a == b || seq_gt(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::equal(5, 5, false)]
    #[case::adjacent(6, 5, true)]
    #[case::adjacent_reverse(5, 6, false)]
    #[case::zero_one(1, 0, true)]
    #[case::wrap(0, u16::MAX, true)]
    #[case::wrap_reverse(u16::MAX, 0, false)]
    #[case::wrap_far(100, 0xff00, true)]
    #[case::half_range_ahead(HALF_RANGE, 0, true)]
    #[case::past_half_range(HALF_RANGE + 1, 0, false)]
    #[case::half_range_behind(0, HALF_RANGE, false)]
    fn test_seq_gt(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(seq_gt(a, b), expected);
    }

    #[rstest]
    #[case::equal(5, 5, false)]
    #[case::smaller(5, 6, true)]
    #[case::wrap(u16::MAX, 0, true)]
    fn test_seq_lt(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(seq_lt(a, b), expected);
    }

    #[rstest]
    #[case::equal(5, 5, true)]
    #[case::smaller(5, 6, true)]
    #[case::greater(6, 5, false)]
    #[case::wrap(u16::MAX, 1, true)]
    fn test_seq_lte(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(seq_lte(a, b), expected);
    }

    /// ordering must be transitive for any three numbers inside a contiguous window of
    ///  at most half the number range, including across the wrap-around point
    #[rstest]
    #[case::zero(0)]
    #[case::mid(0x7f00)]
    #[case::near_wrap(0xff80)]
    fn test_transitive_in_window(#[case] base: u16) {
        let window: Vec<u16> = (0u16..300).map(|offs| base.wrapping_add(offs)).collect();

        for (i, &a) in window.iter().enumerate() {
            for (j, &b) in window.iter().enumerate() {
                assert_eq!(seq_gt(a, b), i > j, "seq_gt({}, {})", a, b);
                assert_eq!(seq_lte(a, b), i <= j, "seq_lte({}, {})", a, b);
            }
        }
    }
}
