//! Commitment score formula.

/// Compute a member's commitment score from their payment counters.
///
/// `round(on_time / total * 100)` when `total > 0`; a member with no
/// payments yet scores 100 (benefit of the doubt) until their first
/// contribution. The score is always recomputed from the counters after a
/// mutation, never drifted incrementally, so it can never disagree with
/// them.
///
/// Integer arithmetic throughout (round-half-up), no floats.
#[must_use]
pub fn commitment_score(on_time: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    debug_assert!(on_time <= total, "on_time ({on_time}) exceeds total ({total})");

    let on_time = u64::from(on_time.min(total));
    let total = u64::from(total);
    ((on_time * 200 + total) / (total * 2)) as u8
}
