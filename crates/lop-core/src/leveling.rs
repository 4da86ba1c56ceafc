//! Legacy progression curve.
//!
//! Advancing from level `n` to `n + 1` costs `5n² + 50n + 100` XP. Stored
//! levels and the legacy claim procedure rely on this exact curve, so any
//! change needs a new [`LEVEL_CURVE_VERSION`] and a recalculation pass over
//! every stored row.

use serde::{Deserialize, Serialize};

pub const LEVEL_CURVE_VERSION: &str = "legacy-quadratic-v1";

// Cumulative XP at this level is above u64::MAX, so the search never leaves it.
const LEVEL_SEARCH_CEILING: u32 = 5_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    pub xp_into_level: u64,
    pub xp_to_next: u64,
    pub total_xp: u64,
}

/// XP needed to go from `level` to `level + 1`.
pub fn xp_to_advance(level: u32) -> u64 {
    let n = u128::from(level);
    saturate(5 * n * n + 50 * n + 100)
}

/// Cumulative XP at which `level` is reached.
pub fn xp_for_level(level: u32) -> u64 {
    saturate(cumulative_xp(level))
}

pub fn level_from_xp(total_xp: u64) -> u32 {
    let target = u128::from(total_xp);
    let mut low = 0u32;
    let mut high = LEVEL_SEARCH_CEILING;

    // cumulative_xp(low) <= target < cumulative_xp(high)
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if cumulative_xp(mid) <= target {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

pub fn progress_from_total_xp(total_xp: u64) -> LevelProgress {
    let level = level_from_xp(total_xp);
    LevelProgress {
        level,
        xp_into_level: total_xp - xp_for_level(level),
        xp_to_next: xp_to_advance(level),
        total_xp,
    }
}

fn cumulative_xp(level: u32) -> u128 {
    let n = u128::from(level);
    if n == 0 {
        return 0;
    }
    // sum over k in 0..n of 5k² + 50k + 100
    5 * (n - 1) * n * (2 * n - 1) / 6 + 25 * n * (n - 1) + 100 * n
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
