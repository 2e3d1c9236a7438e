//! Week-relative addon timestamps → absolute instants.
//!
//! The addon stores `time_stamp` as seconds elapsed since the start of the
//! current keystone week, and `week` as the number of weeks since a fixed
//! regional reset.  Resolution is pure arithmetic and never fails: values too
//! large for the calendar clamp to the latest representable instant.

use chrono::{DateTime, Utc};
use keywatch_config::Region;

pub const SECONDS_PER_WEEK: i64 = 7 * 86_400;

/// Unix time of the weekly reset that the addon counts `week` from.
pub fn base_epoch(region: Region) -> i64 {
    match region {
        Region::Us => 1_500_390_000,
        Region::Eu => 1_500_447_600,
        Region::Tw => 1_500_505_200,
    }
}

pub fn resolve(raw_counter: u64, week: u64, region: Region) -> DateTime<Utc> {
    let seconds = i64::try_from(week)
        .ok()
        .and_then(|w| w.checked_mul(SECONDS_PER_WEEK))
        .and_then(|offset| offset.checked_add(base_epoch(region)))
        .and_then(|start| i64::try_from(raw_counter).ok()?.checked_add(start));

    seconds
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Keystone week containing `instant`.  Negative before the regional epoch.
pub fn week_of(instant: DateTime<Utc>, region: Region) -> i64 {
    (instant.timestamp() - base_epoch(region)).div_euclid(SECONDS_PER_WEEK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_zero_counter_zero_is_the_base_epoch() {
        for region in [Region::Us, Region::Eu, Region::Tw] {
            assert_eq!(resolve(0, 0, region).timestamp(), base_epoch(region));
        }
    }

    #[test]
    fn eu_week_419_matches_known_reset() {
        // 1500447600 + 419 * 604800 = 1753858800 → 2025-07-30T07:00:00Z
        let ts = resolve(3_600, 419, Region::Eu);
        assert_eq!(ts.timestamp(), 1_753_858_800 + 3_600);
        assert_eq!(ts.to_rfc3339(), "2025-07-30T08:00:00+00:00");
    }

    #[test]
    fn resolve_is_deterministic() {
        assert_eq!(resolve(12_345, 400, Region::Eu), resolve(12_345, 400, Region::Eu));
    }

    #[test]
    fn consecutive_weeks_are_one_week_apart() {
        for (raw, week) in [(0, 0), (1, 1), (86_399, 419), (604_799, 500)] {
            let delta = resolve(raw, week + 1, Region::Us) - resolve(raw, week, Region::Us);
            assert_eq!(delta.num_seconds(), SECONDS_PER_WEEK);
        }
    }

    #[test]
    fn huge_inputs_clamp_instead_of_failing() {
        assert_eq!(resolve(u64::MAX, u64::MAX, Region::Eu), DateTime::<Utc>::MAX_UTC);
        assert_eq!(resolve(0, u64::MAX / 2, Region::Eu), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn week_of_inverts_resolve() {
        let ts = resolve(100, 419, Region::Tw);
        assert_eq!(week_of(ts, Region::Tw), 419);
        let before_epoch = DateTime::from_timestamp(base_epoch(Region::Tw) - 1, 0).unwrap();
        assert_eq!(week_of(before_epoch, Region::Tw), -1);
    }
}
