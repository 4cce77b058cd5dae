//! A/V synchronisation policy
//!
//! Pure timing arithmetic, no state and no I/O: given a frame's nominal
//! delay and the video clock's divergence from the master clock, decide how
//! long to actually wait before showing it. Keeping this free of side
//! effects is what makes the pacing behaviour unit-testable.

use crate::engine::NO_TIMESTAMP;

/// Below this divergence (seconds) no correction is applied.
pub const SYNC_THRESHOLD_MIN: f64 = 0.04;
/// Above this divergence corrections stop scaling with the frame delay.
pub const SYNC_THRESHOLD_MAX: f64 = 0.1;
/// Frames with a nominal delay above this are doubled instead of extended.
pub const FRAMEDUP_THRESHOLD: f64 = 0.1;
/// Divergence beyond this is a broken timeline; give up on correcting.
pub const NOSYNC_THRESHOLD: f64 = 10.0;

/// Adjust a frame's nominal display delay to pull the video clock toward
/// the master clock.
///
/// `diff` is video minus master, in seconds: negative means video is late
/// (shrink the delay, floor at zero), positive means video is early
/// (stretch it). The correction threshold is the nominal delay clamped to
/// `[SYNC_THRESHOLD_MIN, SYNC_THRESHOLD_MAX]`, so fast content tolerates
/// less divergence than slow content. NAN or runaway divergence leaves the
/// delay untouched.
pub fn adjust_delay(raw_delay: f64, diff: f64) -> f64 {
    if diff.is_nan() || diff.abs() >= NOSYNC_THRESHOLD {
        return raw_delay;
    }
    let threshold = raw_delay.clamp(SYNC_THRESHOLD_MIN, SYNC_THRESHOLD_MAX);
    if diff <= -threshold {
        (raw_delay + diff).max(0.0)
    } else if diff >= threshold && raw_delay > FRAMEDUP_THRESHOLD {
        raw_delay + diff
    } else if diff >= threshold {
        2.0 * raw_delay
    } else {
        raw_delay
    }
}

/// Convert a raw stream timestamp to seconds, mapping the missing-timestamp
/// sentinel to `0.0`.
pub fn pts_to_seconds(raw: i64, time_base: f64) -> f64 {
    if raw == NO_TIMESTAMP {
        0.0
    } else {
        raw as f64 * time_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_sync_passthrough() {
        assert_eq!(adjust_delay(0.04, 0.0), 0.04);
        assert_eq!(adjust_delay(0.04, 0.02), 0.04);
        assert_eq!(adjust_delay(0.04, -0.02), 0.04);
    }

    #[test]
    fn test_late_video_shrinks_delay() {
        assert_eq!(adjust_delay(0.04, -0.05), 0.0);
        // Floors at zero even when very late.
        assert_eq!(adjust_delay(0.04, -0.2), 0.0);
        // Mild lateness shrinks without flooring.
        assert!((adjust_delay(0.3, -0.1) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_early_video_doubles_short_frames() {
        assert_eq!(adjust_delay(0.04, 0.05), 0.08);
        assert_eq!(adjust_delay(0.1, 0.2), 0.2);
    }

    #[test]
    fn test_early_video_extends_long_frames() {
        // Delay above FRAMEDUP_THRESHOLD: add the divergence instead of
        // doubling.
        assert!((adjust_delay(0.15, 0.1) - 0.25).abs() < 1e-12);
        assert!((adjust_delay(0.15, 0.2) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_clamps_to_delay() {
        // threshold = clamp(0.2, 0.04, 0.1) = 0.1: a 0.09 divergence is
        // tolerated for a slow frame.
        assert_eq!(adjust_delay(0.2, 0.09), 0.2);
        // threshold = 0.04 for a fast frame: the same divergence corrects.
        assert_eq!(adjust_delay(0.02, 0.09), 0.04);
    }

    #[test]
    fn test_divergence_equal_to_threshold_corrects() {
        // The tolerance band is open: hitting the threshold exactly already
        // triggers a correction on both sides.
        assert_eq!(adjust_delay(0.04, 0.04), 0.08);
        assert_eq!(adjust_delay(0.04, -0.04), 0.0);
    }

    #[test]
    fn test_runaway_divergence_is_ignored() {
        assert_eq!(adjust_delay(0.04, 15.0), 0.04);
        assert_eq!(adjust_delay(0.04, -15.0), 0.04);
        // The bound is inclusive.
        assert_eq!(adjust_delay(0.04, 10.0), 0.04);
        assert_eq!(adjust_delay(0.04, -10.0), 0.04);
    }

    #[test]
    fn test_nan_divergence_is_ignored() {
        assert_eq!(adjust_delay(0.04, f64::NAN), 0.04);
    }

    #[test]
    fn test_pts_to_seconds() {
        assert_eq!(pts_to_seconds(90_000, 1.0 / 90_000.0), 1.0);
        assert_eq!(pts_to_seconds(0, 1.0 / 90_000.0), 0.0);
        assert_eq!(pts_to_seconds(NO_TIMESTAMP, 1.0 / 90_000.0), 0.0);
    }
}
