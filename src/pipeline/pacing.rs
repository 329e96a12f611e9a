//! Present-instant pacing.
//!
//! With frame generation at multiplier `M`, the `M` presents of one base
//! frame should hit the swap chain at evenly spaced instants:
//! `frame_start + k * base / M` for `k = 1..M`. The host sleeps until each
//! deadline, bounded so a late tick can never stall the loop for long.

use std::time::{Duration, Instant};

/// Base frame interval for a 60 Hz source.
pub const DEFAULT_BASE_FRAME_MS: f64 = 16.667;

/// Upper bound on any single pacing sleep.
pub const MAX_PACING_SLEEP: Duration = Duration::from_millis(20);

/// Base-frame interval derived from settings: an explicit target framerate
/// overrides the 60 Hz default.
pub fn base_frame_interval(target_framerate: f32) -> Duration {
    let ms = if target_framerate > 0.0 {
        1000.0 / target_framerate as f64
    } else {
        DEFAULT_BASE_FRAME_MS
    };
    Duration::from_secs_f64(ms / 1000.0)
}

/// Deadline of the `k`-th present (1-based) within a base frame.
pub fn present_deadline(
    frame_start: Instant,
    base_frame: Duration,
    k: u32,
    multiplier: u32,
) -> Instant {
    frame_start + (base_frame * k) / multiplier.max(1)
}

/// How long to sleep from `now` to hit `deadline`, bounded by
/// [`MAX_PACING_SLEEP`]. `None` when the deadline has already passed.
pub fn bounded_sleep(now: Instant, deadline: Instant) -> Option<Duration> {
    if now >= deadline {
        return None;
    }
    Some((deadline - now).min(MAX_PACING_SLEEP))
}

/// Sleep until `deadline` (bounded).
pub fn pace_until(deadline: Instant) {
    if let Some(wait) = bounded_sleep(Instant::now(), deadline) {
        std::thread::sleep(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_evenly_spaced() {
        let start = Instant::now();
        let base = Duration::from_micros(16_667);
        for m in 2..=4u32 {
            let step = base / m;
            for k in 1..=m {
                let deadline = present_deadline(start, base, k, m);
                let expected = start + step * k;
                let delta = if deadline > expected {
                    deadline - expected
                } else {
                    expected - deadline
                };
                // Integer Duration arithmetic may differ by rounding only.
                assert!(delta < Duration::from_micros(5), "m={m} k={k}");
            }
        }
    }

    #[test]
    fn test_deadlines_monotone_in_k() {
        let start = Instant::now();
        let base = Duration::from_micros(16_667);
        let mut last = start;
        for k in 1..=4 {
            let deadline = present_deadline(start, base, k, 4);
            assert!(deadline > last);
            last = deadline;
        }
    }

    #[test]
    fn test_final_deadline_is_frame_end() {
        let start = Instant::now();
        let base = Duration::from_millis(12);
        assert_eq!(present_deadline(start, base, 3, 3), start + base);
    }

    #[test]
    fn test_bounded_sleep_clamps() {
        let now = Instant::now();
        let far = now + Duration::from_millis(500);
        assert_eq!(bounded_sleep(now, far), Some(MAX_PACING_SLEEP));

        let near = now + Duration::from_millis(3);
        let wait = bounded_sleep(now, near).unwrap();
        assert!(wait <= Duration::from_millis(3));
    }

    #[test]
    fn test_bounded_sleep_past_deadline() {
        let now = Instant::now();
        assert_eq!(bounded_sleep(now, now), None);
        assert_eq!(bounded_sleep(now, now - Duration::from_millis(1)), None);
    }

    #[test]
    fn test_base_frame_interval() {
        let default = base_frame_interval(0.0);
        assert!((default.as_secs_f64() * 1000.0 - DEFAULT_BASE_FRAME_MS).abs() < 1e-6);

        let hz120 = base_frame_interval(120.0);
        assert!((hz120.as_secs_f64() - 1.0 / 120.0).abs() < 1e-9);
    }
}
