//! Present pacing and flip accounting.

use std::time::{Duration, Instant};

use framegen::pipeline::pacing::{
    base_frame_interval, bounded_sleep, present_deadline, DEFAULT_BASE_FRAME_MS, MAX_PACING_SLEEP,
};
use framegen::pipeline::presents_per_tick;

#[test]
fn presents_land_at_even_fractions_of_the_base_interval() {
    let start = Instant::now();
    let base = base_frame_interval(0.0);

    for m in [2u32, 3, 4] {
        let deadlines: Vec<Instant> = (1..=m)
            .map(|k| present_deadline(start, base, k, m))
            .collect();

        // Strictly increasing, last lands at the end of the interval.
        for pair in deadlines.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        let last = *deadlines.last().unwrap();
        let expected_end = start + base;
        let skew = if last > expected_end {
            last - expected_end
        } else {
            expected_end - last
        };
        assert!(skew < Duration::from_micros(5));

        // Even spacing within integer rounding.
        let step = base / m;
        for (k, deadline) in deadlines.iter().enumerate() {
            let expected = start + step * (k as u32 + 1);
            let skew = if *deadline > expected {
                *deadline - expected
            } else {
                expected - *deadline
            };
            assert!(skew < Duration::from_micros(5), "m={m} k={}", k + 1);
        }
    }
}

#[test]
fn pacing_sleep_never_exceeds_the_bound() {
    let now = Instant::now();
    for ms in [0u64, 1, 5, 19, 20, 21, 1000] {
        let deadline = now + Duration::from_millis(ms);
        if let Some(wait) = bounded_sleep(now, deadline) {
            assert!(wait <= MAX_PACING_SLEEP);
        }
    }
}

#[test]
fn default_interval_matches_sixty_hertz() {
    let base = base_frame_interval(0.0);
    assert!((base.as_secs_f64() * 1000.0 - DEFAULT_BASE_FRAME_MS).abs() < 1e-6);
}

#[test]
fn multiplier_change_mid_stream_counts_flips_exactly() {
    // 30 base ticks at 2x, then 30 at 4x: 60 + 120 flips.
    let mut flips = 0u32;
    for tick in 0..60 {
        let multiplier = if tick < 30 { 2 } else { 4 };
        flips += presents_per_tick(true, multiplier);
    }
    assert_eq!(flips, 180);
}

#[test]
fn frame_gen_disabled_presents_one_per_tick() {
    let mut flips = 0u32;
    for _ in 0..30 {
        flips += presents_per_tick(false, 2);
    }
    assert_eq!(flips, 30);
}
