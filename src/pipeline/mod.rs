//! The frame-loop orchestrator.
//!
//! One tick: acquire a desktop frame, land it on the compute device,
//! estimate motion against the previous frame, synthesise `M - 1`
//! intermediate frames, and interleave `M` paced presents. All GPU work
//! between ingest and the final flip runs on one direct queue in submission
//! order; cross-stage synchronisation is resource-state transitions, not
//! extra fences.

pub mod pacing;

#[cfg(windows)]
mod orchestrator;
#[cfg(windows)]
pub use orchestrator::FrameGenPipeline;

/// Window title shown on the output swap chain.
pub const WINDOW_TITLE: &str = "Frame Generation";

/// How many presents one base tick produces.
pub fn presents_per_tick(frame_gen_enabled: bool, multiplier: u32) -> u32 {
    if frame_gen_enabled {
        multiplier.max(1)
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presents_per_tick() {
        assert_eq!(presents_per_tick(true, 2), 2);
        assert_eq!(presents_per_tick(true, 4), 4);
        assert_eq!(presents_per_tick(false, 4), 1);
        assert_eq!(presents_per_tick(true, 0), 1);
    }

    #[test]
    fn test_flip_count_over_run() {
        // 30 ticks at 2x then 30 ticks at 4x.
        let flips: u32 = (0..30).map(|_| presents_per_tick(true, 2)).sum::<u32>()
            + (0..30).map(|_| presents_per_tick(true, 4)).sum::<u32>();
        assert_eq!(flips, 60 + 120);
    }

    #[test]
    fn test_disabled_frame_gen_presents_base_rate() {
        let flips: u32 = (0..50).map(|_| presents_per_tick(false, 2)).sum();
        assert_eq!(flips, 50);
    }
}
