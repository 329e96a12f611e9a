//! Rolling statistics shared by every pipeline stage.
//!
//! Each stage keeps a [`RollingMs`] per timed operation. The average is an
//! exponential moving average with `alpha = 0.1`, matching the smoothing used
//! for the on-screen overlay; min/max are absolute over the run.

use serde::{Deserialize, Serialize};

/// Smoothing factor for all rolling averages.
pub const EMA_ALPHA: f64 = 0.1;

/// Rolling duration statistics in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingMs {
    pub last_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub samples: u64,
}

impl Default for RollingMs {
    fn default() -> Self {
        Self {
            last_ms: 0.0,
            min_ms: f64::MAX,
            max_ms: 0.0,
            avg_ms: 0.0,
            samples: 0,
        }
    }
}

impl RollingMs {
    /// Record one sample. The first sample initialises the average; later
    /// samples blend in with `EMA_ALPHA`.
    pub fn record(&mut self, ms: f64) {
        self.last_ms = ms;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
        self.samples += 1;
        if self.samples == 1 {
            self.avg_ms = ms;
        } else {
            self.avg_ms = EMA_ALPHA * ms + (1.0 - EMA_ALPHA) * self.avg_ms;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Capture-stage statistics exposed to the overlay collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_missed: u64,
    pub acquire: RollingMs,
}

/// Optical-flow stage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
    pub dispatches: u64,
    pub cpu_record: RollingMs,
    /// GPU interval of the dispatch *before* the most recent one; timestamp
    /// readback is integrated one frame late to avoid a host stall.
    pub gpu_dispatch: RollingMs,
}

/// Interpolation-stage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationStats {
    pub frames_interpolated: u64,
    pub cpu_record: RollingMs,
}

/// Cross-adapter transfer statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub frames_transferred: u64,
    pub bytes_transferred: u64,
    pub transfer: RollingMs,
    pub throughput_mbps: f64,
    pub using_shared_heap: bool,
}

/// Presenter statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenterStats {
    pub frames_presented: u64,
    pub present: RollingMs,
}

/// Whole-pipeline statistics sampled once per base tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub base_frames_captured: u64,
    pub frames_generated: u64,
    pub frames_presented: u64,
    pub ticks_dropped: u64,
    pub capture_ms: f64,
    pub ingest_ms: f64,
    pub flow_ms: f64,
    pub interpolation_ms: f64,
    pub present_ms: f64,
    pub tick: RollingMs,
    pub base_fps: f64,
    pub output_fps: f64,
}

impl PipelineStats {
    /// Derive FPS figures from the finished tick's wall time.
    pub fn finish_tick(&mut self, tick_ms: f64, multiplier: u32) {
        self.tick.record(tick_ms);
        if tick_ms > 0.0 {
            self.base_fps = 1000.0 / tick_ms;
            self.output_fps = self.base_fps * multiplier as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_initialises_average() {
        let mut r = RollingMs::default();
        r.record(4.0);
        assert_eq!(r.avg_ms, 4.0);
        assert_eq!(r.min_ms, 4.0);
        assert_eq!(r.max_ms, 4.0);
        assert_eq!(r.samples, 1);
    }

    #[test]
    fn test_ema_blend() {
        let mut r = RollingMs::default();
        r.record(10.0);
        r.record(20.0);
        // 0.1 * 20 + 0.9 * 10
        assert!((r.avg_ms - 11.0).abs() < 1e-9);
        assert_eq!(r.last_ms, 20.0);
        assert_eq!(r.min_ms, 10.0);
        assert_eq!(r.max_ms, 20.0);
    }

    #[test]
    fn test_reset() {
        let mut r = RollingMs::default();
        r.record(5.0);
        r.reset();
        assert_eq!(r.samples, 0);
        assert_eq!(r.max_ms, 0.0);
    }

    #[test]
    fn test_pipeline_fps() {
        let mut s = PipelineStats::default();
        s.finish_tick(16.667, 3);
        assert!((s.base_fps - 59.999).abs() < 0.01);
        assert!((s.output_fps - 179.99).abs() < 0.05);
    }
}
