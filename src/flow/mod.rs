//! Optical-flow stage.
//!
//! Consumes the (previous, current) pair on the compute device and produces
//! a motion-vector image: one signed 16-bit 2D displacement per block, in
//! 1/16-pixel units. Estimation is luminance-SAD block matching with a
//! three-step search (see [`shader`]).

pub mod shader;

use serde::{Deserialize, Serialize};

/// BT.709 luminance weights in linear space.
pub const BT709_LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Largest supported search radius. The search window is staged in
/// group-shared memory, which bounds the radius.
pub const MAX_SEARCH_RADIUS: u32 = 16;

/// Motion-estimation configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionEstimatorConfig {
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub search_radius: u32,
    pub luminance: [f32; 3],
}

impl MotionEstimatorConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            block_size: 8,
            search_radius: 12,
            luminance: BT709_LUMA,
        }
    }
}

#[cfg(windows)]
mod stage;
#[cfg(windows)]
pub use stage::OpticalFlow;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::motion_field_size;

    #[test]
    fn test_default_config() {
        let config = MotionEstimatorConfig::new(1920, 1080);
        assert_eq!(config.block_size, 8);
        assert_eq!(config.search_radius, 12);
        assert_eq!(config.luminance, BT709_LUMA);
    }

    #[test]
    fn test_luma_weights_sum_to_one() {
        let sum: f32 = BT709_LUMA.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_motion_field_covers_partial_blocks() {
        let config = MotionEstimatorConfig::new(1923, 1081);
        let (w, h) = motion_field_size(config.width, config.height, config.block_size);
        assert_eq!((w, h), (241, 136));
    }
}
