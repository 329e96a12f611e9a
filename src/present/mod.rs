//! Presentation.
//!
//! The presenter owns the output window and a flip-model swap chain on the
//! compute queue. `present` records a bounded copy of any compute-device
//! texture into the current back buffer; `flip` performs the swap-chain
//! present with per-buffer fence tracking so a back buffer is never recorded
//! into while still in flight.

use serde::{Deserialize, Serialize};

/// Back-buffer count bounds. The per-buffer fence table is fixed size;
/// values outside this range are clamped.
pub const MIN_BACK_BUFFERS: u32 = 2;
pub const MAX_BACK_BUFFERS: u32 = 3;

/// Output window cap. Larger captures are shown through a window of this
/// size; the present copy is bounded accordingly.
pub const MAX_OUTPUT_WIDTH: u32 = 1280;
pub const MAX_OUTPUT_HEIGHT: u32 = 720;

/// Clamp a configured back-buffer count into the supported range.
pub fn clamp_buffer_count(requested: u32) -> u32 {
    requested.clamp(MIN_BACK_BUFFERS, MAX_BACK_BUFFERS)
}

/// Window client-area size for a given capture resolution.
pub fn output_size(capture_width: u32, capture_height: u32) -> (u32, u32) {
    (
        capture_width.min(MAX_OUTPUT_WIDTH),
        capture_height.min(MAX_OUTPUT_HEIGHT),
    )
}

/// Presenter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenterConfig {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub borderless: bool,
    pub window_title: String,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            width: MAX_OUTPUT_WIDTH,
            height: MAX_OUTPUT_HEIGHT,
            buffer_count: MIN_BACK_BUFFERS,
            borderless: false,
            window_title: "Frame Generation".to_string(),
        }
    }
}

#[cfg(windows)]
mod swapchain;
#[cfg(windows)]
pub use swapchain::Presenter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_count_clamped() {
        assert_eq!(clamp_buffer_count(0), 2);
        assert_eq!(clamp_buffer_count(1), 2);
        assert_eq!(clamp_buffer_count(2), 2);
        assert_eq!(clamp_buffer_count(3), 3);
        assert_eq!(clamp_buffer_count(8), 3);
    }

    #[test]
    fn test_output_size_caps_large_captures() {
        assert_eq!(output_size(3840, 2160), (1280, 720));
        assert_eq!(output_size(1280, 720), (1280, 720));
        assert_eq!(output_size(800, 600), (800, 600));
        // Each axis is capped independently.
        assert_eq!(output_size(1024, 2000), (1024, 720));
    }
}
