//! Desktop capture.
//!
//! The capture stage owns a D3D11 device on the capture adapter and a DXGI
//! desktop-duplication session on one of its outputs. Captured frames are
//! read-only 2D textures owned by that device; consumers must finish their
//! reads (or their copies into compute-owned storage) before `release`.

#[cfg(windows)]
pub mod duplication;

use serde::{Deserialize, Serialize};

/// Capture configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// DXGI adapter index to capture on.
    pub adapter_index: u32,
    /// Output (monitor) index on that adapter.
    pub output_index: u32,
    /// Default acquire timeout, compatible with a 60 Hz poll.
    pub timeout_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            output_index: 0,
            timeout_ms: 16,
        }
    }
}
