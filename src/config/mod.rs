//! Application settings.
//!
//! All tunables live in one [`AppSettings`] struct, loaded from and saved to
//! a sectioned `key = value` text file (see [`file`]). The running pipeline
//! never reads the file directly; it takes an immutable snapshot from
//! [`SharedSettings`] at the start of each tick, so changes fired from the
//! OS message thread only take effect at a well-defined point.

pub mod file;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FrameGenError, FrameGenResult};

/// Frame generation mode: how many presented frames per captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameGenMode {
    Disabled,
    X2,
    X3,
    X4,
}

impl FrameGenMode {
    /// Output-to-base frame ratio. `Disabled` presents captured frames only.
    pub fn multiplier(self) -> u32 {
        match self {
            FrameGenMode::Disabled => 1,
            FrameGenMode::X2 => 2,
            FrameGenMode::X3 => 3,
            FrameGenMode::X4 => 4,
        }
    }

    /// Next mode for the cycle hotkey: 2X -> 3X -> 4X -> 2X. `Disabled`
    /// cycles back to 2X.
    pub fn next(self) -> Self {
        match self {
            FrameGenMode::Disabled => FrameGenMode::X2,
            FrameGenMode::X2 => FrameGenMode::X3,
            FrameGenMode::X3 => FrameGenMode::X4,
            FrameGenMode::X4 => FrameGenMode::X2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameGenMode::Disabled => "Disabled",
            FrameGenMode::X2 => "2X",
            FrameGenMode::X3 => "3X",
            FrameGenMode::X4 => "4X",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "0" => FrameGenMode::Disabled,
            "3x" | "3" => FrameGenMode::X3,
            "4x" | "4" => FrameGenMode::X4,
            _ => FrameGenMode::X2,
        }
    }
}

/// Capture backend preference. Only DXGI desktop duplication is implemented;
/// `Auto` resolves to it and `Wgc` is accepted in the file for forward
/// compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMethod {
    Auto,
    Dxgi,
    Wgc,
}

impl CaptureMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureMethod::Auto => "Auto",
            CaptureMethod::Dxgi => "DXGI",
            CaptureMethod::Wgc => "WGC",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "dxgi" | "desktopdup" => CaptureMethod::Dxgi,
            "wgc" | "windowsgraphicscapture" => CaptureMethod::Wgc,
            _ => CaptureMethod::Auto,
        }
    }
}

/// GPU topology selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuMode {
    Single,
    Dual,
    Auto,
}

impl GpuMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GpuMode::Single => "Single",
            GpuMode::Dual => "Dual",
            GpuMode::Auto => "Auto",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "singlegpu" => GpuMode::Single,
            "dual" | "dualgpu" => GpuMode::Dual,
            _ => GpuMode::Auto,
        }
    }
}

/// Overlay corner, stored as the numeric code used in the config file:
/// 0=TopLeft, 1=TopRight, 2=BottomLeft, 3=BottomRight.
pub const OVERLAY_POSITIONS: u32 = 4;

/// All application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    // [FrameGen]
    pub frame_gen_mode: FrameGenMode,
    pub enable_frame_gen: bool,
    /// 0 = match the display refresh rate.
    pub target_framerate: f32,

    // [Capture]
    pub capture_method: CaptureMethod,
    pub capture_monitor: u32,
    pub capture_cursor: bool,

    // [GPU]
    pub gpu_mode: GpuMode,
    pub primary_gpu: u32,
    pub secondary_gpu: u32,

    // [OpticalFlow]
    pub block_size: u32,
    pub search_radius: u32,
    pub scene_change_threshold: f32,

    // [Presentation]
    pub vsync: bool,
    pub borderless: bool,
    pub window_width: u32,
    pub window_height: u32,

    // [Overlay]
    pub show_overlay: bool,
    pub show_fps: bool,
    pub show_frame_time: bool,
    pub show_gpu_usage: bool,
    pub overlay_position: u32,
    pub overlay_scale: f32,

    // [Hotkeys] (virtual-key codes)
    pub hotkey_toggle_frame_gen: u32,
    pub hotkey_toggle_overlay: u32,
    pub hotkey_cycle_mode: u32,
    pub hotkey_require_alt: bool,

    // [Advanced]
    pub frame_buffer_count: u32,
    pub peer_to_peer: bool,
    pub debug: bool,
    pub log_file: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            frame_gen_mode: FrameGenMode::X2,
            enable_frame_gen: true,
            target_framerate: 0.0,

            capture_method: CaptureMethod::Auto,
            capture_monitor: 0,
            capture_cursor: true,

            gpu_mode: GpuMode::Auto,
            primary_gpu: 0,
            secondary_gpu: 1,

            block_size: 8,
            search_radius: 12,
            scene_change_threshold: 0.5,

            vsync: true,
            borderless: true,
            window_width: 1920,
            window_height: 1080,

            show_overlay: true,
            show_fps: true,
            show_frame_time: true,
            show_gpu_usage: false,
            overlay_position: 0,
            overlay_scale: 1.0,

            hotkey_toggle_frame_gen: crate::hotkeys::keys::VK_F10,
            hotkey_toggle_overlay: crate::hotkeys::keys::VK_F11,
            hotkey_cycle_mode: crate::hotkeys::keys::VK_F12,
            hotkey_require_alt: true,

            frame_buffer_count: 3,
            peer_to_peer: true,
            debug: false,
            log_file: String::new(),
        }
    }
}

impl AppSettings {
    /// Validate the cross-field rules. Returns the first violation.
    pub fn validate(&self) -> FrameGenResult<()> {
        if !(4..=32).contains(&self.block_size) {
            return Err(FrameGenError::ConfigurationInvalid(format!(
                "optical flow block size must be between 4 and 32 (got {})",
                self.block_size
            )));
        }
        if !(0.0..=1.0).contains(&self.scene_change_threshold) {
            return Err(FrameGenError::ConfigurationInvalid(format!(
                "scene change threshold must be between 0.0 and 1.0 (got {})",
                self.scene_change_threshold
            )));
        }
        if self.gpu_mode == GpuMode::Dual && self.primary_gpu == self.secondary_gpu {
            return Err(FrameGenError::ConfigurationInvalid(
                "primary and secondary GPU cannot be the same in dual mode".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thread-safe handle to the live settings.
///
/// Writers (hotkey thread, a future settings UI) batch their changes through
/// [`SharedSettings::update`]; the orchestrator calls
/// [`SharedSettings::snapshot`] exactly once per tick.
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<AppSettings>>,
}

impl SharedSettings {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> AppSettings {
        self.inner.read().clone()
    }

    pub fn update<F: FnOnce(&mut AppSettings)>(&self, f: F) {
        let mut guard = self.inner.write();
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AppSettings::default().validate().is_ok());
    }

    #[test]
    fn test_multiplier_mapping() {
        assert_eq!(FrameGenMode::Disabled.multiplier(), 1);
        assert_eq!(FrameGenMode::X2.multiplier(), 2);
        assert_eq!(FrameGenMode::X3.multiplier(), 3);
        assert_eq!(FrameGenMode::X4.multiplier(), 4);
    }

    #[test]
    fn test_mode_cycle() {
        assert_eq!(FrameGenMode::X2.next(), FrameGenMode::X3);
        assert_eq!(FrameGenMode::X3.next(), FrameGenMode::X4);
        assert_eq!(FrameGenMode::X4.next(), FrameGenMode::X2);
        assert_eq!(FrameGenMode::Disabled.next(), FrameGenMode::X2);
    }

    #[test]
    fn test_enum_parse_forms() {
        assert_eq!(FrameGenMode::parse("3x"), FrameGenMode::X3);
        assert_eq!(FrameGenMode::parse("off"), FrameGenMode::Disabled);
        assert_eq!(FrameGenMode::parse("garbage"), FrameGenMode::X2);
        assert_eq!(CaptureMethod::parse("desktopdup"), CaptureMethod::Dxgi);
        assert_eq!(GpuMode::parse("DualGPU"), GpuMode::Dual);
    }

    #[test]
    fn test_validation_rejects_bad_block_size() {
        let mut s = AppSettings::default();
        s.block_size = 2;
        assert!(s.validate().is_err());
        s.block_size = 33;
        assert!(s.validate().is_err());
        s.block_size = 4;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_same_gpu_in_dual_mode() {
        let mut s = AppSettings::default();
        s.gpu_mode = GpuMode::Dual;
        s.primary_gpu = 1;
        s.secondary_gpu = 1;
        assert!(s.validate().is_err());
        s.secondary_gpu = 0;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_shared_settings_snapshot_is_isolated() {
        let shared = SharedSettings::new(AppSettings::default());
        let snap = shared.snapshot();
        shared.update(|s| s.enable_frame_gen = false);
        assert!(snap.enable_frame_gen);
        assert!(!shared.snapshot().enable_frame_gen);
    }
}
