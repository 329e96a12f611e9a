//! Settings file round-trip through a real temp file.

use std::path::PathBuf;

use framegen::config::file::{load, parse, render, save};
use framegen::config::{AppSettings, CaptureMethod, FrameGenMode, GpuMode};

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("framegen-test-{}-{}.ini", name, std::process::id()));
    path
}

/// Every boolean flipped and every enum moved off its default.
fn fully_modified() -> AppSettings {
    let defaults = AppSettings::default();
    AppSettings {
        frame_gen_mode: FrameGenMode::X4,
        enable_frame_gen: !defaults.enable_frame_gen,
        target_framerate: 144.0,

        capture_method: CaptureMethod::Wgc,
        capture_monitor: 1,
        capture_cursor: !defaults.capture_cursor,

        gpu_mode: GpuMode::Dual,
        primary_gpu: 0,
        secondary_gpu: 1,

        block_size: 16,
        search_radius: 4,
        scene_change_threshold: 0.75,

        vsync: !defaults.vsync,
        borderless: !defaults.borderless,
        window_width: 2560,
        window_height: 1440,

        show_overlay: !defaults.show_overlay,
        show_fps: !defaults.show_fps,
        show_frame_time: !defaults.show_frame_time,
        show_gpu_usage: !defaults.show_gpu_usage,
        overlay_position: 3,
        overlay_scale: 1.5,

        hotkey_toggle_frame_gen: 0x74, // F5
        hotkey_toggle_overlay: 0x75,   // F6
        hotkey_cycle_mode: 0x76,       // F7
        hotkey_require_alt: !defaults.hotkey_require_alt,

        frame_buffer_count: 2,
        peer_to_peer: !defaults.peer_to_peer,
        debug: !defaults.debug,
        log_file: "C:\\temp\\framegen.log".to_string(),
    }
}

#[test]
fn save_then_load_preserves_every_field() {
    let path = temp_path("full");
    let settings = fully_modified();

    save(&settings, &path).expect("save failed");
    let loaded = load(&path).expect("load failed");
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, settings);
}

#[test]
fn defaults_roundtrip_through_text() {
    let defaults = AppSettings::default();
    assert_eq!(parse(&render(&defaults)), defaults);
}

#[test]
fn missing_file_creates_defaults() {
    let path = temp_path("missing");
    std::fs::remove_file(&path).ok();

    let loaded = load(&path).expect("load of missing file should write defaults");
    assert_eq!(loaded, AppSettings::default());
    assert!(path.exists(), "defaults should have been written");
    std::fs::remove_file(&path).ok();
}

#[test]
fn invalid_file_falls_back_to_defaults() {
    let path = temp_path("invalid");
    // Block size 2 violates the [4, 32] rule.
    std::fs::write(&path, "[OpticalFlow]\nBlockSize = 2\n").unwrap();

    let loaded = load(&path).expect("invalid settings fall back, not error");
    assert_eq!(loaded, AppSettings::default());
    std::fs::remove_file(&path).ok();
}

#[test]
fn save_refuses_invalid_settings() {
    let path = temp_path("refused");
    let mut settings = AppSettings::default();
    settings.gpu_mode = GpuMode::Dual;
    settings.secondary_gpu = settings.primary_gpu;

    assert!(save(&settings, &path).is_err());
    assert!(!path.exists());
}

#[test]
fn rendered_file_keeps_canonical_sectioning() {
    let text = render(&AppSettings::default());
    let sections: Vec<&str> = text
        .lines()
        .filter(|line| line.starts_with('['))
        .collect();
    assert_eq!(
        sections,
        vec![
            "[FrameGen]",
            "[Capture]",
            "[GPU]",
            "[OpticalFlow]",
            "[Presentation]",
            "[Overlay]",
            "[Hotkeys]",
            "[Advanced]"
        ]
    );
}
