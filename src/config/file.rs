//! Sectioned `key = value` settings file.
//!
//! The format is the classic INI shape: `[Section]` headers, one `key = value`
//! pair per line, `#` or `;` comments, optional double quotes around string
//! values. Keys and section names are case-insensitive on load; the file is
//! rewritten with canonical casing and sectioning on save.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AppSettings, CaptureMethod, FrameGenMode, GpuMode};
use crate::error::{FrameGenError, FrameGenResult};

/// Directory and file name under `%APPDATA%`.
const CONFIG_DIR: &str = "framegen";
const CONFIG_FILE: &str = "framegen.ini";

/// Default config path: `%APPDATA%\framegen\framegen.ini`, falling back to
/// the working directory when `APPDATA` is not set.
pub fn default_config_path() -> PathBuf {
    match std::env::var_os("APPDATA") {
        Some(appdata) => Path::new(&appdata).join(CONFIG_DIR).join(CONFIG_FILE),
        None => PathBuf::from(CONFIG_FILE),
    }
}

/// Load settings from `path`.
///
/// A missing file is not an error: defaults are written to `path` and
/// returned. A file that parses but fails validation falls back to defaults
/// with a warning, so a hand-edited bad value never blocks startup.
pub fn load(path: &Path) -> FrameGenResult<AppSettings> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no settings file at {}, writing defaults", path.display());
            let settings = AppSettings::default();
            save(&settings, path)?;
            return Ok(settings);
        }
        Err(err) => return Err(err.into()),
    };

    let settings = parse(&text);
    if let Err(err) = settings.validate() {
        log::warn!("settings file {} invalid ({err}), using defaults", path.display());
        return Ok(AppSettings::default());
    }
    Ok(settings)
}

/// Save settings to `path`, creating parent directories as needed.
/// Invalid settings are refused.
pub fn save(settings: &AppSettings, path: &Path) -> FrameGenResult<()> {
    settings.validate()?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, render(settings)).map_err(FrameGenError::from)
}

/// Parse settings text. Unknown sections and keys are ignored; missing keys
/// keep their defaults.
pub fn parse(text: &str) -> AppSettings {
    let mut s = AppSettings::default();
    let mut section = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_ascii_lowercase();
            continue;
        }
        let Some(eq) = line.find('=') else { continue };
        let key = line[..eq].trim().to_ascii_lowercase();
        let value = unquote(line[eq + 1..].trim());

        match section.as_str() {
            "framegen" => match key.as_str() {
                "mode" => s.frame_gen_mode = FrameGenMode::parse(value),
                "enabled" => s.enable_frame_gen = parse_bool(value),
                "targetframerate" => s.target_framerate = parse_float(value),
                _ => {}
            },
            "capture" => match key.as_str() {
                "method" => s.capture_method = CaptureMethod::parse(value),
                "monitor" => s.capture_monitor = parse_uint(value),
                "cursor" => s.capture_cursor = parse_bool(value),
                _ => {}
            },
            "gpu" => match key.as_str() {
                "mode" => s.gpu_mode = GpuMode::parse(value),
                "primary" => s.primary_gpu = parse_uint(value),
                "secondary" => s.secondary_gpu = parse_uint(value),
                _ => {}
            },
            "opticalflow" => match key.as_str() {
                "blocksize" => s.block_size = parse_uint(value),
                "searchradius" => s.search_radius = parse_uint(value),
                "scenechangethreshold" => s.scene_change_threshold = parse_float(value),
                _ => {}
            },
            "presentation" => match key.as_str() {
                "vsync" => s.vsync = parse_bool(value),
                "borderless" => s.borderless = parse_bool(value),
                "width" => s.window_width = parse_uint(value),
                "height" => s.window_height = parse_uint(value),
                _ => {}
            },
            "overlay" => match key.as_str() {
                "show" => s.show_overlay = parse_bool(value),
                "fps" => s.show_fps = parse_bool(value),
                "frametime" => s.show_frame_time = parse_bool(value),
                "gpuusage" => s.show_gpu_usage = parse_bool(value),
                "position" => s.overlay_position = parse_uint(value),
                "scale" => s.overlay_scale = parse_float(value),
                _ => {}
            },
            "hotkeys" => match key.as_str() {
                "toggleframegen" => s.hotkey_toggle_frame_gen = parse_uint(value),
                "toggleoverlay" => s.hotkey_toggle_overlay = parse_uint(value),
                "cyclemode" => s.hotkey_cycle_mode = parse_uint(value),
                "requirealt" => s.hotkey_require_alt = parse_bool(value),
                _ => {}
            },
            "advanced" => match key.as_str() {
                "framebuffercount" => s.frame_buffer_count = parse_uint(value),
                "peertopeer" => s.peer_to_peer = parse_bool(value),
                "debug" => s.debug = parse_bool(value),
                "logfile" => s.log_file = value.to_string(),
                _ => {}
            },
            _ => {}
        }
    }

    s
}

/// Render settings to the canonical file text.
pub fn render(s: &AppSettings) -> String {
    let b = |v: bool| if v { "true" } else { "false" };
    format!(
        "# Frame generation configuration\n\
         # Generated automatically - edit with care\n\n\
         [FrameGen]\n\
         Mode = {}\n\
         Enabled = {}\n\
         TargetFramerate = {}\n\n\
         [Capture]\n\
         Method = {}\n\
         Monitor = {}\n\
         Cursor = {}\n\n\
         [GPU]\n\
         Mode = {}\n\
         Primary = {}\n\
         Secondary = {}\n\n\
         [OpticalFlow]\n\
         BlockSize = {}\n\
         SearchRadius = {}\n\
         SceneChangeThreshold = {}\n\n\
         [Presentation]\n\
         VSync = {}\n\
         Borderless = {}\n\
         Width = {}\n\
         Height = {}\n\n\
         [Overlay]\n\
         Show = {}\n\
         FPS = {}\n\
         FrameTime = {}\n\
         GPUUsage = {}\n\
         Position = {}\n\
         Scale = {}\n\n\
         [Hotkeys]\n\
         ToggleFrameGen = {}\n\
         ToggleOverlay = {}\n\
         CycleMode = {}\n\
         RequireAlt = {}\n\n\
         [Advanced]\n\
         FrameBufferCount = {}\n\
         PeerToPeer = {}\n\
         Debug = {}\n\
         LogFile = \"{}\"\n",
        s.frame_gen_mode.as_str(),
        b(s.enable_frame_gen),
        s.target_framerate,
        s.capture_method.as_str(),
        s.capture_monitor,
        b(s.capture_cursor),
        s.gpu_mode.as_str(),
        s.primary_gpu,
        s.secondary_gpu,
        s.block_size,
        s.search_radius,
        s.scene_change_threshold,
        b(s.vsync),
        b(s.borderless),
        s.window_width,
        s.window_height,
        b(s.show_overlay),
        b(s.show_fps),
        b(s.show_frame_time),
        b(s.show_gpu_usage),
        s.overlay_position,
        s.overlay_scale,
        s.hotkey_toggle_frame_gen,
        s.hotkey_toggle_overlay,
        s.hotkey_cycle_mode,
        b(s.hotkey_require_alt),
        s.frame_buffer_count,
        b(s.peer_to_peer),
        b(s.debug),
        s.log_file,
    )
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_uint(value: &str) -> u32 {
    value.trim().parse().unwrap_or(0)
}

fn parse_float(value: &str) -> f32 {
    value.trim().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parse_roundtrip_defaults() {
        let s = AppSettings::default();
        assert_eq!(parse(&render(&s)), s);
    }

    #[test]
    fn test_bool_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("YES"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("maybe"));
    }

    #[test]
    fn test_quoted_string_value() {
        let text = "[Advanced]\nLogFile = \"C:\\logs\\fg.log\"\n";
        let s = parse(text);
        assert_eq!(s.log_file, "C:\\logs\\fg.log");
    }

    #[test]
    fn test_comments_and_unknown_keys_ignored() {
        let text = "# comment\n; other comment\n[FrameGen]\nMode = 3X\nBogus = 7\n[NoSuchSection]\nMode = 4X\n";
        let s = parse(text);
        assert_eq!(s.frame_gen_mode, FrameGenMode::X3);
    }

    #[test]
    fn test_case_insensitive_sections_and_keys() {
        let text = "[opticalFLOW]\nblockSIZE = 16\nSEARCHradius = 4\n";
        let s = parse(text);
        assert_eq!(s.block_size, 16);
        assert_eq!(s.search_radius, 4);
    }

    #[test]
    fn test_malformed_numbers_fall_back_to_zero() {
        let text = "[Capture]\nMonitor = banana\n";
        let s = parse(text);
        assert_eq!(s.capture_monitor, 0);
    }
}
