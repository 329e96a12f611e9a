//! Console harness.
//!
//! Loads settings, starts the hotkey listener, builds the pipeline per the
//! configured GPU mode, and runs until the output window closes.
//!
//! Exit codes: 0 on a normal window close, 1 on initialisation failure,
//! 2 when the running loop stops on a fatal error.

use std::fs::OpenOptions;
use std::path::PathBuf;

use framegen::config::file as config_file;
use framegen::AppSettings;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let config_path = std::env::var_os("FRAMEGEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(config_file::default_config_path);

    let settings = match config_file::load(&config_path) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("failed to load settings from {}: {err}", config_path.display());
            return 1;
        }
    };

    init_logger(&settings);
    log::info!("settings loaded from {}", config_path.display());

    run_pipeline(settings)
}

fn init_logger(settings: &AppSettings) {
    let filter = if settings.debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter),
    );
    if !settings.log_file.is_empty() {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.log_file)
        {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("log file {} unavailable ({err}), logging to stderr", settings.log_file);
            }
        }
    }
    let _ = builder.try_init();
}

#[cfg(windows)]
fn run_pipeline(settings: AppSettings) -> i32 {
    use framegen::hotkeys::{self, listener::HotkeyListener};
    use framegen::{FrameGenPipeline, SharedSettings};

    let shared = SharedSettings::new(settings);

    let (action_tx, action_rx) = hotkeys::action_channel();
    let bindings = hotkeys::bindings_from_settings(&shared.snapshot());
    let _listener = match HotkeyListener::spawn(bindings, action_tx) {
        Ok(listener) => Some(listener),
        Err(err) => {
            log::warn!("hotkeys unavailable: {err}");
            None
        }
    };

    let mut pipeline = match FrameGenPipeline::new(shared, Some(action_rx)) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("initialisation failed: {err}");
            eprintln!("initialisation failed: {err}");
            return 1;
        }
    };

    match pipeline.run() {
        Ok(()) => {
            let stats = pipeline.stats();
            log::info!(
                "done: {} base frames, {} generated, {} presented, {} dropped ticks",
                stats.base_frames_captured,
                stats.frames_generated,
                stats.frames_presented,
                stats.ticks_dropped
            );
            0
        }
        Err(err) => {
            log::error!("pipeline stopped: {err}");
            eprintln!("pipeline stopped: {err}");
            2
        }
    }
}

#[cfg(not(windows))]
fn run_pipeline(_settings: AppSettings) -> i32 {
    eprintln!("the frame-generation pipeline requires Windows (DXGI desktop duplication)");
    1
}
