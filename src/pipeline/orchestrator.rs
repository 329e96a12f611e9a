//! Tick loop and stage wiring.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;

use crate::capture::duplication::{output_dimensions, Acquire, DuplicationCapture};
use crate::capture::CaptureConfig;
use crate::config::{CaptureMethod, FrameGenMode, GpuMode, SharedSettings};
use crate::error::{FrameGenError, FrameGenResult};
use crate::flow::{MotionEstimatorConfig, OpticalFlow};
use crate::gpu::context::GpuContext;
use crate::gpu::enumerate_gpus;
use crate::hotkeys::HotkeyAction;
use crate::interop::FrameRing;
use crate::interp::{phases_for_multiplier, FrameInterpolator, InterpolationConfig};
use crate::pipeline::pacing::{self, base_frame_interval, present_deadline};
use crate::pipeline::WINDOW_TITLE;
use crate::present::{output_size, Presenter, PresenterConfig};
use crate::stats::PipelineStats;
use crate::transfer::{CrossAdapterTransfer, TransferConfig};

/// Ticks between telemetry log lines.
const TELEMETRY_INTERVAL: u64 = 120;

/// Where the compute-device (Previous, Current) pair comes from.
enum FrameSource {
    /// Single-GPU: the interop ring on the compute device.
    Interop(FrameRing),
    /// Dual-GPU: the transfer engine's destination ring.
    Transfer(CrossAdapterTransfer),
}

/// The assembled pipeline.
pub struct FrameGenPipeline {
    context: GpuContext,
    capture: DuplicationCapture,
    source: FrameSource,
    flow: OpticalFlow,
    interp: FrameInterpolator,
    presenter: Presenter,

    settings: SharedSettings,
    actions: Option<Receiver<HotkeyAction>>,

    capture_timeout_ms: u32,
    base_frame: Duration,
    ingested: u64,
    stats: PipelineStats,
}

impl FrameGenPipeline {
    /// Build every stage according to the current settings snapshot.
    pub fn new(
        settings: SharedSettings,
        actions: Option<Receiver<HotkeyAction>>,
    ) -> FrameGenResult<Self> {
        let snapshot = settings.snapshot();
        snapshot.validate()?;

        let gpus = enumerate_gpus()?;
        if gpus.is_empty() {
            return Err(FrameGenError::Initialization(
                "no hardware adapters found".into(),
            ));
        }
        for gpu in &gpus {
            log::info!(
                "adapter {}: {} ({} MiB dedicated{})",
                gpu.adapter_index,
                gpu.description,
                gpu.dedicated_video_memory >> 20,
                if gpu.supports_cross_adapter_row_major {
                    ", cross-adapter row-major"
                } else {
                    ""
                }
            );
        }

        if snapshot.capture_method == CaptureMethod::Wgc {
            log::warn!("WGC capture is not implemented; using DXGI desktop duplication");
        }

        let dual = match snapshot.gpu_mode {
            GpuMode::Single => false,
            GpuMode::Dual => true,
            GpuMode::Auto => gpus.len() >= 2 && snapshot.primary_gpu != snapshot.secondary_gpu,
        };

        let capture_config = CaptureConfig {
            adapter_index: snapshot.primary_gpu,
            output_index: snapshot.capture_monitor,
            timeout_ms: 16,
        };
        let (width, height) =
            output_dimensions(capture_config.adapter_index, capture_config.output_index)?;

        let (context, capture, source) = if dual {
            log::info!(
                "dual-GPU mode: capture on adapter {}, compute on adapter {}",
                snapshot.primary_gpu,
                snapshot.secondary_gpu
            );
            let mut transfer = CrossAdapterTransfer::new(TransferConfig {
                prefer_peer_to_peer: snapshot.peer_to_peer,
                ..TransferConfig::new(snapshot.primary_gpu, snapshot.secondary_gpu, width, height)
            })?;
            let bridge_device = transfer.create_capture_bridge()?;
            let capture = DuplicationCapture::with_device(bridge_device, &capture_config)?;
            let context = GpuContext::from_device(
                transfer.dest_device().clone(),
                transfer.dest_queue().clone(),
            )?;
            (context, capture, FrameSource::Transfer(transfer))
        } else {
            let context = GpuContext::new(Some(snapshot.primary_gpu), snapshot.debug)?;
            let ring = FrameRing::new(&context, width, height)?;
            // Capturing on the interop twin keeps ingest entirely on the
            // GPU; some duplication setups refuse a layered device, in
            // which case the staged path takes over.
            let capture =
                match DuplicationCapture::with_device(ring.d3d11_device().clone(), &capture_config)
                {
                    Ok(capture) => capture,
                    Err(err) => {
                        log::warn!(
                            "duplication on the interop twin failed ({err}); using a separate capture device"
                        );
                        DuplicationCapture::new(&capture_config)?
                    }
                };
            (context, capture, FrameSource::Interop(ring))
        };

        let flow = OpticalFlow::new(
            &context,
            &MotionEstimatorConfig {
                block_size: snapshot.block_size,
                search_radius: snapshot.search_radius,
                ..MotionEstimatorConfig::new(width, height)
            },
        )?;
        let interp = FrameInterpolator::new(&context, &InterpolationConfig { width, height })?;

        let (max_w, max_h) = output_size(width, height);
        let out_w = if snapshot.window_width > 0 {
            snapshot.window_width.min(max_w)
        } else {
            max_w
        };
        let out_h = if snapshot.window_height > 0 {
            snapshot.window_height.min(max_h)
        } else {
            max_h
        };
        let presenter = Presenter::new(
            &context,
            &PresenterConfig {
                width: out_w,
                height: out_h,
                buffer_count: snapshot.frame_buffer_count,
                borderless: snapshot.borderless,
                window_title: WINDOW_TITLE.to_string(),
            },
        )?;

        let base_frame = base_frame_interval(snapshot.target_framerate);

        Ok(Self {
            context,
            capture,
            source,
            flow,
            interp,
            presenter,
            settings,
            actions,
            capture_timeout_ms: capture_config.timeout_ms,
            base_frame,
            ingested: 0,
            stats: PipelineStats::default(),
        })
    }

    /// Run until the window closes or a fatal error surfaces. Per-tick
    /// failures are counted and skipped.
    pub fn run(&mut self) -> FrameGenResult<()> {
        log::info!("pipeline running; Escape or closing the window stops it");
        while self.presenter.process_messages() {
            match self.tick() {
                Ok(_) => {}
                Err(
                    err @ (FrameGenError::IngestFailed(_)
                    | FrameGenError::ComputeDispatchFailed(_)
                    | FrameGenError::Capture(_)),
                ) => {
                    log::warn!("tick dropped: {err}");
                    self.stats.ticks_dropped += 1;
                    self.flow.invalidate_descriptors();
                    self.interp.invalidate_descriptors();
                }
                Err(fatal) => return Err(fatal),
            }
        }
        log::info!("window closed, stopping");
        Ok(())
    }

    /// One base tick. Returns `false` when the capture timed out and
    /// nothing was presented.
    fn tick(&mut self) -> FrameGenResult<bool> {
        self.apply_hotkey_actions();
        let snapshot = self.settings.snapshot();
        let frame_gen =
            snapshot.enable_frame_gen && snapshot.frame_gen_mode != FrameGenMode::Disabled;
        let multiplier = snapshot.frame_gen_mode.multiplier();
        let sync_interval = u32::from(snapshot.vsync);

        let capture_start = Instant::now();
        let frame = match self.capture.acquire(self.capture_timeout_ms)? {
            Acquire::TimedOut => {
                std::thread::sleep(Duration::from_millis(1));
                return Ok(false);
            }
            Acquire::Frame(frame) => frame,
        };
        let frame_start = Instant::now();
        self.stats.capture_ms = capture_start.elapsed().as_secs_f64() * 1000.0;

        let ingest_start = Instant::now();
        let ingest_result = match &mut self.source {
            FrameSource::Interop(ring) => ring.ingest(
                self.capture.device(),
                self.capture.device_context(),
                &frame.texture,
            ),
            FrameSource::Transfer(transfer) => transfer.ingest_capture(&frame.texture),
        };
        self.capture.release();
        ingest_result.map_err(ingest_err)?;
        if let FrameSource::Transfer(transfer) = &mut self.source {
            transfer.wait_for_transfer().map_err(ingest_err)?;
        }
        self.ingested += 1;
        self.stats.base_frames_captured += 1;
        self.stats.ingest_ms = ingest_start.elapsed().as_secs_f64() * 1000.0;

        let (previous, current) = self.frame_pair();

        self.context.reset_recording().map_err(dispatch_err)?;

        if self.ingested >= 2 && frame_gen {
            self.flow.dispatch(self.context.list(), &current, &previous)?;
            self.stats.flow_ms = self.flow.stats().cpu_record.last_ms;

            let mv = self.flow.motion_vectors().clone();
            let mv_size = self.flow.mv_size();

            let interp_start = Instant::now();
            let phases = phases_for_multiplier(multiplier);
            for (i, t) in phases.iter().enumerate() {
                self.interp
                    .dispatch(self.context.list(), &previous, &current, &mv, mv_size, *t)?;
                self.presenter.present(self.context.list(), self.interp.output());
                self.context.submit_and_wait().map_err(dispatch_err)?;
                self.presenter.flip(sync_interval)?;

                pacing::pace_until(present_deadline(
                    frame_start,
                    self.base_frame,
                    (i + 1) as u32,
                    multiplier,
                ));
                self.context.reset_recording().map_err(dispatch_err)?;
            }
            self.stats.frames_generated += phases.len() as u64;
            self.stats.interpolation_ms = interp_start.elapsed().as_secs_f64() * 1000.0;

            // The real frame closes out the base interval.
            self.presenter.present(self.context.list(), &current);
            self.context.submit_and_wait().map_err(dispatch_err)?;
            self.presenter.flip(sync_interval)?;
        } else {
            self.presenter.present(self.context.list(), &current);
            self.context.submit_and_wait().map_err(dispatch_err)?;
            self.presenter.flip(sync_interval)?;
        }
        self.stats.present_ms = self.presenter.stats().present.last_ms;

        // The ring advances only after the tick's final host-side wait.
        match &mut self.source {
            FrameSource::Interop(ring) => ring.rotate(),
            FrameSource::Transfer(transfer) => transfer.advance(),
        }

        self.stats.frames_presented = self.presenter.stats().frames_presented;
        self.stats.finish_tick(
            frame_start.elapsed().as_secs_f64() * 1000.0,
            if frame_gen { multiplier } else { 1 },
        );

        if self.stats.base_frames_captured % TELEMETRY_INTERVAL == 0 {
            log::debug!(
                "base {:.1} fps, output {:.1} fps, flow {:.2} ms, interp {:.2} ms, {} dropped",
                self.stats.base_fps,
                self.stats.output_fps,
                self.stats.flow_ms,
                self.stats.interpolation_ms,
                self.stats.ticks_dropped
            );
        }
        Ok(true)
    }

    fn frame_pair(&self) -> (ID3D12Resource, ID3D12Resource) {
        match &self.source {
            FrameSource::Interop(ring) => (ring.previous().clone(), ring.current().clone()),
            FrameSource::Transfer(transfer) => (
                transfer.previous_destination_texture().clone(),
                transfer.destination_texture().clone(),
            ),
        }
    }

    /// Drain the hotkey sink. Toggles land in the shared settings and take
    /// effect from the snapshot at the top of the next tick.
    fn apply_hotkey_actions(&mut self) {
        let Some(actions) = &self.actions else { return };
        let drained: Vec<HotkeyAction> = actions.try_iter().collect();
        for action in drained {
            match action {
                HotkeyAction::ToggleFrameGen => {
                    self.settings
                        .update(|s| s.enable_frame_gen = !s.enable_frame_gen);
                    log::info!(
                        "frame generation {}",
                        if self.settings.snapshot().enable_frame_gen {
                            "enabled"
                        } else {
                            "disabled"
                        }
                    );
                }
                HotkeyAction::CycleMode => {
                    self.settings
                        .update(|s| s.frame_gen_mode = s.frame_gen_mode.next());
                    log::info!(
                        "frame generation mode: {}",
                        self.settings.snapshot().frame_gen_mode.as_str()
                    );
                }
                HotkeyAction::ToggleOverlay => {
                    self.settings.update(|s| s.show_overlay = !s.show_overlay);
                }
            }
        }
    }

    /// Switch frame generation on or off from the next tick.
    pub fn set_frame_gen_enabled(&mut self, enabled: bool) {
        self.settings.update(|s| s.enable_frame_gen = enabled);
    }

    /// Change the multiplier from the next tick.
    pub fn set_mode(&mut self, mode: FrameGenMode) {
        self.settings.update(|s| s.frame_gen_mode = mode);
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn capture_stats(&self) -> &crate::stats::CaptureStats {
        self.capture.stats()
    }

    pub fn flow_stats(&self) -> &crate::stats::FlowStats {
        self.flow.stats()
    }

    pub fn presenter_stats(&self) -> &crate::stats::PresenterStats {
        self.presenter.stats()
    }

    pub fn transfer_stats(&self) -> Option<&crate::stats::TransferStats> {
        match &self.source {
            FrameSource::Transfer(transfer) => Some(transfer.stats()),
            FrameSource::Interop(_) => None,
        }
    }
}

/// Recording and submission failures inside a tick are per-tick dispatch
/// errors, not fatal initialisation errors.
fn dispatch_err(err: FrameGenError) -> FrameGenError {
    match err {
        FrameGenError::Windows(inner) => FrameGenError::ComputeDispatchFailed(inner.to_string()),
        other => other,
    }
}

/// Same routing for the ingest leg of a tick.
fn ingest_err(err: FrameGenError) -> FrameGenError {
    match err {
        FrameGenError::IngestFailed(_) => err,
        other => FrameGenError::IngestFailed(other.to_string()),
    }
}
