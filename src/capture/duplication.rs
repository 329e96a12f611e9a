//! DXGI desktop-duplication session.

use std::time::Instant;

use windows::core::Interface;
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIAdapter1, IDXGIDevice, IDXGIFactory6, IDXGIOutput1, IDXGIResource,
    IDXGIOutputDuplication, DXGI_CREATE_FACTORY_FLAGS, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
};

use crate::capture::CaptureConfig;
use crate::error::{FrameGenError, FrameGenResult};
use crate::stats::CaptureStats;

/// One acquired desktop frame. The texture is owned by the capture device
/// and only valid until the matching [`DuplicationCapture::release`].
pub struct CapturedFrame {
    pub texture: ID3D11Texture2D,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture sequence number.
    pub sequence: u64,
}

/// Outcome of an acquire attempt. A timeout is ordinary flow control, not an
/// error: no new frame was presented within the timeout.
pub enum Acquire {
    Frame(CapturedFrame),
    TimedOut,
}

/// Desktop-duplication capture session.
pub struct DuplicationCapture {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    output: IDXGIOutput1,
    duplication: IDXGIOutputDuplication,
    width: u32,
    height: u32,
    frame_acquired: bool,
    sequence: u64,
    stats: CaptureStats,
}

impl DuplicationCapture {
    /// Create a capture session with its own D3D11 device on the configured
    /// adapter.
    pub fn new(config: &CaptureConfig) -> FrameGenResult<Self> {
        let device = create_capture_device(config.adapter_index)?;
        Self::with_device(device, config)
    }

    /// Create a capture session on an existing D3D11 device. Used when the
    /// captured texture must live on a specific device (the interop twin in
    /// single-GPU mode, the source-adapter bridge in dual-GPU mode).
    pub fn with_device(device: ID3D11Device, config: &CaptureConfig) -> FrameGenResult<Self> {
        let mut context: Option<ID3D11DeviceContext> = None;
        unsafe { device.GetImmediateContext(&mut context) };
        let context = context.ok_or_else(|| {
            FrameGenError::Initialization("capture device has no immediate context".into())
        })?;

        let dxgi_device: IDXGIDevice = device.cast()?;
        let adapter = unsafe { dxgi_device.GetAdapter()? };
        let output = unsafe { adapter.EnumOutputs(config.output_index) }.map_err(|err| {
            FrameGenError::Initialization(format!(
                "output {} not found on capture adapter: {err}",
                config.output_index
            ))
        })?;

        let desc = unsafe { output.GetDesc()? };
        let width = (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left) as u32;
        let height = (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top) as u32;

        let output: IDXGIOutput1 = output.cast()?;
        let duplication = duplicate_output(&output, &device)?;

        log::info!("desktop duplication initialised: {width}x{height}");

        Ok(Self {
            device,
            context,
            output,
            duplication,
            width,
            height,
            frame_acquired: false,
            sequence: 0,
            stats: CaptureStats::default(),
        })
    }

    /// Acquire the next desktop frame, blocking up to `timeout_ms`.
    ///
    /// `Acquire::TimedOut` means no new frame; access loss (mode change,
    /// UAC desktop, another duplicator) surfaces as
    /// [`FrameGenError::CaptureAccessLost`] and requires [`Self::recreate`].
    pub fn acquire(&mut self, timeout_ms: u32) -> FrameGenResult<Acquire> {
        // A frame still held from the previous acquire is released first.
        if self.frame_acquired {
            self.release();
        }

        let start = Instant::now();
        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        let result = unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
        };
        if let Err(err) = result {
            return if err.code() == DXGI_ERROR_WAIT_TIMEOUT {
                self.stats.frames_missed += 1;
                Ok(Acquire::TimedOut)
            } else if err.code() == DXGI_ERROR_ACCESS_LOST {
                Err(FrameGenError::CaptureAccessLost)
            } else {
                Err(FrameGenError::Capture(format!("AcquireNextFrame: {err}")))
            };
        }
        self.frame_acquired = true;

        let resource = resource
            .ok_or_else(|| FrameGenError::Capture("AcquireNextFrame returned null".into()))?;
        let texture: ID3D11Texture2D = match resource.cast() {
            Ok(texture) => texture,
            Err(err) => {
                self.release();
                return Err(FrameGenError::Capture(format!(
                    "desktop resource is not a texture: {err}"
                )));
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.frames_captured += 1;
        self.stats.acquire.record(elapsed_ms);
        self.sequence += 1;

        Ok(Acquire::Frame(CapturedFrame {
            texture,
            width: self.width,
            height: self.height,
            sequence: self.sequence,
        }))
    }

    /// Release the currently held frame. Must be called between two
    /// successful acquires; calling it with no frame held is a no-op.
    pub fn release(&mut self) {
        if self.frame_acquired {
            unsafe {
                let _ = self.duplication.ReleaseFrame();
            }
            self.frame_acquired = false;
        }
    }

    /// Rebuild the duplication after access loss. The device and output are
    /// kept; only the duplication interface is recreated.
    pub fn recreate(&mut self) -> FrameGenResult<()> {
        self.frame_acquired = false;
        self.duplication = duplicate_output(&self.output, &self.device)?;
        log::info!("desktop duplication recreated");
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The capture-side device. Cross-device staging reads the captured
    /// texture back on the same device that produced it.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn device_context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }
}

impl Drop for DuplicationCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Desktop dimensions of an output, without opening a duplication. Used to
/// size compute resources before the capture session exists.
pub fn output_dimensions(adapter_index: u32, output_index: u32) -> FrameGenResult<(u32, u32)> {
    unsafe {
        let factory: IDXGIFactory6 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;
        let adapter: IDXGIAdapter1 = factory.EnumAdapters1(adapter_index).map_err(|err| {
            FrameGenError::Initialization(format!("capture adapter {adapter_index} not found: {err}"))
        })?;
        let output = adapter.EnumOutputs(output_index).map_err(|err| {
            FrameGenError::Initialization(format!("output {output_index} not found: {err}"))
        })?;
        let desc = output.GetDesc()?;
        Ok((
            (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left) as u32,
            (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top) as u32,
        ))
    }
}

fn create_capture_device(adapter_index: u32) -> FrameGenResult<ID3D11Device> {
    unsafe {
        let factory: IDXGIFactory6 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;
        let adapter: IDXGIAdapter1 = factory.EnumAdapters1(adapter_index).map_err(|err| {
            FrameGenError::Initialization(format!("capture adapter {adapter_index} not found: {err}"))
        })?;

        let feature_levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];
        let mut device: Option<ID3D11Device> = None;
        D3D11CreateDevice(
            &adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            None,
        )?;
        device.ok_or_else(|| FrameGenError::Initialization("D3D11 device creation failed".into()))
    }
}

fn duplicate_output(
    output: &IDXGIOutput1,
    device: &ID3D11Device,
) -> FrameGenResult<IDXGIOutputDuplication> {
    unsafe { output.DuplicateOutput(device) }.map_err(|err| {
        if err.code() == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE {
            FrameGenError::Initialization(
                "desktop duplication not available - another duplicator may be active".into(),
            )
        } else if err.code() == E_ACCESSDENIED {
            FrameGenError::Initialization(
                "desktop duplication access denied - a secure desktop may be active".into(),
            )
        } else {
            FrameGenError::Initialization(format!("DuplicateOutput failed: {err}"))
        }
    })
}
