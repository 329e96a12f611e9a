//! Win32 window and swap-chain plumbing.

use std::time::Instant;

use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Direct3D12::{
    ID3D12CommandQueue, ID3D12Fence, ID3D12GraphicsCommandList, ID3D12Resource,
    D3D12_BOX, D3D12_FENCE_FLAG_NONE, D3D12_RESOURCE_STATE_COPY_DEST,
    D3D12_RESOURCE_STATE_COPY_SOURCE, D3D12_RESOURCE_STATE_PRESENT,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIFactory4, IDXGISwapChain1, IDXGISwapChain3,
    DXGI_CREATE_FACTORY_FLAGS, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
    DXGI_MWA_NO_ALT_ENTER, DXGI_PRESENT, DXGI_SCALING_STRETCH, DXGI_SWAP_CHAIN_DESC1,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_ESCAPE;
use windows::Win32::UI::WindowsAndMessaging::{
    AdjustWindowRect, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
    GetSystemMetrics, GetWindowLongPtrW, PeekMessageW, PostQuitMessage, RegisterClassW,
    SetWindowLongPtrW, ShowWindow, TranslateMessage, UpdateWindow, GWLP_USERDATA, MSG, PM_REMOVE,
    SM_CXSCREEN, SM_CYSCREEN, SW_SHOW, WINDOW_EX_STYLE, WM_CLOSE, WM_DESTROY, WM_KEYDOWN,
    WM_QUIT, WNDCLASSW, WS_OVERLAPPEDWINDOW, WS_POPUP,
};

use crate::error::{FrameGenError, FrameGenResult};
use crate::gpu::context::{texture_location, transition, GpuContext, SHADER_READ_STATE};
use crate::present::{clamp_buffer_count, PresenterConfig, MAX_BACK_BUFFERS};
use crate::stats::PresenterStats;

const CLASS_NAME: &str = "FrameGenPresenterWindow";

/// Flag shared with the window procedure.
struct WindowState {
    closed: bool,
}

/// Output window plus flip-model swap chain.
pub struct Presenter {
    state: Box<WindowState>,
    hwnd: HWND,

    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    back_buffers: Vec<ID3D12Resource>,
    buffer_count: u32,
    frame_index: u32,

    fence: ID3D12Fence,
    fence_event: HANDLE,
    fence_values: [u64; MAX_BACK_BUFFERS as usize],
    next_fence_value: u64,

    width: u32,
    height: u32,
    stats: PresenterStats,
}

impl Presenter {
    pub fn new(context: &GpuContext, config: &PresenterConfig) -> FrameGenResult<Self> {
        let buffer_count = clamp_buffer_count(config.buffer_count);
        if buffer_count != config.buffer_count {
            log::warn!(
                "back buffer count {} out of range, clamped to {buffer_count}",
                config.buffer_count
            );
        }

        let mut state = Box::new(WindowState { closed: false });
        let hwnd = unsafe { create_window(config)? };
        unsafe {
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, &mut *state as *mut WindowState as isize);
            let _ = ShowWindow(hwnd, SW_SHOW);
            let _ = UpdateWindow(hwnd);
        }

        let queue = context.queue().clone();
        let swap_chain = unsafe { create_swap_chain(&queue, hwnd, config, buffer_count)? };

        let mut back_buffers = Vec::with_capacity(buffer_count as usize);
        for i in 0..buffer_count {
            let buffer: ID3D12Resource = unsafe { swap_chain.GetBuffer(i)? };
            back_buffers.push(buffer);
        }

        let fence: ID3D12Fence =
            unsafe { context.device().CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let fence_event = unsafe { CreateEventA(None, false, false, None)? };
        let frame_index = unsafe { swap_chain.GetCurrentBackBufferIndex() };

        log::info!(
            "presenter initialised: {}x{} window, {buffer_count} back buffers",
            config.width,
            config.height
        );

        Ok(Self {
            state,
            hwnd,
            queue,
            swap_chain,
            back_buffers,
            buffer_count,
            frame_index,
            fence,
            fence_event,
            fence_values: [0; MAX_BACK_BUFFERS as usize],
            next_fence_value: 0,
            width: config.width,
            height: config.height,
            stats: PresenterStats::default(),
        })
    }

    /// Record a bounded copy of `source` into the current back buffer.
    ///
    /// The source rests in the shader-read state; both it and the back
    /// buffer are restored to their resting states by the recording.
    pub fn present(&self, list: &ID3D12GraphicsCommandList, source: &ID3D12Resource) {
        let back_buffer = &self.back_buffers[self.frame_index as usize];

        let src_box = D3D12_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: self.width,
            bottom: self.height,
            back: 1,
        };

        unsafe {
            list.ResourceBarrier(&[
                transition(source, SHADER_READ_STATE, D3D12_RESOURCE_STATE_COPY_SOURCE),
                transition(
                    back_buffer,
                    D3D12_RESOURCE_STATE_PRESENT,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                ),
            ]);
            list.CopyTextureRegion(
                &texture_location(back_buffer),
                0,
                0,
                0,
                &texture_location(source),
                Some(&src_box),
            );
            list.ResourceBarrier(&[
                transition(
                    back_buffer,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                    D3D12_RESOURCE_STATE_PRESENT,
                ),
                transition(source, D3D12_RESOURCE_STATE_COPY_SOURCE, SHADER_READ_STATE),
            ]);
        }
    }

    /// Present the swap chain, then advance to the next back buffer. Blocks
    /// the host only when the incoming buffer is still in flight.
    pub fn flip(&mut self, sync_interval: u32) -> FrameGenResult<()> {
        let start = Instant::now();

        let hr = unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) };
        if hr.is_err() {
            let err = windows::core::Error::from(hr);
            return if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
                Err(FrameGenError::PresentDeviceLost(err.to_string()))
            } else {
                Err(FrameGenError::PresentDeviceLost(format!(
                    "Present returned {err}"
                )))
            };
        }

        // Tag the buffer that was just presented.
        self.next_fence_value += 1;
        unsafe { self.queue.Signal(&self.fence, self.next_fence_value)? };
        self.fence_values[self.frame_index as usize] = self.next_fence_value;

        // Advance, waiting if the GPU still owns the incoming buffer.
        self.frame_index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };
        let pending = self.fence_values[self.frame_index as usize];
        unsafe {
            if self.fence.GetCompletedValue() < pending {
                self.fence.SetEventOnCompletion(pending, self.fence_event)?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }

        self.stats.frames_presented += 1;
        self.stats
            .present
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    /// Drain pending window messages. Returns `false` once the window has
    /// been closed (close button or Escape).
    pub fn process_messages(&mut self) -> bool {
        let mut msg = MSG::default();
        unsafe {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    self.state.closed = true;
                    return false;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        !self.state.closed
    }

    pub fn is_window_open(&self) -> bool {
        !self.state.closed
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn stats(&self) -> &PresenterStats {
        &self.stats
    }

    /// Wait until every presented buffer has completed on the GPU.
    pub fn wait_for_gpu(&mut self) -> FrameGenResult<()> {
        self.next_fence_value += 1;
        unsafe {
            self.queue.Signal(&self.fence, self.next_fence_value)?;
            if self.fence.GetCompletedValue() < self.next_fence_value {
                self.fence
                    .SetEventOnCompletion(self.next_fence_value, self.fence_event)?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }
        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        let _ = self.wait_for_gpu();
        unsafe {
            let _ = CloseHandle(self.fence_event);
            SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

unsafe fn create_window(config: &PresenterConfig) -> FrameGenResult<HWND> {
    let hinstance = GetModuleHandleW(None)?;
    let class_name: Vec<u16> = CLASS_NAME.encode_utf16().chain(std::iter::once(0)).collect();

    let wc = WNDCLASSW {
        lpfnWndProc: Some(presenter_wnd_proc),
        hInstance: hinstance.into(),
        lpszClassName: PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };
    let _ = RegisterClassW(&wc);

    let style = if config.borderless {
        WS_POPUP
    } else {
        WS_OVERLAPPEDWINDOW
    };

    // Grow the outer rect so the client area matches the output size.
    let mut rect = RECT {
        left: 0,
        top: 0,
        right: config.width as i32,
        bottom: config.height as i32,
    };
    AdjustWindowRect(&mut rect, style, false)?;
    let window_width = rect.right - rect.left;
    let window_height = rect.bottom - rect.top;

    let screen_width = GetSystemMetrics(SM_CXSCREEN);
    let screen_height = GetSystemMetrics(SM_CYSCREEN);
    let x = (screen_width - window_width) / 2;
    let y = (screen_height - window_height) / 2;

    let title: Vec<u16> = config
        .window_title
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    CreateWindowExW(
        WINDOW_EX_STYLE(0),
        PCWSTR(class_name.as_ptr()),
        PCWSTR(title.as_ptr()),
        style,
        x,
        y,
        window_width,
        window_height,
        None,
        None,
        hinstance,
        None,
    )
    .map_err(|err| FrameGenError::Initialization(format!("window creation failed: {err}")))
}

unsafe fn create_swap_chain(
    queue: &ID3D12CommandQueue,
    hwnd: HWND,
    config: &PresenterConfig,
    buffer_count: u32,
) -> FrameGenResult<IDXGISwapChain3> {
    let factory: IDXGIFactory4 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;

    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: config.width,
        Height: config.height,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        Stereo: false.into(),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: buffer_count,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        Flags: 0,
    };

    let swap_chain: IDXGISwapChain1 =
        factory.CreateSwapChainForHwnd(queue, hwnd, &desc, None, None)?;

    // Fullscreen exclusive is out of scope; block Alt+Enter.
    factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)?;

    swap_chain.cast().map_err(FrameGenError::from)
}

unsafe extern "system" fn presenter_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let state_ptr = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut WindowState;

    match msg {
        WM_CLOSE => {
            if !state_ptr.is_null() {
                (*state_ptr).closed = true;
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        }
        WM_KEYDOWN if wparam.0 as u32 == VK_ESCAPE.0 as u32 => {
            if !state_ptr.is_null() {
                (*state_ptr).closed = true;
            }
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
