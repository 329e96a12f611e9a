//! Compute-device context.
//!
//! `GpuContext` owns the D3D12 device, its direct command queue, one
//! allocator+list pair, and the fence used for host-visible completion waits.
//! The pipeline is latency-bound: every stage's submission is observed
//! complete on the host before the next stage records, because descriptors
//! and the single allocator are reused. One fence per step keeps the model
//! simple; multi-frame pipelining would need an allocator pool.

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, D3D12GetDebugInterface, ID3D12CommandAllocator, ID3D12CommandList,
    ID3D12CommandQueue, ID3D12Debug, ID3D12Device, ID3D12Fence, ID3D12GraphicsCommandList,
    ID3D12Resource, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC,
    D3D12_FENCE_FLAG_NONE, D3D12_HEAP_FLAGS, D3D12_HEAP_PROPERTIES, D3D12_HEAP_TYPE,
    D3D12_HEAP_TYPE_DEFAULT, D3D12_MEMORY_POOL_UNKNOWN, D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
    D3D12_RESOURCE_BARRIER, D3D12_RESOURCE_BARRIER_0, D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
    D3D12_RESOURCE_BARRIER_FLAG_NONE, D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
    D3D12_RESOURCE_DESC, D3D12_RESOURCE_DIMENSION_BUFFER, D3D12_RESOURCE_DIMENSION_TEXTURE2D,
    D3D12_RESOURCE_FLAGS, D3D12_RESOURCE_STATES, D3D12_RESOURCE_STATE_GENERIC_READ,
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE, D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
    D3D12_RESOURCE_TRANSITION_BARRIER, D3D12_TEXTURE_COPY_LOCATION,
    D3D12_TEXTURE_COPY_LOCATION_0, D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
    D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX, D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
    D3D12_TEXTURE_LAYOUT_UNKNOWN, D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIAdapter1, IDXGIFactory6, DXGI_ADAPTER_FLAG, DXGI_ADAPTER_FLAG_NONE,
    DXGI_ADAPTER_FLAG_SOFTWARE, DXGI_CREATE_FACTORY_FLAGS, DXGI_ERROR_NOT_FOUND,
};
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;

use crate::error::{FrameGenError, FrameGenResult};

/// Resting state for every texture the compute shaders read: readable from
/// both compute and (future) pixel stages.
pub const SHADER_READ_STATE: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATES(
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0 | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0,
);

/// Build a transition barrier for `resource`.
pub fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

/// Copy location addressing subresource 0 of a texture.
pub fn texture_location(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: 0,
        },
    }
}

/// Copy location addressing a buffer through a placed footprint.
pub fn buffer_location(
    resource: &ID3D12Resource,
    footprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: footprint,
        },
    }
}

/// Default-heap properties.
pub fn default_heap() -> D3D12_HEAP_PROPERTIES {
    heap_properties(D3D12_HEAP_TYPE_DEFAULT)
}

pub fn heap_properties(heap_type: D3D12_HEAP_TYPE) -> D3D12_HEAP_PROPERTIES {
    D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 0,
        VisibleNodeMask: 0,
    }
}

/// Describe a single-mip 2D texture.
pub fn texture2d_desc(
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    flags: D3D12_RESOURCE_FLAGS,
) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Alignment: 0,
        Width: width as u64,
        Height: height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: flags,
    }
}

/// Describe a row-major buffer of `size` bytes.
pub fn buffer_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: Default::default(),
    }
}

/// Create a committed 2D texture.
pub fn create_texture(
    device: &ID3D12Device,
    desc: &D3D12_RESOURCE_DESC,
    heap_flags: D3D12_HEAP_FLAGS,
    initial_state: D3D12_RESOURCE_STATES,
) -> FrameGenResult<ID3D12Resource> {
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &default_heap(),
            heap_flags,
            desc,
            initial_state,
            None,
            &mut resource,
        )?;
    }
    resource.ok_or_else(|| FrameGenError::Initialization("texture creation returned null".into()))
}

/// Create a committed buffer on the given heap type.
pub fn create_buffer(
    device: &ID3D12Device,
    size: u64,
    heap_type: D3D12_HEAP_TYPE,
    initial_state: D3D12_RESOURCE_STATES,
) -> FrameGenResult<ID3D12Resource> {
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &heap_properties(heap_type),
            Default::default(),
            &buffer_desc(size),
            initial_state,
            None,
            &mut resource,
        )?;
    }
    resource.ok_or_else(|| FrameGenError::Initialization("buffer creation returned null".into()))
}

/// Create a 256-byte-aligned upload buffer in the generic-read state.
pub fn create_upload_buffer(device: &ID3D12Device, size: u64) -> FrameGenResult<ID3D12Resource> {
    create_buffer(
        device,
        size,
        windows::Win32::Graphics::Direct3D12::D3D12_HEAP_TYPE_UPLOAD,
        D3D12_RESOURCE_STATE_GENERIC_READ,
    )
}

/// The compute device and its submission machinery.
pub struct GpuContext {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    fence_value: u64,
}

impl GpuContext {
    /// Create a context on the given adapter (or the first hardware adapter
    /// when `None`). With `enable_debug` the D3D12 debug layer is switched on
    /// before device creation.
    pub fn new(adapter_index: Option<u32>, enable_debug: bool) -> FrameGenResult<Self> {
        if enable_debug {
            unsafe {
                let mut debug: Option<ID3D12Debug> = None;
                if D3D12GetDebugInterface(&mut debug).is_ok() {
                    if let Some(debug) = debug {
                        debug.EnableDebugLayer();
                        log::debug!("D3D12 debug layer enabled");
                    }
                }
            }
        }

        let adapter = find_adapter(adapter_index)?;
        let desc = unsafe { adapter.GetDesc1()? };
        let terminator = desc
            .Description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.Description.len());
        log::info!(
            "compute device: {}",
            String::from_utf16_lossy(&desc.Description[..terminator])
        );

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)? };
        let device = device
            .ok_or_else(|| FrameGenError::Initialization("D3D12 device creation failed".into()))?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc)? };

        Self::from_device(device, queue)
    }

    /// Build a context around an existing device and queue (dual-GPU mode
    /// hands over the transfer engine's destination device).
    pub fn from_device(device: ID3D12Device, queue: ID3D12CommandQueue) -> FrameGenResult<Self> {
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? };
        let list: ID3D12GraphicsCommandList =
            unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)? };
        // Lists are created open; keep the closed-unless-recording invariant.
        unsafe { list.Close()? };

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let fence_event = unsafe { CreateEventA(None, false, false, None)? };

        Ok(Self {
            device,
            queue,
            allocator,
            list,
            fence,
            fence_event,
            fence_value: 0,
        })
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    pub fn list(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    /// Last signalled fence value.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Reset the allocator then the list, opening the list for recording.
    /// Fails if the GPU has not completed the previous submission.
    pub fn reset_recording(&mut self) -> FrameGenResult<()> {
        unsafe {
            self.allocator.Reset()?;
            self.list.Reset(&self.allocator, None)?;
        }
        Ok(())
    }

    /// Close the list, execute it, and block the host until the GPU is done.
    pub fn submit_and_wait(&mut self) -> FrameGenResult<()> {
        unsafe {
            self.list.Close()?;
            let lists = [Some(ID3D12CommandList::from(&self.list))];
            self.queue.ExecuteCommandLists(&lists);
        }
        self.signal_and_wait()
    }

    /// Signal and wait with no recording, draining any outstanding GPU work.
    pub fn flush(&mut self) -> FrameGenResult<()> {
        self.signal_and_wait()
    }

    fn signal_and_wait(&mut self) -> FrameGenResult<()> {
        self.fence_value += 1;
        unsafe {
            self.queue.Signal(&self.fence, self.fence_value)?;
            if self.fence.GetCompletedValue() < self.fence_value {
                self.fence
                    .SetEventOnCompletion(self.fence_value, self.fence_event)?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        let _ = self.flush();
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

/// Pick an adapter: the requested index, or the first hardware adapter.
fn find_adapter(adapter_index: Option<u32>) -> FrameGenResult<IDXGIAdapter1> {
    unsafe {
        let factory: IDXGIFactory6 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;
        if let Some(index) = adapter_index {
            return factory.EnumAdapters1(index).map_err(|err| {
                FrameGenError::Initialization(format!("adapter {index} not found: {err}"))
            });
        }

        let mut index = 0u32;
        loop {
            let adapter: IDXGIAdapter1 = match factory.EnumAdapters1(index) {
                Ok(adapter) => adapter,
                Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => {
                    return Err(FrameGenError::Initialization(
                        "no hardware adapter found".into(),
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            index += 1;

            let desc = adapter.GetDesc1()?;
            if DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE
                == DXGI_ADAPTER_FLAG_NONE
            {
                return Ok(adapter);
            }
        }
    }
}
