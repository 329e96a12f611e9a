//! The cross-adapter transfer engine.

use std::time::Instant;

use windows::core::{IUnknown, Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, GENERIC_ALL, HANDLE};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
    D3D11_BIND_SHADER_RESOURCE, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_RESOURCE_FLAGS,
};
use windows::Win32::Graphics::Direct3D11on12::{D3D11On12CreateDevice, ID3D11On12Device};
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, ID3D12CommandAllocator, ID3D12CommandList, ID3D12CommandQueue,
    ID3D12Device, ID3D12Fence, ID3D12GraphicsCommandList, ID3D12Heap, ID3D12Resource,
    D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC, D3D12_FENCE_FLAG_NONE,
    D3D12_FENCE_FLAG_SHARED, D3D12_FENCE_FLAG_SHARED_CROSS_ADAPTER, D3D12_HEAP_DESC,
    D3D12_HEAP_FLAG_SHARED, D3D12_HEAP_FLAG_SHARED_CROSS_ADAPTER,
    D3D12_HEAP_TYPE_READBACK, D3D12_HEAP_TYPE_UPLOAD, D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
    D3D12_RANGE, D3D12_RESOURCE_FLAG_ALLOW_CROSS_ADAPTER, D3D12_RESOURCE_STATE_COMMON,
    D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_GENERIC_READ,
    D3D12_SUBRESOURCE_FOOTPRINT, D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIAdapter1, IDXGIFactory6, DXGI_CREATE_FACTORY_FLAGS,
};
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;

use crate::error::{FrameGenError, FrameGenResult};
use crate::gpu::context::{
    buffer_location, create_buffer, create_texture, default_heap, texture2d_desc,
    texture_location, transition, SHADER_READ_STATE,
};
use crate::gpu::{aligned_row_pitch, enumerate_gpus, is_peer_to_peer_available};
use crate::stats::TransferStats;
use crate::transfer::{BufferCursor, TransferConfig, TransferMethod};

/// D3D11On12 layer over the source device so captured D3D11 textures can
/// land on the source adapter's D3D12 heap without a CPU detour.
struct SourceBridge {
    d3d11_device: ID3D11Device,
    d3d11_context: ID3D11DeviceContext,
    on12: ID3D11On12Device,
    landing: ID3D12Resource,
    wrapped_landing: ID3D11Resource,
}

/// One queue side of the transfer (device, queue, allocator+list, fence).
struct QueueSide {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    fence_value: u64,
}

impl QueueSide {
    fn new(adapter_index: u32) -> FrameGenResult<Self> {
        let adapter = get_adapter(adapter_index)?;
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)? };
        let device = device.ok_or_else(|| {
            FrameGenError::Initialization(format!("device creation failed on adapter {adapter_index}"))
        })?;

        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc)? };
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? };
        let list: ID3D12GraphicsCommandList =
            unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)? };
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

    fn execute(&self) -> FrameGenResult<()> {
        unsafe {
            self.list.Close()?;
            let lists = [Some(ID3D12CommandList::from(&self.list))];
            self.queue.ExecuteCommandLists(&lists);
        }
        Ok(())
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

impl Drop for QueueSide {
    fn drop(&mut self) {
        let _ = self.signal_and_wait();
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

/// Inter-adapter texture transfer with runtime method selection.
pub struct CrossAdapterTransfer {
    method: TransferMethod,
    config: TransferConfig,

    source: QueueSide,
    dest: QueueSide,

    // SharedHeap method.
    shared_fence: Option<ID3D12Fence>,
    dest_shared_fence: Option<ID3D12Fence>,
    shared_fence_value: u64,
    cross_textures: Vec<ID3D12Resource>,

    // StagedCpu method.
    readback: Option<ID3D12Resource>,
    upload: Option<ID3D12Resource>,
    staging_size: u64,

    dest_textures: Vec<ID3D12Resource>,
    cursor: BufferCursor,

    bridge: Option<SourceBridge>,
    stats: TransferStats,
}

impl CrossAdapterTransfer {
    pub fn new(config: TransferConfig) -> FrameGenResult<Self> {
        if config.source_adapter == config.dest_adapter {
            return Err(FrameGenError::Initialization(
                "source and destination adapters must be different".into(),
            ));
        }

        let source = QueueSide::new(config.source_adapter)?;
        let dest = QueueSide::new(config.dest_adapter)?;

        let gpus = enumerate_gpus()?;
        let peer_to_peer =
            is_peer_to_peer_available(&gpus, config.source_adapter, config.dest_adapter);

        let mut transfer = Self {
            method: TransferMethod::StagedCpu,
            config,
            source,
            dest,
            shared_fence: None,
            dest_shared_fence: None,
            shared_fence_value: 0,
            cross_textures: Vec::new(),
            readback: None,
            upload: None,
            staging_size: 0,
            dest_textures: Vec::new(),
            cursor: BufferCursor::new(config.buffer_count as usize),
            bridge: None,
            stats: TransferStats::default(),
        };

        if config.prefer_peer_to_peer && peer_to_peer {
            match transfer.create_shared_heap_resources() {
                Ok(()) => {
                    transfer.method = TransferMethod::SharedHeap;
                    transfer.create_shared_fence()?;
                }
                Err(err) if config.allow_cpu_fallback => {
                    log::warn!("cross-adapter heap unavailable ({err}), falling back to staged copies");
                    transfer.create_staging_resources()?;
                }
                Err(err) => return Err(err),
            }
        } else if config.allow_cpu_fallback {
            transfer.create_staging_resources()?;
        } else {
            return Err(FrameGenError::Initialization(
                "no suitable transfer method available".into(),
            ));
        }

        transfer.stats.using_shared_heap = transfer.method == TransferMethod::SharedHeap;
        log::info!(
            "cross-adapter transfer initialised: {:?}, {} buffers",
            transfer.method,
            config.buffer_count
        );
        Ok(transfer)
    }

    pub fn method(&self) -> TransferMethod {
        self.method
    }

    /// Destination-side device, handed to the compute context in dual mode.
    pub fn dest_device(&self) -> &ID3D12Device {
        &self.dest.device
    }

    pub fn dest_queue(&self) -> &ID3D12CommandQueue {
        &self.dest.queue
    }

    /// Create the D3D11On12 bridge on the source device and return its
    /// D3D11 device for capture initialisation.
    pub fn create_capture_bridge(&mut self) -> FrameGenResult<ID3D11Device> {
        let queues: [Option<IUnknown>; 1] = [Some(self.source.queue.clone().into())];
        let mut d3d11_device: Option<ID3D11Device> = None;
        let mut d3d11_context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11On12CreateDevice(
                &self.source.device,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT.0 as u32,
                None,
                Some(&queues),
                0,
                Some(&mut d3d11_device),
                Some(&mut d3d11_context),
                None,
            )?;
        }
        let d3d11_device = d3d11_device
            .ok_or_else(|| FrameGenError::Initialization("bridge D3D11 device is null".into()))?;
        let d3d11_context = d3d11_context
            .ok_or_else(|| FrameGenError::Initialization("bridge D3D11 context is null".into()))?;
        let on12: ID3D11On12Device = d3d11_device.cast()?;

        let landing = create_texture(
            &self.source.device,
            &texture2d_desc(
                self.config.width,
                self.config.height,
                DXGI_FORMAT_B8G8R8A8_UNORM,
                Default::default(),
            ),
            D3D12_HEAP_FLAG_SHARED,
            D3D12_RESOURCE_STATE_COMMON,
        )?;

        let flags = D3D11_RESOURCE_FLAGS {
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            ..Default::default()
        };
        let wrapped_landing: ID3D11Resource = unsafe {
            on12.CreateWrappedResource(
                &landing,
                &flags,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_COMMON,
            )?
        };

        self.bridge = Some(SourceBridge {
            d3d11_device: d3d11_device.clone(),
            d3d11_context,
            on12,
            landing,
            wrapped_landing,
        });
        Ok(d3d11_device)
    }

    /// The bridge's D3D11 device, if [`Self::create_capture_bridge`] ran.
    pub fn bridge_device(&self) -> Option<&ID3D11Device> {
        self.bridge.as_ref().map(|bridge| &bridge.d3d11_device)
    }

    /// Route a captured D3D11 texture (on the bridge device) through the
    /// transfer into the destination ring.
    pub fn ingest_capture(&mut self, src_texture: &ID3D11Texture2D) -> FrameGenResult<()> {
        let landing = {
            let bridge = self.bridge.as_ref().ok_or_else(|| {
                FrameGenError::IngestFailed("capture bridge not initialised".into())
            })?;
            let wrapped = [Some(bridge.wrapped_landing.clone())];
            unsafe {
                bridge.on12.AcquireWrappedResources(&wrapped);
                bridge
                    .d3d11_context
                    .CopyResource(&bridge.wrapped_landing, src_texture);
                bridge.on12.ReleaseWrappedResources(&wrapped);
                bridge.d3d11_context.Flush();
            }
            bridge.landing.clone()
        };
        self.transfer_frame(&landing)
    }

    /// Move a source-device texture into the current destination buffer.
    pub fn transfer_frame(&mut self, source_texture: &ID3D12Resource) -> FrameGenResult<()> {
        let start = Instant::now();

        match self.method {
            TransferMethod::SharedHeap => self.transfer_via_shared_heap(source_texture)?,
            TransferMethod::StagedCpu => self.transfer_via_staging(source_texture)?,
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let bytes = self.config.width as u64 * self.config.height as u64 * 4;
        self.stats.frames_transferred += 1;
        self.stats.bytes_transferred += bytes;
        self.stats.transfer.record(elapsed_ms);
        if elapsed_ms > 0.0 {
            self.stats.throughput_mbps = bytes as f64 / (elapsed_ms * 1000.0);
        }
        Ok(())
    }

    /// Block until the destination queue has finished the last staged copy.
    pub fn wait_for_transfer(&mut self) -> FrameGenResult<()> {
        let pending = self.dest.fence_value;
        unsafe {
            if self.dest.fence.GetCompletedValue() < pending {
                self.dest
                    .fence
                    .SetEventOnCompletion(pending, self.dest.fence_event)?;
                WaitForSingleObject(self.dest.fence_event, INFINITE);
            }
        }
        Ok(())
    }

    /// Rotate the destination ring.
    pub fn advance(&mut self) {
        self.cursor.advance();
    }

    /// The most recently transferred frame.
    pub fn destination_texture(&self) -> &ID3D12Resource {
        &self.dest_textures[self.cursor.current]
    }

    /// The frame transferred one tick earlier.
    pub fn previous_destination_texture(&self) -> &ID3D12Resource {
        &self.dest_textures[self.cursor.previous]
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    fn create_shared_heap_resources(&mut self) -> FrameGenResult<()> {
        let mut desc = texture2d_desc(
            self.config.width,
            self.config.height,
            DXGI_FORMAT_B8G8R8A8_UNORM,
            D3D12_RESOURCE_FLAG_ALLOW_CROSS_ADAPTER,
        );
        desc.Layout = D3D12_TEXTURE_LAYOUT_ROW_MAJOR;

        let alloc_info = unsafe { self.source.device.GetResourceAllocationInfo(0, &[desc]) };
        let texture_size = alloc_info.SizeInBytes;

        let heap_desc = D3D12_HEAP_DESC {
            SizeInBytes: texture_size * self.config.buffer_count as u64,
            Properties: default_heap(),
            Alignment: 0,
            Flags: D3D12_HEAP_FLAG_SHARED | D3D12_HEAP_FLAG_SHARED_CROSS_ADAPTER,
        };

        let mut heap: Option<ID3D12Heap> = None;
        unsafe { self.source.device.CreateHeap(&heap_desc, &mut heap)? };
        let heap = heap
            .ok_or_else(|| FrameGenError::Initialization("cross-adapter heap is null".into()))?;

        self.cross_textures.clear();
        for i in 0..self.config.buffer_count {
            let mut resource: Option<ID3D12Resource> = None;
            unsafe {
                self.source.device.CreatePlacedResource(
                    &heap,
                    i as u64 * texture_size,
                    &desc,
                    D3D12_RESOURCE_STATE_COMMON,
                    None,
                    &mut resource,
                )?;
            }
            self.cross_textures.push(resource.ok_or_else(|| {
                FrameGenError::Initialization(format!("cross-adapter texture {i} is null"))
            })?);
        }

        // Open the same heap on the destination device.
        let mut handle = HANDLE::default();
        unsafe {
            self.source.device.CreateSharedHandle(
                &heap,
                None,
                GENERIC_ALL.0,
                PCWSTR::null(),
                &mut handle,
            )?;
        }
        let mut dest_heap: Option<ID3D12Heap> = None;
        let open_result = unsafe { self.dest.device.OpenSharedHandle(handle, &mut dest_heap) };
        unsafe {
            let _ = CloseHandle(handle);
        }
        open_result?;
        let dest_heap = dest_heap.ok_or_else(|| {
            FrameGenError::Initialization("shared heap could not be opened on destination".into())
        })?;

        // Destination views over the shared memory; the cross-adapter flag
        // is only required on the producing side.
        let mut dest_desc = desc;
        dest_desc.Flags = Default::default();
        self.dest_textures.clear();
        for i in 0..self.config.buffer_count {
            let mut resource: Option<ID3D12Resource> = None;
            unsafe {
                self.dest.device.CreatePlacedResource(
                    &dest_heap,
                    i as u64 * texture_size,
                    &dest_desc,
                    SHADER_READ_STATE,
                    None,
                    &mut resource,
                )?;
            }
            self.dest_textures.push(resource.ok_or_else(|| {
                FrameGenError::Initialization(format!("destination texture {i} is null"))
            })?);
        }

        Ok(())
    }

    fn create_shared_fence(&mut self) -> FrameGenResult<()> {
        let shared_fence: ID3D12Fence = unsafe {
            self.source
                .device
                .CreateFence(0, D3D12_FENCE_FLAG_SHARED | D3D12_FENCE_FLAG_SHARED_CROSS_ADAPTER)?
        };

        let mut handle = HANDLE::default();
        unsafe {
            self.source.device.CreateSharedHandle(
                &shared_fence,
                None,
                GENERIC_ALL.0,
                PCWSTR::null(),
                &mut handle,
            )?;
        }
        let mut dest_fence: Option<ID3D12Fence> = None;
        let open_result = unsafe { self.dest.device.OpenSharedHandle(handle, &mut dest_fence) };
        unsafe {
            let _ = CloseHandle(handle);
        }
        open_result?;
        let dest_fence = dest_fence.ok_or_else(|| {
            FrameGenError::Initialization("shared fence could not be opened on destination".into())
        })?;

        self.shared_fence = Some(shared_fence);
        self.dest_shared_fence = Some(dest_fence);
        Ok(())
    }

    fn create_staging_resources(&mut self) -> FrameGenResult<()> {
        let row_pitch = aligned_row_pitch(self.config.width);
        self.staging_size = row_pitch as u64 * self.config.height as u64;

        self.readback = Some(create_buffer(
            &self.source.device,
            self.staging_size,
            D3D12_HEAP_TYPE_READBACK,
            D3D12_RESOURCE_STATE_COPY_DEST,
        )?);
        self.upload = Some(create_buffer(
            &self.dest.device,
            self.staging_size,
            D3D12_HEAP_TYPE_UPLOAD,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?);

        let desc = texture2d_desc(
            self.config.width,
            self.config.height,
            DXGI_FORMAT_B8G8R8A8_UNORM,
            Default::default(),
        );
        self.dest_textures.clear();
        for i in 0..self.config.buffer_count {
            let texture = create_texture(&self.dest.device, &desc, Default::default(), SHADER_READ_STATE)
                .map_err(|err| {
                    FrameGenError::Initialization(format!("destination texture {i}: {err}"))
                })?;
            self.dest_textures.push(texture);
        }
        Ok(())
    }

    fn transfer_via_shared_heap(&mut self, source_texture: &ID3D12Resource) -> FrameGenResult<()> {
        let cross = &self.cross_textures[self.cursor.current];
        let shared_fence = self.shared_fence.as_ref().ok_or_else(|| {
            FrameGenError::IngestFailed("shared fence missing".into())
        })?;
        let dest_shared_fence = self.dest_shared_fence.as_ref().ok_or_else(|| {
            FrameGenError::IngestFailed("destination shared fence missing".into())
        })?;

        unsafe {
            self.source.allocator.Reset()?;
            self.source.list.Reset(&self.source.allocator, None)?;

            self.source.list.ResourceBarrier(&[transition(
                cross,
                D3D12_RESOURCE_STATE_COMMON,
                D3D12_RESOURCE_STATE_COPY_DEST,
            )]);
            self.source.list.CopyResource(cross, source_texture);
            self.source.list.ResourceBarrier(&[transition(
                cross,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_COMMON,
            )]);
        }
        self.source.execute()?;

        // Order the destination queue behind the copy.
        self.shared_fence_value += 1;
        unsafe {
            self.source
                .queue
                .Signal(shared_fence, self.shared_fence_value)?;
            self.dest
                .queue
                .Wait(dest_shared_fence, self.shared_fence_value)?;
        }
        Ok(())
    }

    fn transfer_via_staging(&mut self, source_texture: &ID3D12Resource) -> FrameGenResult<()> {
        let readback = self
            .readback
            .clone()
            .ok_or_else(|| FrameGenError::IngestFailed("readback buffer missing".into()))?;
        let upload = self
            .upload
            .clone()
            .ok_or_else(|| FrameGenError::IngestFailed("upload buffer missing".into()))?;

        let footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
            Offset: 0,
            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                Width: self.config.width,
                Height: self.config.height,
                Depth: 1,
                RowPitch: aligned_row_pitch(self.config.width),
            },
        };

        // Source GPU: texture -> readback, host-waited.
        unsafe {
            self.source.allocator.Reset()?;
            self.source.list.Reset(&self.source.allocator, None)?;
            self.source.list.CopyTextureRegion(
                &buffer_location(&readback, footprint),
                0,
                0,
                0,
                &texture_location(source_texture),
                None,
            );
        }
        self.source.execute()?;
        self.source.signal_and_wait()?;

        // Host: readback -> upload.
        unsafe {
            let mut src_ptr = std::ptr::null_mut();
            readback.Map(
                0,
                Some(&D3D12_RANGE {
                    Begin: 0,
                    End: self.staging_size as usize,
                }),
                Some(&mut src_ptr),
            )?;
            let mut dst_ptr = std::ptr::null_mut();
            if let Err(err) = upload.Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut dst_ptr)) {
                readback.Unmap(0, None);
                return Err(err.into());
            }
            std::ptr::copy_nonoverlapping(
                src_ptr as *const u8,
                dst_ptr as *mut u8,
                self.staging_size as usize,
            );
            upload.Unmap(
                0,
                Some(&D3D12_RANGE {
                    Begin: 0,
                    End: self.staging_size as usize,
                }),
            );
            readback.Unmap(0, None);
        }

        // Destination GPU: upload -> landing texture. The consumer waits on
        // the destination fence, not here.
        let dest_texture = self.dest_textures[self.cursor.current].clone();
        unsafe {
            self.dest.allocator.Reset()?;
            self.dest.list.Reset(&self.dest.allocator, None)?;
            self.dest.list.ResourceBarrier(&[transition(
                &dest_texture,
                SHADER_READ_STATE,
                D3D12_RESOURCE_STATE_COPY_DEST,
            )]);
            self.dest.list.CopyTextureRegion(
                &texture_location(&dest_texture),
                0,
                0,
                0,
                &buffer_location(&upload, footprint),
                None,
            );
            self.dest.list.ResourceBarrier(&[transition(
                &dest_texture,
                D3D12_RESOURCE_STATE_COPY_DEST,
                SHADER_READ_STATE,
            )]);
        }
        self.dest.execute()?;

        self.dest.fence_value += 1;
        unsafe {
            self.dest
                .queue
                .Signal(&self.dest.fence, self.dest.fence_value)?;
        }
        Ok(())
    }
}

fn get_adapter(index: u32) -> FrameGenResult<IDXGIAdapter1> {
    unsafe {
        let factory: IDXGIFactory6 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;
        factory.EnumAdapters1(index).map_err(|err| {
            FrameGenError::Initialization(format!("adapter {index} not found: {err}"))
        })
    }
}
