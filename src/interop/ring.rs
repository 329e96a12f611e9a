//! The compute-device frame ring and its two ingest paths.

use windows::core::{Interface, IUnknown};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
    D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_RESOURCE_FLAGS, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Direct3D11on12::{D3D11On12CreateDevice, ID3D11On12Device};
use windows::Win32::Graphics::Direct3D12::{
    ID3D12CommandAllocator, ID3D12CommandList, ID3D12CommandQueue, ID3D12Fence,
    ID3D12GraphicsCommandList, ID3D12Resource, D3D12_COMMAND_LIST_TYPE_DIRECT,
    D3D12_FENCE_FLAG_NONE, D3D12_HEAP_FLAG_SHARED, D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
    D3D12_RANGE, D3D12_RESOURCE_STATE_COPY_DEST, D3D12_SUBRESOURCE_FOOTPRINT,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;

use crate::error::{FrameGenError, FrameGenResult};
use crate::gpu::context::{
    buffer_location, create_upload_buffer, texture2d_desc, texture_location, transition,
    GpuContext, SHADER_READ_STATE,
};
use crate::gpu::{aligned_row_pitch, BYTES_PER_PIXEL};
use crate::interop::SlotRoles;

/// Two-slot ring of compute-device textures with capture-side ingest.
pub struct FrameRing {
    queue: ID3D12CommandQueue,

    // D3D11On12 twin for the fast path.
    d3d11_device: ID3D11Device,
    d3d11_context: ID3D11DeviceContext,
    on12: ID3D11On12Device,

    textures: [ID3D12Resource; 2],
    wrapped: [ID3D11Resource; 2],
    roles: SlotRoles,

    // Staged path: persistently mapped upload buffer plus a private copy
    // list so ingest can submit without touching the orchestrator's list.
    upload_buffer: ID3D12Resource,
    upload_ptr: *mut u8,
    upload_row_pitch: u32,
    copy_allocator: ID3D12CommandAllocator,
    copy_list: ID3D12GraphicsCommandList,
    copy_fence: ID3D12Fence,
    copy_event: HANDLE,
    copy_fence_value: u64,
    staging: Option<(ID3D11Device, ID3D11Texture2D)>,

    width: u32,
    height: u32,
    ingested: u64,
}

impl FrameRing {
    pub fn new(context: &GpuContext, width: u32, height: u32) -> FrameGenResult<Self> {
        let device = context.device().clone();
        let queue = context.queue().clone();

        // D3D11On12 twin synchronised with the compute queue.
        let queues: [Option<IUnknown>; 1] = [Some(queue.clone().into())];
        let mut d3d11_device: Option<ID3D11Device> = None;
        let mut d3d11_context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11On12CreateDevice(
                &device,
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
            .ok_or_else(|| FrameGenError::Initialization("D3D11On12 device is null".into()))?;
        let d3d11_context = d3d11_context
            .ok_or_else(|| FrameGenError::Initialization("D3D11On12 context is null".into()))?;
        let on12: ID3D11On12Device = d3d11_device.cast()?;

        // The two ring textures. Shared heap flag so D3D11On12 can wrap them.
        let desc = texture2d_desc(width, height, DXGI_FORMAT_B8G8R8A8_UNORM, Default::default());
        let make_slot = |index: usize| -> FrameGenResult<(ID3D12Resource, ID3D11Resource)> {
            let texture = crate::gpu::context::create_texture(
                &device,
                &desc,
                D3D12_HEAP_FLAG_SHARED,
                SHADER_READ_STATE,
            )
            .map_err(|err| {
                FrameGenError::Initialization(format!("ring texture {index} creation failed: {err}"))
            })?;

            let flags = D3D11_RESOURCE_FLAGS {
                BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
                ..Default::default()
            };
            let wrapped: ID3D11Resource = unsafe {
                on12.CreateWrappedResource(
                    &texture,
                    &flags,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                    SHADER_READ_STATE,
                )
                .map_err(|err| {
                    FrameGenError::Initialization(format!(
                        "wrapping ring texture {index} failed: {err}"
                    ))
                })?
            };
            Ok((texture, wrapped))
        };

        let (texture0, wrapped0) = make_slot(0)?;
        let (texture1, wrapped1) = make_slot(1)?;

        // Upload buffer for the staged path, mapped for the ring's lifetime.
        let upload_row_pitch = aligned_row_pitch(width);
        let upload_buffer =
            create_upload_buffer(&device, upload_row_pitch as u64 * height as u64)?;
        let mut upload_ptr = std::ptr::null_mut();
        unsafe {
            upload_buffer.Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut upload_ptr))?;
        }

        let copy_allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? };
        let copy_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &copy_allocator, None)?
        };
        unsafe { copy_list.Close()? };
        let copy_fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let copy_event = unsafe { CreateEventA(None, false, false, None)? };

        Ok(Self {
            queue,
            d3d11_device,
            d3d11_context,
            on12,
            textures: [texture0, texture1],
            wrapped: [wrapped0, wrapped1],
            roles: SlotRoles::new(),
            upload_buffer,
            upload_ptr: upload_ptr as *mut u8,
            upload_row_pitch,
            copy_allocator,
            copy_list,
            copy_fence,
            copy_event,
            copy_fence_value: 0,
            staging: None,
            width,
            height,
            ingested: 0,
        })
    }

    /// The twin D3D11 device. Capture sessions initialised on this device
    /// take the fast ingest path.
    pub fn d3d11_device(&self) -> &ID3D11Device {
        &self.d3d11_device
    }

    /// Land `src_texture` in the write slot.
    pub fn ingest(
        &mut self,
        src_device: &ID3D11Device,
        src_context: &ID3D11DeviceContext,
        src_texture: &ID3D11Texture2D,
    ) -> FrameGenResult<()> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { src_texture.GetDesc(&mut desc) };
        if desc.Width != self.width || desc.Height != self.height {
            return Err(FrameGenError::IngestFailed(format!(
                "source is {}x{}, ring is {}x{}",
                desc.Width, desc.Height, self.width, self.height
            )));
        }

        let result = if *src_device == self.d3d11_device {
            self.ingest_wrapped(src_texture)
        } else {
            self.ingest_staged(src_device, src_context, src_texture)
        };
        // Any failure inside ingest drops only the current tick.
        result.map_err(|err| match err {
            FrameGenError::IngestFailed(_) => err,
            other => FrameGenError::IngestFailed(other.to_string()),
        })?;

        self.ingested += 1;
        Ok(())
    }

    /// Fast path: the source lives on the twin device, so a wrapped-resource
    /// copy runs entirely on the compute queue. The D3D11On12 layer inserts
    /// the COPY_DEST / shader-read transitions declared at wrap time.
    fn ingest_wrapped(&mut self, src_texture: &ID3D11Texture2D) -> FrameGenResult<()> {
        let slot = self.roles.current();
        let wrapped = [Some(self.wrapped[slot].clone())];
        unsafe {
            self.on12.AcquireWrappedResources(&wrapped);
            self.d3d11_context
                .CopyResource(&self.wrapped[slot], src_texture);
            self.on12.ReleaseWrappedResources(&wrapped);
            self.d3d11_context.Flush();
        }
        Ok(())
    }

    /// Staged path: read the source back on its own device, then re-upload
    /// on the compute device.
    fn ingest_staged(
        &mut self,
        src_device: &ID3D11Device,
        src_context: &ID3D11DeviceContext,
        src_texture: &ID3D11Texture2D,
    ) -> FrameGenResult<()> {
        let staging = self.staging_texture_for(src_device, src_texture)?;

        unsafe {
            src_context.CopyResource(&staging, src_texture);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            src_context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|err| FrameGenError::IngestFailed(format!("staging map failed: {err}")))?;

            let row_bytes = (self.width * BYTES_PER_PIXEL) as usize;
            let src_base = mapped.pData as *const u8;
            for y in 0..self.height as usize {
                std::ptr::copy_nonoverlapping(
                    src_base.add(y * mapped.RowPitch as usize),
                    self.upload_ptr.add(y * self.upload_row_pitch as usize),
                    row_bytes,
                );
            }

            src_context.Unmap(&staging, 0);
        }

        self.copy_upload_to_slot()
    }

    fn staging_texture_for(
        &mut self,
        src_device: &ID3D11Device,
        src_texture: &ID3D11Texture2D,
    ) -> FrameGenResult<ID3D11Texture2D> {
        if let Some((device, texture)) = &self.staging {
            if device == src_device {
                return Ok(texture.clone());
            }
        }

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { src_texture.GetDesc(&mut desc) };
        desc.Usage = D3D11_USAGE_STAGING;
        desc.BindFlags = 0;
        desc.CPUAccessFlags = D3D11_CPU_ACCESS_READ.0 as u32;
        desc.MiscFlags = 0;

        let mut staging: Option<ID3D11Texture2D> = None;
        unsafe {
            src_device
                .CreateTexture2D(&desc, None, Some(&mut staging))
                .map_err(|err| {
                    FrameGenError::IngestFailed(format!("staging texture creation failed: {err}"))
                })?;
        }
        let staging = staging
            .ok_or_else(|| FrameGenError::IngestFailed("staging texture is null".into()))?;

        self.staging = Some((src_device.clone(), staging.clone()));
        Ok(staging)
    }

    /// Record and submit the upload-buffer -> write-slot copy on the private
    /// list, then wait for it so the slot is readable when ingest returns.
    fn copy_upload_to_slot(&mut self) -> FrameGenResult<()> {
        let slot = &self.textures[self.roles.current()];

        let footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
            Offset: 0,
            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                Width: self.width,
                Height: self.height,
                Depth: 1,
                RowPitch: self.upload_row_pitch,
            },
        };

        unsafe {
            self.copy_allocator.Reset()?;
            self.copy_list.Reset(&self.copy_allocator, None)?;

            self.copy_list.ResourceBarrier(&[transition(
                slot,
                SHADER_READ_STATE,
                D3D12_RESOURCE_STATE_COPY_DEST,
            )]);
            self.copy_list.CopyTextureRegion(
                &texture_location(slot),
                0,
                0,
                0,
                &buffer_location(&self.upload_buffer, footprint),
                None,
            );
            self.copy_list.ResourceBarrier(&[transition(
                slot,
                D3D12_RESOURCE_STATE_COPY_DEST,
                SHADER_READ_STATE,
            )]);

            self.copy_list.Close()?;
            let lists = [Some(ID3D12CommandList::from(&self.copy_list))];
            self.queue.ExecuteCommandLists(&lists);

            self.copy_fence_value += 1;
            self.queue.Signal(&self.copy_fence, self.copy_fence_value)?;
            if self.copy_fence.GetCompletedValue() < self.copy_fence_value {
                self.copy_fence
                    .SetEventOnCompletion(self.copy_fence_value, self.copy_event)?;
                WaitForSingleObject(self.copy_event, INFINITE);
            }
        }
        Ok(())
    }

    /// Swap roles: `Current` becomes `Previous`, the old `Previous` is the
    /// next write target.
    pub fn rotate(&mut self) {
        self.roles.rotate();
    }

    /// The most recently ingested frame.
    pub fn current(&self) -> &ID3D12Resource {
        &self.textures[self.roles.current()]
    }

    /// The frame ingested one tick earlier.
    pub fn previous(&self) -> &ID3D12Resource {
        &self.textures[self.roles.previous()]
    }

    pub fn ingested_count(&self) -> u64 {
        self.ingested
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        unsafe {
            self.upload_buffer.Unmap(0, None);
            let _ = CloseHandle(self.copy_event);
        }
    }
}
