//! GPU objects and dispatch recording for the motion search.

use std::time::Instant;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::{
    ID3D12DescriptorHeap, ID3D12Device, ID3D12GraphicsCommandList, ID3D12PipelineState,
    ID3D12QueryHeap, ID3D12Resource, ID3D12RootSignature, D3D12_COMPUTE_PIPELINE_STATE_DESC,
    D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING, D3D12_DESCRIPTOR_HEAP_DESC,
    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE, D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    D3D12_DESCRIPTOR_RANGE, D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND, D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
    D3D12_DESCRIPTOR_RANGE_TYPE_UAV, D3D12_HEAP_TYPE_READBACK, D3D12_QUERY_HEAP_DESC,
    D3D12_QUERY_HEAP_TYPE_TIMESTAMP, D3D12_QUERY_TYPE_TIMESTAMP, D3D12_RANGE,
    D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS, D3D12_RESOURCE_STATE_COPY_DEST,
    D3D12_RESOURCE_STATE_UNORDERED_ACCESS, D3D12_ROOT_DESCRIPTOR, D3D12_ROOT_DESCRIPTOR_TABLE,
    D3D12_ROOT_PARAMETER, D3D12_ROOT_PARAMETER_0, D3D12_ROOT_PARAMETER_TYPE_CBV,
    D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE, D3D12_ROOT_SIGNATURE_DESC,
    D3D12_ROOT_SIGNATURE_FLAG_NONE, D3D12_SHADER_BYTECODE, D3D12_SHADER_RESOURCE_VIEW_DESC,
    D3D12_SHADER_RESOURCE_VIEW_DESC_0, D3D12_SHADER_VISIBILITY_ALL, D3D12_SRV_DIMENSION_TEXTURE2D,
    D3D12_TEX2D_SRV, D3D12_TEX2D_UAV, D3D12_UAV_DIMENSION_TEXTURE2D,
    D3D12_UNORDERED_ACCESS_VIEW_DESC, D3D12_UNORDERED_ACCESS_VIEW_DESC_0,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16_SINT};

use crate::error::{FrameGenError, FrameGenResult};
use crate::flow::{shader, MotionEstimatorConfig, MAX_SEARCH_RADIUS};
use crate::gpu::context::{
    create_buffer, create_texture, create_upload_buffer, texture2d_desc, transition, GpuContext,
    SHADER_READ_STATE,
};
use crate::gpu::motion_field_size;
use crate::stats::FlowStats;

/// Constant-buffer layout shared with the kernel (16-byte packed).
#[repr(C)]
struct MotionSearchConstants {
    input_size: [u32; 2],
    output_size: [u32; 2],
    block_size: u32,
    search_radius: u32,
    _pad: [f32; 2],
    lum_coeffs: [f32; 4],
}

const CONSTANT_BUFFER_SIZE: u64 = 256;
const TIMESTAMP_PAIR_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

/// The motion-search compute stage.
pub struct OpticalFlow {
    device: ID3D12Device,
    root_signature: ID3D12RootSignature,
    pso: ID3D12PipelineState,
    heap: ID3D12DescriptorHeap,
    descriptor_size: u32,

    motion_vectors: ID3D12Resource,
    constant_buffer: ID3D12Resource,
    mv_width: u32,
    mv_height: u32,

    /// Descriptor table cache keyed on raw input-texture pointers. The
    /// interop ring guarantees its two textures are never reallocated, so
    /// pointer identity is a sound key.
    cached_inputs: Option<(usize, usize)>,

    query_heap: Option<ID3D12QueryHeap>,
    query_readback: ID3D12Resource,
    timestamp_frequency: f64,
    pending_query: bool,

    stats: FlowStats,
}

impl OpticalFlow {
    pub fn new(context: &GpuContext, config: &MotionEstimatorConfig) -> FrameGenResult<Self> {
        let device = context.device().clone();

        let mut config = *config;
        if config.search_radius > MAX_SEARCH_RADIUS {
            log::warn!(
                "search radius {} exceeds maximum, clamping to {MAX_SEARCH_RADIUS}",
                config.search_radius
            );
            config.search_radius = MAX_SEARCH_RADIUS;
        }

        let (mv_width, mv_height) =
            motion_field_size(config.width, config.height, config.block_size);

        let root_signature = create_root_signature(&device)?;
        let pso = create_pipeline(&device, &root_signature, &config)?;

        let heap: ID3D12DescriptorHeap = unsafe {
            device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                NumDescriptors: 4,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                NodeMask: 0,
            })?
        };
        let descriptor_size = unsafe {
            device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV)
        };

        let motion_vectors = create_texture(
            &device,
            &texture2d_desc(
                mv_width,
                mv_height,
                DXGI_FORMAT_R16G16_SINT,
                D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
            ),
            Default::default(),
            D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        )?;

        // UAV slot never changes; write it once after the two SRV slots.
        unsafe {
            let mut handle = heap.GetCPUDescriptorHandleForHeapStart();
            handle.ptr += 2 * descriptor_size as usize;
            device.CreateUnorderedAccessView(
                &motion_vectors,
                None,
                Some(&D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: DXGI_FORMAT_R16G16_SINT,
                    ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_UAV {
                            MipSlice: 0,
                            PlaneSlice: 0,
                        },
                    },
                }),
                handle,
            );
        }

        // The constants never change after init: write once.
        let constant_buffer = create_upload_buffer(&device, CONSTANT_BUFFER_SIZE)?;
        unsafe {
            let mut ptr = std::ptr::null_mut();
            constant_buffer.Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut ptr))?;
            std::ptr::write(
                ptr as *mut MotionSearchConstants,
                MotionSearchConstants {
                    input_size: [config.width, config.height],
                    output_size: [mv_width, mv_height],
                    block_size: config.block_size,
                    search_radius: config.search_radius,
                    _pad: [0.0; 2],
                    lum_coeffs: [
                        config.luminance[0],
                        config.luminance[1],
                        config.luminance[2],
                        0.0,
                    ],
                },
            );
            constant_buffer.Unmap(0, None);
        }

        // Timestamp pair readback; queries are skipped if the queue cannot
        // report a frequency.
        let query_readback = create_buffer(
            &device,
            TIMESTAMP_PAIR_BYTES,
            D3D12_HEAP_TYPE_READBACK,
            D3D12_RESOURCE_STATE_COPY_DEST,
        )?;
        let (query_heap, timestamp_frequency) =
            match unsafe { context.queue().GetTimestampFrequency() } {
                Ok(freq) if freq > 0 => {
                    let mut heap: Option<ID3D12QueryHeap> = None;
                    unsafe {
                        device.CreateQueryHeap(
                            &D3D12_QUERY_HEAP_DESC {
                                Type: D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
                                Count: 2,
                                NodeMask: 0,
                            },
                            &mut heap,
                        )?;
                    }
                    (heap, freq as f64)
                }
                _ => {
                    log::warn!("timestamp queries unavailable, GPU timing disabled");
                    (None, 0.0)
                }
            };

        log::info!(
            "optical flow initialised: {}x{} blocks of {} px, radius {}",
            mv_width,
            mv_height,
            config.block_size,
            config.search_radius
        );

        Ok(Self {
            device,
            root_signature,
            pso,
            heap,
            descriptor_size,
            motion_vectors,
            constant_buffer,
            mv_width,
            mv_height,
            cached_inputs: None,
            query_heap,
            query_readback,
            timestamp_frequency,
            pending_query: false,
            stats: FlowStats::default(),
        })
    }

    /// Record the motion-search dispatch.
    ///
    /// Inputs must be resting in the shader-read state; the motion field is
    /// back in the shader-read state when the recording returns.
    pub fn dispatch(
        &mut self,
        list: &ID3D12GraphicsCommandList,
        current: &ID3D12Resource,
        previous: &ID3D12Resource,
    ) -> FrameGenResult<()> {
        let start = Instant::now();

        // Timestamps from the previous dispatch are integrated now; reading
        // the just-recorded pair would stall the host on the GPU.
        self.integrate_pending_timestamps();

        if self.stats.dispatches > 0 {
            unsafe {
                list.ResourceBarrier(&[transition(
                    &self.motion_vectors,
                    SHADER_READ_STATE,
                    D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
                )]);
            }
        }

        let key = (current.as_raw() as usize, previous.as_raw() as usize);
        if self.cached_inputs != Some(key) {
            self.write_input_descriptors(current, previous);
            self.cached_inputs = Some(key);
        }

        unsafe {
            list.SetComputeRootSignature(&self.root_signature);
            list.SetPipelineState(&self.pso);
            list.SetDescriptorHeaps(&[Some(self.heap.clone())]);
            list.SetComputeRootConstantBufferView(0, self.constant_buffer.GetGPUVirtualAddress());

            let srv_table = self.heap.GetGPUDescriptorHandleForHeapStart();
            list.SetComputeRootDescriptorTable(1, srv_table);
            let mut uav_table = srv_table;
            uav_table.ptr += 2 * self.descriptor_size as u64;
            list.SetComputeRootDescriptorTable(2, uav_table);

            if let Some(query_heap) = &self.query_heap {
                list.EndQuery(query_heap, D3D12_QUERY_TYPE_TIMESTAMP, 0);
            }
            list.Dispatch(self.mv_width, self.mv_height, 1);
            if let Some(query_heap) = &self.query_heap {
                list.EndQuery(query_heap, D3D12_QUERY_TYPE_TIMESTAMP, 1);
                list.ResolveQueryData(
                    query_heap,
                    D3D12_QUERY_TYPE_TIMESTAMP,
                    0,
                    2,
                    &self.query_readback,
                    0,
                );
                self.pending_query = true;
            }

            list.ResourceBarrier(&[transition(
                &self.motion_vectors,
                D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
                SHADER_READ_STATE,
            )]);
        }

        self.stats.dispatches += 1;
        self.stats
            .cpu_record
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    /// The motion-vector texture, resting in the shader-read state between
    /// dispatches.
    pub fn motion_vectors(&self) -> &ID3D12Resource {
        &self.motion_vectors
    }

    pub fn mv_size(&self) -> (u32, u32) {
        (self.mv_width, self.mv_height)
    }

    pub fn stats(&self) -> &FlowStats {
        &self.stats
    }

    /// Drop the descriptor cache after a failed tick so the next dispatch
    /// rebuilds the table.
    pub fn invalidate_descriptors(&mut self) {
        self.cached_inputs = None;
    }

    fn write_input_descriptors(&self, current: &ID3D12Resource, previous: &ID3D12Resource) {
        let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        unsafe {
            let mut handle = self.heap.GetCPUDescriptorHandleForHeapStart();
            self.device
                .CreateShaderResourceView(current, Some(&srv_desc), handle);
            handle.ptr += self.descriptor_size as usize;
            self.device
                .CreateShaderResourceView(previous, Some(&srv_desc), handle);
        }
    }

    fn integrate_pending_timestamps(&mut self) {
        if !self.pending_query {
            return;
        }
        self.pending_query = false;

        unsafe {
            let mut ptr = std::ptr::null_mut();
            let range = D3D12_RANGE {
                Begin: 0,
                End: TIMESTAMP_PAIR_BYTES as usize,
            };
            if self
                .query_readback
                .Map(0, Some(&range), Some(&mut ptr))
                .is_err()
            {
                return;
            }
            let stamps = std::slice::from_raw_parts(ptr as *const u64, 2);
            if stamps[1] > stamps[0] && self.timestamp_frequency > 0.0 {
                let ms = (stamps[1] - stamps[0]) as f64 * 1000.0 / self.timestamp_frequency;
                self.stats.gpu_dispatch.record(ms);
            }
            self.query_readback
                .Unmap(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }));
        }
    }
}

fn create_root_signature(device: &ID3D12Device) -> FrameGenResult<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 2,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let uav_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };

    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Descriptor: D3D12_ROOT_DESCRIPTOR {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &srv_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &uav_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
    ];

    crate::gpu::shader::create_root_signature(
        device,
        &D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
        },
    )
}

fn create_pipeline(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    config: &MotionEstimatorConfig,
) -> FrameGenResult<ID3D12PipelineState> {
    let blob = shader::compile(config.block_size, config.search_radius)?;
    let desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        CS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { blob.GetBufferPointer() },
            BytecodeLength: unsafe { blob.GetBufferSize() },
        },
        ..Default::default()
    };
    unsafe { device.CreateComputePipelineState(&desc) }.map_err(FrameGenError::from)
}
