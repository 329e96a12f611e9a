//! GPU objects and dispatch recording for the warp-blend pass.

use std::time::Instant;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::{
    ID3D12DescriptorHeap, ID3D12Device, ID3D12GraphicsCommandList, ID3D12PipelineState,
    ID3D12Resource, ID3D12RootSignature, D3D12_COMPARISON_FUNC_NEVER,
    D3D12_COMPUTE_PIPELINE_STATE_DESC, D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
    D3D12_DESCRIPTOR_HEAP_DESC, D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
    D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV, D3D12_DESCRIPTOR_RANGE,
    D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND, D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
    D3D12_DESCRIPTOR_RANGE_TYPE_UAV, D3D12_FILTER_MIN_MAG_MIP_LINEAR, D3D12_FLOAT32_MAX,
    D3D12_RANGE, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
    D3D12_RESOURCE_STATE_UNORDERED_ACCESS, D3D12_ROOT_DESCRIPTOR, D3D12_ROOT_DESCRIPTOR_TABLE,
    D3D12_ROOT_PARAMETER, D3D12_ROOT_PARAMETER_0, D3D12_ROOT_PARAMETER_TYPE_CBV,
    D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE, D3D12_ROOT_SIGNATURE_DESC,
    D3D12_ROOT_SIGNATURE_FLAG_NONE, D3D12_SHADER_BYTECODE, D3D12_SHADER_RESOURCE_VIEW_DESC,
    D3D12_SHADER_RESOURCE_VIEW_DESC_0, D3D12_SHADER_VISIBILITY_ALL, D3D12_SRV_DIMENSION_TEXTURE2D,
    D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK, D3D12_STATIC_SAMPLER_DESC, D3D12_TEX2D_SRV,
    D3D12_TEX2D_UAV, D3D12_TEXTURE_ADDRESS_MODE_CLAMP, D3D12_UAV_DIMENSION_TEXTURE2D,
    D3D12_UNORDERED_ACCESS_VIEW_DESC, D3D12_UNORDERED_ACCESS_VIEW_DESC_0,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16_SINT};

use crate::error::{FrameGenError, FrameGenResult};
use crate::gpu::context::{
    create_texture, create_upload_buffer, texture2d_desc, transition, GpuContext,
    SHADER_READ_STATE,
};
use crate::interp::{clamp_phase, shader, InterpolationConfig, MOTION_SCALE};
use crate::stats::InterpolationStats;

/// Constant-buffer layout shared with the kernel, refreshed per dispatch.
#[repr(C)]
struct WarpConstants {
    width: u32,
    height: u32,
    mv_width: u32,
    mv_height: u32,
    phase: f32,
    motion_scale: f32,
    _pad: [f32; 2],
}

const CONSTANT_BUFFER_SIZE: u64 = 256;
const GROUP_DIM: u32 = 16;

/// The warp-blend compute stage.
pub struct FrameInterpolator {
    device: ID3D12Device,
    root_signature: ID3D12RootSignature,
    pso: ID3D12PipelineState,
    heap: ID3D12DescriptorHeap,
    descriptor_size: u32,

    output: ID3D12Resource,
    constant_buffer: ID3D12Resource,
    width: u32,
    height: u32,

    /// Pointer-keyed cache over (previous, current, motion field).
    cached_inputs: Option<(usize, usize, usize)>,
    dispatches: u64,

    stats: InterpolationStats,
}

impl FrameInterpolator {
    pub fn new(context: &GpuContext, config: &InterpolationConfig) -> FrameGenResult<Self> {
        let device = context.device().clone();

        let root_signature = create_root_signature(&device)?;
        let pso = create_pipeline(&device, &root_signature)?;

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

        let output = create_texture(
            &device,
            &texture2d_desc(
                config.width,
                config.height,
                DXGI_FORMAT_B8G8R8A8_UNORM,
                D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
            ),
            Default::default(),
            D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        )?;

        // Output UAV lives in slot 3, after the three SRVs.
        unsafe {
            let mut handle = heap.GetCPUDescriptorHandleForHeapStart();
            handle.ptr += 3 * descriptor_size as usize;
            device.CreateUnorderedAccessView(
                &output,
                None,
                Some(&D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: DXGI_FORMAT_B8G8R8A8_UNORM,
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

        let constant_buffer = create_upload_buffer(&device, CONSTANT_BUFFER_SIZE)?;

        Ok(Self {
            device,
            root_signature,
            pso,
            heap,
            descriptor_size,
            output,
            constant_buffer,
            width: config.width,
            height: config.height,
            cached_inputs: None,
            dispatches: 0,
            stats: InterpolationStats::default(),
        })
    }

    /// Record one interpolation dispatch for phase `t`.
    ///
    /// All three inputs must rest in the shader-read state; the output is
    /// back in the shader-read state when the recording returns.
    pub fn dispatch(
        &mut self,
        list: &ID3D12GraphicsCommandList,
        previous: &ID3D12Resource,
        current: &ID3D12Resource,
        motion_vectors: &ID3D12Resource,
        mv_size: (u32, u32),
        t: f32,
    ) -> FrameGenResult<()> {
        let start = Instant::now();
        let t = clamp_phase(t);

        self.write_constants(mv_size, t)?;

        if self.dispatches > 0 {
            unsafe {
                list.ResourceBarrier(&[transition(
                    &self.output,
                    SHADER_READ_STATE,
                    D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
                )]);
            }
        }

        let key = (
            previous.as_raw() as usize,
            current.as_raw() as usize,
            motion_vectors.as_raw() as usize,
        );
        if self.cached_inputs != Some(key) {
            self.write_input_descriptors(previous, current, motion_vectors);
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
            uav_table.ptr += 3 * self.descriptor_size as u64;
            list.SetComputeRootDescriptorTable(2, uav_table);

            list.Dispatch(
                (self.width + GROUP_DIM - 1) / GROUP_DIM,
                (self.height + GROUP_DIM - 1) / GROUP_DIM,
                1,
            );

            list.ResourceBarrier(&[transition(
                &self.output,
                D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
                SHADER_READ_STATE,
            )]);
        }

        self.dispatches += 1;
        self.stats.frames_interpolated += 1;
        self.stats
            .cpu_record
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    /// The interpolated frame, valid until the next dispatch overwrites it.
    pub fn output(&self) -> &ID3D12Resource {
        &self.output
    }

    pub fn stats(&self) -> &InterpolationStats {
        &self.stats
    }

    pub fn invalidate_descriptors(&mut self) {
        self.cached_inputs = None;
    }

    fn write_constants(&self, mv_size: (u32, u32), t: f32) -> FrameGenResult<()> {
        unsafe {
            let mut ptr = std::ptr::null_mut();
            self.constant_buffer
                .Map(0, Some(&D3D12_RANGE { Begin: 0, End: 0 }), Some(&mut ptr))
                .map_err(|err| {
                    FrameGenError::ComputeDispatchFailed(format!("constant map failed: {err}"))
                })?;
            std::ptr::write(
                ptr as *mut WarpConstants,
                WarpConstants {
                    width: self.width,
                    height: self.height,
                    mv_width: mv_size.0,
                    mv_height: mv_size.1,
                    phase: t,
                    motion_scale: MOTION_SCALE,
                    _pad: [0.0; 2],
                },
            );
            self.constant_buffer.Unmap(0, None);
        }
        Ok(())
    }

    fn write_input_descriptors(
        &self,
        previous: &ID3D12Resource,
        current: &ID3D12Resource,
        motion_vectors: &ID3D12Resource,
    ) {
        let color_srv = D3D12_SHADER_RESOURCE_VIEW_DESC {
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
        let mut mv_srv = color_srv;
        mv_srv.Format = DXGI_FORMAT_R16G16_SINT;

        unsafe {
            let mut handle = self.heap.GetCPUDescriptorHandleForHeapStart();
            self.device
                .CreateShaderResourceView(previous, Some(&color_srv), handle);
            handle.ptr += self.descriptor_size as usize;
            self.device
                .CreateShaderResourceView(current, Some(&color_srv), handle);
            handle.ptr += self.descriptor_size as usize;
            self.device
                .CreateShaderResourceView(motion_vectors, Some(&mv_srv), handle);
        }
    }
}

fn create_root_signature(device: &ID3D12Device) -> FrameGenResult<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 3,
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

    // Bilinear clamp sampler used for both colour inputs.
    let sampler = D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
        MinLOD: 0.0,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        RegisterSpace: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };

    crate::gpu::shader::create_root_signature(
        device,
        &D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: 1,
            pStaticSamplers: &sampler,
            Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
        },
    )
}

fn create_pipeline(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
) -> FrameGenResult<ID3D12PipelineState> {
    let blob = shader::compile()?;
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
