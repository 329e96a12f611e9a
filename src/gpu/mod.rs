//! GPU plumbing shared by every stage: adapter enumeration, the compute
//! context, and small D3D12 helpers.

#[cfg(windows)]
pub mod context;
#[cfg(windows)]
pub mod shader;

use serde::{Deserialize, Serialize};

/// Bytes per BGRA8 pixel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// D3D12 requires texture-copy row pitches aligned to 256 bytes.
pub const ROW_PITCH_ALIGNMENT: u32 = 256;

/// Aligned row pitch for a BGRA8 row of `width` pixels.
pub const fn aligned_row_pitch(width: u32) -> u32 {
    (width * BYTES_PER_PIXEL + ROW_PITCH_ALIGNMENT - 1) & !(ROW_PITCH_ALIGNMENT - 1)
}

/// Motion-field dimensions for an image of `width` x `height` and a given
/// block size: one vector per block, partial blocks included.
pub const fn motion_field_size(width: u32, height: u32, block_size: u32) -> (u32, u32) {
    (
        (width + block_size - 1) / block_size,
        (height + block_size - 1) / block_size,
    )
}

/// One enumerated display adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    /// DXGI enumeration index (software adapters are skipped but keep their
    /// index so the config file maps directly onto `EnumAdapters1`).
    pub adapter_index: u32,
    pub description: String,
    pub dedicated_video_memory: u64,
    pub shared_system_memory: u64,
    pub luid: (u32, i32),
    pub is_integrated: bool,
    pub supports_cross_adapter_row_major: bool,
}

/// Dedicated-memory threshold below which an adapter is treated as
/// integrated.
pub const INTEGRATED_MEMORY_THRESHOLD: u64 = 512 * 1024 * 1024;

/// Whether a direct cross-adapter heap transfer is available between two
/// enumerated adapters.
pub fn is_peer_to_peer_available(gpus: &[GpuInfo], source: u32, dest: u32) -> bool {
    if source == dest {
        return false;
    }
    let find = |index: u32| gpus.iter().find(|g| g.adapter_index == index);
    match (find(source), find(dest)) {
        (Some(src), Some(dst)) => {
            src.supports_cross_adapter_row_major && dst.supports_cross_adapter_row_major
        }
        _ => false,
    }
}

/// Enumerate hardware adapters with their cross-adapter capabilities.
#[cfg(windows)]
pub fn enumerate_gpus() -> crate::error::FrameGenResult<Vec<GpuInfo>> {
    use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
    use windows::Win32::Graphics::Direct3D12::{
        D3D12CreateDevice, ID3D12Device, D3D12_FEATURE_DATA_D3D12_OPTIONS,
        D3D12_FEATURE_D3D12_OPTIONS,
    };
    use windows::Win32::Graphics::Dxgi::{
        CreateDXGIFactory2, IDXGIAdapter1, IDXGIFactory6, DXGI_ADAPTER_FLAG,
        DXGI_ADAPTER_FLAG_NONE, DXGI_ADAPTER_FLAG_SOFTWARE, DXGI_CREATE_FACTORY_FLAGS,
        DXGI_ERROR_NOT_FOUND,
    };

    let mut gpus = Vec::new();
    unsafe {
        let factory: IDXGIFactory6 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))?;

        let mut index = 0u32;
        loop {
            let adapter: IDXGIAdapter1 = match factory.EnumAdapters1(index) {
                Ok(adapter) => adapter,
                Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(err) => return Err(err.into()),
            };
            let adapter_index = index;
            index += 1;

            let desc = adapter.GetDesc1()?;
            if DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE
                != DXGI_ADAPTER_FLAG_NONE
            {
                continue;
            }

            let terminator = desc
                .Description
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(desc.Description.len());
            let description = String::from_utf16_lossy(&desc.Description[..terminator]);

            // Cross-adapter row-major support needs a live device to probe.
            let mut supports_cross_adapter_row_major = false;
            let mut device: Option<ID3D12Device> = None;
            if D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device).is_ok() {
                if let Some(device) = device {
                    let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS::default();
                    if device
                        .CheckFeatureSupport(
                            D3D12_FEATURE_D3D12_OPTIONS,
                            &mut options as *mut _ as *mut core::ffi::c_void,
                            std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS>() as u32,
                        )
                        .is_ok()
                    {
                        supports_cross_adapter_row_major =
                            options.CrossAdapterRowMajorTextureSupported.as_bool();
                    }
                }
            }

            gpus.push(GpuInfo {
                adapter_index,
                description,
                dedicated_video_memory: desc.DedicatedVideoMemory as u64,
                shared_system_memory: desc.SharedSystemMemory as u64,
                luid: (desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart),
                is_integrated: (desc.DedicatedVideoMemory as u64) < INTEGRATED_MEMORY_THRESHOLD,
                supports_cross_adapter_row_major,
            });
        }
    }
    Ok(gpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_row_pitch() {
        assert_eq!(aligned_row_pitch(64), 256);
        assert_eq!(aligned_row_pitch(1920), 7680);
        assert_eq!(aligned_row_pitch(1), 256);
        // 250 * 4 = 1000 -> 1024
        assert_eq!(aligned_row_pitch(250), 1024);
    }

    #[test]
    fn test_motion_field_size() {
        assert_eq!(motion_field_size(256, 256, 8), (32, 32));
        assert_eq!(motion_field_size(1920, 1080, 8), (240, 135));
        // Non-divisible dimensions round up.
        assert_eq!(motion_field_size(257, 255, 8), (33, 32));
    }

    fn gpu(index: u32, cross_adapter: bool) -> GpuInfo {
        GpuInfo {
            adapter_index: index,
            description: format!("adapter {index}"),
            dedicated_video_memory: 8 << 30,
            shared_system_memory: 0,
            luid: (index, 0),
            is_integrated: false,
            supports_cross_adapter_row_major: cross_adapter,
        }
    }

    #[test]
    fn test_peer_to_peer_requires_both_adapters() {
        let gpus = vec![gpu(0, true), gpu(1, true), gpu(2, false)];
        assert!(is_peer_to_peer_available(&gpus, 0, 1));
        assert!(!is_peer_to_peer_available(&gpus, 0, 2));
        assert!(!is_peer_to_peer_available(&gpus, 1, 1));
        assert!(!is_peer_to_peer_available(&gpus, 0, 9));
    }
}
