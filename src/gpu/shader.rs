//! Runtime HLSL compilation and root-signature serialisation.
//!
//! The compute kernels are embedded as source and compiled at init through
//! the legacy FXC compiler; numeric configuration (block size, search
//! radius) is injected as preprocessor defines so group-shared arrays are
//! sized by the actual config.

use std::ffi::CString;

use windows::core::{s, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_OPTIMIZATION_LEVEL3};
use windows::Win32::Graphics::Direct3D::{D3D_SHADER_MACRO, ID3DBlob};
use windows::Win32::Graphics::Direct3D12::{
    D3D12SerializeRootSignature, ID3D12Device, ID3D12RootSignature, D3D12_ROOT_SIGNATURE_DESC,
    D3D_ROOT_SIGNATURE_VERSION_1,
};

use crate::error::{FrameGenError, FrameGenResult};

/// Compile a `cs_5_0` compute shader from source.
pub fn compile_compute(
    source: &str,
    name: PCSTR,
    defines: &[(&str, String)],
) -> FrameGenResult<ID3DBlob> {
    // Keep the define strings alive across the call.
    let storage: Vec<(CString, CString)> = defines
        .iter()
        .map(|(key, value)| {
            (
                CString::new(*key).unwrap_or_default(),
                CString::new(value.as_str()).unwrap_or_default(),
            )
        })
        .collect();
    let mut macros: Vec<D3D_SHADER_MACRO> = storage
        .iter()
        .map(|(key, value)| D3D_SHADER_MACRO {
            Name: PCSTR(key.as_ptr() as *const u8),
            Definition: PCSTR(value.as_ptr() as *const u8),
        })
        .collect();
    macros.push(D3D_SHADER_MACRO {
        Name: PCSTR::null(),
        Definition: PCSTR::null(),
    });

    let mut shader: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const core::ffi::c_void,
            source.len(),
            name,
            Some(macros.as_ptr()),
            None,
            s!("CSMain"),
            s!("cs_5_0"),
            D3DCOMPILE_OPTIMIZATION_LEVEL3,
            0,
            &mut shader,
            Some(&mut errors),
        )
    };

    if let Err(err) = result {
        let detail = errors
            .map(|blob| blob_to_string(&blob))
            .unwrap_or_else(|| err.to_string());
        return Err(FrameGenError::Initialization(format!(
            "shader compilation failed: {detail}"
        )));
    }
    shader.ok_or_else(|| FrameGenError::Initialization("shader compilation returned null".into()))
}

/// Serialise and create a root signature.
pub fn create_root_signature(
    device: &ID3D12Device,
    desc: &D3D12_ROOT_SIGNATURE_DESC,
) -> FrameGenResult<ID3D12RootSignature> {
    let mut signature: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3D12SerializeRootSignature(desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut errors))
    };
    if let Err(err) = result {
        let detail = errors
            .map(|blob| blob_to_string(&blob))
            .unwrap_or_else(|| err.to_string());
        return Err(FrameGenError::Initialization(format!(
            "root signature serialisation failed: {detail}"
        )));
    }
    let signature = signature
        .ok_or_else(|| FrameGenError::Initialization("root signature blob is null".into()))?;

    unsafe {
        let bytes = std::slice::from_raw_parts(
            signature.GetBufferPointer() as *const u8,
            signature.GetBufferSize(),
        );
        device
            .CreateRootSignature(0, bytes)
            .map_err(FrameGenError::from)
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes =
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    }
}
