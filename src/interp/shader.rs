//! Bidirectional warp kernel.
//!
//! Each output pixel fetches its block's motion vector (nearest lookup: the
//! block grid is coarse and bilinear filtering of the inputs hides it),
//! displaces symmetrically toward both source frames, and blends.

#[cfg(windows)]
use windows::core::s;

#[cfg(windows)]
use crate::error::FrameGenResult;
#[cfg(windows)]
use crate::gpu::shader::compile_compute;

pub const WARP_BLEND_HLSL: &str = r#"
// Frame interpolation: bidirectional motion-compensated warp and blend.

cbuffer WarpConstants : register(b0)
{
    uint  g_Width;
    uint  g_Height;
    uint  g_MVWidth;
    uint  g_MVHeight;
    float g_Phase;        // 0 = previous frame, 1 = current frame
    float g_MotionScale;  // 1/16: motion vectors carry sub-pixel headroom
    float2 g_Pad0;
};

Texture2D<float4> g_PreviousFrame : register(t0);
Texture2D<float4> g_CurrentFrame : register(t1);
Texture2D<int2> g_MotionVectors : register(t2);

RWTexture2D<float4> g_Output : register(u0);

SamplerState g_LinearClamp : register(s0);

[numthreads(16, 16, 1)]
void CSMain(uint3 dispatchThreadId : SV_DispatchThreadID)
{
    if (dispatchThreadId.x >= g_Width || dispatchThreadId.y >= g_Height)
        return;

    uint2 pixel = dispatchThreadId.xy;
    float2 uv = (float2(pixel) + 0.5) / float2(g_Width, g_Height);

    // Nearest motion vector for this pixel's block.
    uint2 mvPixel = uint2(uv * float2(g_MVWidth, g_MVHeight));
    mvPixel = min(mvPixel, uint2(g_MVWidth - 1, g_MVHeight - 1));

    float2 motion = float2(g_MotionVectors[mvPixel]) * g_MotionScale;
    float2 motionUv = motion / float2(g_Width, g_Height);

    // Motion points from the current frame toward its match in the
    // previous frame, so the previous sample advances with the phase and
    // the current sample retreats against it. At t = 0 or 1 the output is
    // exactly the corresponding endpoint frame.
    float t = g_Phase;
    float2 uvPrev = saturate(uv + motionUv * t);
    float2 uvCurr = saturate(uv - motionUv * (1.0 - t));

    float4 colorPrev = g_PreviousFrame.SampleLevel(g_LinearClamp, uvPrev, 0);
    float4 colorCurr = g_CurrentFrame.SampleLevel(g_LinearClamp, uvCurr, 0);

    float4 result = colorPrev * (1.0 - t) + colorCurr * t;
    result.a = 1.0;

    g_Output[pixel] = result;
}
"#;

/// Compile the warp kernel.
#[cfg(windows)]
pub fn compile() -> FrameGenResult<windows::Win32::Graphics::Direct3D::ID3DBlob> {
    compile_compute(WARP_BLEND_HLSL, s!("warp_blend.hlsl"), &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_forces_opaque_alpha() {
        assert!(WARP_BLEND_HLSL.contains("result.a = 1.0"));
    }

    #[test]
    fn test_kernel_declares_three_inputs_and_one_output() {
        for binding in ["register(t0)", "register(t1)", "register(t2)", "register(u0)"] {
            assert!(WARP_BLEND_HLSL.contains(binding), "missing {binding}");
        }
    }
}
