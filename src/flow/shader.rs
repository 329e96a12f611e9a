//! Block-matching motion search kernel.
//!
//! One thread group per output block. The group stages the current block and
//! the surrounding previous-frame search window in group-shared memory, then
//! lane 0 runs a three-step search over the window followed by a one-pixel
//! refinement. `BLOCK_SIZE` and `SEARCH_RADIUS` arrive as compile defines so
//! the shared arrays match the configured search geometry.

#[cfg(windows)]
use windows::core::s;

#[cfg(windows)]
use crate::error::FrameGenResult;
#[cfg(windows)]
use crate::gpu::shader::compile_compute;

pub const MOTION_SEARCH_HLSL: &str = r#"
// Motion search: luminance SAD block matching with a three-step search.

#ifndef BLOCK_SIZE
#define BLOCK_SIZE 8
#endif
#ifndef SEARCH_RADIUS
#define SEARCH_RADIUS 12
#endif

#define TILE_DIM (BLOCK_SIZE + 2 * SEARCH_RADIUS)
#define GROUP_THREADS (BLOCK_SIZE * BLOCK_SIZE)

Texture2D<float4> g_CurrentFrame : register(t0);
Texture2D<float4> g_PreviousFrame : register(t1);
RWTexture2D<int2> g_MotionVectors : register(u0);

cbuffer MotionSearchConstants : register(b0)
{
    uint2  g_InputSize;
    uint2  g_OutputSize;
    uint   g_BlockSize;
    uint   g_SearchRadius;
    float2 g_Pad0;
    float4 g_LumCoeffs;   // BT.709 weights in xyz
};

groupshared float gs_Current[GROUP_THREADS];
groupshared float gs_Previous[TILE_DIM * TILE_DIM];

float Luminance(float3 rgb)
{
    return dot(rgb, g_LumCoeffs.xyz);
}

float LoadCurrent(int2 pos)
{
    pos = clamp(pos, int2(0, 0), int2(g_InputSize) - 1);
    return Luminance(g_CurrentFrame[pos].rgb);
}

float LoadPrevious(int2 pos)
{
    pos = clamp(pos, int2(0, 0), int2(g_InputSize) - 1);
    return Luminance(g_PreviousFrame[pos].rgb);
}

bool BlockInsideImage(int2 topLeft)
{
    return topLeft.x >= 0 && topLeft.y >= 0 &&
           topLeft.x + BLOCK_SIZE <= int(g_InputSize.x) &&
           topLeft.y + BLOCK_SIZE <= int(g_InputSize.y);
}

float BlockSad(int2 offset)
{
    int2 base = offset + int2(SEARCH_RADIUS, SEARCH_RADIUS);
    float sad = 0.0;
    [loop]
    for (int y = 0; y < BLOCK_SIZE; y++)
    {
        [loop]
        for (int x = 0; x < BLOCK_SIZE; x++)
        {
            float cur = gs_Current[y * BLOCK_SIZE + x];
            float prev = gs_Previous[(base.y + y) * TILE_DIM + (base.x + x)];
            sad += abs(cur - prev);
        }
    }
    return sad;
}

[numthreads(BLOCK_SIZE, BLOCK_SIZE, 1)]
void CSMain(uint3 groupId : SV_GroupID,
            uint3 threadId : SV_GroupThreadID,
            uint groupIndex : SV_GroupIndex)
{
    int2 blockPos = int2(groupId.xy) * BLOCK_SIZE;

    // Stage the current block, one luminance sample per lane.
    gs_Current[groupIndex] = LoadCurrent(blockPos + int2(threadId.xy));

    // Cooperatively stage the previous-frame search window, strided so
    // every lane loads ceil(TILE_DIM^2 / GROUP_THREADS) samples.
    int2 tileOrigin = blockPos - int2(SEARCH_RADIUS, SEARCH_RADIUS);
    for (uint i = groupIndex; i < TILE_DIM * TILE_DIM; i += GROUP_THREADS)
    {
        int2 t = int2(i % TILE_DIM, i / TILE_DIM);
        gs_Previous[i] = LoadPrevious(tileOrigin + t);
    }

    GroupMemoryBarrierWithGroupSync();

    if (groupIndex != 0)
        return;

    const int radius = int(SEARCH_RADIUS);
    int2 center = int2(0, 0);
    int2 best = int2(0, 0);
    float bestSad = 1e30;

    // Zero displacement is the reference candidate: a flat block must
    // report no motion, so later candidates only win with strictly
    // smaller SAD.
    if (BlockInsideImage(blockPos))
    {
        bestSad = BlockSad(int2(0, 0));
    }

    // Three-step search: halve the stride around the best candidate.
    // Candidates leaving [-R, R] or placing the matched block outside the
    // previous image are rejected; ties keep the earlier (dy, dx) visit.
    int step = max(radius / 2, 1);
    [loop]
    while (step >= 1)
    {
        int2 stepBest = center;
        float stepBestSad = 1e30;

        [unroll]
        for (int dy = -1; dy <= 1; dy++)
        {
            [unroll]
            for (int dx = -1; dx <= 1; dx++)
            {
                int2 candidate = center + int2(dx, dy) * step;
                if (candidate.x < -radius || candidate.x > radius ||
                    candidate.y < -radius || candidate.y > radius)
                    continue;
                if (!BlockInsideImage(blockPos + candidate))
                    continue;

                float sad = BlockSad(candidate);
                if (sad < stepBestSad)
                {
                    stepBestSad = sad;
                    stepBest = candidate;
                }
                if (sad < bestSad)
                {
                    bestSad = sad;
                    best = candidate;
                }
            }
        }

        center = stepBest;
        step /= 2;
    }

    // Refinement: the eight immediate neighbours of the search result.
    [unroll]
    for (int ny = -1; ny <= 1; ny++)
    {
        [unroll]
        for (int nx = -1; nx <= 1; nx++)
        {
            if (nx == 0 && ny == 0)
                continue;
            int2 candidate = center + int2(nx, ny);
            if (candidate.x < -radius || candidate.x > radius ||
                candidate.y < -radius || candidate.y > radius)
                continue;
            if (!BlockInsideImage(blockPos + candidate))
                continue;

            float sad = BlockSad(candidate);
            if (sad < bestSad)
            {
                bestSad = sad;
                best = candidate;
            }
        }
    }

    // Displacement in 1/16 pixel units; the low bits are reserved for
    // sub-pixel refinement.
    g_MotionVectors[groupId.xy] = best * 16;
}
"#;

/// Compile the motion-search kernel for a given geometry.
#[cfg(windows)]
pub fn compile(
    block_size: u32,
    search_radius: u32,
) -> FrameGenResult<windows::Win32::Graphics::Direct3D::ID3DBlob> {
    compile_compute(
        MOTION_SEARCH_HLSL,
        s!("motion_search.hlsl"),
        &[
            ("BLOCK_SIZE", block_size.to_string()),
            ("SEARCH_RADIUS", search_radius.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_declares_expected_bindings() {
        assert!(MOTION_SEARCH_HLSL.contains("register(t0)"));
        assert!(MOTION_SEARCH_HLSL.contains("register(t1)"));
        assert!(MOTION_SEARCH_HLSL.contains("register(u0)"));
        assert!(MOTION_SEARCH_HLSL.contains("register(b0)"));
    }

    #[test]
    fn test_kernel_scales_output_by_sixteen() {
        assert!(MOTION_SEARCH_HLSL.contains("best * 16"));
    }
}
