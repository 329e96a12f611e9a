//! Reference model of the bidirectional warp-blend pass.
//!
//! Mirrors the interpolation kernel: nearest motion-vector fetch, symmetric
//! displacement of the sample positions, bilinear sampling with clamped
//! addressing, linear blend, opaque alpha.

const MOTION_SCALE: f32 = 1.0 / 16.0;

#[derive(Clone)]
struct Rgba {
    width: u32,
    height: u32,
    px: Vec<[f32; 4]>,
}

impl Rgba {
    fn new(width: u32, height: u32, f: impl Fn(u32, u32) -> [f32; 4]) -> Self {
        let mut px = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                px.push(f(x, y));
            }
        }
        Self { width, height, px }
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.px[(y * self.width + x) as usize]
    }

    /// Bilinear sample at normalised `uv` with clamp addressing, matching
    /// `SampleLevel` on a linear clamp sampler.
    fn sample_linear(&self, uv: [f32; 2]) -> [f32; 4] {
        let fx = uv[0] * self.width as f32 - 0.5;
        let fy = uv[1] * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;

        let mut out = [0.0f32; 4];
        for c in 0..4 {
            let p00 = self.texel(x0 as i64, y0 as i64)[c];
            let p10 = self.texel(x0 as i64 + 1, y0 as i64)[c];
            let p01 = self.texel(x0 as i64, y0 as i64 + 1)[c];
            let p11 = self.texel(x0 as i64 + 1, y0 as i64 + 1)[c];
            let top = p00 * (1.0 - tx) + p10 * tx;
            let bottom = p01 * (1.0 - tx) + p11 * tx;
            out[c] = top * (1.0 - ty) + bottom * ty;
        }
        out
    }
}

struct MotionField {
    width: u32,
    height: u32,
    vectors: Vec<[i32; 2]>,
}

impl MotionField {
    fn zero(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            vectors: vec![[0, 0]; (width * height) as usize],
        }
    }

    fn uniform(width: u32, height: u32, mv: [i32; 2]) -> Self {
        Self {
            width,
            height,
            vectors: vec![mv; (width * height) as usize],
        }
    }

    fn fetch(&self, x: u32, y: u32) -> [i32; 2] {
        self.vectors[(y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize]
    }
}

fn interpolate_pixel(
    previous: &Rgba,
    current: &Rgba,
    field: &MotionField,
    x: u32,
    y: u32,
    t: f32,
) -> [f32; 4] {
    let (w, h) = (current.width as f32, current.height as f32);
    let uv = [(x as f32 + 0.5) / w, (y as f32 + 0.5) / h];

    let mv_x = ((uv[0] * field.width as f32) as u32).min(field.width - 1);
    let mv_y = ((uv[1] * field.height as f32) as u32).min(field.height - 1);
    let mv = field.fetch(mv_x, mv_y);
    let motion = [mv[0] as f32 * MOTION_SCALE, mv[1] as f32 * MOTION_SCALE];
    let motion_uv = [motion[0] / w, motion[1] / h];

    // Previous advances with the phase, current retreats against it; the
    // endpoints then reproduce their frames exactly for any motion field.
    let uv_prev = [
        (uv[0] + motion_uv[0] * t).clamp(0.0, 1.0),
        (uv[1] + motion_uv[1] * t).clamp(0.0, 1.0),
    ];
    let uv_curr = [
        (uv[0] - motion_uv[0] * (1.0 - t)).clamp(0.0, 1.0),
        (uv[1] - motion_uv[1] * (1.0 - t)).clamp(0.0, 1.0),
    ];

    let prev = previous.sample_linear(uv_prev);
    let curr = current.sample_linear(uv_curr);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        out[c] = prev[c] * (1.0 - t) + curr[c] * t;
    }
    out[3] = 1.0;
    out
}

fn checker(x: u32, y: u32) -> [f32; 4] {
    if ((x / 16) + (y / 16)) % 2 == 0 {
        [0.9, 0.2, 0.1, 1.0]
    } else {
        [0.1, 0.3, 0.8, 1.0]
    }
}

#[test]
fn phase_zero_reproduces_previous_frame() {
    let previous = Rgba::new(64, 64, checker);
    let current = Rgba::new(64, 64, |x, y| checker(x.wrapping_add(7), y));
    let field = MotionField::zero(8, 8);

    for y in 0..64 {
        for x in 0..64 {
            let out = interpolate_pixel(&previous, &current, &field, x, y, 0.0);
            let expected = previous.texel(x as i64, y as i64);
            for c in 0..3 {
                assert!(
                    (out[c] - expected[c]).abs() < 1.0 / 255.0,
                    "pixel ({x},{y}) channel {c}"
                );
            }
            assert_eq!(out[3], 1.0);
        }
    }
}

#[test]
fn phase_zero_reproduces_previous_even_with_motion() {
    let previous = Rgba::new(64, 64, checker);
    let current = Rgba::new(64, 64, |x, y| checker(x.wrapping_add(8), y));
    let field = MotionField::uniform(8, 8, [-8 * 16, 0]);

    for y in 0..64 {
        for x in 0..64 {
            let out = interpolate_pixel(&previous, &current, &field, x, y, 0.0);
            let expected = previous.texel(x as i64, y as i64);
            for c in 0..3 {
                assert!((out[c] - expected[c]).abs() < 1.0 / 255.0);
            }
        }
    }
}

#[test]
fn phase_one_reproduces_current_frame() {
    let previous = Rgba::new(64, 64, checker);
    let current = Rgba::new(64, 64, |x, y| checker(x.wrapping_add(7), y));
    let field = MotionField::zero(8, 8);

    for y in 0..64 {
        for x in 0..64 {
            let out = interpolate_pixel(&previous, &current, &field, x, y, 1.0);
            let expected = current.texel(x as i64, y as i64);
            for c in 0..3 {
                assert!((out[c] - expected[c]).abs() < 1.0 / 255.0);
            }
        }
    }
}

#[test]
fn uniform_input_stays_uniform_at_any_phase() {
    let gray = [128.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0, 1.0];
    let previous = Rgba::new(32, 32, |_, _| gray);
    let current = previous.clone();
    let field = MotionField::zero(4, 4);

    for &t in &[0.25f32, 0.5, 0.75] {
        for y in 0..32 {
            for x in 0..32 {
                let out = interpolate_pixel(&previous, &current, &field, x, y, t);
                for c in 0..3 {
                    assert!((out[c] - gray[c]).abs() < 1e-6);
                }
                assert_eq!(out[3], 1.0);
            }
        }
    }
}

#[test]
fn alpha_is_opaque_for_interior_phases() {
    let previous = Rgba::new(16, 16, |_, _| [0.0, 0.0, 0.0, 0.0]);
    let current = Rgba::new(16, 16, |_, _| [1.0, 1.0, 1.0, 0.0]);
    let field = MotionField::zero(2, 2);

    for &t in &[0.1f32, 0.5, 0.9] {
        let out = interpolate_pixel(&previous, &current, &field, 8, 8, t);
        assert_eq!(out[3], 1.0);
    }
}

#[test]
fn halfway_phase_places_features_between_endpoints() {
    // A vertical edge 8 px further right in the current frame, with the
    // matching motion field (current leads previous by +8 px, stored as
    // -8 * 16 like the search stage emits).
    let edge_prev = 24u32;
    let edge_curr = 32u32;
    let column = |edge: u32| {
        move |x: u32, _y: u32| {
            if x < edge {
                [1.0, 1.0, 1.0, 1.0]
            } else {
                [0.0, 0.0, 0.0, 1.0]
            }
        }
    };
    let previous = Rgba::new(64, 64, column(edge_prev));
    let current = Rgba::new(64, 64, column(edge_curr));
    let field = MotionField::uniform(8, 8, [-8 * 16, 0]);

    let out_row: Vec<f32> = (0..64)
        .map(|x| interpolate_pixel(&previous, &current, &field, x, 32, 0.5)[0])
        .collect();

    // The blended edge midpoint sits halfway between the two edges.
    let expected_edge = (edge_prev + edge_curr) / 2;
    for (x, value) in out_row.iter().enumerate() {
        let x = x as u32;
        if x + 3 < expected_edge {
            assert!(*value > 0.9, "x={x} should be inside the bright region");
        }
        if x > expected_edge + 2 {
            assert!(*value < 0.1, "x={x} should be inside the dark region");
        }
    }
}
