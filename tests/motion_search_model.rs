//! Reference model of the block-matching motion search.
//!
//! Mirrors the compute kernel step for step (clamped luminance loads,
//! rejection of candidates leaving the image or the search range, the
//! zero-displacement reference candidate, the three-step descent, and the
//! one-pixel refinement) so the search semantics can be pinned down without
//! a GPU. The scenarios below are the observable contract of the stage.

const BLOCK: i32 = 8;
const SCALE: i32 = 16;

#[derive(Clone)]
struct Luma {
    width: i32,
    height: i32,
    samples: Vec<f32>,
}

impl Luma {
    fn new(width: i32, height: i32, f: impl Fn(i32, i32) -> f32) -> Self {
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            samples,
        }
    }

    fn get_clamped(&self, x: i32, y: i32) -> f32 {
        let x = x.clamp(0, self.width - 1);
        let y = y.clamp(0, self.height - 1);
        self.samples[(y * self.width + x) as usize]
    }
}

fn block_inside(image: &Luma, left: i32, top: i32) -> bool {
    left >= 0 && top >= 0 && left + BLOCK <= image.width && top + BLOCK <= image.height
}

fn block_sad(current: &Luma, previous: &Luma, block: (i32, i32), offset: (i32, i32)) -> f32 {
    let mut sad = 0.0;
    for y in 0..BLOCK {
        for x in 0..BLOCK {
            let cur = current.get_clamped(block.0 + x, block.1 + y);
            let prev = previous.get_clamped(block.0 + offset.0 + x, block.1 + offset.1 + y);
            sad += (cur - prev).abs();
        }
    }
    sad
}

/// The full search for one block, in scaled (x16) units.
fn search_block(current: &Luma, previous: &Luma, block: (i32, i32), radius: i32) -> (i32, i32) {
    let in_range = |c: (i32, i32)| c.0.abs() <= radius && c.1.abs() <= radius;
    let valid = |c: (i32, i32)| {
        in_range(c) && block_inside(previous, block.0 + c.0, block.1 + c.1)
    };

    let mut best = (0, 0);
    let mut best_sad = f32::INFINITY;
    if valid((0, 0)) {
        best_sad = block_sad(current, previous, block, (0, 0));
    }

    let mut center = (0, 0);
    let mut step = (radius / 2).max(1);
    while step >= 1 {
        let mut step_best = center;
        let mut step_best_sad = f32::INFINITY;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let candidate = (center.0 + dx * step, center.1 + dy * step);
                if !valid(candidate) {
                    continue;
                }
                let sad = block_sad(current, previous, block, candidate);
                if sad < step_best_sad {
                    step_best_sad = sad;
                    step_best = candidate;
                }
                if sad < best_sad {
                    best_sad = sad;
                    best = candidate;
                }
            }
        }
        center = step_best;
        step /= 2;
    }

    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let candidate = (center.0 + dx, center.1 + dy);
            if !valid(candidate) {
                continue;
            }
            let sad = block_sad(current, previous, block, candidate);
            if sad < best_sad {
                best_sad = sad;
                best = candidate;
            }
        }
    }

    (best.0 * SCALE, best.1 * SCALE)
}

fn motion_field(current: &Luma, previous: &Luma, radius: i32) -> Vec<Vec<(i32, i32)>> {
    let mv_w = (current.width + BLOCK - 1) / BLOCK;
    let mv_h = (current.height + BLOCK - 1) / BLOCK;
    (0..mv_h)
        .map(|by| {
            (0..mv_w)
                .map(|bx| search_block(current, previous, (bx * BLOCK, by * BLOCK), radius))
                .collect()
        })
        .collect()
}

/// Smooth test pattern; slow variation keeps the SAD landscape unimodal
/// over the search range, which is the regime a three-step search expects.
fn smooth_pattern(x: i32, y: i32) -> f32 {
    0.5 + 0.25 * (x as f32 * 0.37).sin() + 0.25 * (y as f32 * 0.23).cos()
}

#[test]
fn uniform_frames_report_zero_motion() {
    let gray = Luma::new(256, 256, |_, _| 128.0 / 255.0);
    let field = motion_field(&gray, &gray, 12);
    for row in &field {
        for &mv in row {
            assert_eq!(mv, (0, 0));
        }
    }
}

#[test]
fn identical_textured_frames_report_zero_motion() {
    let frame = Luma::new(128, 128, smooth_pattern);
    let field = motion_field(&frame, &frame, 12);
    for row in &field {
        for &mv in row {
            assert_eq!(mv, (0, 0));
        }
    }
}

#[test]
fn horizontal_shift_is_recovered_over_the_shifted_region() {
    // Current is the previous image moved 8 px right; the revealed left
    // strip is background.
    let previous = Luma::new(256, 256, smooth_pattern);
    let current = Luma::new(256, 256, |x, y| {
        if x < 8 {
            0.0
        } else {
            smooth_pattern(x - 8, y)
        }
    });

    let field = motion_field(&current, &previous, 12);
    for by in 0..32 {
        for bx in 1..31 {
            assert_eq!(
                field[by][bx],
                (-8 * SCALE, 0),
                "block ({bx}, {by}) missed the shift"
            );
        }
    }
}

#[test]
fn zero_radius_collapses_to_zero_motion() {
    let previous = Luma::new(128, 128, smooth_pattern);
    let current = Luma::new(128, 128, |x, y| smooth_pattern(x - 5, y));

    let field = motion_field(&current, &previous, 0);
    for row in &field {
        for &mv in row {
            assert_eq!(mv, (0, 0));
        }
    }
}

#[test]
fn non_divisible_dimensions_size_the_field_by_ceiling() {
    let image = Luma::new(60, 52, smooth_pattern);
    let field = motion_field(&image, &image, 4);
    assert_eq!(field.len(), 7); // ceil(52 / 8)
    assert_eq!(field[0].len(), 8); // ceil(60 / 8)

    // Clipped blocks have every candidate rejected and stay at zero.
    assert_eq!(field[6][7], (0, 0));
}

#[test]
fn candidates_never_leave_the_search_range() {
    // A diagonal shift larger than the radius: the best reachable match is
    // bounded by the range, never beyond it.
    let previous = Luma::new(128, 128, smooth_pattern);
    let current = Luma::new(128, 128, |x, y| smooth_pattern(x - 20, y - 20));

    let radius = 6;
    let field = motion_field(&current, &previous, radius);
    for row in &field {
        for &(mx, my) in row {
            assert!(mx.abs() <= radius * SCALE);
            assert!(my.abs() <= radius * SCALE);
        }
    }
}

#[test]
fn flat_ties_keep_the_zero_candidate() {
    // Two constant frames at different levels: every offset has the same
    // SAD, so the zero-displacement reference must win throughout.
    let previous = Luma::new(64, 64, |_, _| 0.25);
    let current = Luma::new(64, 64, |_, _| 0.75);

    let field = motion_field(&current, &previous, 8);
    for row in &field {
        for &mv in row {
            assert_eq!(mv, (0, 0));
        }
    }
}
