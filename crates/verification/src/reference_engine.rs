//! CPU reference engine for summed-area-table pipeline plans
//!
//! Interprets the same [`SatPipeline`] plans the wgpu executor binds, with
//! each technique mirroring its shader texel for texel. The sweep techniques
//! derive their sample indices from the pass's `addr_offset`/`scale`/`length`
//! parameters exactly as the fragment shaders do, so a numeric test through
//! this engine validates the builder's addressing parameters rather than a
//! re-derivation of them.

use sat_wgpu::{Axis, BufferOrigin, BufferUsage, PassNode, PixelFormat, RenderCaps, SatPipeline, TechniqueKind};
use thiserror::Error;

/// A CPU-side four-channel float image
#[derive(Debug, Clone, PartialEq)]
pub struct Image4f {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl Image4f {
    /// An image of zeros
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![[0.0; 4]; (width * height) as usize],
        }
    }

    /// An image filled from a per-texel function
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [f32; 4]) -> Self {
        let mut image = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set_texel(x, y, f(x, y));
            }
        }
        image
    }

    /// An image with every channel of every texel set to `value`
    pub fn constant(width: u32, height: u32, value: f32) -> Self {
        Self::from_fn(width, height, |_, _| [value; 4])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw texel storage, row-major
    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        self.texels[(y * self.width + x) as usize]
    }

    pub fn set_texel(&mut self, x: u32, y: u32, value: [f32; 4]) {
        self.texels[(y * self.width + x) as usize] = value;
    }

    /// Length along `axis`
    fn length(&self, axis: Axis) -> u32 {
        axis.pick(self.width, self.height)
    }

    /// Texel at position `along` on `axis`, line `cross` on the other
    fn axis_texel(&self, axis: Axis, along: u32, cross: u32) -> [f32; 4] {
        match axis {
            Axis::X => self.texel(along, cross),
            Axis::Y => self.texel(cross, along),
        }
    }

    fn set_axis_texel(&mut self, axis: Axis, along: u32, cross: u32, value: [f32; 4]) {
        match axis {
            Axis::X => self.set_texel(along, cross, value),
            Axis::Y => self.set_texel(cross, along, value),
        }
    }
}

fn add(a: &mut [f32; 4], b: [f32; 4]) {
    for channel in 0..4 {
        a[channel] += b[channel];
    }
}

/// Capability stub that accepts every format, for plans interpreted on the CPU
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCaps;

impl RenderCaps for CpuCaps {
    fn supports_format(&self, _format: PixelFormat, _usage: BufferUsage) -> bool {
        true
    }
}

/// Defects the engine can detect in a plan it is asked to interpret
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source image does not match the plan's dimensions
    #[error("source is {got_width}x{got_height} but the plan was built for {width}x{height}")]
    SourceMismatch { width: u32, height: u32, got_width: u32, got_height: u32 },

    /// A pass lacks a binding its technique requires
    #[error("pass '{label}' is missing binding '{name}'")]
    MissingBinding { label: String, name: &'static str },

    /// A pass lacks a parameter its technique requires
    #[error("pass '{label}' is missing parameter '{name}'")]
    MissingParam { label: String, name: &'static str },
}

/// Runs a plan over a source image and returns the finished table
///
/// Buffers are materialized exactly as the arena describes them, including
/// the borrowed source slot, so in-place plans (the block strategy's deep
/// pyramids) behave as they would on the GPU.
pub fn execute_plan(plan: &SatPipeline, source: &Image4f) -> Result<Image4f, EngineError> {
    if (source.width(), source.height()) != (plan.width, plan.height) {
        return Err(EngineError::SourceMismatch {
            width: plan.width,
            height: plan.height,
            got_width: source.width(),
            got_height: source.height(),
        });
    }

    let mut buffers: Vec<Image4f> = plan
        .buffers
        .iter()
        .map(|desc| match desc.origin {
            BufferOrigin::Borrowed => source.clone(),
            BufferOrigin::Owned => Image4f::new(desc.width, desc.height),
        })
        .collect();

    for pass in &plan.passes {
        run_pass(plan, pass, &mut buffers)?;
    }

    Ok(buffers[plan.output.index()].clone())
}

fn input_image(pass: &PassNode, buffers: &[Image4f], name: &'static str) -> Result<Image4f, EngineError> {
    let id = pass.input(name).ok_or(EngineError::MissingBinding { label: pass.label.clone(), name })?;
    Ok(buffers[id.index()].clone())
}

fn output_index(pass: &PassNode, name: &'static str) -> Result<usize, EngineError> {
    pass.output(name)
        .map(|id| id.index())
        .ok_or(EngineError::MissingBinding { label: pass.label.clone(), name })
}

/// The sweep uniforms, pulled from a pass's named parameters
struct SweepParams {
    length: i32,
    addr_offset: [f32; 3],
    scale: f32,
}

impl SweepParams {
    fn from_pass(pass: &PassNode) -> Result<Self, EngineError> {
        let missing = |name: &'static str| EngineError::MissingParam { label: pass.label.clone(), name };
        Ok(Self {
            length: pass.param_int("length").ok_or_else(|| missing("length"))?,
            addr_offset: pass.param_float3("addr_offset").ok_or_else(|| missing("addr_offset"))?,
            scale: pass.param_float("scale").ok_or_else(|| missing("scale"))?,
        })
    }
}

fn run_pass(plan: &SatPipeline, pass: &PassNode, buffers: &mut [Image4f]) -> Result<(), EngineError> {
    let axis = pass.technique.axis;
    match pass.technique.kind {
        TechniqueKind::UpSweep => {
            let src = input_image(pass, buffers, "src_tex")?;
            let out = output_index(pass, "output")?;
            let params = SweepParams::from_pass(pass)?;
            let result = up_sweep(&src, axis, &buffers[out], &params);
            buffers[out] = result;
        }
        TechniqueKind::DownSweep => {
            let parent = input_image(pass, buffers, "src_tex")?;
            let child = input_image(pass, buffers, "child_tex")?;
            let out = output_index(pass, "output")?;
            let params = SweepParams::from_pass(pass)?;
            let result = down_sweep(&parent, &child, axis, plan.group_size, &params);
            buffers[out] = result;
        }
        TechniqueKind::InBlockScan => {
            let input = input_image(pass, buffers, "in_tex")?;
            let out = output_index(pass, "out_tex")?;
            let out_sum = output_index(pass, "out_sum_tex")?;
            let (scanned, totals) = in_block_scan(&input, axis, plan.group_size, &buffers[out_sum]);
            buffers[out] = scanned;
            buffers[out_sum] = totals;
        }
        TechniqueKind::AddSum => {
            let input = input_image(pass, buffers, "in_tex")?;
            let carry = input_image(pass, buffers, "in_sum_tex")?;
            let out = output_index(pass, "out_tex")?;
            let result = add_sum(&input, &carry, axis, plan.group_size);
            buffers[out] = result;
        }
    }
    Ok(())
}

/// Mirror of the shader's masked axis load: the texel whose center lies at
/// normalized coordinate `coord`, zero outside `[0, length)`
fn load_masked(image: &Image4f, axis: Axis, coord: f32, cross: u32, length: i32) -> [f32; 4] {
    let index = (coord * image.length(axis) as f32).floor() as i64;
    if index < 0 || index >= i64::from(length) {
        return [0.0; 4];
    }
    image.axis_texel(axis, index as u32, cross)
}

/// One level of the four-way reduction; `shape` supplies the output
/// dimensions the draw pass would render into
fn up_sweep(src: &Image4f, axis: Axis, shape: &Image4f, params: &SweepParams) -> Image4f {
    let out_len = shape.length(axis);
    let cross_len = match axis {
        Axis::X => shape.height(),
        Axis::Y => shape.width(),
    };

    let mut out = Image4f::new(shape.width(), shape.height());
    for cross in 0..cross_len {
        for j in 0..out_len {
            let c = (j as f32 + 0.5) / out_len as f32 * params.scale;
            let taps = [-params.addr_offset[1], -params.addr_offset[0], params.addr_offset[0], params.addr_offset[1]];
            let mut sum = [0.0; 4];
            for tap in taps {
                add(&mut sum, load_masked(src, axis, c + tap, cross, params.length));
            }
            out.set_axis_texel(axis, j, cross, sum);
        }
    }
    out
}

/// One level of the distribution phase: parent prefix plus the partial sums
/// inside the output texel's own `group`-wide block
fn down_sweep(parent: &Image4f, child: &Image4f, axis: Axis, group: u32, params: &SweepParams) -> Image4f {
    let child_len = child.length(axis);
    let cross_len = match axis {
        Axis::X => child.height(),
        Axis::Y => child.width(),
    };
    let group = i64::from(group);

    let mut out = Image4f::new(child.width(), child.height());
    for cross in 0..cross_len {
        for j in 0..child_len {
            let uv = (j as f32 + 0.5) / child_len as f32;
            let mut sum = [0.0; 4];

            let pc = uv * params.scale - params.addr_offset[0];
            if pc > 0.0 {
                let p = (pc * parent.length(axis) as f32) as u32;
                add(&mut sum, parent.axis_texel(axis, p, cross));
            }

            let offsets = [0.0, params.addr_offset[1], params.addr_offset[2], params.addr_offset[1] + params.addr_offset[2]];
            for offset in offsets {
                let index = ((uv - offset) * child_len as f32).floor() as i64;
                if index >= 0 && index < i64::from(params.length) && index / group == i64::from(j) / group {
                    add(&mut sum, child.axis_texel(axis, index as u32, cross));
                }
            }

            out.set_axis_texel(axis, j, cross, sum);
        }
    }
    out
}

/// Tile-local inclusive scan; returns the scanned image and the tile totals,
/// shaped like the plan's tile-total buffer
fn in_block_scan(input: &Image4f, axis: Axis, tile: u32, totals_shape: &Image4f) -> (Image4f, Image4f) {
    let len = input.length(axis);
    let cross_len = match axis {
        Axis::X => input.height(),
        Axis::Y => input.width(),
    };
    let tiles = len.div_ceil(tile);

    let mut scanned = Image4f::new(input.width(), input.height());
    let mut totals = Image4f::new(totals_shape.width(), totals_shape.height());
    for cross in 0..cross_len {
        for t in 0..tiles {
            let mut running = [0.0; 4];
            for lane in 0..tile {
                let index = t * tile + lane;
                if index < len {
                    add(&mut running, input.axis_texel(axis, index, cross));
                    scanned.set_axis_texel(axis, index, cross, running);
                }
            }
            totals.set_axis_texel(axis, t, cross, running);
        }
    }
    (scanned, totals)
}

/// Carry addition: element j in tile t receives the coarser level's value
/// for tile t-1
fn add_sum(input: &Image4f, carry: &Image4f, axis: Axis, tile: u32) -> Image4f {
    let len = input.length(axis);
    let cross_len = match axis {
        Axis::X => input.height(),
        Axis::Y => input.width(),
    };

    let mut out = Image4f::new(input.width(), input.height());
    for cross in 0..cross_len {
        for j in 0..len {
            let mut value = input.axis_texel(axis, j, cross);
            let t = j / tile;
            if t > 0 {
                add(&mut value, carry.axis_texel(axis, t - 1, cross));
            }
            out.set_axis_texel(axis, j, cross, value);
        }
    }
    out
}

/// Brute-force summed-area table, accumulated in f64, as ground truth
pub fn reference_sat(source: &Image4f) -> Image4f {
    let (width, height) = (source.width(), source.height());
    let mut sums = vec![[0.0f64; 4]; (width * height) as usize];

    for y in 0..height {
        for x in 0..width {
            let texel = source.texel(x, y);
            let mut value = [0.0f64; 4];
            for channel in 0..4 {
                value[channel] = f64::from(texel[channel]);
            }
            if x > 0 {
                let left = sums[(y * width + x - 1) as usize];
                for channel in 0..4 {
                    value[channel] += left[channel];
                }
            }
            if y > 0 {
                let above = sums[((y - 1) * width + x) as usize];
                for channel in 0..4 {
                    value[channel] += above[channel];
                }
            }
            if x > 0 && y > 0 {
                let diagonal = sums[((y - 1) * width + x - 1) as usize];
                for channel in 0..4 {
                    value[channel] -= diagonal[channel];
                }
            }
            sums[(y * width + x) as usize] = value;
        }
    }

    Image4f::from_fn(width, height, |x, y| {
        let value = sums[(y * width + x) as usize];
        [value[0] as f32, value[1] as f32, value[2] as f32, value[3] as f32]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_images;
    use sat_wgpu::{BlockPyramidBuilder, SatPipeline, ScanStrategy, SeparablePyramidBuilder};

    const STRATEGIES: [ScanStrategy; 2] = [ScanStrategy::SeparableSweep, ScanStrategy::BlockScan];

    /// Deterministic pseudo-random image so failures reproduce exactly
    fn noise_image(width: u32, height: u32, seed: u64) -> Image4f {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 24) as f32
        };
        Image4f::from_fn(width, height, |_, _| [next(), next(), next(), next()])
    }

    fn run(strategy: ScanStrategy, source: &Image4f) -> Image4f {
        let plan = SatPipeline::build(&CpuCaps, source.width(), source.height(), strategy).unwrap();
        execute_plan(&plan, source).unwrap()
    }

    fn assert_matches(expected: &Image4f, actual: &Image4f, tolerance: f32, context: &str) {
        let result = compare_images(expected, actual, tolerance);
        assert!(result.is_match(), "{context}: {result:?}");
    }

    /// A constant-1 8x8 image sums to (x+1)*(y+1) at every pixel, for both
    /// strategies; the values are small integers, so the match is exact
    #[test]
    fn test_constant_image_closed_form() {
        let source = Image4f::constant(8, 8, 1.0);
        let expected = Image4f::from_fn(8, 8, |x, y| [((x + 1) * (y + 1)) as f32; 4]);
        for strategy in STRATEGIES {
            assert_matches(&expected, &run(strategy, &source), 0.0, &format!("{strategy:?}"));
        }
    }

    /// Random images match the f64 brute-force table on awkward sizes,
    /// including single-row, single-column, and deep-pyramid shapes
    #[test]
    fn test_random_images_match_brute_force() {
        for (width, height) in [(7, 5), (13, 9), (64, 64), (257, 3), (3, 257), (1, 17), (17, 1), (300, 2)] {
            let source = noise_image(width, height, u64::from(width) * 31 + u64::from(height));
            let expected = reference_sat(&source);
            // Sums stay below ~20k here; 1e-2 absolutely dominates the f32
            // association error while still catching any indexing mistake.
            for strategy in STRATEGIES {
                assert_matches(&expected, &run(strategy, &source), 1e-2, &format!("{strategy:?} {width}x{height}"));
            }
        }
    }

    /// Both strategies agree with each other within floating-point precision
    #[test]
    fn test_strategies_agree() {
        let source = noise_image(129, 66, 7);
        let sweep = run(ScanStrategy::SeparableSweep, &source);
        let block = run(ScanStrategy::BlockScan, &source);
        assert_matches(&sweep, &block, 1e-2, "sweep vs block");
    }

    /// A 1x1 input produces zero passes and an output equal to the input
    #[test]
    fn test_degenerate_1x1() {
        let source = Image4f::from_fn(1, 1, |_, _| [3.5, -1.0, 0.25, 2.0]);
        for strategy in STRATEGIES {
            let plan = SatPipeline::build(&CpuCaps, 1, 1, strategy).unwrap();
            assert!(plan.passes.is_empty());
            let output = execute_plan(&plan, &source).unwrap();
            assert_eq!(output, source);
        }
    }

    /// Small tile widths force deep carry chains; four or more levels only
    /// come out right if every add-sum pass reads the completed coarser scan
    #[test]
    fn test_deep_carry_chains_with_small_tiles() {
        for tile in [2, 3, 4] {
            for (width, height) in [(100, 1), (1, 100), (37, 29), (81, 16)] {
                let builder = BlockPyramidBuilder::with_tile_size(tile);
                let plan = builder.build(&CpuCaps, width, height).unwrap();
                let source = noise_image(width, height, u64::from(tile) * 1000 + u64::from(width));
                let expected = reference_sat(&source);
                let actual = execute_plan(&plan, &source).unwrap();
                assert_matches(&expected, &actual, 1e-2, &format!("tile {tile}, {width}x{height}"));
            }
        }
    }

    /// The sweep strategy handles multi-level pyramids on lengths that are
    /// not powers of four
    #[test]
    fn test_sweep_non_power_of_four() {
        for (width, height) in [(5, 1), (6, 1), (123, 1), (1, 123), (255, 7)] {
            let plan = SeparablePyramidBuilder::new().build(&CpuCaps, width, height).unwrap();
            let source = noise_image(width, height, u64::from(width) ^ 0xBEEF);
            let expected = reference_sat(&source);
            let actual = execute_plan(&plan, &source).unwrap();
            assert_matches(&expected, &actual, 1e-2, &format!("sweep {width}x{height}"));
        }
    }

    /// In-place block plans leave the table in the source slot and still
    /// compute it correctly
    #[test]
    fn test_block_in_place_result() {
        // Tile 4 over 70 texels: levels 70 -> 18 -> 5 -> 2 -> 1, so the X
        // carry resolves back into the borrowed source slot.
        let plan = BlockPyramidBuilder::with_tile_size(4).build(&CpuCaps, 70, 1).unwrap();
        assert_eq!(plan.output, plan.input);

        let source = noise_image(70, 1, 42);
        let expected = reference_sat(&source);
        let actual = execute_plan(&plan, &source).unwrap();
        assert_matches(&expected, &actual, 1e-3, "in-place block plan");
    }

    /// The engine rejects a source that does not match the plan
    #[test]
    fn test_source_mismatch_rejected() {
        let plan = SatPipeline::build(&CpuCaps, 8, 8, ScanStrategy::SeparableSweep).unwrap();
        let source = Image4f::constant(9, 8, 1.0);
        match execute_plan(&plan, &source) {
            Err(EngineError::SourceMismatch { width: 8, height: 8, got_width: 9, got_height: 8 }) => {}
            other => panic!("expected SourceMismatch, got {other:?}"),
        }
    }

    /// Monotonicity sanity: a nonnegative image's table is nondecreasing
    /// along both axes
    #[test]
    fn test_table_is_monotone() {
        let source = noise_image(33, 21, 5);
        for strategy in STRATEGIES {
            let table = run(strategy, &source);
            for y in 0..21 {
                for x in 1..33 {
                    for channel in 0..4 {
                        assert!(table.texel(x, y)[channel] >= table.texel(x - 1, y)[channel] - 1e-3);
                    }
                }
            }
            for y in 1..21 {
                for x in 0..33 {
                    for channel in 0..4 {
                        assert!(table.texel(x, y)[channel] >= table.texel(x, y - 1)[channel] - 1e-3);
                    }
                }
            }
        }
    }
}
