//! Separable up-sweep/down-sweep pipeline builder (draw passes)
//!
//! One axis is scanned by first reducing it through a four-way pyramid
//! (each up-sweep texel aggregates four finer texels) and then walking the
//! pyramid back down, redistributing every coarse partial sum over the four
//! texels it summarizes. After the down phase the finest level holds the
//! inclusive prefix sum of the axis. Running the X pyramid and then the Y
//! pyramid over its result yields the full summed-area table, because the 2D
//! prefix sum separates into two 1D prefix sums.

use crate::error::SatError;
use crate::levels::{Axis, LevelPyramid};
use crate::pass::{ParamValue, PassBinding, PassKind, PassNode, PassParam, TechniqueId, TechniqueKind};
use crate::pipeline::{select_format, BufferArena, BufferId, BufferUsage, RenderCaps, SatPipeline, ScanStrategy};

/// Reduction factor of the four-tap sweep techniques
///
/// The tap count is baked into the up-sweep/down-sweep shader arithmetic, so
/// unlike the block strategy's tile width this constant is not tunable.
pub const SWEEP_REDUCTION: u32 = 4;

/// Builds the pixel-shader summed-area-table pipeline
#[derive(Debug, Default)]
pub struct SeparablePyramidBuilder;

impl SeparablePyramidBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Assembles the full X-then-Y sweep pipeline for a source image
    ///
    /// # Arguments
    /// * `caps` - Backend capability query for format selection
    /// * `width`, `height` - Source dimensions; zero fails construction
    pub fn build(&self, caps: &impl RenderCaps, width: u32, height: u32) -> Result<SatPipeline, SatError> {
        if width == 0 || height == 0 {
            return Err(SatError::InvalidInputDimensions { width, height });
        }
        let format = select_format(caps, BufferUsage::SWEEP)?;

        let mut arena = BufferArena::new();
        let mut passes = Vec::new();
        let source = arena.push_borrowed(width, height, BufferUsage::SWEEP);

        let x_result = build_axis(&mut arena, &mut passes, Axis::X, source, width, height);
        let output = build_axis(&mut arena, &mut passes, Axis::Y, x_result, width, height);

        Ok(SatPipeline {
            strategy: ScanStrategy::SeparableSweep,
            group_size: SWEEP_REDUCTION,
            format,
            width,
            height,
            buffers: arena.into_inner(),
            passes,
            input: source,
            output,
        })
    }
}

/// Appends one axis's up and down phases and returns the buffer holding the
/// axis's prefix-summed result
fn build_axis(arena: &mut BufferArena, passes: &mut Vec<PassNode>, axis: Axis, input: BufferId, width: u32, height: u32) -> BufferId {
    let pyramid = LevelPyramid::build(axis.pick(width, height), SWEEP_REDUCTION);
    let levels = pyramid.level_count();
    if levels == 1 {
        // A one-texel axis is already its own prefix sum.
        return input;
    }

    let level_dims = |length: u32| match axis {
        Axis::X => (length, height),
        Axis::Y => (width, length),
    };

    // Up pyramid: level 0 is the axis input, the rest are freshly allocated.
    let mut up = Vec::with_capacity(levels);
    up.push(input);
    for level in 1..levels {
        let (w, h) = level_dims(pyramid.length(level));
        up.push(arena.push_owned(w, h, BufferUsage::SWEEP));
    }

    // Down pyramid: widths mirror the up pyramid back toward the source
    // length. Level 0 is the up pyramid's apex, reused by id.
    let mut down = Vec::with_capacity(levels);
    down.push(up[levels - 1]);
    for level in 1..levels {
        let (w, h) = level_dims(pyramid.length(levels - 1 - level));
        down.push(arena.push_owned(w, h, BufferUsage::SWEEP));
    }

    for level in 0..levels - 1 {
        let child_length = pyramid.length(level);
        let parent_length = pyramid.length(level + 1);
        let child = child_length as f32;
        passes.push(PassNode {
            label: format!("sat {axis} up-sweep {level}"),
            technique: TechniqueId::new(TechniqueKind::UpSweep, axis),
            kind: PassKind::Draw,
            inputs: vec![PassBinding { name: "src_tex", buffer: up[level] }],
            outputs: vec![PassBinding { name: "output", buffer: up[level + 1] }],
            params: vec![
                PassParam { name: "length", value: ParamValue::Int(child_length as i32) },
                PassParam { name: "addr_offset", value: ParamValue::Float3([0.5 / child, 1.5 / child, 0.0]) },
                PassParam { name: "scale", value: ParamValue::Float(parent_length as f32 * 4.0 / child) },
            ],
        });
    }

    for step in 0..levels - 1 {
        let parent_length = pyramid.length(levels - 1 - step);
        let child_length = pyramid.length(levels - 2 - step);
        let parent = parent_length as f32;
        let child = child_length as f32;
        passes.push(PassNode {
            label: format!("sat {axis} down-sweep {step}"),
            technique: TechniqueId::new(TechniqueKind::DownSweep, axis),
            kind: PassKind::Draw,
            inputs: vec![
                PassBinding { name: "src_tex", buffer: down[step] },
                // The matching up-sweep buffer, consumed in LIFO order: it
                // supplies the four partial sums each coarse texel covers.
                PassBinding { name: "child_tex", buffer: up[levels - 2 - step] },
            ],
            outputs: vec![PassBinding { name: "output", buffer: down[step + 1] }],
            params: vec![
                PassParam { name: "length", value: ParamValue::Int(child_length as i32) },
                PassParam { name: "addr_offset", value: ParamValue::Float3([1.0 / parent, 1.0 / child, 2.0 / child]) },
                PassParam { name: "scale", value: ParamValue::Float(child / (parent * 4.0)) },
            ],
        });
    }

    down[levels - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StubCaps;
    use crate::pipeline::BufferOrigin;

    fn build(width: u32, height: u32) -> SatPipeline {
        SeparablePyramidBuilder::new().build(&StubCaps::all(), width, height).unwrap()
    }

    /// Pass count is `2 * (levels_x - 1) + 2 * (levels_y - 1)`
    #[test]
    fn test_pass_count() {
        for (width, height) in [(1, 1), (1, 16), (16, 1), (8, 8), (7, 5), (640, 480), (257, 3)] {
            let plan = build(width, height);
            let levels_x = LevelPyramid::build(width, SWEEP_REDUCTION).level_count();
            let levels_y = LevelPyramid::build(height, SWEEP_REDUCTION).level_count();
            let expected = 2 * (levels_x - 1) + 2 * (levels_y - 1);
            assert_eq!(plan.passes.len(), expected, "{width}x{height}");
            assert_eq!(plan.draw_count(), expected, "sweep plans are draw-only");
        }
    }

    /// Exact per-level parameters for an 8-wide single-row image
    /// (levels 8 -> 2 -> 1)
    #[test]
    fn test_known_parameters_8x1() {
        let plan = build(8, 1);
        assert_eq!(plan.passes.len(), 4);

        let up0 = &plan.passes[0];
        assert_eq!(up0.technique, TechniqueId::new(TechniqueKind::UpSweep, Axis::X));
        assert_eq!(up0.param_int("length"), Some(8));
        assert_eq!(up0.param_float3("addr_offset"), Some([0.0625, 0.1875, 0.0]));
        assert_eq!(up0.param_float("scale"), Some(1.0));

        let up1 = &plan.passes[1];
        assert_eq!(up1.param_int("length"), Some(2));
        assert_eq!(up1.param_float3("addr_offset"), Some([0.25, 0.75, 0.0]));
        assert_eq!(up1.param_float("scale"), Some(2.0));

        let down0 = &plan.passes[2];
        assert_eq!(down0.technique, TechniqueId::new(TechniqueKind::DownSweep, Axis::X));
        assert_eq!(down0.param_int("length"), Some(2));
        assert_eq!(down0.param_float3("addr_offset"), Some([1.0, 0.5, 1.0]));
        assert_eq!(down0.param_float("scale"), Some(0.5));

        let down1 = &plan.passes[3];
        assert_eq!(down1.param_int("length"), Some(8));
        assert_eq!(down1.param_float3("addr_offset"), Some([0.5, 0.125, 0.25]));
        assert_eq!(down1.param_float("scale"), Some(1.0));
    }

    /// Level-0 aliasing and LIFO child selection are expressed through
    /// shared buffer ids
    #[test]
    fn test_aliasing_structure() {
        let plan = build(8, 1);

        // Up chain reads the source slot first.
        assert_eq!(plan.passes[0].input("src_tex"), Some(plan.input));
        let apex = plan.passes[1].output("output").unwrap();

        // The down pyramid starts at the up pyramid's apex.
        assert_eq!(plan.passes[2].input("src_tex"), Some(apex));

        // Children are consumed in LIFO order relative to the up sweep: the
        // first down step reads the last up-sweep input, the final down step
        // reads the source itself.
        assert_eq!(plan.passes[2].input("child_tex"), plan.passes[1].input("src_tex"));
        assert_eq!(plan.passes[3].input("child_tex"), Some(plan.input));

        // The final down buffer is the pipeline output, back at source size.
        assert_eq!(plan.passes[3].output("output"), Some(plan.output));
        let output_desc = plan.buffers[plan.output.index()];
        assert_eq!((output_desc.width, output_desc.height), (8, 1));
        assert_eq!(output_desc.origin, BufferOrigin::Owned);
    }

    /// The Y pyramid chains from the X pyramid's final buffer, not from the
    /// original source
    #[test]
    fn test_y_axis_chains_from_x_result() {
        let plan = build(8, 8);
        // 8x8: four X passes then four Y passes.
        assert_eq!(plan.passes.len(), 8);
        let x_result = plan.passes[3].output("output").unwrap();
        assert_eq!(plan.passes[4].input("src_tex"), Some(x_result));
        assert_eq!(plan.passes[4].technique, TechniqueId::new(TechniqueKind::UpSweep, Axis::Y));
        assert_ne!(x_result, plan.input);
    }

    /// A one-texel axis contributes no passes; the other axis still runs
    #[test]
    fn test_single_texel_axis_is_skipped() {
        let plan = build(1, 16);
        assert!(plan.passes.iter().all(|pass| pass.technique.axis == Axis::Y));
        assert_eq!(plan.passes.len(), 4);

        let plan = build(16, 1);
        assert!(plan.passes.iter().all(|pass| pass.technique.axis == Axis::X));
        assert_eq!(plan.passes.len(), 4);
    }

    /// Intermediate buffer dimensions follow the level sequence on both axes
    #[test]
    fn test_buffer_dimensions() {
        let plan = build(257, 3);
        for pass in &plan.passes {
            for binding in pass.inputs.iter().chain(pass.outputs.iter()) {
                let desc = plan.buffers[binding.buffer.index()];
                match pass.technique.axis {
                    Axis::X => assert_eq!(desc.height, 3, "X-phase buffers keep the source height"),
                    Axis::Y => assert_eq!(desc.width, 257, "Y-phase buffers keep the source width"),
                }
            }
        }
    }
}
