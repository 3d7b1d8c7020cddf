//! Block-scan pipeline builder with carry propagation (dispatch passes)
//!
//! The compute strategy scans each axis in fixed-width tiles: every tile is
//! prefix-summed locally in one dispatch while its total is emitted to the
//! next coarser level, and once the coarsest level is fully scanned the
//! carries flow back down, each level adding its preceding-tile prefix into
//! every element of the finer level. This is the carry-lookahead form of the
//! work-efficient scan, mapped onto a texture hierarchy.

use crate::error::SatError;
use crate::levels::{Axis, LevelPyramid};
use crate::pass::{PassBinding, PassKind, PassNode, TechniqueId, TechniqueKind};
use crate::pipeline::{select_format, BufferArena, BufferId, BufferUsage, RenderCaps, SatPipeline, ScanStrategy};

/// Tile width of the in-block-scan technique, one workgroup per tile
pub const BLOCK_SIZE: u32 = 256;

/// Builds the compute-shader summed-area-table pipeline
#[derive(Debug)]
pub struct BlockPyramidBuilder {
    tile_size: u32,
}

impl Default for BlockPyramidBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockPyramidBuilder {
    pub fn new() -> Self {
        Self { tile_size: BLOCK_SIZE }
    }

    /// Overrides the tile width
    ///
    /// The wgpu techniques are compiled for a [`BLOCK_SIZE`]-wide workgroup;
    /// other widths exist for reference-engine runs, where a small tile
    /// exercises deep carry chains on small inputs.
    pub fn with_tile_size(tile_size: u32) -> Self {
        debug_assert!(tile_size >= 2);
        Self { tile_size }
    }

    /// Assembles the full X-then-Y block-scan pipeline for a source image
    ///
    /// # Arguments
    /// * `caps` - Backend capability query for format selection
    /// * `width`, `height` - Source dimensions; zero fails construction
    pub fn build(&self, caps: &impl RenderCaps, width: u32, height: u32) -> Result<SatPipeline, SatError> {
        if width == 0 || height == 0 {
            return Err(SatError::InvalidInputDimensions { width, height });
        }
        let format = select_format(caps, BufferUsage::BLOCK)?;

        let mut arena = BufferArena::new();
        let mut passes = Vec::new();
        let source = arena.push_borrowed(width, height, BufferUsage::BLOCK);

        let x_result = self.build_axis(&mut arena, &mut passes, Axis::X, source, width, height);
        let output = self.build_axis(&mut arena, &mut passes, Axis::Y, x_result, width, height);

        Ok(SatPipeline {
            strategy: ScanStrategy::BlockScan,
            group_size: self.tile_size,
            format,
            width,
            height,
            buffers: arena.into_inner(),
            passes,
            input: source,
            output,
        })
    }

    /// Appends one axis's scan and carry phases and returns the buffer
    /// holding the axis's prefix-summed result
    fn build_axis(&self, arena: &mut BufferArena, passes: &mut Vec<PassNode>, axis: Axis, input: BufferId, width: u32, height: u32) -> BufferId {
        let pyramid = LevelPyramid::build(axis.pick(width, height), self.tile_size);
        let levels = pyramid.level_count();
        if levels == 1 {
            return input;
        }

        let level_dims = |length: u32| match axis {
            Axis::X => (length, height),
            Axis::Y => (width, length),
        };

        // U[i] holds per-tile totals of level i (U[0] is the axis input);
        // D[i] receives level i's in-tile scans.
        let mut up = Vec::with_capacity(levels);
        up.push(input);
        for level in 1..levels {
            let (w, h) = level_dims(pyramid.length(level));
            up.push(arena.push_owned(w, h, BufferUsage::BLOCK));
        }
        let mut down = Vec::with_capacity(levels - 1);
        for level in 0..levels - 1 {
            let (w, h) = level_dims(pyramid.length(level));
            down.push(arena.push_owned(w, h, BufferUsage::BLOCK));
        }

        for level in 0..levels - 1 {
            passes.push(PassNode {
                label: format!("sat {axis} in-block-scan {level}"),
                technique: TechniqueId::new(TechniqueKind::InBlockScan, axis),
                kind: PassKind::Dispatch { groups: self.dispatch_groups(axis, pyramid.length(level), width, height) },
                inputs: vec![PassBinding { name: "in_tex", buffer: up[level] }],
                outputs: vec![
                    PassBinding { name: "out_tex", buffer: down[level] },
                    PassBinding { name: "out_sum_tex", buffer: up[level + 1] },
                ],
                params: Vec::new(),
            });
        }

        // Carry resolution, coarsest level first. The completed scan of
        // level i lives in D[i] at the top of the chain (a single tile needs
        // no carry) and in U[i] below it, where the previous add-sum pass
        // just deposited it.
        for level in (1..levels - 1).rev() {
            let carry = if level == levels - 2 { down[level] } else { up[level] };
            passes.push(PassNode {
                label: format!("sat {axis} add-sum {level}"),
                technique: TechniqueId::new(TechniqueKind::AddSum, axis),
                kind: PassKind::Dispatch { groups: self.dispatch_groups(axis, pyramid.length(level - 1), width, height) },
                inputs: vec![
                    PassBinding { name: "in_tex", buffer: down[level - 1] },
                    PassBinding { name: "in_sum_tex", buffer: carry },
                ],
                outputs: vec![PassBinding { name: "out_tex", buffer: up[level - 1] }],
                params: Vec::new(),
            });
        }

        // With two levels the single tile scan is already complete and no
        // carry pass runs; otherwise the last add-sum landed in U[0].
        if levels == 2 { down[0] } else { up[0] }
    }

    /// Thread-group grid for a pass over a level of the given length: tiles
    /// along the active axis, one group per texel line across the other.
    fn dispatch_groups(&self, axis: Axis, active_length: u32, width: u32, height: u32) -> [u32; 3] {
        match axis {
            Axis::X => [active_length.div_ceil(self.tile_size), height, 1],
            Axis::Y => [width, active_length.div_ceil(self.tile_size), 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StubCaps;
    use crate::pipeline::BufferOrigin;

    fn build(width: u32, height: u32) -> SatPipeline {
        BlockPyramidBuilder::new().build(&StubCaps::all(), width, height).unwrap()
    }

    fn build_tiled(tile: u32, width: u32, height: u32) -> SatPipeline {
        BlockPyramidBuilder::with_tile_size(tile).build(&StubCaps::all(), width, height).unwrap()
    }

    /// Per axis with L levels: L-1 scan passes and L-2 add-sum passes (the
    /// coarsest scanned level needs no carry)
    #[test]
    fn test_pass_count() {
        for (width, height) in [(1, 1), (8, 8), (256, 256), (257, 2), (70_000, 1), (1000, 1000)] {
            let plan = build(width, height);
            let count = |n: u32| {
                let levels = LevelPyramid::build(n, BLOCK_SIZE).level_count();
                if levels == 1 { 0 } else { 2 * levels - 3 }
            };
            assert_eq!(plan.passes.len(), count(width) + count(height), "{width}x{height}");
            assert_eq!(plan.dispatch_count(), plan.passes.len(), "block plans are dispatch-only");
        }
    }

    /// Dispatch grids tile the active axis and span the other axis fully,
    /// computed from the finer level for add-sum passes
    #[test]
    fn test_dispatch_grids() {
        // 1000 wide: levels 1000 -> 4 -> 1.
        let plan = build(1000, 3);
        let groups: Vec<[u32; 3]> = plan
            .passes
            .iter()
            .map(|pass| match pass.kind {
                PassKind::Dispatch { groups } => groups,
                PassKind::Draw => panic!("block plans never draw"),
            })
            .collect();
        // Three X passes (scan, scan, add-sum), then the Y axis's single
        // scan spanning all 1000 columns.
        assert_eq!(groups, vec![[4, 3, 1], [1, 3, 1], [4, 3, 1], [1000, 1, 1]]);

        // Y axis: the roles of the grid dimensions swap.
        let plan = build(3, 1000);
        let last = &plan.passes[plan.passes.len() - 1];
        assert_eq!(last.technique, TechniqueId::new(TechniqueKind::AddSum, Axis::Y));
        assert_eq!(last.kind, PassKind::Dispatch { groups: [3, 4, 1] });
    }

    /// A two-level axis ends in its D[0] buffer without any add-sum pass
    #[test]
    fn test_two_level_axis_result() {
        let plan = build(8, 8);
        // One scan pass per axis, no add-sum passes.
        assert_eq!(plan.passes.len(), 2);
        assert_eq!(plan.passes[0].technique, TechniqueId::new(TechniqueKind::InBlockScan, Axis::X));
        assert_eq!(plan.passes[1].technique, TechniqueId::new(TechniqueKind::InBlockScan, Axis::Y));

        // The Y scan reads the X scan's output, not the source.
        let x_result = plan.passes[0].output("out_tex").unwrap();
        assert_eq!(plan.passes[1].input("in_tex"), Some(x_result));
        assert_ne!(x_result, plan.input);

        // The output is owned and full-size.
        let desc = plan.buffers[plan.output.index()];
        assert_eq!((desc.width, desc.height), (8, 8));
        assert_eq!(desc.origin, BufferOrigin::Owned);
    }

    /// A three-level axis resolves its carry back into U[0], which is the
    /// borrowed source slot
    #[test]
    fn test_deep_axis_resolves_in_place() {
        let plan = build(70_000, 1);
        // Levels 70000 -> 274 -> 2 -> 1: three scans, two add-sums.
        assert_eq!(plan.passes.len(), 5);
        let last = &plan.passes[4];
        assert_eq!(last.technique, TechniqueId::new(TechniqueKind::AddSum, Axis::X));
        assert_eq!(last.output("out_tex"), Some(plan.input));
        assert_eq!(plan.output, plan.input);
        assert_eq!(plan.buffers[plan.output.index()].origin, BufferOrigin::Borrowed);
    }

    /// The carry input of an add-sum pass is the buffer holding the
    /// completed coarser scan: D at the top of the chain, U below it
    #[test]
    fn test_carry_source_selection() {
        // Tile 4 over 100 texels: levels 100 -> 25 -> 7 -> 2 -> 1,
        // four scans and three add-sums.
        let plan = build_tiled(4, 100, 1);
        assert_eq!(plan.passes.len(), 7);

        let scan = |level: usize| &plan.passes[level];
        let add = |index: usize| &plan.passes[4 + index];

        // Coarsest add-sum (level 3) takes its carry from D[3].
        assert_eq!(add(0).input("in_sum_tex"), scan(3).output("out_tex"));
        // The next one down takes it from U[2], the previous add-sum's output.
        assert_eq!(add(1).input("in_sum_tex"), add(0).output("out_tex"));
        // And the finest from U[1].
        assert_eq!(add(2).input("in_sum_tex"), add(1).output("out_tex"));

        // Scan inputs walk the U chain: source, then each level's totals.
        assert_eq!(scan(0).input("in_tex"), Some(plan.input));
        assert_eq!(scan(1).input("in_tex"), scan(0).output("out_sum_tex"));
        assert_eq!(scan(2).input("in_tex"), scan(1).output("out_sum_tex"));
        assert_eq!(scan(3).input("in_tex"), scan(2).output("out_sum_tex"));
    }

    /// Tile-total buffers exist for every scan pass, including the coarsest
    #[test]
    fn test_tile_total_always_bound() {
        for (width, height) in [(8, 8), (1000, 2), (70_000, 1)] {
            let plan = build(width, height);
            for pass in &plan.passes {
                if pass.technique.kind == TechniqueKind::InBlockScan {
                    let sum = pass.output("out_sum_tex").expect("scan pass without tile totals");
                    let desc = plan.buffers[sum.index()];
                    assert!(desc.width >= 1 && desc.height >= 1);
                }
            }
        }
    }
}
