//! Buffer arena, capability queries, and the pipeline plan
//!
//! A [`SatPipeline`] is pure data: the ordered pass sequence, the buffer
//! arena it addresses, and the format the buffers use. It carries no backend
//! resources, so the same plan can be bound to wgpu by the executor or
//! interpreted texel-by-texel by a reference engine.

use crate::block::BlockPyramidBuilder;
use crate::error::{SatError, ValidationError};
use crate::pass::{PassKind, PassNode};
use crate::sweep::SeparablePyramidBuilder;

/// Floating-point buffer formats the pipelines can run in
///
/// Construction prefers the 32-bit format and falls back to the 16-bit one;
/// with neither available it fails rather than degrade further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Four-channel 32-bit float, the preferred precision
    Rgba32Float,
    /// Four-channel 16-bit float fallback
    Rgba16Float,
}

impl PixelFormat {
    /// Bytes per texel in this format
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            PixelFormat::Rgba32Float => 16,
            PixelFormat::Rgba16Float => 8,
        }
    }
}

/// Capability flags a buffer needs for the pass kinds that touch it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage {
    /// Bound as the render target of a draw pass
    pub render_target: bool,
    /// Written through unordered access by a dispatch pass
    pub storage: bool,
    /// Read as a sampled/loaded texture
    pub sampled: bool,
}

impl BufferUsage {
    /// Usage of every buffer in the separable sweep strategy
    pub const SWEEP: BufferUsage = BufferUsage { render_target: true, storage: false, sampled: true };
    /// Usage of every buffer in the block-scan strategy
    pub const BLOCK: BufferUsage = BufferUsage { render_target: false, storage: true, sampled: true };
}

/// Who owns a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Supplied by the caller (the source image slot)
    Borrowed,
    /// Allocated by and owned by the pipeline for its lifetime
    Owned,
}

/// One slot of the buffer arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub width: u32,
    pub height: u32,
    pub origin: BufferOrigin,
    pub usage: BufferUsage,
}

/// Index of a buffer in a plan's arena
///
/// Aliasing between pyramid levels (the source doubling as level 0, one
/// axis's final buffer doubling as the next axis's level 0) is expressed by
/// reusing the same id, never by duplicate slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    /// Position of this buffer in [`SatPipeline::buffers`]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Backend capability query used during format selection
pub trait RenderCaps {
    /// Whether `format` supports every capability in `usage`
    fn supports_format(&self, format: PixelFormat, usage: BufferUsage) -> bool;
}

/// Picks the highest-precision supported format, or fails construction
pub(crate) fn select_format(caps: &impl RenderCaps, usage: BufferUsage) -> Result<PixelFormat, SatError> {
    [PixelFormat::Rgba32Float, PixelFormat::Rgba16Float]
        .into_iter()
        .find(|format| caps.supports_format(*format, usage))
        .ok_or(SatError::UnsupportedFormat)
}

/// Buffer arena under construction
///
/// Builders push descriptors and get back ids; the finished vector becomes
/// [`SatPipeline::buffers`].
#[derive(Debug, Default)]
pub(crate) struct BufferArena {
    descs: Vec<BufferDesc>,
}

impl BufferArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_borrowed(&mut self, width: u32, height: u32, usage: BufferUsage) -> BufferId {
        self.push(BufferDesc { width, height, origin: BufferOrigin::Borrowed, usage })
    }

    pub(crate) fn push_owned(&mut self, width: u32, height: u32, usage: BufferUsage) -> BufferId {
        self.push(BufferDesc { width, height, origin: BufferOrigin::Owned, usage })
    }

    fn push(&mut self, desc: BufferDesc) -> BufferId {
        let id = BufferId(self.descs.len());
        self.descs.push(desc);
        id
    }

    pub(crate) fn into_inner(self) -> Vec<BufferDesc> {
        self.descs
    }
}

/// The two pipeline construction strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Recursive four-way up-sweep/down-sweep pyramid of draw passes
    SeparableSweep,
    /// Tile-local scans with carry propagation, as compute dispatches
    BlockScan,
}

/// A complete summed-area-table pipeline plan
///
/// An ordered sequence of passes over a buffer arena, executed strictly in
/// append order on a single command stream. The append order is the sole
/// ordering guarantee: every pass only reads buffers written by earlier
/// passes (or the source slot). Rebuilding for new source dimensions always
/// produces a fresh plan; nothing is reused across a resize.
#[derive(Debug, Clone, PartialEq)]
pub struct SatPipeline {
    /// The strategy that built this plan
    pub strategy: ScanStrategy,
    /// Reduction arity of the techniques (4 for sweeps, the tile width for block scans)
    pub group_size: u32,
    /// Buffer format selected at construction
    pub format: PixelFormat,
    /// Source image width in texels
    pub width: u32,
    /// Source image height in texels
    pub height: u32,
    /// The buffer arena; slot ids are stable for the plan's lifetime
    pub buffers: Vec<BufferDesc>,
    /// The pass sequence, in execution order
    pub passes: Vec<PassNode>,
    /// The slot the caller's source image occupies
    pub input: BufferId,
    /// The slot holding the finished summed-area table
    pub output: BufferId,
}

impl SatPipeline {
    /// Builds a plan for a `width`x`height` source with the given strategy
    ///
    /// # Arguments
    /// * `caps` - Backend capability query for format selection
    /// * `width`, `height` - Source dimensions; zero fails construction
    /// * `strategy` - Which of the two pipelines to assemble
    ///
    /// # Returns
    /// The finished plan, or a construction error; a failed construction
    /// builds nothing partial
    pub fn build(caps: &impl RenderCaps, width: u32, height: u32, strategy: ScanStrategy) -> Result<Self, SatError> {
        match strategy {
            ScanStrategy::SeparableSweep => SeparablePyramidBuilder::new().build(caps, width, height),
            ScanStrategy::BlockScan => BlockPyramidBuilder::new().build(caps, width, height),
        }
    }

    /// Checks the structural invariants of the plan
    ///
    /// Verifies that every binding stays inside the arena, that no pass reads
    /// a buffer before it has been written, and that the output slot ends up
    /// holding data. The builders never produce an invalid plan; this check
    /// lets tests assert that on every plan shape.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (index, desc) in self.buffers.iter().enumerate() {
            if desc.width == 0 || desc.height == 0 {
                return Err(ValidationError::ZeroSizedBuffer { buffer: index, width: desc.width, height: desc.height });
            }
        }
        if self.input.index() >= self.buffers.len() {
            return Err(ValidationError::InputOutOfRange { buffer: self.input.index() });
        }
        if self.output.index() >= self.buffers.len() {
            return Err(ValidationError::OutputOutOfRange { buffer: self.output.index() });
        }

        let mut written = vec![false; self.buffers.len()];
        written[self.input.index()] = true;

        for (index, pass) in self.passes.iter().enumerate() {
            for binding in pass.inputs.iter().chain(pass.outputs.iter()) {
                if binding.buffer.index() >= self.buffers.len() {
                    return Err(ValidationError::BindingOutOfRange { pass: index, label: pass.label.clone(), buffer: binding.buffer.index() });
                }
            }
            for binding in &pass.inputs {
                if !written[binding.buffer.index()] {
                    return Err(ValidationError::ReadBeforeWrite { pass: index, label: pass.label.clone(), buffer: binding.buffer.index() });
                }
            }
            if pass.outputs.is_empty() {
                return Err(ValidationError::MissingOutput { pass: index, label: pass.label.clone() });
            }
            for binding in &pass.outputs {
                written[binding.buffer.index()] = true;
            }
        }

        if !written[self.output.index()] {
            return Err(ValidationError::OutputNeverWritten { buffer: self.output.index() });
        }
        Ok(())
    }

    /// Total number of texels held by pipeline-owned buffers
    pub fn owned_texels(&self) -> u64 {
        self.buffers
            .iter()
            .filter(|desc| desc.origin == BufferOrigin::Owned)
            .map(|desc| u64::from(desc.width) * u64::from(desc.height))
            .sum()
    }

    /// Number of draw passes in the sequence
    pub fn draw_count(&self) -> usize {
        self.passes.iter().filter(|pass| pass.kind == PassKind::Draw).count()
    }

    /// Number of dispatch passes in the sequence
    pub fn dispatch_count(&self) -> usize {
        self.passes.len() - self.draw_count()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Capability stub with per-format switches
    pub(crate) struct StubCaps {
        pub rgba32f: bool,
        pub rgba16f: bool,
    }

    impl StubCaps {
        pub(crate) fn all() -> Self {
            Self { rgba32f: true, rgba16f: true }
        }
    }

    impl RenderCaps for StubCaps {
        fn supports_format(&self, format: PixelFormat, _usage: BufferUsage) -> bool {
            match format {
                PixelFormat::Rgba32Float => self.rgba32f,
                PixelFormat::Rgba16Float => self.rgba16f,
            }
        }
    }
}
