//! Summed-area table pipelines for wgpu
//!
//! This crate builds and executes the GPU pass sequences that turn a 2D
//! image into its full summed-area table: for every pixel, the sum of all
//! pixels above and to the left of it, inclusive. Summed-area tables answer
//! arbitrary box-filter queries in O(1), which screen-space effects such as
//! depth of field and soft shadows rely on.
//!
//! Two interchangeable strategies are provided. The separable sweep strategy
//! reduces each axis through a four-way pyramid of full-screen draw passes
//! and redistributes the partial sums on the way back down; the block-scan
//! strategy scans each axis in 256-wide tiles with compute dispatches and
//! resolves the carries through a coarser-level hierarchy. Both produce the
//! same table to floating-point precision.
//!
//! Pipelines are planned as pure data ([`SatPipeline`]) and then bound to
//! GPU resources ([`SatExecutor`]), so the same plan can also be interpreted
//! by a CPU reference engine for verification.

mod block;
mod error;
mod executor;
mod levels;
mod pass;
mod pipeline;
mod sweep;

pub use block::{BlockPyramidBuilder, BLOCK_SIZE};
pub use error::{SatError, ValidationError};
pub use executor::{texture_format, SatExecutor};
pub use levels::{Axis, LevelPyramid};
pub use pass::{ParamValue, PassBinding, PassKind, PassNode, PassParam, TechniqueId, TechniqueKind, TechniqueRegistry};
pub use pipeline::{BufferDesc, BufferId, BufferOrigin, BufferUsage, PixelFormat, RenderCaps, SatPipeline, ScanStrategy};
pub use sweep::{SeparablePyramidBuilder, SWEEP_REDUCTION};
