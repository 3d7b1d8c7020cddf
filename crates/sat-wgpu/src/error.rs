//! Error types for pipeline construction, validation, and execution

use crate::pass::TechniqueId;
use thiserror::Error;

/// Errors surfaced by pipeline construction and execution
///
/// Construction-time errors abort plan assembly before any GPU resource is
/// committed; a failed construction leaves nothing usable behind. Execution
/// errors are propagated to the caller without retry.
#[derive(Debug, Error)]
pub enum SatError {
    /// Neither of the required floating-point target formats is available
    #[error("neither Rgba32Float nor Rgba16Float supports the requested buffer usage")]
    UnsupportedFormat,

    /// The source image has a zero dimension
    #[error("input dimensions must be nonzero, got {width}x{height}")]
    InvalidInputDimensions {
        /// Source width in texels
        width: u32,
        /// Source height in texels
        height: u32,
    },

    /// A required technique is missing from the technique library
    #[error("technique {0} is missing from the loaded technique library")]
    TechniqueNotFound(TechniqueId),

    /// A backend draw or dispatch failed at runtime
    #[error("device execution failure: {0}")]
    DeviceExecutionFailure(String),
}

/// Structural defects detected by [`SatPipeline::validate`](crate::SatPipeline::validate)
///
/// The builders are expected to never produce an invalid plan; the check
/// exists so tests can assert the append-order guarantee on every plan shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A buffer slot has a zero dimension
    #[error("buffer {buffer} has zero-sized dimensions {width}x{height}")]
    ZeroSizedBuffer { buffer: usize, width: u32, height: u32 },

    /// The pipeline input slot points outside the buffer arena
    #[error("pipeline input slot {buffer} is out of arena bounds")]
    InputOutOfRange { buffer: usize },

    /// The pipeline output slot points outside the buffer arena
    #[error("pipeline output slot {buffer} is out of arena bounds")]
    OutputOutOfRange { buffer: usize },

    /// A pass binding points outside the buffer arena
    #[error("pass {pass} ({label}) binds buffer {buffer} out of arena bounds")]
    BindingOutOfRange { pass: usize, label: String, buffer: usize },

    /// A pass has no output binding at all
    #[error("pass {pass} ({label}) has no output binding")]
    MissingOutput { pass: usize, label: String },

    /// A pass reads a buffer no earlier pass has written
    #[error("pass {pass} ({label}) reads buffer {buffer} before any earlier pass has written it")]
    ReadBeforeWrite { pass: usize, label: String, buffer: usize },

    /// The pipeline output is neither written by a pass nor the input slot
    #[error("pipeline output buffer {buffer} is never written and is not the input")]
    OutputNeverWritten { buffer: usize },
}
