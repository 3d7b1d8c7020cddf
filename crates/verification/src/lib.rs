//! Verification utilities for sat-wgpu
//!
//! This crate checks the correctness of the summed-area-table pipelines: a
//! CPU reference engine interprets the same pipeline plans the wgpu executor
//! binds, mirroring the shader techniques texel for texel, and the numeric
//! property tests compare both strategies against a brute-force table. The
//! `verify_sat` binary additionally cross-checks real GPU output against the
//! reference engine.

pub mod compare;
pub mod reference_engine;
pub mod wgpu_helpers;
