//! Axis selection and reduction-level pyramids
//!
//! A summed-area table is computed as two independent 1-D prefix sums, first
//! along X and then along Y. Each axis is processed through a pyramid of
//! progressively smaller levels; this module computes those level-length
//! sequences up front, before any buffer or pass exists.

use std::fmt;

/// The image axis a scan phase operates along
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Scan along rows (the width dimension)
    X,
    /// Scan along columns (the height dimension)
    Y,
}

impl Axis {
    /// Short lowercase name used in pass labels
    pub fn name(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }

    /// Picks the length of a `width`x`height` image along this axis
    pub fn pick(&self, width: u32, height: u32) -> u32 {
        match self {
            Axis::X => width,
            Axis::Y => height,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The level-length sequence of one axis of a reduction pyramid
///
/// Level 0 is the source length; each following level is the previous one
/// divided by the reduction factor, rounded up; the sequence ends at the
/// first level of length 1 (inclusive). The sequence is finite and strictly
/// decreasing, so a pipeline built from it always terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPyramid {
    lengths: Vec<u32>,
    factor: u32,
}

impl LevelPyramid {
    /// Computes the full level sequence for `source_length` under `factor`
    ///
    /// The number of levels is counted first so the sequence is allocated
    /// exactly once and never grows while being filled.
    pub fn build(source_length: u32, factor: u32) -> Self {
        debug_assert!(source_length >= 1);
        debug_assert!(factor >= 2);

        let mut lengths = Vec::with_capacity(Self::depth(source_length, factor));
        let mut length = source_length;
        loop {
            lengths.push(length);
            if length == 1 {
                break;
            }
            length = length.div_ceil(factor);
        }

        Self { lengths, factor }
    }

    /// Number of levels `build` produces for `source_length` under `factor`
    fn depth(source_length: u32, factor: u32) -> usize {
        let mut depth = 1;
        let mut length = source_length;
        while length > 1 {
            length = length.div_ceil(factor);
            depth += 1;
        }
        depth
    }

    /// Number of levels, including the terminal length-1 level
    pub fn level_count(&self) -> usize {
        self.lengths.len()
    }

    /// Length of the given level in texels
    pub fn length(&self, level: usize) -> u32 {
        self.lengths[level]
    }

    /// The complete level-length sequence, finest first
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// The reduction factor the sequence was built with
    pub fn factor(&self) -> u32 {
        self.factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Level sequences strictly decrease and end at exactly 1 for both the
    /// 4-way and the 256-way reduction rule
    #[test]
    fn test_level_sequence_terminates_at_one() {
        for factor in [2, 4, 256] {
            for n in [1, 2, 3, 4, 5, 255, 256, 257, 1920, 65536, 1_000_000] {
                let pyramid = LevelPyramid::build(n, factor);
                let lengths = pyramid.lengths();

                assert_eq!(lengths[0], n, "level 0 must be the source length");
                assert_eq!(*lengths.last().unwrap(), 1, "last level must be 1 (n={n}, factor={factor})");
                for pair in lengths.windows(2) {
                    assert!(pair[1] < pair[0], "levels must strictly decrease, got {lengths:?}");
                }
            }
        }
    }

    /// Known sequences for the two production factors
    #[test]
    fn test_known_sequences() {
        assert_eq!(LevelPyramid::build(8, 4).lengths(), &[8, 2, 1]);
        assert_eq!(LevelPyramid::build(7, 4).lengths(), &[7, 2, 1]);
        assert_eq!(LevelPyramid::build(257, 4).lengths(), &[257, 65, 17, 5, 2, 1]);
        assert_eq!(LevelPyramid::build(1, 4).lengths(), &[1]);
        assert_eq!(LevelPyramid::build(256, 256).lengths(), &[256, 1]);
        assert_eq!(LevelPyramid::build(257, 256).lengths(), &[257, 2, 1]);
        assert_eq!(LevelPyramid::build(70_000, 256).lengths(), &[70_000, 274, 2, 1]);
    }

    /// The capacity precomputation matches the produced sequence exactly
    #[test]
    fn test_depth_matches_build() {
        for factor in [2, 4, 256] {
            for n in [1, 2, 3, 100, 4096, 70_000] {
                let pyramid = LevelPyramid::build(n, factor);
                assert_eq!(pyramid.level_count(), LevelPyramid::depth(n, factor));
            }
        }
    }

    #[test]
    fn test_axis_pick() {
        assert_eq!(Axis::X.pick(640, 480), 640);
        assert_eq!(Axis::Y.pick(640, 480), 480);
    }
}
