//! Image comparison utilities for verification
//!
//! The two pipeline strategies only agree to floating-point precision, so
//! comparison is tolerance-based rather than exact.

use crate::reference_engine::Image4f;

/// Result of comparing two four-channel float images
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareResult {
    /// Every texel agrees within the tolerance
    Match {
        /// Largest absolute per-channel difference observed
        max_error: f32,
    },
    /// Images have different dimensions
    DimensionMismatch {
        /// Dimensions of the expected image
        expected: (u32, u32),
        /// Dimensions of the actual image
        actual: (u32, u32),
    },
    /// Matching dimensions but at least one texel out of tolerance
    PixelMismatch {
        /// Whether each channel stayed within tolerance everywhere
        channels_matched: [bool; 4],
        /// Largest absolute per-channel difference observed
        max_error: f32,
        /// Coordinates of the worst-offending texel
        worst: (u32, u32),
    },
}

impl CompareResult {
    /// Whether the comparison succeeded
    pub fn is_match(&self) -> bool {
        matches!(self, CompareResult::Match { .. })
    }
}

/// Compares two images channel by channel against an absolute tolerance
///
/// # Arguments
/// * `expected` - Reference image
/// * `actual` - Image under test
/// * `tolerance` - Largest acceptable absolute per-channel difference
pub fn compare_images(expected: &Image4f, actual: &Image4f, tolerance: f32) -> CompareResult {
    if (expected.width(), expected.height()) != (actual.width(), actual.height()) {
        return CompareResult::DimensionMismatch {
            expected: (expected.width(), expected.height()),
            actual: (actual.width(), actual.height()),
        };
    }

    let mut channels_matched = [true; 4];
    let mut max_error = 0.0f32;
    let mut worst = (0, 0);

    for y in 0..expected.height() {
        for x in 0..expected.width() {
            let a = expected.texel(x, y);
            let b = actual.texel(x, y);
            for channel in 0..4 {
                let error = (a[channel] - b[channel]).abs();
                if error > tolerance {
                    channels_matched[channel] = false;
                }
                if error > max_error {
                    max_error = error;
                    worst = (x, y);
                }
            }
        }
    }

    if channels_matched == [true; 4] {
        CompareResult::Match { max_error }
    } else {
        CompareResult::PixelMismatch { channels_matched, max_error, worst }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_images_match() {
        let image = Image4f::from_fn(4, 3, |x, y| [x as f32, y as f32, 0.0, 1.0]);
        let result = compare_images(&image, &image.clone(), 0.0);
        assert_eq!(result, CompareResult::Match { max_error: 0.0 });
    }

    #[test]
    fn test_dimension_mismatch_detected() {
        let a = Image4f::new(4, 3);
        let b = Image4f::new(3, 4);
        assert_eq!(compare_images(&a, &b, 1.0), CompareResult::DimensionMismatch { expected: (4, 3), actual: (3, 4) });
    }

    /// Differences inside the tolerance still match; outside they report the
    /// offending channel and location
    #[test]
    fn test_tolerance_boundary() {
        let a = Image4f::constant(2, 2, 1.0);
        let mut b = a.clone();
        b.set_texel(1, 0, [1.0, 1.5, 1.0, 1.0]);

        assert!(compare_images(&a, &b, 0.6).is_match());
        match compare_images(&a, &b, 0.1) {
            CompareResult::PixelMismatch { channels_matched, max_error, worst } => {
                assert_eq!(channels_matched, [true, false, true, true]);
                assert_eq!(max_error, 0.5);
                assert_eq!(worst, (1, 0));
            }
            other => panic!("expected PixelMismatch, got {other:?}"),
        }
    }
}
