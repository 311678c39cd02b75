//! Video filter chains and resolution capping.

use std::fmt;

use super::codec::{HardwareFamily, VideoCodec};

/// Video filter chain passed with `-vf`. Empty means no transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFilter(String);

impl VideoFilter {
    /// Returns the empty filter.
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Returns true when the filter applies no transform.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the filter chain text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the scale filter for `dimensions` in the memory domain of `codec`.
    ///
    /// VA-API, Quick Sync and CUDA encoders receive frames decoded straight into
    /// GPU memory, so they scale there. Every other encoder scales in software.
    pub fn scale_for(codec: VideoCodec, dimensions: ScaleDimensions) -> Self {
        let ScaleDimensions { width, height } = dimensions;
        let filter = match codec.hardware_family() {
            Some(HardwareFamily::Vaapi) => format!("scale_vaapi=w={width}:h={height}"),
            Some(HardwareFamily::Qsv) => format!("scale_qsv=w={width}:h={height}"),
            Some(HardwareFamily::Cuda) => format!("scale_cuda={width}:{height}"),
            _ => format!("scale={width}:{height}"),
        };
        Self(filter)
    }
}

impl From<&str> for VideoFilter {
    fn from(filter: &str) -> Self {
        Self(filter.to_string())
    }
}

impl From<String> for VideoFilter {
    fn from(filter: String) -> Self {
        Self(filter)
    }
}

impl fmt::Display for VideoFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output frame size after capping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDimensions {
    /// Output width in pixels, always even
    pub width: u32,
    /// Output height in pixels, always even
    pub height: u32,
}

/// Computes the output size for a source capped at `max_dimension`.
///
/// The cap applies to the shorter edge of the source. Returns `None` when no
/// scaling is needed: unknown source size, no cap, or a source whose shorter
/// edge already fits. Both returned edges are even, since the encoders reject
/// odd frame sizes, and the aspect ratio is kept to within one even step.
pub fn scale_max(width: u32, height: u32, max_dimension: u32) -> Option<ScaleDimensions> {
    if width == 0 || height == 0 || max_dimension == 0 {
        return None;
    }

    let shorter = width.min(height);
    if max_dimension >= shorter {
        return None;
    }

    let capped = round_down_even(max_dimension);
    let scaled = |long: u32, short: u32| -> u32 {
        let exact = u64::from(long) * u64::from(capped) / u64::from(short);
        round_down_even(u32::try_from(exact).unwrap_or(u32::MAX))
    };

    let dimensions = if width > height {
        ScaleDimensions {
            width: scaled(width, height),
            height: capped,
        }
    } else {
        ScaleDimensions {
            width: capped,
            height: scaled(height, width),
        }
    };
    Some(dimensions)
}

fn round_down_even(value: u32) -> u32 {
    (value & !1).max(2)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_four_k_capped_to_full_hd() {
        let dimensions = scale_max(3840, 2160, 1080).unwrap();
        assert_eq!(
            dimensions,
            ScaleDimensions {
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_portrait_source_caps_width() {
        let dimensions = scale_max(1080, 1920, 720).unwrap();
        assert_eq!(dimensions.width, 720);
        assert_eq!(dimensions.height, 1280);
    }

    #[test]
    fn test_fitting_source_needs_no_scale() {
        assert_eq!(scale_max(1280, 720, 1080), None);
        assert_eq!(scale_max(1920, 1080, 1080), None);
        assert_eq!(scale_max(1920, 1080, 0), None);
        assert_eq!(scale_max(0, 0, 480), None);
    }

    #[test]
    fn test_odd_result_rounded_down() {
        // 1000x562 capped at 480 gives 854.09 wide
        let dimensions = scale_max(1000, 562, 480).unwrap();
        assert_eq!(dimensions.width, 854);
        assert_eq!(dimensions.height, 480);
    }

    #[test]
    fn test_filter_syntax_per_family() {
        let dimensions = ScaleDimensions {
            width: 1280,
            height: 720,
        };
        assert_eq!(
            VideoFilter::scale_for(VideoCodec::LibX264, dimensions).as_str(),
            "scale=1280:720"
        );
        assert_eq!(
            VideoFilter::scale_for(VideoCodec::V264, dimensions).as_str(),
            "scale_vaapi=w=1280:h=720"
        );
        assert_eq!(
            VideoFilter::scale_for(VideoCodec::Ivp9, dimensions).as_str(),
            "scale_qsv=w=1280:h=720"
        );
        assert_eq!(
            VideoFilter::scale_for(VideoCodec::N264, dimensions).as_str(),
            "scale_cuda=1280:720"
        );
        assert_eq!(
            VideoFilter::scale_for(VideoCodec::M264, dimensions).as_str(),
            "scale=1280:720"
        );
    }

    proptest! {
        #[test]
        fn prop_scaled_dimensions_are_even_and_keep_aspect(
            width in 16u32..8192,
            height in 16u32..8192,
            cap in prop::sample::select(vec![240u32, 480, 720, 1080, 2160]),
        ) {
            if let Some(dimensions) = scale_max(width, height, cap) {
                prop_assert_eq!(dimensions.width % 2, 0);
                prop_assert_eq!(dimensions.height % 2, 0);
                prop_assert_eq!(dimensions.width.min(dimensions.height), cap);

                let source_ratio = f64::from(width) / f64::from(height);
                let output_ratio = f64::from(dimensions.width) / f64::from(dimensions.height);
                // one even step on the scaled edge
                let tolerance = 2.0 / f64::from(cap) * source_ratio.max(1.0 / source_ratio) + 1e-9;
                prop_assert!((source_ratio - output_ratio).abs() <= tolerance * source_ratio.max(1.0));
            } else {
                prop_assert!(width.min(height) <= cap);
            }
        }

        #[test]
        fn prop_fitting_sources_are_untouched(
            width in 2u32..=1080,
            height in 2u32..=1080,
        ) {
            prop_assert_eq!(scale_max(width, height, 1080), None);
        }
    }
}
