//! Hand detection, landmark estimation and tracking.
//!
//! Uses the palm detection and hand landmark networks from [MediaPipe Hands], converted to ONNX.
//! [`HandDetector`] is the high-level entry point: it finds hands in a frame and reports the pixel
//! positions of their 21 landmarks.
//!
//! [MediaPipe Hands]: https://google.github.io/mediapipe/solutions/hands.html

pub mod detection;
pub mod detector;
pub mod landmark;
pub mod tracking;

use std::{fmt, path::Path, str::FromStr};

use anyhow::bail;

pub use detector::{
    HandDetector, HandDetectorOptions, HandIndexError, HandSource, LandmarkPosition,
};

/// Selects between the two sizes of the MediaPipe Hands networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelComplexity {
    /// Faster, less accurate networks.
    Lite,
    /// Slower, more accurate networks.
    #[default]
    Full,
}

impl ModelComplexity {
    pub const ALL: [Self; 2] = [Self::Lite, Self::Full];

    /// File name of the palm detection network.
    pub fn palm_detection_file(self) -> &'static str {
        match self {
            Self::Lite => "palm_detection_lite.onnx",
            Self::Full => "palm_detection_full.onnx",
        }
    }

    /// File name of the hand landmark network.
    pub fn hand_landmark_file(self) -> &'static str {
        match self {
            Self::Lite => "hand_landmark_lite.onnx",
            Self::Full => "hand_landmark_full.onnx",
        }
    }
}

/// Accepts `lite`/`full`, and MediaPipe's numeric `0`/`1`.
impl FromStr for ModelComplexity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "lite" | "0" => Self::Lite,
            "full" | "1" => Self::Full,
            _ => bail!("invalid model complexity '{s}' (expected 'lite' or 'full')"),
        })
    }
}

impl fmt::Display for ModelComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lite => "lite",
            Self::Full => "full",
        })
    }
}

/// Returns the directory the networks are loaded from when nothing else is configured.
pub fn default_model_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/3rdparty/onnx"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_complexity() {
        assert_eq!("lite".parse::<ModelComplexity>().unwrap(), ModelComplexity::Lite);
        assert_eq!(" Full ".parse::<ModelComplexity>().unwrap(), ModelComplexity::Full);
        assert_eq!("0".parse::<ModelComplexity>().unwrap(), ModelComplexity::Lite);
        assert!("heavy".parse::<ModelComplexity>().is_err());

        for complexity in ModelComplexity::ALL {
            assert_eq!(
                complexity.to_string().parse::<ModelComplexity>().unwrap(),
                complexity
            );
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(ModelComplexity::default(), ModelComplexity::Full);
        assert!(ModelComplexity::Lite.palm_detection_file().ends_with("_lite.onnx"));
        assert!(ModelComplexity::Full.hand_landmark_file().ends_with("_full.onnx"));
        assert!(default_model_dir().ends_with("3rdparty/onnx"));
    }
}
