//! [`HandDetector`], a frame-by-frame interface to hand landmark detection.
//!
//! ```no_run
//! use handtrack::hand::{HandDetector, HandDetectorOptions};
//! use handtrack::image::Image;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut detector = HandDetector::new(HandDetectorOptions::default())?;
//! let mut frame = Image::load("hand.jpg")?;
//! detector.find_hands(&mut frame, true)?;
//! for pos in detector.find_position(&mut frame, 0, true)? {
//!     println!("{pos}");
//! }
//! # Ok(())
//! # }
//! ```

use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::image::{draw, Image, Resolution};

use super::{
    default_model_dir,
    detection::PalmDetectionNetwork,
    landmark::{LandmarkNetwork, LandmarkResult},
    tracking::HandTracker,
    ModelComplexity,
};

/// Produces hand landmarks for a frame.
///
/// Implemented by [`HandTracker`]; [`HandDetector`] is generic over it so that other sources (eg.
/// recorded landmarks) can be plugged in.
pub trait HandSource {
    /// Appends the landmarks of every hand found in `image` to `hands`, in `image`'s pixel
    /// coordinates.
    fn process(&mut self, image: &Image, hands: &mut Vec<LandmarkResult>) -> anyhow::Result<()>;
}

impl HandSource for HandTracker {
    fn process(&mut self, image: &Image, hands: &mut Vec<LandmarkResult>) -> anyhow::Result<()> {
        let tracked = self.track(image)?;
        hands.extend(tracked.iter().map(|hand| hand.landmarks().clone()));
        Ok(())
    }
}

/// Settings for [`HandDetector::new`].
#[derive(Debug, Clone)]
pub struct HandDetectorOptions {
    static_image_mode: bool,
    max_hands: usize,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    model_complexity: ModelComplexity,
    model_dir: PathBuf,
    smoothing: Option<f32>,
}

impl Default for HandDetectorOptions {
    fn default() -> Self {
        Self {
            static_image_mode: false,
            max_hands: HandTracker::DEFAULT_MAX_HANDS,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            model_complexity: ModelComplexity::default(),
            model_dir: default_model_dir().to_path_buf(),
            smoothing: None,
        }
    }
}

impl HandDetectorOptions {
    /// Treat every frame as an unrelated image, running palm detection each time.
    pub fn static_image_mode(mut self, static_image_mode: bool) -> Self {
        self.static_image_mode = static_image_mode;
        self
    }

    pub fn max_hands(mut self, max_hands: usize) -> Self {
        self.max_hands = max_hands;
        self
    }

    /// Minimum palm detection confidence (0.0 to 1.0) for a hand to be picked up.
    pub fn min_detection_confidence(mut self, confidence: f32) -> Self {
        self.min_detection_confidence = confidence;
        self
    }

    /// Minimum landmark presence (0.0 to 1.0) for a hand to stay tracked.
    pub fn min_tracking_confidence(mut self, confidence: f32) -> Self {
        self.min_tracking_confidence = confidence;
        self
    }

    pub fn model_complexity(mut self, complexity: ModelComplexity) -> Self {
        self.model_complexity = complexity;
        self
    }

    /// Directory containing the ONNX network files.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Smooths landmarks over time with an exponential moving average of factor `alpha`.
    pub fn smoothing(mut self, alpha: Option<f32>) -> Self {
        self.smoothing = alpha;
        self
    }

    fn palm_detection_path(&self) -> PathBuf {
        self.model_dir.join(self.model_complexity.palm_detection_file())
    }

    fn hand_landmark_path(&self) -> PathBuf {
        self.model_dir.join(self.model_complexity.hand_landmark_file())
    }
}

/// One landmark of one hand, in pixel coordinates of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkPosition {
    /// Landmark index, `0..=20` (see [`super::landmark::LandmarkIdx`]).
    pub id: usize,
    pub x: i32,
    pub y: i32,
}

/// Formats as `[id, x, y]`.
impl fmt::Display for LandmarkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.id, self.x, self.y)
    }
}

/// Returned by [`HandDetector::find_position`] when asked for a hand that wasn't found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hand index {index} out of range ({count} hands detected)")]
pub struct HandIndexError {
    pub index: usize,
    pub count: usize,
}

/// Finds hands in frames and reports landmark positions.
///
/// [`HandDetector::find_position`] reports on the frame last passed to
/// [`HandDetector::find_hands`].
pub struct HandDetector<S: HandSource = HandTracker> {
    source: S,
    hands: Vec<LandmarkResult>,
    /// Resolution of the last processed frame; landmark coordinates are relative to it.
    frame_res: Resolution,
}

impl HandDetector<HandTracker> {
    /// Loads the networks and creates a detector.
    pub fn new(options: HandDetectorOptions) -> anyhow::Result<Self> {
        let palm = PalmDetectionNetwork::load(options.palm_detection_path())?;
        let landmark = LandmarkNetwork::load(options.hand_landmark_path())?;
        log::info!(
            "loaded {} hand networks from '{}'",
            options.model_complexity,
            options.model_dir.display()
        );

        let mut tracker = HandTracker::new(palm, landmark);
        tracker.set_static_mode(options.static_image_mode);
        tracker.set_max_hands(options.max_hands);
        tracker.set_detection_threshold(options.min_detection_confidence);
        tracker.set_tracking_threshold(options.min_tracking_confidence);
        tracker.set_smoothing(options.smoothing);

        Ok(Self::with_source(tracker))
    }
}

impl<S: HandSource> HandDetector<S> {
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            hands: Vec::new(),
            frame_res: Resolution::new(0, 0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Finds the hands in `image`, and draws their skeletons onto it if `draw` is set.
    ///
    /// On error, the detector behaves as if no hand was found.
    pub fn find_hands(&mut self, image: &mut Image, draw: bool) -> anyhow::Result<()> {
        self.hands.clear();
        self.frame_res = image.resolution();
        if let Err(e) = self.source.process(image, &mut self.hands) {
            self.hands.clear();
            return Err(e);
        }
        log::trace!("found {} hands", self.hands.len());

        if draw {
            for hand in &self.hands {
                hand.draw(image);
            }
        }

        Ok(())
    }

    /// Returns the number of hands found in the last frame.
    pub fn hand_count(&self) -> usize {
        self.hands.len()
    }

    /// Returns the landmark estimates of the last frame.
    pub fn results(&self) -> &[LandmarkResult] {
        &self.hands
    }

    /// Returns the landmark positions of hand `hand_number` in the last frame, scaled to the size
    /// of `image`, and marks them with filled circles if `draw` is set.
    ///
    /// If no hand was found, the result is empty regardless of `hand_number`. Otherwise it holds
    /// all 21 landmarks in index order, clamped to the bounds of `image`.
    pub fn find_position(
        &self,
        image: &mut Image,
        hand_number: usize,
        draw: bool,
    ) -> Result<Vec<LandmarkPosition>, HandIndexError> {
        if self.hands.is_empty() {
            return Ok(Vec::new());
        }
        let hand = self.hands.get(hand_number).ok_or(HandIndexError {
            index: hand_number,
            count: self.hands.len(),
        })?;

        let (w, h) = (image.width(), image.height());
        let scale_x = w as f32 / self.frame_res.width().max(1) as f32;
        let scale_y = h as f32 / self.frame_res.height().max(1) as f32;
        let max_x = w.saturating_sub(1) as i32;
        let max_y = h.saturating_sub(1) as i32;

        let positions = hand
            .landmark_positions()
            .enumerate()
            .map(|(id, pos)| LandmarkPosition {
                id,
                // `as` truncates towards zero and saturates, NaN becomes 0.
                x: ((pos.x * scale_x) as i32).clamp(0, max_x),
                y: ((pos.y * scale_y) as i32).clamp(0, max_y),
            })
            .collect::<Vec<_>>();

        if draw {
            for pos in &positions {
                draw::filled_circle(image, pos.x, pos.y, 5);
            }
        }

        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::hand::landmark::NUM_LANDMARKS;
    use crate::image::Color;
    use crate::landmark::Estimate;

    /// Reports a fixed list of hands for every frame.
    struct FixedHands(Vec<LandmarkResult>);

    impl HandSource for FixedHands {
        fn process(
            &mut self,
            _image: &Image,
            hands: &mut Vec<LandmarkResult>,
        ) -> anyhow::Result<()> {
            hands.extend(self.0.iter().cloned());
            Ok(())
        }
    }

    struct Failing;

    impl HandSource for Failing {
        fn process(&mut self, _: &Image, _: &mut Vec<LandmarkResult>) -> anyhow::Result<()> {
            anyhow::bail!("inference failed")
        }
    }

    fn hand(f: impl Fn(usize) -> [f32; 2]) -> LandmarkResult {
        let mut result = LandmarkResult::default();
        for (i, pos) in result.landmarks_mut().positions_mut().iter_mut().enumerate() {
            let [x, y] = f(i);
            *pos = Vector3::new(x, y, 0.0);
        }
        result
    }

    fn random_hand(w: u32, h: u32) -> LandmarkResult {
        // Landmarks may be estimated slightly outside of the frame.
        hand(|_| {
            [
                fastrand::f32() * w as f32 * 1.4 - w as f32 * 0.2,
                fastrand::f32() * h as f32 * 1.4 - h as f32 * 0.2,
            ]
        })
    }

    #[test]
    fn no_hand_gives_empty_positions() {
        let mut image = Image::new(64, 48);
        let mut detector = HandDetector::with_source(FixedHands(Vec::new()));

        // Before any frame was processed.
        assert_eq!(detector.find_position(&mut image, 0, true), Ok(Vec::new()));

        detector.find_hands(&mut image, true).unwrap();
        assert_eq!(detector.hand_count(), 0);
        for index in [0, 1, 5] {
            assert_eq!(detector.find_position(&mut image, index, true), Ok(Vec::new()));
        }
    }

    #[test]
    fn detected_hand_has_21_landmarks_in_bounds() {
        for _ in 0..20 {
            let (w, h) = (fastrand::u32(1..200), fastrand::u32(1..200));
            let mut image = Image::new(w, h);
            let mut detector = HandDetector::with_source(FixedHands(vec![
                random_hand(w, h),
                random_hand(w, h),
            ]));
            detector.find_hands(&mut image, true).unwrap();
            assert_eq!(detector.hand_count(), 2);

            for index in 0..2 {
                let positions = detector.find_position(&mut image, index, true).unwrap();
                assert_eq!(positions.len(), NUM_LANDMARKS);
                for (i, pos) in positions.iter().enumerate() {
                    assert_eq!(pos.id, i);
                    assert!((0..w as i32).contains(&pos.x), "{pos} outside {w}x{h}");
                    assert!((0..h as i32).contains(&pos.y), "{pos} outside {w}x{h}");
                }
            }
        }
    }

    #[test]
    fn out_of_range_hand_is_an_error() {
        let mut image = Image::new(32, 32);
        let mut detector = HandDetector::with_source(FixedHands(vec![random_hand(32, 32)]));
        detector.find_hands(&mut image, false).unwrap();

        let before = image.clone();
        let err = detector.find_position(&mut image, 1, true).unwrap_err();
        assert_eq!(err, HandIndexError { index: 1, count: 1 });
        assert_eq!(err.to_string(), "hand index 1 out of range (1 hands detected)");
        assert_eq!(image.data(), before.data(), "nothing may be drawn on error");
    }

    #[test]
    fn positions_scale_to_image() {
        let mut frame = Image::new(100, 50);
        let mut detector =
            HandDetector::with_source(FixedHands(vec![hand(|i| [i as f32 * 2.0 + 0.9, 25.5])]));
        detector.find_hands(&mut frame, false).unwrap();

        let positions = detector.find_position(&mut frame, 0, false).unwrap();
        assert_eq!(positions[0], LandmarkPosition { id: 0, x: 0, y: 25 });
        assert_eq!(positions[4], LandmarkPosition { id: 4, x: 8, y: 25 });
        assert_eq!(positions[4].to_string(), "[4, 8, 25]");

        // Same landmarks, reported for a frame of twice the size.
        let mut large = Image::new(200, 100);
        let positions = detector.find_position(&mut large, 0, false).unwrap();
        assert_eq!(positions[4], LandmarkPosition { id: 4, x: 17, y: 51 });
    }

    #[test]
    fn draws_when_asked() {
        let mut image = Image::new(64, 64);
        let mut detector =
            HandDetector::with_source(FixedHands(vec![hand(|_| [32.0, 32.0])]));
        detector.find_hands(&mut image, false).unwrap();
        assert_eq!(image.get(32, 32), Color::NULL);

        detector.find_position(&mut image, 0, false).unwrap();
        assert_eq!(image.get(32, 32), Color::NULL);

        detector.find_position(&mut image, 0, true).unwrap();
        assert_eq!(image.get(32, 32), Color::MAGENTA);
        assert_eq!(image.get(36, 32), Color::MAGENTA);
        assert_eq!(image.get(32, 40), Color::NULL);

        detector.find_hands(&mut image, true).unwrap();
        assert_eq!(image.get(32, 32), Color::RED);
    }

    #[test]
    fn error_clears_results() {
        let mut image = Image::new(16, 16);
        let mut detector = HandDetector::with_source(FixedHands(vec![random_hand(16, 16)]));
        detector.find_hands(&mut image, false).unwrap();
        assert_eq!(detector.results().len(), 1);

        let mut failing = HandDetector::with_source(Failing);
        assert!(failing.find_hands(&mut image, false).is_err());
        assert_eq!(failing.hand_count(), 0);
        assert_eq!(failing.find_position(&mut image, 0, false), Ok(Vec::new()));
    }
}
