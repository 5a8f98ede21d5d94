//! Detect-then-track hand tracking.
//!
//! Palm detection is expensive, so [`HandTracker`] only runs it while it tracks fewer hands than
//! it is allowed to. Each detected palm seeds a [`LandmarkTracker`] that follows the hand from then
//! on, using only the (much cheaper) landmark network, until the landmark network reports that the
//! hand is gone.

use std::{fmt, mem};

use anyhow::Context;
use nalgebra::{Rotation2, Vector2};

use crate::detection::{self, Detection, Detector};
use crate::filter::ema::Ema;
use crate::image::{Image, Rect, RotatedRect};
use crate::landmark::{self, Estimator, LandmarkFilter, LandmarkTracker};
use crate::timer::Timer;

use super::landmark::{LandmarkResult, NUM_LANDMARKS};

/// Palm box to hand ROI: the palm box is squared, moved towards the fingers by this fraction of its
/// size, and scaled by [`PALM_TO_HAND_SCALE`].
const PALM_SHIFT: f32 = 0.5;
const PALM_TO_HAND_SCALE: f32 = 2.6;

/// Margin around the landmarks' bounding box when deriving the next frame's ROI (2x size).
const ROI_PADDING: f32 = 0.5;

/// Identifies a hand for as long as it is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandId(u64);

impl fmt::Display for HandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A tracked hand.
pub struct HandData {
    id: HandId,
    tracker: LandmarkTracker,
    landmarks: LandmarkResult,
}

impl HandData {
    /// Returns the landmarks estimated in the last frame, in image coordinates.
    pub fn landmarks(&self) -> &LandmarkResult {
        &self.landmarks
    }

    fn roi(&self) -> Option<&RotatedRect> {
        self.tracker.roi()
    }
}

/// Finds and follows up to a maximum number of hands across frames.
pub struct HandTracker {
    detector: Detector,
    estimator: Estimator<LandmarkResult>,
    hands: Vec<HandData>,
    next_id: u64,
    max_hands: usize,
    static_mode: bool,
    tracking_thresh: f32,
    iou_thresh: f32,
    smoothing: Option<Ema>,
}

impl HandTracker {
    pub const DEFAULT_MAX_HANDS: usize = 2;

    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a tracker running `palm_network` to find hands and `landmark_network` to follow
    /// them; normally [`super::detection::PalmDetectionNetwork`] and
    /// [`super::landmark::LandmarkNetwork`].
    pub fn new<P, L>(palm_network: P, landmark_network: L) -> Self
    where
        P: detection::Network,
        L: landmark::Network<Output = LandmarkResult>,
    {
        Self {
            detector: Detector::new(palm_network),
            estimator: Estimator::new(landmark_network),
            hands: Vec::new(),
            next_id: 0,
            max_hands: Self::DEFAULT_MAX_HANDS,
            static_mode: false,
            tracking_thresh: LandmarkTracker::DEFAULT_LOSS_THRESHOLD,
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            smoothing: None,
        }
    }

    /// Sets the maximum number of hands tracked at once.
    pub fn set_max_hands(&mut self, max_hands: usize) {
        self.max_hands = max_hands;
        self.hands.truncate(max_hands);
    }

    /// In static mode, every frame is treated as unrelated to the previous one: palm detection runs
    /// on every frame and no tracking state is kept.
    pub fn set_static_mode(&mut self, static_mode: bool) {
        self.static_mode = static_mode;
    }

    /// Sets the minimum palm detection confidence for a detection to seed a tracked hand.
    pub fn set_detection_threshold(&mut self, threshold: f32) {
        self.detector.set_threshold(threshold);
    }

    /// Sets the landmark presence below which a tracked hand is considered lost.
    pub fn set_tracking_threshold(&mut self, threshold: f32) {
        self.tracking_thresh = threshold;
        for hand in &mut self.hands {
            hand.tracker.set_loss_threshold(threshold);
        }
    }

    /// Sets the intersection-over-union above which two hand ROIs are considered the same hand.
    pub fn set_iou_thresh(&mut self, threshold: f32) {
        self.iou_thresh = threshold;
    }

    /// Enables exponential smoothing of the landmarks of newly tracked hands, with smoothing
    /// factor `alpha` (see [`Ema::new`]), or disables it with [`None`].
    pub fn set_smoothing(&mut self, alpha: Option<f32>) {
        self.smoothing = alpha.map(Ema::new);
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.detector.timers().chain(self.estimator.timers())
    }

    /// Processes the next frame.
    ///
    /// All frames of one video stream must have the same resolution. If the landmark network
    /// fails, the error is returned and every hand stays tracked with its previous ROI.
    pub fn track(&mut self, image: &Image) -> anyhow::Result<&[HandData]> {
        if self.static_mode {
            self.hands.clear();
        }

        if self.hands.len() < self.max_hands {
            self.seed_from_detections(image)?;
        }

        let mut kept = Vec::with_capacity(self.hands.len());
        let mut hands = mem::take(&mut self.hands).into_iter();
        while let Some(mut hand) = hands.next() {
            match hand.tracker.track(&mut self.estimator, image) {
                Ok(Some(estimate)) => {
                    hand.landmarks = estimate.clone();
                    kept.push(hand);
                }
                Ok(None) => log::debug!("lost track of hand {}", hand.id),
                Err(e) => {
                    kept.push(hand);
                    kept.extend(hands);
                    self.hands = kept;
                    return Err(e);
                }
            }
        }

        // Two trackers may converge onto the same hand; keep the one tracked for longer.
        let iou_thresh = self.iou_thresh;
        let mut unique: Vec<HandData> = Vec::with_capacity(kept.len());
        for hand in kept {
            if overlaps_any(hand.roi(), unique.iter().filter_map(|h| h.roi()), iou_thresh) {
                log::debug!("hand {} overlaps another tracked hand, dropping it", hand.id);
            } else {
                unique.push(hand);
            }
        }
        self.hands = unique;

        Ok(&self.hands)
    }

    fn seed_from_detections(&mut self, image: &Image) -> anyhow::Result<()> {
        let aspect_ratio = self
            .estimator
            .input_resolution()
            .aspect_ratio()
            .context("hand landmark network has an empty input")?;

        let detections = self.detector.detect(image)?;
        for det in detections {
            if self.hands.len() >= self.max_hands {
                break;
            }

            let roi = palm_roi(det);
            let existing = self.hands.iter().filter_map(|h| h.roi());
            if overlaps_any(Some(&roi), existing, self.iou_thresh) {
                continue;
            }

            let id = HandId(self.next_id);
            self.next_id += 1;
            log::debug!(
                "tracking new hand {id} (palm confidence {:.2})",
                det.confidence()
            );

            let mut tracker = LandmarkTracker::new(aspect_ratio);
            tracker.set_loss_threshold(self.tracking_thresh);
            tracker.set_roi_padding(ROI_PADDING);
            if let Some(ema) = self.smoothing {
                tracker.set_filter(LandmarkFilter::new(ema, NUM_LANDMARKS));
            }
            tracker.set_roi(roi);

            self.hands.push(HandData {
                id,
                tracker,
                landmarks: LandmarkResult::default(),
            });
        }

        Ok(())
    }
}

/// Converts a palm detection to the ROI of the whole hand.
///
/// The palm box is made square, moved towards the fingers (along the palm's rotation) and enlarged
/// to cover the fingers.
fn palm_roi(det: &Detection) -> RotatedRect {
    let rect = det.bounding_rect();
    let angle = det.angle();
    let side = rect.width().max(rect.height());
    let shift = Rotation2::new(angle) * Vector2::new(0.0, -PALM_SHIFT * rect.height());
    let center = rect.center() + shift;
    RotatedRect::new(
        Rect::from_center(center.x, center.y, side, side).scale(PALM_TO_HAND_SCALE),
        angle,
    )
}

fn overlaps_any<'a>(
    roi: Option<&RotatedRect>,
    others: impl IntoIterator<Item = &'a RotatedRect>,
    iou_thresh: f32,
) -> bool {
    let Some(roi) = roi else {
        return false;
    };
    others.into_iter().any(|other| roi.iou(other) >= iou_thresh)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use approx::assert_relative_eq;

    use super::*;
    use crate::hand::landmark::{self as hand_landmark, LandmarkIdx};
    use crate::image::{Color, ImageView, Resolution};
    use crate::nn::{tensor::Tensor, Outputs};

    const FRAME: u32 = 192;
    const LANDMARK_INPUT: u32 = 224;

    /// Shared state of the fake networks.
    struct Script {
        /// Palms reported by every palm detection pass, in image coordinates.
        palms: Vec<Detection>,
        /// Presence reported while a hand is visible.
        presence: f32,
        fail_landmarks: bool,
        palm_runs: usize,
        landmark_runs: usize,
    }

    type Shared = Arc<Mutex<Script>>;

    struct FakePalms(Shared);

    impl detection::Network for FakePalms {
        fn input_resolution(&self) -> Resolution {
            Resolution::new(FRAME, FRAME)
        }

        fn infer(&self, _image: &ImageView<'_>) -> anyhow::Result<Outputs> {
            self.0.lock().unwrap().palm_runs += 1;
            Ok(Outputs::from_iter([]))
        }

        fn extract(
            &self,
            _outputs: &Outputs,
            threshold: f32,
            detections: &mut Vec<Detection>,
        ) -> anyhow::Result<()> {
            let script = self.0.lock().unwrap();
            detections.extend(
                script
                    .palms
                    .iter()
                    .filter(|det| det.confidence() >= threshold)
                    .cloned(),
            );
            Ok(())
        }
    }

    /// Puts the landmarks of an upright hand on the white pixels of its input.
    struct FakeLandmarks(Shared);

    impl landmark::Network for FakeLandmarks {
        type Output = LandmarkResult;

        fn input_resolution(&self) -> Resolution {
            Resolution::new(LANDMARK_INPUT, LANDMARK_INPUT)
        }

        fn infer(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs> {
            let mut script = self.0.lock().unwrap();
            script.landmark_runs += 1;
            if script.fail_landmarks {
                bail!("landmark network failed");
            }

            let mut screen = vec![0.0; NUM_LANDMARKS * 3];
            let mut presence = 0.0;
            if let Some(bounds) = white_bounds(image) {
                presence = script.presence;
                let scale = LANDMARK_INPUT as f32 / image.width() as f32;
                let [x0, y0, x1, y1] = bounds.map(|v| v as f32 * scale);
                let (cx, cy) = ((x0 + x1) * 0.5, (y0 + y1) * 0.5);
                for (i, lm) in screen.chunks_exact_mut(3).enumerate() {
                    let (x, y) = match i {
                        i if i == LandmarkIdx::Wrist as usize => (cx, y1),
                        i if i == LandmarkIdx::ThumbTip as usize => (x0, cy),
                        i if i == LandmarkIdx::MiddleFingerTip as usize => (cx, y0),
                        i if i == LandmarkIdx::PinkyTip as usize => (x1, cy),
                        _ => (cx, cy),
                    };
                    lm[0] = x;
                    lm[1] = y;
                }
            }

            Ok([
                Tensor::from_iter(&[1, NUM_LANDMARKS * 3], screen),
                Tensor::from_iter(&[1, 1], [presence]),
                Tensor::from_iter(&[1, 1], [1.0]),
                Tensor::from_iter(&[1, NUM_LANDMARKS * 3], vec![0.0; NUM_LANDMARKS * 3]),
            ]
            .into_iter()
            .collect())
        }

        fn extract(&self, outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
            hand_landmark::extract(outputs, estimate)
        }
    }

    /// Returns `[x0, y0, x1, y1]` enclosing the white pixels of `image`.
    fn white_bounds(image: &ImageView<'_>) -> Option<[u32; 4]> {
        let mut bounds: Option<[u32; 4]> = None;
        for y in 0..image.height() {
            for x in 0..image.width() {
                if image.get(x, y) != Color::WHITE {
                    continue;
                }
                bounds = Some(match bounds {
                    None => [x, y, x + 1, y + 1],
                    Some([x0, y0, x1, y1]) => [x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)],
                });
            }
        }
        bounds
    }

    fn tracker(palms: Vec<Detection>) -> (HandTracker, Shared) {
        let script = Arc::new(Mutex::new(Script {
            palms,
            presence: 0.9,
            fail_landmarks: false,
            palm_runs: 0,
            landmark_runs: 0,
        }));
        let tracker = HandTracker::new(FakePalms(script.clone()), FakeLandmarks(script.clone()));
        (tracker, script)
    }

    /// A palm whose hand ROI is centered on [`hand_frame`]'s hand.
    fn palm(confidence: f32, size: f32) -> Detection {
        Detection::new(confidence, Rect::from_center(96.0, 96.0, size, size))
    }

    /// A frame showing a 40x40 white "hand" centered at (96, 76).
    fn hand_frame() -> Image {
        let mut image = Image::new(FRAME, FRAME);
        image.clear(Color::BLACK);
        let mut hand = image.view_mut(Rect::from_top_left(76.0, 56.0, 40.0, 40.0));
        for y in 0..40 {
            for x in 0..40 {
                hand.set(x, y, Color::WHITE);
            }
        }
        image
    }

    fn empty_frame() -> Image {
        let mut image = Image::new(FRAME, FRAME);
        image.clear(Color::BLACK);
        image
    }

    fn runs(script: &Shared) -> (usize, usize) {
        let script = script.lock().unwrap();
        (script.palm_runs, script.landmark_runs)
    }

    #[test]
    fn detects_palms_only_below_max_hands() {
        let (mut tracker, script) = tracker(vec![palm(0.9, 40.0)]);
        tracker.set_max_hands(1);
        let frame = hand_frame();

        assert_eq!(tracker.track(&frame).unwrap().len(), 1);
        assert_eq!(runs(&script), (1, 1));
        for _ in 0..3 {
            assert_eq!(tracker.track(&frame).unwrap().len(), 1);
        }
        assert_eq!(runs(&script), (1, 4));

        // The hand leaves: it is dropped, and the next frame looks for palms again.
        assert!(tracker.track(&empty_frame()).unwrap().is_empty());
        assert_eq!(runs(&script), (1, 5));
        assert_eq!(tracker.track(&frame).unwrap().len(), 1);
        assert_eq!(runs(&script), (2, 6));
    }

    #[test]
    fn known_hand_is_not_detected_again() {
        let (mut tracker, script) = tracker(vec![palm(0.9, 40.0)]);
        let frame = hand_frame();
        for _ in 0..3 {
            let hands = tracker.track(&frame).unwrap();
            assert_eq!(hands.len(), 1);
            assert_eq!(hands[0].id, HandId(0));
        }
        // Below the default of 2 hands, so detection keeps running.
        assert_eq!(runs(&script), (3, 3));
    }

    #[test]
    fn static_mode_discards_state() {
        let (mut tracker, script) = tracker(vec![palm(0.9, 40.0)]);
        tracker.set_max_hands(1);
        tracker.set_static_mode(true);
        let frame = hand_frame();

        assert_eq!(tracker.track(&frame).unwrap()[0].id, HandId(0));
        assert_eq!(tracker.track(&frame).unwrap()[0].id, HandId(1));
        assert_eq!(runs(&script), (2, 2));

        tracker.set_static_mode(false);
        assert_eq!(tracker.track(&frame).unwrap()[0].id, HandId(1));
        assert_eq!(runs(&script), (2, 3));
    }

    #[test]
    fn drops_hands_below_tracking_threshold() {
        let (mut tracker, script) = tracker(vec![palm(0.9, 40.0)]);
        script.lock().unwrap().presence = 0.3;
        let frame = hand_frame();
        assert!(tracker.track(&frame).unwrap().is_empty());

        tracker.set_tracking_threshold(0.2);
        assert_eq!(tracker.track(&frame).unwrap().len(), 1);

        tracker.set_tracking_threshold(0.4);
        assert!(tracker.track(&frame).unwrap().is_empty());
    }

    #[test]
    fn detection_threshold_filters_palms() {
        let (mut tracker, script) = tracker(vec![palm(0.6, 40.0)]);
        tracker.set_detection_threshold(0.7);
        assert!(tracker.track(&hand_frame()).unwrap().is_empty());
        assert_eq!(runs(&script), (1, 0));
    }

    #[test]
    fn deduplicates_overlapping_hands() {
        // NMS and the seeding check keep both palms (IoU 0.25), but both trackers converge on
        // the same hand.
        let (mut tracker, _script) = tracker(vec![palm(0.9, 40.0), palm(0.8, 80.0)]);
        let frame = hand_frame();
        let hands = tracker.track(&frame).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].id, HandId(0));

        let hands = tracker.track(&frame).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].id, HandId(0));
    }

    #[test]
    fn landmarks_in_image_coordinates() {
        let (mut tracker, _script) = tracker(vec![palm(0.9, 40.0)]);
        let frame = hand_frame();
        for _ in 0..2 {
            let hands = tracker.track(&frame).unwrap();
            let lms = hands[0].landmarks();
            let pos = |idx| lms.landmark_position(idx);
            assert_relative_eq!(pos(LandmarkIdx::Wrist).x, 96.0, epsilon = 0.01);
            assert_relative_eq!(pos(LandmarkIdx::Wrist).y, 96.0, epsilon = 0.01);
            assert_relative_eq!(pos(LandmarkIdx::ThumbTip).x, 76.0, epsilon = 0.01);
            assert_relative_eq!(pos(LandmarkIdx::ThumbTip).y, 76.0, epsilon = 0.01);
            assert_relative_eq!(pos(LandmarkIdx::MiddleFingerTip).y, 56.0, epsilon = 0.01);
            assert_relative_eq!(pos(LandmarkIdx::PinkyTip).x, 116.0, epsilon = 0.01);
            assert_relative_eq!(lms.rotation_radians(), 0.0, epsilon = 1e-4);

            // The next ROI is the landmarks' bounding box, padded to twice its size.
            let roi = hands[0].roi().unwrap();
            assert_relative_eq!(roi.center().x, 96.0, epsilon = 0.01);
            assert_relative_eq!(roi.center().y, 76.0, epsilon = 0.01);
            assert_relative_eq!(roi.rect().width(), 80.0, epsilon = 0.01);
        }
    }

    #[test]
    fn landmark_error_keeps_hands() {
        let (mut tracker, script) = tracker(vec![palm(0.9, 40.0)]);
        tracker.set_max_hands(1);
        let frame = hand_frame();
        tracker.track(&frame).unwrap();

        script.lock().unwrap().fail_landmarks = true;
        assert!(tracker.track(&frame).is_err());
        script.lock().unwrap().fail_landmarks = false;

        let hands = tracker.track(&frame).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].id, HandId(0));
        assert_eq!(runs(&script).0, 1);
    }

    #[test]
    fn upright_palm_roi() {
        let det = Detection::new(0.9, Rect::from_center(100.0, 100.0, 20.0, 10.0));
        let roi = palm_roi(&det);
        assert_relative_eq!(roi.rotation_radians(), 0.0);
        assert_relative_eq!(roi.center().x, 100.0, epsilon = 1e-4);
        assert_relative_eq!(roi.center().y, 95.0, epsilon = 1e-4);
        assert_relative_eq!(roi.rect().width(), 52.0, epsilon = 1e-4);
        assert_relative_eq!(roi.rect().height(), 52.0, epsilon = 1e-4);
    }

    #[test]
    fn rotated_palm_roi() {
        // Fingers pointing right.
        let mut det = Detection::new(0.9, Rect::from_center(100.0, 100.0, 20.0, 20.0));
        det.set_angle(FRAC_PI_2);
        let roi = palm_roi(&det);
        assert_relative_eq!(roi.rotation_radians(), FRAC_PI_2);
        assert_relative_eq!(roi.center().x, 110.0, epsilon = 1e-4);
        assert_relative_eq!(roi.center().y, 100.0, epsilon = 1e-4);

        // The ROI's top edge is on the finger side.
        let top = roi.transform_out([roi.rect().width() * 0.5, 0.0]);
        assert!(top.x > roi.center().x + 20.0, "{top:?}");
    }

    #[test]
    fn overlap() {
        let a = RotatedRect::from(Rect::from_center(0.0, 0.0, 10.0, 10.0));
        let b = RotatedRect::from(Rect::from_center(1.0, 0.0, 10.0, 10.0));
        let far = RotatedRect::from(Rect::from_center(50.0, 0.0, 10.0, 10.0));

        assert!(overlaps_any(Some(&a), [&b], 0.3));
        assert!(!overlaps_any(Some(&a), [&far], 0.3));
        assert!(!overlaps_any(Some(&a), std::iter::empty(), 0.3));
        assert!(!overlaps_any(None, [&b], 0.3));
    }

    #[test]
    fn hand_id_display() {
        assert_eq!(HandId(7).to_string(), "#7");
    }
}
