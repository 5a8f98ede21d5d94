//! Landmark estimation and region-of-interest tracking.

use std::iter;

use anyhow::Context;
use nalgebra::Vector3;

use crate::filter::Filter;
use crate::image::{AsImageView, AspectRatio, ImageView, Resolution, RotatedRect};
use crate::iter::zip_exact;
use crate::nn::Outputs;
use crate::timer::Timer;

/// A fixed-size list of 3D landmark positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    positions: Box<[Vector3<f32>]>,
}

impl Landmarks {
    /// Creates `len` landmarks, all at the origin.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![Vector3::zeros(); len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark {
            pos: self.positions[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + Clone + '_ {
        self.positions.iter().map(|&pos| Landmark { pos })
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Vector3<f32>] {
        &mut self.positions
    }

    pub fn map_positions(&mut self, mut f: impl FnMut(Vector3<f32>) -> Vector3<f32>) {
        for pos in self.positions.iter_mut() {
            *pos = f(*pos);
        }
    }
}

/// A single landmark position.
///
/// X and Y are in pixels, Z is a depth estimate of roughly the same scale as X, smaller values
/// being closer to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pos: Vector3<f32>,
}

impl Landmark {
    #[inline]
    pub fn position(&self) -> Vector3<f32> {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos.y
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos.z
    }
}

/// Smooths every coordinate of a fixed number of landmarks over time.
pub struct LandmarkFilter {
    filter: Box<dyn FnMut(&mut Landmarks) + Send>,
}

/// Passes landmarks through unchanged.
impl Default for LandmarkFilter {
    fn default() -> Self {
        Self {
            filter: Box::new(|_| ()),
        }
    }
}

impl LandmarkFilter {
    /// Creates a filter for batches of `num_landmarks` landmarks, filtering each coordinate as an
    /// independent stream.
    pub fn new<F>(filter: F, num_landmarks: usize) -> Self
    where
        F: Filter<f32> + Send + 'static,
        F::State: Send,
    {
        let mut states = iter::repeat_with(<[F::State; 3]>::default)
            .take(num_landmarks)
            .collect::<Vec<_>>();

        Self {
            filter: Box::new(move |landmarks| {
                for (pos, state) in zip_exact(landmarks.positions_mut(), &mut states) {
                    for (coord, state) in zip_exact(pos.iter_mut(), state) {
                        *coord = filter.filter(state, *coord);
                    }
                }
            }),
        }
    }

    /// Filters `landmarks` in place.
    ///
    /// # Panics
    ///
    /// Panics if `landmarks` has a different length than the `num_landmarks` the filter was
    /// created with.
    pub fn filter(&mut self, landmarks: &mut Landmarks) {
        (self.filter)(landmarks);
    }
}

/// Result type of a landmark [`Network`].
pub trait Estimate: Send + Sync + 'static {
    fn landmarks(&self) -> &Landmarks;

    fn landmarks_mut(&mut self) -> &mut Landmarks;

    /// Clockwise rotation of the object in radians, if the network's output allows computing it.
    ///
    /// [`LandmarkTracker`] rotates its region of interest by this angle, so that the network sees
    /// the object upright.
    fn angle_radians(&self) -> Option<f32> {
        None
    }
}

/// Estimates that report whether the object is still in view.
pub trait Confidence {
    /// Confidence in range 0.0 to 1.0 that the object is present in the input.
    fn confidence(&self) -> f32;
}

/// A network estimating landmarks of one object centered in its input.
pub trait Network: Send + Sync + 'static {
    type Output: Estimate;

    /// Returns the resolution of the images [`Network::infer`] expects.
    fn input_resolution(&self) -> Resolution;

    /// Runs the network on `image`, which has the aspect ratio of the input resolution.
    fn infer(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs>;

    /// Writes the decoded `outputs` to `estimate`, with positions in the pixel coordinates of the
    /// network's input.
    fn extract(&self, outputs: &Outputs, estimate: &mut Self::Output) -> anyhow::Result<()>;
}

/// Runs a landmark [`Network`] and maps its output back into the input image.
pub struct Estimator<E: Estimate> {
    network: Box<dyn Network<Output = E>>,
    estimate: E,
    t_infer: Timer,
    t_extract: Timer,
}

impl<E: Estimate + Default> Estimator<E> {
    pub fn new<N: Network<Output = E>>(network: N) -> Self {
        Self {
            network: Box::new(network),
            estimate: E::default(),
            t_infer: Timer::new("landmarks"),
            t_extract: Timer::new("extract"),
        }
    }
}

impl<E: Estimate> Estimator<E> {
    pub fn input_resolution(&self) -> Resolution {
        self.network.input_resolution()
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }

    /// Estimates landmarks in `image`, returning positions in `image`'s pixel coordinates.
    ///
    /// An `image` with a different aspect ratio than the network input is padded: with pixels of
    /// the surrounding image if it is a view, with transparent black otherwise.
    pub fn estimate<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<&mut E> {
        self.estimate_impl(image.as_view())
    }

    fn estimate_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<&mut E> {
        let input_res = self.network.input_resolution();
        let ratio = input_res
            .aspect_ratio()
            .context("landmark network has an empty input")?;

        let rect = image.rect().grow_to_fit_aspect(ratio);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| self.network.infer(&view))?;
        log::trace!("landmark network outputs: {:?}", outputs);

        self.t_extract
            .time(|| self.network.extract(&outputs, &mut self.estimate))?;

        let scale = rect.width() / input_res.width() as f32;
        let offset = Vector3::new(rect.x(), rect.y(), 0.0);
        self.estimate
            .landmarks_mut()
            .map_positions(|pos| pos * scale + offset);

        Ok(&mut self.estimate)
    }
}

/// Follows one object across frames by re-centering a region of interest (ROI) on its landmarks.
///
/// The tracker is seeded with [`LandmarkTracker::set_roi`], typically from a detection. Each call
/// to [`LandmarkTracker::track`] estimates landmarks inside the ROI and moves the ROI to their
/// (padded) bounding rectangle, rotated by the estimate's angle if it reports one. Tracking is lost
/// when the estimate's [`Confidence`] drops below the loss threshold.
pub struct LandmarkTracker {
    aspect_ratio: AspectRatio,
    roi: Option<RotatedRect>,
    loss_thresh: f32,
    roi_padding: f32,
    filter: LandmarkFilter,
}

impl LandmarkTracker {
    pub const DEFAULT_LOSS_THRESHOLD: f32 = 0.5;

    pub const DEFAULT_ROI_PADDING: f32 = 0.3;

    /// Creates a tracker feeding views of aspect ratio `aspect_ratio` to its estimator.
    pub fn new(aspect_ratio: AspectRatio) -> Self {
        Self {
            aspect_ratio,
            roi: None,
            loss_thresh: Self::DEFAULT_LOSS_THRESHOLD,
            roi_padding: Self::DEFAULT_ROI_PADDING,
            filter: LandmarkFilter::default(),
        }
    }

    /// Sets the confidence below which tracking is considered lost.
    pub fn set_loss_threshold(&mut self, threshold: f32) {
        self.loss_thresh = threshold;
    }

    /// Sets the margin added around the landmarks' bounding rectangle, relative to its size, on
    /// each side.
    ///
    /// # Panics
    ///
    /// Panics if `padding` is negative or NaN.
    pub fn set_roi_padding(&mut self, padding: f32) {
        assert!(padding >= 0.0, "invalid ROI padding {padding}");
        self.roi_padding = padding;
    }

    /// Smooths landmarks with `filter` after they are mapped to image coordinates.
    ///
    /// Smoothing happens in the full image, so landmarks stay put when only the ROI moves.
    pub fn set_filter(&mut self, filter: LandmarkFilter) {
        self.filter = filter;
    }

    /// Returns the current ROI, or [`None`] if tracking is lost or was never seeded.
    pub fn roi(&self) -> Option<&RotatedRect> {
        self.roi.as_ref()
    }

    /// Sets the ROI, used as-is (without padding) for the next frame.
    pub fn set_roi(&mut self, roi: impl Into<RotatedRect>) {
        self.roi = Some(roi.into());
    }

    /// Estimates landmarks inside the ROI of `full_image` and moves the ROI along.
    ///
    /// Returns `Ok(None)` if no ROI is set or if tracking was lost in this frame (which clears
    /// the ROI). Landmarks of the returned estimate are in `full_image` coordinates.
    ///
    /// All frames of one tracked object need the same resolution.
    pub fn track<'e, E, V>(
        &mut self,
        estimator: &'e mut Estimator<E>,
        full_image: &V,
    ) -> anyhow::Result<Option<&'e E>>
    where
        E: Estimate + Confidence,
        V: AsImageView,
    {
        let Some(roi) = self.roi else {
            return Ok(None);
        };

        let view_rect = roi.grow_to_fit_aspect(self.aspect_ratio);
        let estimate = estimator.estimate(&full_image.as_view().view(view_rect))?;
        if estimate.confidence() < self.loss_thresh {
            log::trace!(
                "tracking lost: confidence {} below {}",
                estimate.confidence(),
                self.loss_thresh,
            );
            self.roi = None;
            return Ok(None);
        }

        // The estimate's angle is relative to the (already rotated) view.
        let angle = roi.rotation_radians() + estimate.angle_radians().unwrap_or(0.0);

        estimate.landmarks_mut().map_positions(|pos| {
            let p = view_rect.transform_out([pos.x, pos.y]);
            Vector3::new(p.x, p.y, pos.z)
        });
        self.filter.filter(estimate.landmarks_mut());

        let updated_roi = RotatedRect::bounding(
            angle,
            estimate.landmarks().positions().iter().map(|p| p.xy()),
        )
        .context("estimate contains no landmarks")?
        .grow_rel(self.roi_padding);
        self.roi = Some(updated_roi);

        Ok(Some(&*estimate))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::filter::ema::Ema;
    use crate::image::{Image, Rect};

    /// Two landmarks at fixed positions of a 10x10 network input.
    struct Corners {
        presence: f32,
    }

    struct CornersEstimate {
        landmarks: Landmarks,
        presence: f32,
    }

    impl Default for CornersEstimate {
        fn default() -> Self {
            Self {
                landmarks: Landmarks::new(2),
                presence: 0.0,
            }
        }
    }

    impl Estimate for CornersEstimate {
        fn landmarks(&self) -> &Landmarks {
            &self.landmarks
        }

        fn landmarks_mut(&mut self) -> &mut Landmarks {
            &mut self.landmarks
        }
    }

    impl Confidence for CornersEstimate {
        fn confidence(&self) -> f32 {
            self.presence
        }
    }

    impl Network for Corners {
        type Output = CornersEstimate;

        fn input_resolution(&self) -> Resolution {
            Resolution::new(10, 10)
        }

        fn infer(&self, _image: &ImageView<'_>) -> anyhow::Result<Outputs> {
            Ok(Outputs::from_iter([]))
        }

        fn extract(&self, _: &Outputs, estimate: &mut CornersEstimate) -> anyhow::Result<()> {
            estimate.presence = self.presence;
            estimate.landmarks.positions_mut()[0] = Vector3::new(2.0, 2.0, 0.0);
            estimate.landmarks.positions_mut()[1] = Vector3::new(8.0, 8.0, 1.0);
            Ok(())
        }
    }

    #[test]
    fn map_positions() {
        let mut lms = Landmarks::new(3);
        lms.map_positions(|p| p + Vector3::new(1.0, 2.0, 3.0));
        assert!(lms.iter().all(|lm| lm.x() == 1.0 && lm.y() == 2.0 && lm.z() == 3.0));
        assert_eq!(lms.get(2).position(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn filter_smooths_each_coordinate() {
        let mut filter = LandmarkFilter::new(Ema::new(0.5), 1);
        let mut lms = Landmarks::new(1);
        filter.filter(&mut lms);

        lms.positions_mut()[0] = Vector3::new(2.0, -2.0, 4.0);
        filter.filter(&mut lms);
        let p = lms.get(0).position();
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, -1.0);
        assert_relative_eq!(p.z, 2.0);
    }

    #[test]
    fn estimator_scales_to_view() {
        let mut estimator = Estimator::new(Corners { presence: 1.0 });
        assert_eq!(estimator.input_resolution(), Resolution::new(10, 10));

        let image = Image::new(20, 20);
        let estimate = estimator.estimate(&image).unwrap();
        assert_eq!(estimate.landmarks().get(0).position(), Vector3::new(4.0, 4.0, 0.0));
        assert_eq!(estimate.landmarks().get(1).position(), Vector3::new(16.0, 16.0, 2.0));
    }

    #[test]
    fn tracker_maps_into_image() {
        let mut estimator = Estimator::new(Corners { presence: 1.0 });
        let mut tracker = LandmarkTracker::new(AspectRatio::SQUARE);
        let image = Image::new(64, 64);
        assert!(tracker.track(&mut estimator, &image).unwrap().is_none());

        tracker.set_roi(Rect::from_top_left(30.0, 10.0, 20.0, 20.0));
        let lms = tracker
            .track(&mut estimator, &image)
            .unwrap()
            .unwrap()
            .landmarks();
        assert_relative_eq!(lms.get(0).x(), 34.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(0).y(), 14.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(1).x(), 46.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(1).y(), 26.0, epsilon = 1e-4);

        // The ROI moves to the padded bounding box of the landmarks.
        let roi = tracker.roi().unwrap();
        assert_relative_eq!(roi.center().x, 40.0, epsilon = 1e-4);
        assert_relative_eq!(roi.center().y, 20.0, epsilon = 1e-4);
        assert_relative_eq!(roi.rect().width(), 12.0 * 1.6, epsilon = 1e-4);
    }

    #[test]
    fn tracker_loses_object() {
        let mut estimator = Estimator::new(Corners { presence: 0.2 });
        let mut tracker = LandmarkTracker::new(AspectRatio::SQUARE);
        tracker.set_roi(Rect::from_top_left(0.0, 0.0, 10.0, 10.0));
        let image = Image::new(16, 16);
        assert!(tracker.track(&mut estimator, &image).unwrap().is_none());
        assert!(tracker.roi().is_none());

        tracker.set_loss_threshold(0.1);
        tracker.set_roi(Rect::from_top_left(0.0, 0.0, 10.0, 10.0));
        assert!(tracker.track(&mut estimator, &image).unwrap().is_some());
    }

    #[test]
    fn smoothing_follows_moving_roi() {
        let mut estimator = Estimator::new(Corners { presence: 1.0 });
        let mut tracker = LandmarkTracker::new(AspectRatio::SQUARE);
        tracker.set_filter(LandmarkFilter::new(Ema::new(0.5), 2));
        let image = Image::new(128, 16);

        tracker.set_roi(Rect::from_top_left(0.0, 0.0, 10.0, 10.0));
        let res = tracker.track(&mut estimator, &image).unwrap().unwrap();
        assert_relative_eq!(res.landmarks().get(0).x(), 2.0, epsilon = 1e-4);

        // The object moved 100 pixels to the right. Relative to the ROI nothing changed, but the
        // smoothed landmarks only make it halfway.
        tracker.set_roi(Rect::from_top_left(100.0, 0.0, 10.0, 10.0));
        let lms = tracker
            .track(&mut estimator, &image)
            .unwrap()
            .unwrap()
            .landmarks();
        assert_relative_eq!(lms.get(0).x(), 52.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(0).y(), 2.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(1).x(), 58.0, epsilon = 1e-4);
        assert_relative_eq!(lms.get(1).y(), 8.0, epsilon = 1e-4);

        // Holding still converges on the new position.
        for _ in 0..20 {
            tracker.set_roi(Rect::from_top_left(100.0, 0.0, 10.0, 10.0));
            tracker.track(&mut estimator, &image).unwrap();
        }
        tracker.set_roi(Rect::from_top_left(100.0, 0.0, 10.0, 10.0));
        let res = tracker.track(&mut estimator, &image).unwrap().unwrap();
        assert_relative_eq!(res.landmarks().get(0).x(), 102.0, epsilon = 1e-3);
    }

    #[test]
    #[should_panic(expected = "different lengths")]
    fn filter_length_mismatch() {
        let mut filter = LandmarkFilter::new(Ema::new(0.5), 21);
        filter.filter(&mut Landmarks::new(20));
    }
}
