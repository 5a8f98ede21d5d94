//! Generic single-class object detection.
//!
//! A [`Detector`] runs a [`Network`] on an image, lets it extract candidate [`Detection`]s,
//! merges duplicates with [`nms::NonMaxSuppression`] and maps the survivors back into the
//! coordinate system of the input image.

pub mod nms;
pub mod ssd;

use anyhow::Context;
use nalgebra::Vector2;

use crate::image::{AsImageView, ImageView, Rect, Resolution};
use crate::nn::Outputs;
use crate::timer::Timer;

use self::nms::NonMaxSuppression;

/// A network that locates objects in an image.
pub trait Network: Send + Sync + 'static {
    /// Returns the resolution of the images [`Network::infer`] expects.
    fn input_resolution(&self) -> Resolution;

    /// Runs the network on `image`, which has the aspect ratio of the input resolution.
    fn infer(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs>;

    /// Appends every detection with a confidence of at least `threshold` to `detections`.
    ///
    /// Positions are in the pixel coordinates of the network's input image.
    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()>;
}

/// Runs a detection [`Network`] and post-processes its output.
pub struct Detector {
    network: Box<dyn Network>,
    detections: Vec<Detection>,
    thresh: f32,
    nms: NonMaxSuppression,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
}

impl Detector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new<N: Network>(network: N) -> Self {
        Self {
            network: Box::new(network),
            detections: Vec::new(),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
            t_infer: Timer::new("detect"),
            t_extract: Timer::new("extract"),
            t_nms: Timer::new("nms"),
        }
    }

    pub fn input_resolution(&self) -> Resolution {
        self.network.input_resolution()
    }

    /// Sets the minimum confidence of reported detections.
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    pub fn threshold(&self) -> f32 {
        self.thresh
    }

    /// Detects objects in `image`, returning them in `image`'s pixel coordinates.
    pub fn detect<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<&[Detection]> {
        self.detect_impl(image.as_view())
    }

    fn detect_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<&[Detection]> {
        self.detections.clear();

        let input_res = self.network.input_resolution();
        let ratio = input_res
            .aspect_ratio()
            .context("detection network has an empty input")?;

        // Pad the image to the network's aspect ratio; padding reads as transparent black.
        let rect = image.rect().grow_to_fit_aspect(ratio);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| self.network.infer(&view))?;
        log::trace!("detection network outputs: {:?}", outputs);

        self.t_extract.time(|| {
            self.network
                .extract(&outputs, self.thresh, &mut self.detections)
        })?;

        self.t_nms.time(|| {
            let merged = self.nms.process(&mut self.detections).collect::<Vec<_>>();
            self.detections = merged;
        });

        // Network input coordinates -> padded view -> `image`.
        let scale = rect.width() / input_res.width() as f32;
        let offset = rect.top_left();
        for det in &mut self.detections {
            let center = det.rect.center() * scale + offset;
            det.rect = Rect::from_center(
                center.x,
                center.y,
                det.rect.width() * scale,
                det.rect.height() * scale,
            );
            for kp in &mut det.keypoints {
                kp.pos = kp.pos * scale + offset;
            }
        }

        Ok(&self.detections)
    }

    /// Returns the timers of each detection stage, for logging.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

/// A detected object.
///
/// The confidence is in range 0.0 to 1.0; [`nms::SuppressionMode::Average`] uses it as a weight.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    angle: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the object's rotation in radians, clockwise on screen; 0.0 if the network does
    /// not estimate one.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    /// Returns the axis-aligned rectangle enclosing the object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }
}

/// A point of interest reported alongside a [`Detection`].
///
/// What each keypoint means depends on the network and the keypoint's index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pos: Vector2<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            pos: Vector2::new(x, y),
        }
    }

    pub fn x(&self) -> f32 {
        self.pos.x
    }

    pub fn y(&self) -> f32 {
        self.pos.y
    }

    pub fn position(&self) -> Vector2<f32> {
        self.pos
    }
}
