//! Hand landmark estimation.

use std::path::Path;

use anyhow::{ensure, Context};
use nalgebra::{Rotation2, Vector2, Vector3};

use crate::image::{draw, AsImageViewMut, Color, ImageView, ImageViewMut, Resolution};
use crate::iter::zip_exact;
use crate::landmark::{Confidence, Estimate, Landmarks, Network};
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};

/// Number of landmarks estimated per hand.
pub const NUM_LANDMARKS: usize = 21;

/// Landmarks and scores estimated by [`LandmarkNetwork`] for one hand.
#[derive(Debug, Clone)]
pub struct LandmarkResult {
    landmarks: Landmarks,
    presence: f32,
    raw_handedness: f32,
}

impl Default for LandmarkResult {
    fn default() -> Self {
        Self {
            landmarks: Landmarks::new(NUM_LANDMARKS),
            presence: 0.0,
            raw_handedness: 0.0,
        }
    }
}

impl LandmarkResult {
    /// Returns the 3D landmark positions in the input image's coordinate system.
    pub fn landmark_positions(&self) -> impl Iterator<Item = Vector3<f32>> + '_ {
        self.landmarks.positions().iter().copied()
    }

    /// Returns a landmark's position in the input image's coordinate system.
    pub fn landmark_position(&self, index: LandmarkIdx) -> Vector3<f32> {
        self.landmarks.positions()[index as usize]
    }

    /// Computes the center of the palm by averaging the landmarks surrounding it.
    pub fn palm_center(&self) -> Vector3<f32> {
        let sum = PALM_LANDMARKS
            .iter()
            .map(|&lm| self.landmark_position(lm))
            .sum::<Vector3<f32>>();
        sum / PALM_LANDMARKS.len() as f32
    }

    /// Computes the clockwise rotation of the hand compared to an upright position.
    ///
    /// A rotation of 0° means that the fingers point upwards.
    pub fn rotation_radians(&self) -> f32 {
        let finger = self.landmark_position(LandmarkIdx::MiddleFingerMcp).xy();
        let wrist = self.landmark_position(LandmarkIdx::Wrist).xy();
        Rotation2::rotation_between(&Vector2::y(), &(wrist - finger)).angle()
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the camera image is passed in unmirrored. Only meaningful when the
    /// presence is high.
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Draws the hand skeleton: connections between the landmarks, and a marker on each landmark.
    pub fn draw<I: AsImageViewMut>(&self, target: &mut I) {
        self.draw_impl(&mut target.as_view_mut());
    }

    fn draw_impl(&self, target: &mut ImageViewMut<'_>) {
        for &(a, b) in CONNECTIVITY {
            let a = self.landmark_position(a);
            let b = self.landmark_position(b);
            draw::line(target, a.x as i32, a.y as i32, b.x as i32, b.y as i32)
                .color(Color::from_rgb8(224, 224, 224))
                .stroke_width(2);
        }
        for pos in self.landmark_positions() {
            draw::filled_circle(target, pos.x as i32, pos.y as i32, 3).color(Color::RED);
        }
    }
}

impl Estimate for LandmarkResult {
    #[inline]
    fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    #[inline]
    fn landmarks_mut(&mut self) -> &mut Landmarks {
        &mut self.landmarks
    }

    fn angle_radians(&self) -> Option<f32> {
        Some(self.rotation_radians())
    }
}

impl Confidence for LandmarkResult {
    /// Returns the presence score: the likelihood that a hand is in view at all.
    #[inline]
    fn confidence(&self) -> f32 {
        self.presence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Names for the hand landmarks, in the order the network outputs them.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

const PALM_LANDMARKS: &[LandmarkIdx] = {
    use LandmarkIdx::*;
    &[
        Wrist,
        ThumbCmc,
        IndexFingerMcp,
        MiddleFingerMcp,
        RingFingerMcp,
        PinkyMcp,
    ]
};

/// The edges of the hand skeleton.
pub const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Surround the palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// The hand landmark network, in its lite or full variant.
///
/// The full network takes about 25-30% longer to run than the lite one (on CPU).
pub struct LandmarkNetwork {
    cnn: Cnn,
}

impl LandmarkNetwork {
    /// Loads the network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .load()
            .with_context(|| format!("failed to load hand landmark network '{}'", path.display()))?;
        ensure!(
            nn.outputs().len() == 4,
            "hand landmark network has {} outputs, expected 4",
            nn.outputs().len()
        );
        let cnn = Cnn::with_detected_layout(nn, ColorMapper::linear(0.0..=1.0))?;
        log::debug!(
            "hand landmark input: {} {:?}",
            cnn.input_resolution(),
            cnn.input_shape()
        );
        Ok(Self { cnn })
    }
}

impl Network for LandmarkNetwork {
    type Output = LandmarkResult;

    fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    fn infer(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs> {
        self.cnn.estimate(image)
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
        extract(outputs, estimate)
    }
}

pub(super) fn extract(outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
    ensure!(
        outputs.len() == 4,
        "hand landmark network produced {} outputs, expected 4",
        outputs.len()
    );
    let screen_landmarks = &outputs[0];
    let presence = &outputs[1];
    let handedness = &outputs[2];
    let metric_landmarks = &outputs[3];

    screen_landmarks.expect_shape(&[1, NUM_LANDMARKS * 3])?;
    presence.expect_shape(&[1, 1])?;
    handedness.expect_shape(&[1, 1])?;
    metric_landmarks.expect_shape(&[1, NUM_LANDMARKS * 3])?;

    estimate.presence = presence.index([0, 0]).as_singular();
    estimate.raw_handedness = handedness.index([0, 0]).as_singular();
    for (coords, out) in zip_exact(
        screen_landmarks.index([0]).as_slice().chunks_exact(3),
        estimate.landmarks.positions_mut(),
    ) {
        *out = Vector3::new(coords[0], coords[1], coords[2]);
    }

    Ok(())
}
