//! Palm detection.

use std::path::Path;

use anyhow::{ensure, Context};
use nalgebra::{Rotation2, Vector2};

use crate::detection::{
    self,
    ssd::{Anchor, Anchors, LayerInfo},
    Detection,
};
use crate::image::{ImageView, Rect, Resolution};
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};
use crate::num::sigmoid;

/// Feature maps of the palm detection network: 24x24 cells with 2 anchors each, then 12x12 cells
/// with 6 anchors each.
const LAYERS: &[LayerInfo] = &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// Values per box: center, size and 7 keypoints.
const BOX_PARAMS: usize = 18;

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

/// The palm detection network, in its lite or full variant.
///
/// The networks are heavy compared to the landmark network; [`crate::hand::tracking::HandTracker`]
/// only runs them while it is looking for more hands.
pub struct PalmDetectionNetwork {
    cnn: Cnn,
    anchors: Anchors,
}

impl PalmDetectionNetwork {
    /// Loads the network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .load()
            .with_context(|| format!("failed to load palm detection network '{}'", path.display()))?;
        Self::from_network(nn)
    }

    fn from_network(nn: NeuralNetwork) -> anyhow::Result<Self> {
        let anchors = Anchors::calculate(LAYERS);
        let outputs = nn.outputs();
        ensure!(
            outputs.len() == 2,
            "palm detection network has {} outputs, expected 2",
            outputs.len()
        );
        let cnn = Cnn::with_detected_layout(nn, ColorMapper::linear(0.0..=1.0))?;
        log::debug!(
            "palm detection input: {} {:?}",
            cnn.input_resolution(),
            cnn.input_shape()
        );
        Ok(Self { cnn, anchors })
    }
}

impl detection::Network for PalmDetectionNetwork {
    fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    fn infer(&self, image: &ImageView<'_>) -> anyhow::Result<Outputs> {
        self.cnn.estimate(image)
    }

    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        extract_outputs(
            &self.anchors,
            self.cnn.input_resolution(),
            outputs,
            threshold,
            detections,
        )
    }
}

fn extract_outputs(
    anchors: &Anchors,
    input_res: Resolution,
    outputs: &Outputs,
    threshold: f32,
    detections: &mut Vec<Detection>,
) -> anyhow::Result<()> {
    ensure!(
        outputs.len() == 2,
        "palm detection produced {} outputs, expected 2",
        outputs.len()
    );
    let boxes = &outputs[0];
    let scores = &outputs[1];
    boxes.expect_shape(&[1, anchors.len(), BOX_PARAMS])?;
    scores.expect_shape(&[1, anchors.len(), 1])?;

    let boxes = boxes.index([0]);
    for (index, score) in scores.index([0]).as_slice().iter().enumerate() {
        let confidence = sigmoid(*score);
        if confidence < threshold {
            continue;
        }

        let params = boxes.index([index]).as_slice();
        detections.push(extract_detection(&anchors[index], input_res, params, confidence));
    }

    Ok(())
}

fn extract_detection(
    anchor: &Anchor,
    input_res: Resolution,
    params: &[f32],
    confidence: f32,
) -> Detection {
    let offset = anchor.to_input(input_res);
    let center = Vector2::new(params[0], params[1]) + offset;
    let keypoints = params[4..]
        .chunks_exact(2)
        .map(|p| detection::Keypoint::new(p[0] + offset.x, p[1] + offset.y))
        .collect::<Vec<_>>();

    let mut det = Detection::with_keypoints(
        confidence,
        Rect::from_center(center.x, center.y, params[2], params[3]),
        keypoints,
    );

    let finger = det.keypoints()[Keypoint::MiddleFingerMcp as usize].position();
    let wrist = det.keypoints()[Keypoint::Wrist as usize].position();
    det.set_angle(Rotation2::rotation_between(&Vector2::y(), &(wrist - finger)).angle());

    det
}
