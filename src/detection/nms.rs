//! Non-maximum suppression.
//!
//! SSD networks report every object many times, once per nearby anchor. Non-maximum suppression
//! collapses each cluster of overlapping detections into one, either by keeping the most confident
//! detection ([`SuppressionMode::Remove`]) or by taking a confidence-weighted average of the
//! cluster ([`SuppressionMode::Average`], the default, which jitters less between frames).

use nalgebra::Vector2;

use crate::{image::Rect, iter::zip_exact, num::TotalF32};

use super::{Detection, Keypoint};

pub struct NonMaxSuppression {
    iou_thresh: f32,
    mode: SuppressionMode,
    cluster: Vec<Detection>,
    out: Vec<Detection>,
}

impl NonMaxSuppression {
    /// Detections overlapping by at least this intersection-over-union are merged by default.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            mode: SuppressionMode::Average,
            cluster: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Merges overlapping `detections`, draining the input vector.
    ///
    /// Detections are yielded in order of descending confidence.
    pub fn process(
        &mut self,
        detections: &mut Vec<Detection>,
    ) -> impl Iterator<Item = Detection> + '_ {
        self.out.clear();

        // Ascending, so that `pop` yields the most confident remaining detection.
        detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

        while let Some(seed) = detections.pop() {
            let seed_rect = seed.bounding_rect();
            let iou_thresh = self.iou_thresh;
            let overlaps = |det: &Detection| seed_rect.iou(&det.bounding_rect()) >= iou_thresh;

            match self.mode {
                SuppressionMode::Remove => {
                    detections.retain(|other| !overlaps(other));
                    self.out.push(seed);
                }
                SuppressionMode::Average => {
                    self.cluster.clear();
                    let mut i = 0;
                    while i < detections.len() {
                        if overlaps(&detections[i]) {
                            // Order of the rest is irrelevant, it's re-sorted on the next pass.
                            self.cluster.push(detections.swap_remove(i));
                        } else {
                            i += 1;
                        }
                    }
                    detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

                    let merged = weighted_average(&seed, &self.cluster);
                    self.out.push(merged);
                }
            }
        }

        self.out.drain(..)
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Averages `seed` and `others`, weighting each by its confidence.
///
/// Angles are averaged on the unit circle, so `π - ε` and `-π + ε` merge to `±π`. The result
/// keeps the seed's confidence.
fn weighted_average(seed: &Detection, others: &[Detection]) -> Detection {
    let all = || std::iter::once(seed).chain(others);

    let mut center = Vector2::<f32>::zeros();
    let mut size = Vector2::<f32>::zeros();
    let mut direction = Vector2::<f32>::zeros();
    let mut keypoints = vec![Vector2::<f32>::zeros(); seed.keypoints.len()];
    let mut total = 0.0;
    for det in all() {
        let w = det.confidence;
        total += w;
        center += det.rect.center() * w;
        size += det.rect.size() * w;
        direction += Vector2::new(det.angle.cos(), det.angle.sin()) * w;
        for (acc, kp) in zip_exact(&mut keypoints, &det.keypoints) {
            *acc += kp.pos * w;
        }
    }

    if total <= 0.0 {
        return seed.clone();
    }

    center /= total;
    size /= total;
    let mut merged = Detection::with_keypoints(
        seed.confidence,
        Rect::from_center(center.x, center.y, size.x, size.y),
        keypoints
            .into_iter()
            .map(|p| Keypoint { pos: p / total })
            .collect(),
    );
    if direction != Vector2::zeros() {
        merged.set_angle(direction.y.atan2(direction.x));
    } else {
        merged.set_angle(seed.angle);
    }
    merged
}

/// How [`NonMaxSuppression`] treats a cluster of overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionMode {
    /// Keep only the most confident detection.
    Remove,
    /// Replace the cluster with its confidence-weighted average.
    Average,
}
