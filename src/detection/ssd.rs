//! Anchor generation for single-shot multibox detectors (SSDs).
//!
//! Only fixed-size anchors are supported: each cell of each feature map contributes
//! `boxes_per_cell` anchors at the cell's center, and the network regresses absolute box sizes.

use std::ops::Index;

use nalgebra::Vector2;

use crate::image::Resolution;

/// An anchor position, normalized to `0.0..=1.0` in both directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    center: Vector2<f32>,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.center.x
    }

    pub fn y_center(&self) -> f32 {
        self.center.y
    }

    /// Returns the anchor center in the pixel coordinates of an input image of size `res`.
    pub fn to_input(&self, res: Resolution) -> Vector2<f32> {
        self.center
            .component_mul(&Vector2::new(res.width() as f32, res.height() as f32))
    }
}

/// One output feature map of an SSD network.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    boxes_per_cell: u32,
    resolution: Resolution,
}

impl LayerInfo {
    /// Describes a `width`x`height` feature map with `boxes_per_cell` anchors per cell.
    ///
    /// # Panics
    ///
    /// Panics if `boxes_per_cell` is 0.
    pub const fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        assert!(boxes_per_cell != 0, "SSD layer needs at least one box per cell");
        Self {
            boxes_per_cell,
            resolution: Resolution::new(width, height),
        }
    }
}

/// All anchors of a network, in the order its outputs list them.
#[derive(Debug)]
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    pub fn calculate(layers: &[LayerInfo]) -> Self {
        let mut anchors = Vec::new();
        for layer in layers {
            let (w, h) = (layer.resolution.width(), layer.resolution.height());
            for y in 0..h {
                for x in 0..w {
                    let center = Vector2::new(
                        (x as f32 + 0.5) / w as f32,
                        (y as f32 + 0.5) / h as f32,
                    );
                    anchors.extend((0..layer.boxes_per_cell).map(|_| Anchor { center }));
                }
            }
        }

        Self { anchors }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn palm_layout() {
        let anchors = Anchors::calculate(&[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)]);
        assert_eq!(anchors.len(), 2016);

        // Boxes of one cell share their center.
        assert_eq!(anchors[0], anchors[1]);
        assert_relative_eq!(anchors[0].x_center(), 0.5 / 24.0);
        assert_relative_eq!(anchors[2].x_center(), 1.5 / 24.0);

        // The second layer starts after 24 * 24 * 2 anchors.
        let first_coarse = anchors[1152];
        assert_relative_eq!(first_coarse.x_center(), 0.5 / 12.0);
        assert_relative_eq!(first_coarse.y_center(), 0.5 / 12.0);
        assert_eq!(anchors[2015].x_center(), anchors[2010].x_center());

        assert!(anchors
            .iter()
            .all(|a| (0.0..=1.0).contains(&a.x_center()) && (0.0..=1.0).contains(&a.y_center())));
    }

    #[test]
    fn to_input() {
        let anchors = Anchors::calculate(&[LayerInfo::new(1, 2, 2)]);
        let p = anchors[3].to_input(Resolution::new(192, 192));
        assert_relative_eq!(p.x, 144.0);
        assert_relative_eq!(p.y, 144.0);
    }
}
