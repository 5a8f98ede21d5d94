//! Rectangle types.
//!
//! Used for image views, palm detections and hand regions of interest.

use std::fmt;

use nalgebra::{Rotation2, Vector2};

use super::AspectRatio;

type Vec2 = Vector2<f32>;

/// An axis-aligned rectangle with floating-point position and size.
///
/// Width and height may be zero, but never negative.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Vec2,
    size: Vec2,
}

impl Rect {
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Vec2::new(x_center, y_center),
            size: Vec2::new(width, height),
        }
    }

    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_center(x + width * 0.5, y + height * 0.5, width, height)
    }

    /// Computes the axis-aligned bounding rectangle of `points`.
    ///
    /// Returns [`None`] if `points` is empty.
    pub fn bounding<T: Into<Vec2>>(points: impl IntoIterator<Item = T>) -> Option<Self> {
        let mut points = points.into_iter().map(Into::<Vec2>::into);
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
        Some(Self::span(min, max))
    }

    fn span(min: Vec2, max: Vec2) -> Self {
        assert!(
            min.x <= max.x && min.y <= max.y,
            "invalid rectangle span {min:?}..{max:?}"
        );
        Self {
            center: (min + max) * 0.5,
            size: max - min,
        }
    }

    /// Scales width and height by `scale`, keeping the center in place.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Adds a margin of `amount` times the width/height to each side.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * (1.0 + 2.0 * amount),
        }
    }

    /// Symmetrically enlarges one dimension so that the result has the aspect ratio `target`.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target: AspectRatio) -> Self {
        let mut res = *self;
        let target_width = self.height() * target.as_f32();
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / target.as_f32();
        }
        res
    }

    #[inline]
    pub fn top_left(&self) -> Vec2 {
        self.center - self.size * 0.5
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.top_left().x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.top_left().y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.size
    }

    /// Moves the top left corner to `(x, y)`.
    #[must_use]
    pub fn move_to(&self, x: f32, y: f32) -> Self {
        Self::from_top_left(x, y, self.width(), self.height())
    }

    /// Returns the overlapping area of `self` and `other`, or [`None`] if they don't overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.top_left().sup(&other.top_left());
        let max = (self.top_left() + self.size).inf(&(other.top_left() + other.size));
        if min.x > max.x || min.y > max.y {
            return None;
        }
        Some(Self::span(min, max))
    }

    fn intersection_area(&self, other: &Rect) -> f32 {
        self.intersection(other).map_or(0.0, |r| r.area())
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    ///
    /// Two empty rectangles have an IoU of 0.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Returns whether `point` lies inside of `self` or on its border.
    pub fn contains_point(&self, point: impl Into<Vec2>) -> bool {
        let p = point.into();
        let (min, max) = (self.top_left(), self.top_left() + self.size);
        min.x <= p.x && p.x <= max.x && min.y <= p.y && p.y <= max.y
    }

    /// Returns the corners in order top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Vec2; 4] {
        let tl = self.top_left();
        let (w, h) = (self.width(), self.height());
        [
            tl,
            tl + Vec2::new(w, 0.0),
            tl + Vec2::new(w, h),
            tl + Vec2::new(0.0, h),
        ]
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.center.x, self.center.y, self.size.x, self.size.y
        )
    }
}

/// A [`Rect`] rotated around its center.
///
/// Hand regions of interest are rotated so that the fingers point up inside the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    /// Creates a rotated rectangle.
    ///
    /// `radians` is the clockwise rotation as seen in image coordinates (Y pointing down).
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Computes the tightest rectangle with rotation `radians` containing all `points`.
    ///
    /// Returns [`None`] if `points` is empty.
    pub fn bounding<T: Into<Vec2>>(
        radians: f32,
        points: impl IntoIterator<Item = T>,
    ) -> Option<Self> {
        // Undo the rotation, take the axis-aligned bounds there, rotate the center back.
        let rot = Rotation2::new(radians);
        let inv = rot.inverse();
        let aligned = Rect::bounding(points.into_iter().map(|p| inv * Into::<Vec2>::into(p)))?;
        let center = rot * aligned.center();
        Some(Self::new(
            Rect::from_center(center.x, center.y, aligned.width(), aligned.height()),
            radians,
        ))
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    /// Returns the underlying non-rotated rectangle.
    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.rect.center()
    }

    /// Applies `f` to the underlying non-rotated rectangle.
    #[must_use]
    pub fn map(mut self, f: impl FnOnce(Rect) -> Rect) -> Self {
        self.rect = f(self.rect);
        self
    }

    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.map(|r| r.grow_rel(amount))
    }

    #[must_use]
    pub fn grow_to_fit_aspect(&self, target: AspectRatio) -> Self {
        self.map(|r| r.grow_to_fit_aspect(target))
    }

    /// Returns the corners in the parent coordinate system.
    ///
    /// The order matches [`Rect::corners`] of the non-rotated rectangle.
    pub fn rotated_corners(&self) -> [Vec2; 4] {
        let rot = Rotation2::new(self.radians);
        let center = self.rect.center();
        self.rect.corners().map(|p| center + rot * (p - center))
    }

    /// Returns the axis-aligned bounding rectangle of the rotated corners.
    pub fn bounding_rect(&self) -> Rect {
        let [a, b, c, d] = self.rotated_corners();
        let (min, max) = (
            a.inf(&b).inf(&c).inf(&d),
            a.sup(&b).sup(&c).sup(&d),
        );
        Rect::span(min, max)
    }

    /// Approximates the IoU of two rotated rectangles by that of their axis-aligned bounds.
    pub fn iou(&self, other: &RotatedRect) -> f32 {
        self.bounding_rect().iou(&other.bounding_rect())
    }

    pub fn contains_point(&self, point: impl Into<Vec2>) -> bool {
        let p = self.transform_in(point);
        self.rect.move_to(0.0, 0.0).contains_point(p)
    }

    /// Maps a point from the parent coordinate system into the rectangle's own system, whose
    /// origin is the rectangle's top left corner.
    pub fn transform_in(&self, point: impl Into<Vec2>) -> Vec2 {
        let half = self.rect.size() * 0.5;
        let rel = point.into() - self.rect.top_left() - half;
        Rotation2::new(-self.radians) * rel + half
    }

    /// Inverse of [`RotatedRect::transform_in`].
    pub fn transform_out(&self, point: impl Into<Vec2>) -> Vec2 {
        let half = self.rect.size() * 0.5;
        Rotation2::new(self.radians) * (point.into() - half) + half + self.rect.top_left()
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}
