//! Drawing primitives for visualizing hand landmarks.
//!
//! Every function returns a guard that performs the drawing when dropped, so options can be
//! chained onto the call: `draw::line(&mut img, 0, 0, 10, 10).color(Color::RED);`.

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
};

use super::{AsImageViewMut, Color, ImageViewMut};

/// Guard returned by [`line`][line()].
pub struct DrawLine<'a> {
    image: ImageViewMut<'a>,
    start: Point,
    end: Point,
    color: Color,
    stroke_width: u32,
}

impl DrawLine<'_> {
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the stroke width (1 by default).
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawLine<'_> {
    fn drop(&mut self) {
        draw(
            Line::new(self.start, self.end)
                .into_styled(PrimitiveStyle::with_stroke(self.color, self.stroke_width)),
            &mut self.image,
        );
    }
}

/// Guard returned by [`filled_circle`].
pub struct DrawCircle<'a> {
    image: ImageViewMut<'a>,
    x: i32,
    y: i32,
    diameter: u32,
    color: Color,
}

impl DrawCircle<'_> {
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }
}

impl Drop for DrawCircle<'_> {
    fn drop(&mut self) {
        let circle = Circle::with_center(Point::new(self.x, self.y), self.diameter);
        draw(
            circle.into_styled(PrimitiveStyle::with_fill(self.color)),
            &mut self.image,
        );
    }
}

/// Draws a line from `(start_x, start_y)` to `(end_x, end_y)`.
pub fn line<I: AsImageViewMut>(
    image: &mut I,
    start_x: i32,
    start_y: i32,
    end_x: i32,
    end_y: i32,
) -> DrawLine<'_> {
    DrawLine {
        image: image.as_view_mut(),
        start: Point::new(start_x, start_y),
        end: Point::new(end_x, end_y),
        color: Color::BLUE,
        stroke_width: 1,
    }
}

/// Draws a solid disk of radius `radius` centered on `(x, y)`.
pub fn filled_circle<I: AsImageViewMut>(
    image: &mut I,
    x: i32,
    y: i32,
    radius: u32,
) -> DrawCircle<'_> {
    DrawCircle {
        image: image.as_view_mut(),
        x,
        y,
        diameter: radius * 2 + 1,
        color: Color::MAGENTA,
    }
}

fn draw(drawable: impl Drawable<Color = Color>, image: &mut ImageViewMut<'_>) {
    match drawable.draw(&mut Target(image.reborrow())) {
        Ok(_) => {}
        Err(infallible) => match infallible {},
    }
}

/// Adapts an [`ImageViewMut`] to `embedded-graphics`, discarding pixels outside the view.
struct Target<'a>(ImageViewMut<'a>);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point::zero(),
            size: Size::new(self.0.width(), self.0.height()),
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Color;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && (point.x as u32) < self.0.width()
                && point.y >= 0
                && (point.y as u32) < self.0.height()
            {
                self.0.set(point.x as u32, point.y as u32, color);
            }
        }

        Ok(())
    }
}
