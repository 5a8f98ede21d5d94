//! Image storage, views and drawing.
//!
//! - [`Image`] is an owned RGBA8 image, the format webcam frames are decoded into and the format
//!   uploaded to the GPU for display.
//! - [`ImageView`] and [`ImageViewMut`] borrow a (possibly rotated) rectangular area of an
//!   [`Image`]. Networks see hand regions through rotated views.
//! - [`draw`] holds the primitives used to visualize detections and landmarks.

pub mod draw;
mod jpeg;
mod rect;
mod resolution;


use std::{fmt, path::Path};

use anyhow::{bail, Context};
use embedded_graphics::{pixelcolor::raw::RawU32, prelude::PixelColor};
use image::{GenericImageView, ImageBuffer, Rgba, RgbaImage};

pub use jpeg::JpegBackend;
pub use rect::{Rect, RotatedRect};
pub use resolution::{AspectRatio, Resolution};

#[derive(Debug, Clone, Copy)]
enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg") => Ok(Self::Jpeg),
            Some("png") => Ok(Self::Png),
            _ => bail!(
                "unsupported image path '{}' (expected a .jpg, .jpeg or .png extension)",
                path.display()
            ),
        }
    }
}

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone)]
pub struct Image {
    // RGBA8 matches the GPU texture format, so frames can be uploaded without conversion.
    pub(crate) buf: RgbaImage,
}

impl Image {
    /// Creates a fully transparent black image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Loads a JPEG or PNG image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path)?;
        let data =
            std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        match format {
            ImageFormat::Jpeg => Self::decode_jpeg(&data),
            ImageFormat::Png => {
                let buf = image::load_from_memory_with_format(&data, image::ImageFormat::Png)?
                    .to_rgba8();
                Ok(Self { buf })
            }
        }
    }

    /// Saves the image to disk, in the format indicated by the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        ImageFormat::from_path(path)?;
        self.buf
            .save(path)
            .with_context(|| format!("failed to save '{}'", path.display()))
    }

    /// Decodes a JFIF JPEG or Motion JPEG frame.
    ///
    /// The decoder can be selected with [`JpegBackend::install`].
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        jpeg::decode_jpeg(data)
    }

    /// Creates an image from tightly packed RGBA8 data.
    pub fn from_rgba8(res: Resolution, data: &[u8]) -> anyhow::Result<Self> {
        match ImageBuffer::from_vec(res.width(), res.height(), data.to_vec()) {
            Some(buf) => Ok(Self { buf }),
            None => bail!(
                "{} bytes of RGBA data do not make up a {} image",
                data.len(),
                res
            ),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] at `(0, 0)` covering the whole image.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width() as f32, self.height() as f32)
    }

    /// Returns the color of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the image.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Borrows the area `rect` of the image.
    ///
    /// Parts of `rect` outside the image read as [`Color::NULL`].
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'_> {
        ImageView {
            image: self,
            data: ViewData::full(self).view(rect),
        }
    }

    /// Mutably borrows the area `rect` of the image.
    ///
    /// Parts of `rect` outside the image read as [`Color::NULL`] and discard writes.
    pub fn view_mut(&mut self, rect: impl Into<RotatedRect>) -> ImageViewMut<'_> {
        ImageViewMut {
            data: ViewData::full(self).view(rect),
            image: self,
        }
    }

    /// Sets every pixel to `color`.
    pub fn clear(&mut self, color: Color) {
        self.buf.pixels_mut().for_each(|pix| pix.0 = color.0);
    }

    /// Returns the raw RGBA8 pixel data, row by row.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Image", self.resolution())
    }
}

/// Location of a view inside its root [`Image`].
#[derive(Debug, Clone, Copy)]
struct ViewData {
    rect: RotatedRect,
}

impl ViewData {
    fn full(image: &Image) -> Self {
        Self {
            rect: image.rect().into(),
        }
    }

    /// Creates a sub-view; `rect` is given in the coordinates of `self`.
    fn view(&self, rect: impl Into<RotatedRect>) -> Self {
        let rect: RotatedRect = rect.into();
        let center = self.rect.transform_out(rect.center());
        let (w, h) = (rect.rect().width(), rect.rect().height());
        Self {
            rect: RotatedRect::new(
                Rect::from_center(center.x, center.y, w, h),
                self.rect.rotation_radians() + rect.rotation_radians(),
            ),
        }
    }

    fn width(&self) -> u32 {
        self.rect.rect().width() as u32
    }

    fn height(&self) -> u32 {
        self.rect.rect().height() as u32
    }

    /// Maps view pixel `(x, y)` to the root image's pixel, if it lies inside the image.
    fn image_coord(&self, x: u32, y: u32, image: &Image) -> Option<(u32, u32)> {
        // Sample at pixel centers.
        let p = self.rect.transform_out([x as f32 + 0.5, y as f32 + 0.5]);
        let (x, y) = ((p.x - 0.5).round(), (p.y - 0.5).round());
        if x < 0.0 || y < 0.0 || x >= image.width() as f32 || y >= image.height() as f32 {
            return None;
        }
        Some((x as u32, y as u32))
    }

    fn get(&self, x: u32, y: u32, image: &Image) -> Color {
        self.image_coord(x, y, image)
            .map_or(Color::NULL, |(x, y)| image.get(x, y))
    }
}

/// An immutable view of an area of an [`Image`].
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    image: &'a Image,
    data: ViewData,
}

impl<'a> ImageView<'a> {
    #[inline]
    pub fn width(&self) -> u32 {
        self.data.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] at `(0, 0)` of the size of this view.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(
            0.0,
            0.0,
            self.data.rect.rect().width(),
            self.data.rect.rect().height(),
        )
    }

    /// Returns the color at view coordinates `(x, y)`.
    ///
    /// Coordinates outside of the underlying image read as [`Color::NULL`].
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.data.get(x, y, self.image)
    }

    /// Creates a sub-view; `rect` is in the coordinates of `self` and may extend past it.
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'a> {
        ImageView {
            image: self.image,
            data: self.data.view(rect),
        }
    }

    /// Copies the viewed pixels into a new [`Image`].
    pub fn to_image(&self) -> Image {
        let view = *self;
        Image {
            buf: ImageBuffer::from_fn(self.width(), self.height(), |x, y| {
                Rgba(view.get(x, y).0)
            }),
        }
    }
}

impl fmt::Debug for ImageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ImageView", self.resolution())
    }
}

/// A mutable view of an area of an [`Image`].
pub struct ImageViewMut<'a> {
    image: &'a mut Image,
    data: ViewData,
}

impl<'a> ImageViewMut<'a> {
    #[inline]
    pub fn width(&self) -> u32 {
        self.data.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.data.get(x, y, self.image)
    }

    /// Writes `color` at view coordinates `(x, y)`; writes outside the image are dropped.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        if let Some((x, y)) = self.data.image_coord(x, y, self.image) {
            self.image.buf[(x, y)] = Rgba(color.0);
        }
    }

    /// Borrows an identical view with a shorter lifetime.
    pub fn reborrow(&mut self) -> ImageViewMut<'_> {
        ImageViewMut {
            image: self.image,
            data: self.data,
        }
    }

    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'_> {
        ImageView {
            image: self.image,
            data: self.data.view(rect),
        }
    }

    pub fn view_mut(&mut self, rect: impl Into<RotatedRect>) -> ImageViewMut<'_> {
        ImageViewMut {
            image: self.image,
            data: self.data.view(rect),
        }
    }
}

impl fmt::Debug for ImageViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ImageViewMut", self.resolution())
    }
}

/// An 8-bit sRGB color with non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black.
    pub const NULL: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const BLUE: Self = Self([0, 0, 255, 255]);
    pub const YELLOW: Self = Self([255, 255, 0, 255]);
    pub const MAGENTA: Self = Self([255, 0, 255, 255]);
    pub const CYAN: Self = Self([0, 255, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}

impl PixelColor for Color {
    type Raw = RawU32;
}

/// Types that can be read as an [`ImageView`].
///
/// Implemented by [`Image`] and both view types, so that networks and drawing code accept all
/// of them.
pub trait AsImageView {
    fn as_view(&self) -> ImageView<'_>;
}

/// Types that can be written through an [`ImageViewMut`].
pub trait AsImageViewMut: AsImageView {
    fn as_view_mut(&mut self) -> ImageViewMut<'_>;
}

impl AsImageView for Image {
    fn as_view(&self) -> ImageView<'_> {
        self.view(self.rect())
    }
}

impl AsImageViewMut for Image {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        let rect = self.rect();
        self.view_mut(rect)
    }
}

impl AsImageView for ImageView<'_> {
    fn as_view(&self) -> ImageView<'_> {
        *self
    }
}

impl AsImageView for ImageViewMut<'_> {
    fn as_view(&self) -> ImageView<'_> {
        ImageView {
            image: self.image,
            data: self.data,
        }
    }
}

impl AsImageViewMut for ImageViewMut<'_> {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        self.reborrow()
    }
}

impl<V: AsImageView> AsImageView for &V {
    fn as_view(&self) -> ImageView<'_> {
        (**self).as_view()
    }
}

impl<V: AsImageView> AsImageView for &mut V {
    fn as_view(&self) -> ImageView<'_> {
        (**self).as_view()
    }
}

impl<V: AsImageViewMut> AsImageViewMut for &mut V {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        (**self).as_view_mut()
    }
}

impl GenericImageView for ImageView<'_> {
    type Pixel = Rgba<u8>;

    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    fn bounds(&self) -> (u32, u32, u32, u32) {
        (0, 0, self.width(), self.height())
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        Rgba(self.get(x, y).0)
    }
}
