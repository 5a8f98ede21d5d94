use std::{fmt, str::FromStr, sync::OnceLock};

use anyhow::{anyhow, bail};
use image::ImageBuffer;

use super::Image;

/// The pure-Rust JPEG decoders frames can be decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JpegBackend {
    /// The `zune-jpeg` crate. Usually the faster of the two.
    #[default]
    ZuneJpeg,
    /// The `jpeg-decoder` crate (through `image`). Slower, but more tolerant of unusual streams.
    JpegDecoder,
}

static BACKEND: OnceLock<JpegBackend> = OnceLock::new();

impl JpegBackend {
    /// Selects `self` as the decoder used by [`Image::decode_jpeg`] for the rest of the process.
    ///
    /// Returns an error if a backend was already selected, or an image already decoded.
    pub fn install(self) -> anyhow::Result<()> {
        BACKEND
            .set(self)
            .map_err(|_| anyhow!("JPEG backend already set to {}", Self::current()))?;
        log::debug!("using JPEG decode backend: {self}");
        Ok(())
    }

    fn current() -> Self {
        *BACKEND.get_or_init(Self::default)
    }
}

impl FromStr for JpegBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "zune-jpeg" => Ok(Self::ZuneJpeg),
            "jpeg-decoder" => Ok(Self::JpegDecoder),
            _ => bail!("unknown JPEG backend '{s}' (expected 'zune-jpeg' or 'jpeg-decoder')"),
        }
    }
}

impl fmt::Display for JpegBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZuneJpeg => "zune-jpeg",
            Self::JpegDecoder => "jpeg-decoder",
        })
    }
}

pub(super) fn decode_jpeg(data: &[u8]) -> anyhow::Result<Image> {
    let buf = match JpegBackend::current() {
        JpegBackend::JpegDecoder => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::ZuneJpeg => {
            use zune_jpeg::zune_core::colorspace::ColorSpace;
            use zune_jpeg::zune_core::options::DecoderOptions;

            let mut decomp = zune_jpeg::JpegDecoder::new_with_options(
                DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGBA),
                data,
            );
            decomp.decode_headers()?;
            match decomp.get_output_colorspace() {
                Some(ColorSpace::RGBA) => {}
                other => bail!("unsupported colorspace {other:?} (expected RGBA)"),
            }

            let (Some(size), Some((width, height))) =
                (decomp.output_buffer_size(), decomp.dimensions())
            else {
                bail!("JPEG headers decoded, but image dimensions are unknown");
            };
            let mut buf = vec![0; size];
            decomp.decode_into(&mut buf)?;
            ImageBuffer::from_raw(width.into(), height.into(), buf)
                .ok_or_else(|| anyhow!("decoder output does not match {width}x{height}"))?
        }
    };

    Ok(Image { buf })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend() {
        assert_eq!(
            "zune-jpeg".parse::<JpegBackend>().unwrap(),
            JpegBackend::ZuneJpeg
        );
        assert_eq!(
            "jpeg-decoder".parse::<JpegBackend>().unwrap(),
            JpegBackend::JpegDecoder
        );
        assert!("mozjpeg".parse::<JpegBackend>().is_err());
        assert_eq!(JpegBackend::JpegDecoder.to_string(), "jpeg-decoder");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_jpeg(b"definitely not a jpeg").is_err());
    }
}
