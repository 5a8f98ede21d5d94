//! Real-time hand landmark detection and tracking.
//!
//! Frames are captured from a V4L2 webcam ([`video::webcam`]), palms are located with the
//! MediaPipe palm detection network, and 21 landmarks per hand are estimated and tracked with the
//! MediaPipe hand landmark network ([`hand`]). [`hand::HandDetector`] wraps all of that in a
//! frame-by-frame interface returning `[id, x, y]` pixel positions.
//!
//! # Environment Variables
//!
//! The `handtrack` binary is configured through environment variables (see [`config::Config`]):
//!
//! * `HANDTRACK_MODEL_DIR`: directory containing the ONNX networks. Defaults to `3rdparty/onnx`
//!   in the crate directory.
//! * `HANDTRACK_WEBCAM_NAME`: forces the webcam to use, by V4L2 card name. If unset, the first
//!   device that supports a compatible image format will be used.
//! * `HANDTRACK_JPEG_BACKEND`: configures the JPEG decoder to use. Allowed values are:
//!   * `zune-jpeg` (default): uses the [zune-jpeg] crate.
//!   * `jpeg-decoder`: uses the [jpeg-decoder] crate.
//! * `HANDTRACK_FULLSCREEN`: `1`/`true`/`on` (default) or `0`/`false`/`off`.
//! * `HANDTRACK_LANDMARK`: index of the landmark printed for every frame (0 to 20, default 4).
//! * `HANDTRACK_MODEL_COMPLEXITY`: `lite` or `full` (default).
//!
//! Logging is controlled by `RUST_LOG`, as usual for [env_logger].
//!
//! [zune-jpeg]: https://github.com/etemesi254/zune-jpeg
//! [jpeg-decoder]: https://github.com/image-rs/jpeg-decoder/
//! [env_logger]: https://docs.rs/env_logger

use log::LevelFilter;

pub mod config;
pub mod detection;
pub mod filter;
pub mod gui;
pub mod hand;
pub mod image;
pub mod iter;
pub mod landmark;
pub mod nn;
pub mod num;
pub mod termination;
pub mod timer;
pub mod video;


/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `handtrack` will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `wgpu` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
