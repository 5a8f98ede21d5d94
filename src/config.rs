//! Runtime configuration from environment variables.
//!
//! See the [crate-level documentation](crate#environment-variables) for the list of variables.

use std::{env, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};

use crate::hand::{default_model_dir, landmark::NUM_LANDMARKS, ModelComplexity};
use crate::image::JpegBackend;

pub const MODEL_DIR: &str = "HANDTRACK_MODEL_DIR";
pub const WEBCAM_NAME: &str = "HANDTRACK_WEBCAM_NAME";
pub const JPEG_BACKEND: &str = "HANDTRACK_JPEG_BACKEND";
pub const FULLSCREEN: &str = "HANDTRACK_FULLSCREEN";
pub const LANDMARK: &str = "HANDTRACK_LANDMARK";
pub const MODEL_COMPLEXITY: &str = "HANDTRACK_MODEL_COMPLEXITY";

/// Landmark printed for every frame unless overridden: the thumb tip.
pub const DEFAULT_LANDMARK: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing the ONNX networks.
    pub model_dir: PathBuf,
    /// V4L2 card name of the webcam to open; [`None`] opens the first usable one.
    pub webcam_name: Option<String>,
    pub jpeg_backend: JpegBackend,
    /// Whether the preview window is shown in fullscreen.
    pub fullscreen: bool,
    /// Index of the landmark printed for every frame.
    pub landmark: usize,
    pub model_complexity: ModelComplexity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir().to_path_buf(),
            webcam_name: None,
            jpeg_backend: JpegBackend::default(),
            fullscreen: true,
            landmark: DEFAULT_LANDMARK,
            model_complexity: ModelComplexity::default(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// Unset variables take their default value. Malformed ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e @ env::VarError::NotUnicode(_)) => Err(e).with_context(|| name.to_string()),
        })
    }

    fn from_lookup<F>(mut lookup: F) -> anyhow::Result<Self>
    where
        F: FnMut(&str) -> anyhow::Result<Option<String>>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(MODEL_DIR)? {
            config.model_dir = dir.into();
        }
        config.webcam_name = lookup(WEBCAM_NAME)?.filter(|name| !name.is_empty());
        if let Some(backend) = lookup(JPEG_BACKEND)? {
            config.jpeg_backend = parse(JPEG_BACKEND, &backend)?;
        }
        if let Some(value) = lookup(FULLSCREEN)? {
            config.fullscreen =
                parse_flag(&value).with_context(|| format!("invalid {FULLSCREEN}"))?;
        }
        if let Some(value) = lookup(LANDMARK)? {
            let landmark: usize = parse(LANDMARK, &value)?;
            if landmark >= NUM_LANDMARKS {
                bail!(
                    "invalid {LANDMARK}: landmark {landmark} does not exist (expected 0..{NUM_LANDMARKS})"
                );
            }
            config.landmark = landmark;
        }
        if let Some(value) = lookup(MODEL_COMPLEXITY)? {
            config.model_complexity = parse(MODEL_COMPLEXITY, &value)?;
        }

        Ok(config)
    }
}

fn parse<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    anyhow::Error: From<T::Err>,
{
    T::from_str(value.trim())
        .map_err(anyhow::Error::from)
        .with_context(|| format!("invalid {name} '{value}'"))
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => bail!("'{value}' is not a boolean (expected one of 1/true/on or 0/false/off)"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        Config::from_lookup(|name| Ok(vars.get(name).map(|v| v.to_string())))
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.landmark, 4);
        assert!(config.fullscreen);
        assert_eq!(config.model_complexity, ModelComplexity::Full);
        assert_eq!(config.webcam_name, None);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            (MODEL_DIR, "/opt/models"),
            (WEBCAM_NAME, "HD Pro Webcam C920"),
            (JPEG_BACKEND, "jpeg-decoder"),
            (FULLSCREEN, "Off"),
            (LANDMARK, " 8 "),
            (MODEL_COMPLEXITY, "lite"),
        ])
        .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.webcam_name.as_deref(), Some("HD Pro Webcam C920"));
        assert_eq!(config.jpeg_backend, JpegBackend::JpegDecoder);
        assert!(!config.fullscreen);
        assert_eq!(config.landmark, 8);
        assert_eq!(config.model_complexity, ModelComplexity::Lite);
    }

    #[test]
    fn empty_webcam_name_means_any() {
        let config = config(&[(WEBCAM_NAME, "")]).unwrap();
        assert_eq!(config.webcam_name, None);
    }

    #[test]
    fn flags() {
        for on in ["1", "true", "ON", "yes"] {
            assert!(parse_flag(on).unwrap(), "{on}");
        }
        for off in ["0", "false", "off", " No "] {
            assert!(!parse_flag(off).unwrap(), "{off}");
        }
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn invalid_values() {
        let err = config(&[(LANDMARK, "21")]).unwrap_err();
        assert!(format!("{err:#}").contains(LANDMARK), "{err:#}");
        assert!(config(&[(LANDMARK, "-1")]).is_err());
        assert!(config(&[(JPEG_BACKEND, "mozjpeg")]).is_err());
        assert!(config(&[(MODEL_COMPLEXITY, "2")]).is_err());
        assert!(config(&[(FULLSCREEN, "")]).is_err());
    }

    #[test]
    fn lookup_errors_propagate() {
        let res = Config::from_lookup(|name| {
            if name == LANDMARK {
                bail!("not unicode")
            } else {
                Ok(None)
            }
        });
        assert!(res.is_err());
    }
}
