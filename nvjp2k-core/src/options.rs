//! Decoder configuration.
//!
//! The host hands decoders a flat string map. Two keys matter here:
//! - `"rgb"`: `"1"` forces packed RGB output, anything else leaves it off
//! - `"planar"`: `"-1"` (or any negative) auto, `"0"` packed, positive planar

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Jp2kError, Result};
use crate::format::PixelFormat;

pub const OPT_RGB: &str = "rgb";
pub const OPT_PLANAR: &str = "planar";

/// String-valued options as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(HashMap<String, String>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of string values, e.g. `{"rgb":"1"}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// How decoded samples should be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackingMode {
    /// Packed for RGB requests, planar otherwise
    #[default]
    Auto,
    /// One interleaved buffer
    Packed,
    /// One buffer per component
    Planar,
}

impl PackingMode {
    fn from_option(value: &str) -> Result<Self> {
        let n: i32 = value.trim().parse().map_err(|_| Jp2kError::InvalidOption {
            key: OPT_PLANAR.to_string(),
            value: value.to_string(),
        })?;
        Ok(match n {
            n if n < 0 => Self::Auto,
            0 => Self::Packed,
            _ => Self::Planar,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub force_rgb: bool,
    pub packing: PackingMode,
}

impl DecoderConfig {
    pub fn from_options(options: &Options) -> Result<Self> {
        Ok(Self {
            force_rgb: options.get_or(OPT_RGB, "0") == "1",
            packing: PackingMode::from_option(options.get_or(OPT_PLANAR, "-1"))?,
        })
    }
}

/// What a decoder factory is given: the format the pipeline asked for plus
/// the raw options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderParameters {
    pub format: PixelFormat,
    pub options: Options,
}

impl DecoderParameters {
    pub fn new(format: PixelFormat, options: Options) -> Self {
        Self { format, options }
    }
}
