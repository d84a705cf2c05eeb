//! Error type shared by every stage of the decoder.

use thiserror::Error;

use crate::format::PixelFormat;
use crate::staging::PixelType;

#[derive(Debug, Error)]
pub enum Jp2kError {
    #[error("Library load failed: {0}")]
    LibraryLoad(String),
    #[error("CUDA runtime error in {call}: ({code}) {message}")]
    Cuda {
        call: &'static str,
        code: i32,
        message: String,
    },
    #[error("nvJPEG2000 error in {call}: status {status}")]
    Engine { call: &'static str, status: i32 },
    #[error("Unsupported precision: {0}")]
    UnsupportedPrecision(u8),
    #[error("Too many components: {0} (at most {max})", max = crate::staging::MAX_PLANES)]
    TooManyComponents(u32),
    #[error("Codestream has {components} components, {format} needs {planes} planes")]
    PlaneMismatch {
        format: PixelFormat,
        components: u32,
        planes: usize,
    },
    #[error("{format} plane {plane} cannot hold {pixel_type:?} samples")]
    PixelLayoutMismatch {
        format: PixelFormat,
        plane: usize,
        pixel_type: PixelType,
    },
    #[error("Decoded plane {plane} ({width_bytes}x{height} bytes) does not fit the staging/frame plane")]
    GeometryMismatch {
        plane: usize,
        width_bytes: usize,
        height: usize,
    },
    #[error("Staging buffers hold {allocated:?} samples, packet needs {found:?}")]
    PixelTypeChanged {
        allocated: PixelType,
        found: PixelType,
    },
    #[error("Staging buffers have {allocated} plane(s), packet needs {found}")]
    PlaneCountChanged { allocated: usize, found: usize },
    #[error("Staging buffers were laid out for {allocated} component(s), packet has {found}")]
    ComponentCountChanged { allocated: u32, found: u32 },
    #[error("Decoder is not open")]
    NotOpen,
    #[error("Invalid value {value:?} for option {key:?}")]
    InvalidOption { key: String, value: String },
    #[error("Unknown pixel format: {0}")]
    UnknownFormat(String),
    #[error("Unknown decoder: {0}")]
    UnknownDecoder(String),
    #[error("Options JSON: {0}")]
    OptionsJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Jp2kError>;
