//! # nvjp2k Core
//!
//! GPU-accelerated JPEG2000 decoding on NVIDIA nvJPEG2000.
//!
//! One coded image per packet goes in, one host frame per packet comes out.
//! The CUDA runtime and nvJPEG2000 are loaded at runtime, so the crate builds
//! and runs (without the decoder) on machines that lack them.

// ============================================================================
// Formats and Configuration
// ============================================================================
pub mod format;
pub mod options;
pub mod negotiate;

// ============================================================================
// Host Containers
// ============================================================================
pub mod frame;

// ============================================================================
// Hardware Backend
// ============================================================================
pub mod backend;
pub mod nvjpeg2k;
pub mod session;
pub mod staging;

// ============================================================================
// Decoders
// ============================================================================
pub mod decoder;
pub mod registry;

pub mod error;

#[cfg(test)]
mod mock;

pub use backend::{ComponentInfo, ImageInfo, Jp2kBackend};
pub use decoder::{
    status_code, DecodeStatus, Jp2kDecoder, LifecycleHooks, VideoDecoder, END_OF_STREAM,
    NVJP2K_NAME,
};
pub use error::{Jp2kError, Result};
pub use format::PixelFormat;
pub use frame::{FrameSink, Packet, VideoFrame};
pub use negotiate::{negotiate, DecodeParams, Negotiated};
pub use nvjpeg2k::{nvjp2k_available, NvJpeg2kBackend};
pub use options::{DecoderConfig, DecoderParameters, Options, PackingMode};
pub use registry::{DecoderFactory, DecoderRegistry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
