// FORMAT NEGOTIATION - Requested format + options -> output layout
//
// nvJPEG2000 can write either one interleaved buffer (RGB output only, no
// chroma subsampling) or one buffer per component. Pick the layout first,
// then a concrete output format the engine can actually fill.

use crate::format::PixelFormat;
use crate::options::{DecoderConfig, PackingMode};

/// Engine output flags, fixed for the lifetime of an open decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeParams {
    /// Single interleaved plane
    pub packed: bool,
    /// Ask the engine for RGB samples
    pub rgb: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub format: PixelFormat,
    pub params: DecodeParams,
}

/// Resolve the output format. Always succeeds; some results are
/// approximations (planar RGB requests come back as yuv444p).
pub fn negotiate(requested: PixelFormat, config: &DecoderConfig) -> Negotiated {
    let mut packed = match config.packing {
        PackingMode::Packed => true,
        PackingMode::Auto => requested.is_rgb(),
        PackingMode::Planar => false,
    } || config.force_rgb;

    // Interleaved output needs 4:4:4 non-planar input
    if packed {
        packed = !requested.is_planar()
            && requested.subsample_width(1) == 1
            && requested.subsample_height(1) == 1;
    }

    let rgb = packed;
    let mut format = requested;

    if rgb && !format.is_rgb() {
        format = if format.bits_per_channel() > 8 {
            PixelFormat::Rgb48le
        } else {
            PixelFormat::Rgb24
        };
    }

    if !packed {
        if format.is_xyz() {
            format = PixelFormat::Xyz12ple;
        } else if format.is_rgb() {
            // No planar RGB path in the engine; decode as 4:4:4 planes
            format = PixelFormat::Yuv444p;
        } else if format == PixelFormat::Nv12 {
            // Engine writes one component per plane, never interleaved chroma
            format = PixelFormat::Yuv420p;
        }
    }

    Negotiated {
        format,
        params: DecodeParams { packed, rgb },
    }
}

// ============================================================================
// Tests
// ============================================================================
