// PIXEL FORMAT - Output pixel layouts understood by the decoder
//
// The surrounding pipeline describes frames with these formats. The decoder
// only needs the descriptor side: how many planes, how wide each plane's
// samples are, chroma subsampling, and the planar/packed/RGB/XYZ class.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Jp2kError;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    // Single plane luma
    Gray8,
    Gray16le,

    // Packed / interleaved
    Rgb24,
    Bgr24,
    Rgb48le,
    Xyz12le, // 12-bit XYZ in 16-bit LE words, interleaved

    // Semi-planar
    Nv12,

    // Planar YUV
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuv420p10le,
    Yuv422p10le,
    Yuv444p10le,
    Yuv420p12le,
    Yuv444p12le,
    Yuv444p16le,

    // Planar RGB (G, B, R plane order)
    Gbrp,
    Gbrp16le,

    // Planar XYZ, 12-bit in 16-bit LE words
    Xyz12ple,
}

/// Static description of a pixel format.
#[derive(Debug, Clone, Copy)]
struct FormatDesc {
    name: &'static str,
    /// Bytes per pixel for each plane; length is the plane count.
    plane_bytes: &'static [usize],
    log2_chroma_w: u8,
    log2_chroma_h: u8,
    depth: u8,
    class: FormatClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatClass {
    Gray,
    Yuv,
    Rgb,
    Xyz,
}

const ALL: &[PixelFormat] = &[
    PixelFormat::Gray8,
    PixelFormat::Gray16le,
    PixelFormat::Rgb24,
    PixelFormat::Bgr24,
    PixelFormat::Rgb48le,
    PixelFormat::Xyz12le,
    PixelFormat::Nv12,
    PixelFormat::Yuv420p,
    PixelFormat::Yuv422p,
    PixelFormat::Yuv444p,
    PixelFormat::Yuv420p10le,
    PixelFormat::Yuv422p10le,
    PixelFormat::Yuv444p10le,
    PixelFormat::Yuv420p12le,
    PixelFormat::Yuv444p12le,
    PixelFormat::Yuv444p16le,
    PixelFormat::Gbrp,
    PixelFormat::Gbrp16le,
    PixelFormat::Xyz12ple,
];

impl PixelFormat {
    fn desc(&self) -> FormatDesc {
        use FormatClass::*;
        fn d(
            name: &'static str,
            plane_bytes: &'static [usize],
            log2_chroma_w: u8,
            log2_chroma_h: u8,
            depth: u8,
            class: FormatClass,
        ) -> FormatDesc {
            FormatDesc {
                name,
                plane_bytes,
                log2_chroma_w,
                log2_chroma_h,
                depth,
                class,
            }
        }
        match self {
            Self::Gray8 => d("gray8", &[1], 0, 0, 8, Gray),
            Self::Gray16le => d("gray16le", &[2], 0, 0, 16, Gray),
            Self::Rgb24 => d("rgb24", &[3], 0, 0, 8, Rgb),
            Self::Bgr24 => d("bgr24", &[3], 0, 0, 8, Rgb),
            Self::Rgb48le => d("rgb48le", &[6], 0, 0, 16, Rgb),
            Self::Xyz12le => d("xyz12le", &[6], 0, 0, 12, Xyz),
            Self::Nv12 => d("nv12", &[1, 2], 1, 1, 8, Yuv),
            Self::Yuv420p => d("yuv420p", &[1, 1, 1], 1, 1, 8, Yuv),
            Self::Yuv422p => d("yuv422p", &[1, 1, 1], 1, 0, 8, Yuv),
            Self::Yuv444p => d("yuv444p", &[1, 1, 1], 0, 0, 8, Yuv),
            Self::Yuv420p10le => d("yuv420p10le", &[2, 2, 2], 1, 1, 10, Yuv),
            Self::Yuv422p10le => d("yuv422p10le", &[2, 2, 2], 1, 0, 10, Yuv),
            Self::Yuv444p10le => d("yuv444p10le", &[2, 2, 2], 0, 0, 10, Yuv),
            Self::Yuv420p12le => d("yuv420p12le", &[2, 2, 2], 1, 1, 12, Yuv),
            Self::Yuv444p12le => d("yuv444p12le", &[2, 2, 2], 0, 0, 12, Yuv),
            Self::Yuv444p16le => d("yuv444p16le", &[2, 2, 2], 0, 0, 16, Yuv),
            Self::Gbrp => d("gbrp", &[1, 1, 1], 0, 0, 8, Rgb),
            Self::Gbrp16le => d("gbrp16le", &[2, 2, 2], 0, 0, 16, Rgb),
            Self::Xyz12ple => d("xyz12ple", &[2, 2, 2], 0, 0, 12, Xyz),
        }
    }

    /// Every format this crate knows about.
    pub fn all() -> &'static [PixelFormat] {
        ALL
    }

    pub fn name(&self) -> &'static str {
        self.desc().name
    }

    pub fn plane_count(&self) -> usize {
        self.desc().plane_bytes.len()
    }

    /// Bytes per pixel of `plane`, 0 if the plane does not exist.
    pub fn bytes_per_pixel(&self, plane: usize) -> usize {
        self.desc().plane_bytes.get(plane).copied().unwrap_or(0)
    }

    /// Horizontal subsampling divisor of `plane` (1 = full resolution).
    pub fn subsample_width(&self, plane: usize) -> u32 {
        if self.is_chroma_plane(plane) {
            1 << self.desc().log2_chroma_w
        } else {
            1
        }
    }

    /// Vertical subsampling divisor of `plane` (1 = full resolution).
    pub fn subsample_height(&self, plane: usize) -> u32 {
        if self.is_chroma_plane(plane) {
            1 << self.desc().log2_chroma_h
        } else {
            1
        }
    }

    fn is_chroma_plane(&self, plane: usize) -> bool {
        (plane == 1 || plane == 2) && plane < self.plane_count()
    }

    /// Samples are stored in more than one plane.
    pub fn is_planar(&self) -> bool {
        self.plane_count() > 1
    }

    pub fn is_rgb(&self) -> bool {
        self.desc().class == FormatClass::Rgb
    }

    pub fn is_xyz(&self) -> bool {
        self.desc().class == FormatClass::Xyz
    }

    /// Significant bits per channel sample.
    pub fn bits_per_channel(&self) -> u8 {
        self.desc().depth
    }

    /// Width of `plane` in pixels for an image `width` pixels wide.
    pub fn plane_width(&self, plane: usize, width: u32) -> u32 {
        width.div_ceil(self.subsample_width(plane))
    }

    /// Height of `plane` in rows for an image `height` rows tall.
    pub fn plane_height(&self, plane: usize, height: u32) -> u32 {
        height.div_ceil(self.subsample_height(plane))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = Jp2kError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ALL.iter()
            .copied()
            .find(|f| f.name() == lower)
            .ok_or_else(|| Jp2kError::UnknownFormat(s.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
