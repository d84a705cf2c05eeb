//! # Packets and Frames
//!
//! Host-side containers exchanged with the surrounding pipeline:
//! - [`Packet`]: one coded JPEG2000 image, or the end-of-stream marker
//! - [`VideoFrame`]: decoded pixels, one buffer per plane with its own stride
//! - [`FrameSink`]: where finished frames are handed off

use bytes::Bytes;

use crate::format::PixelFormat;

/// Row alignment for host frame planes.
pub const FRAME_ALIGN: usize = 32;

// ============================================================================
// Packet
// ============================================================================

/// A coded packet as delivered by the demuxer.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Raw codestream bytes
    pub data: Bytes,
    /// Presentation timestamp, passed through to the frame untouched
    pub pts: i64,
    end_of_stream: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts: i64) -> Self {
        Self {
            data: data.into(),
            pts,
            end_of_stream: false,
        }
    }

    /// The sentinel packet that asks the decoder to drain.
    pub fn end_of_stream() -> Self {
        Self {
            data: Bytes::new(),
            pts: 0,
            end_of_stream: true,
        }
    }

    pub fn is_end(&self) -> bool {
        self.end_of_stream
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ============================================================================
// Video Frame
// ============================================================================

/// One host-resident plane.
#[derive(Debug, Clone)]
pub struct FramePlane {
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
    /// Meaningful bytes per row (`stride` minus padding)
    pub row_bytes: usize,
    pub height: usize,
}

impl FramePlane {
    fn new(row_bytes: usize, height: usize) -> Self {
        let stride = row_bytes.next_multiple_of(FRAME_ALIGN);
        Self {
            data: vec![0u8; stride * height],
            stride,
            row_bytes,
            height,
        }
    }

    /// Row `y` without its padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.row_bytes]
    }
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<FramePlane>,
    pub pts: i64,
}

impl VideoFrame {
    /// Allocate zeroed planes laid out for `format`.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = (0..format.plane_count())
            .map(|p| {
                let row_bytes = format.plane_width(p, width) as usize * format.bytes_per_pixel(p);
                FramePlane::new(row_bytes, format.plane_height(p, height) as usize)
            })
            .collect();

        Self {
            width,
            height,
            format,
            planes,
            pts: 0,
        }
    }

    pub fn plane(&self, index: usize) -> Option<&FramePlane> {
        self.planes.get(index)
    }

    /// All planes concatenated without row padding.
    pub fn to_packed_bytes(&self) -> Vec<u8> {
        let total: usize = self.planes.iter().map(|p| p.row_bytes * p.height).sum();
        let mut out = Vec::with_capacity(total);
        for plane in &self.planes {
            for y in 0..plane.height {
                out.extend_from_slice(plane.row(y));
            }
        }
        out
    }
}

// ============================================================================
// Output Sink
// ============================================================================

/// Receives decoded frames; ownership moves into the sink.
///
/// Any `FnMut(VideoFrame)` closure is a sink.
pub trait FrameSink {
    fn frame_decoded(&mut self, frame: VideoFrame);
}

impl<F: FnMut(VideoFrame)> FrameSink for F {
    fn frame_decoded(&mut self, frame: VideoFrame) {
        self(frame)
    }
}
