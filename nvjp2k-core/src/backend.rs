//! # Accelerator Backend
//!
//! The surface the decoder needs from the CUDA runtime and the nvJPEG2000
//! engine. [`crate::nvjpeg2k::NvJpeg2kBackend`] implements it against the
//! real libraries; tests use an in-memory stand-in.
//!
//! Every call returns a status. Nothing here retries or recovers; callers
//! decide whether a failure is fatal (decode) or only worth a warning
//! (teardown, timing).

use std::fmt;

use crate::error::Result;
use crate::negotiate::DecodeParams;
use crate::staging::PixelType;

/// Geometry of a parsed codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageInfo {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub num_components: u32,
}

/// Per-component geometry and sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentInfo {
    pub component_width: u32,
    pub component_height: u32,
    /// Bits per sample
    pub precision: u8,
    pub signed: bool,
}

/// major.minor.patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LibraryVersion {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendVersions {
    /// Codec engine library
    pub engine: LibraryVersion,
    /// CUDA runtime the engine was built against
    pub cudart: LibraryVersion,
}

/// A pitched device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchedAlloc<P> {
    pub ptr: P,
    /// Row pitch chosen by the allocator, >= requested width
    pub pitch: usize,
}

/// Engine handles needed for one decode submission.
#[derive(Debug, Clone, Copy)]
pub struct SessionHandles<H> {
    pub engine: H,
    pub state: H,
    pub codestream: H,
    pub params: H,
    pub stream: H,
}

/// Destination description handed to the engine for one decode.
#[derive(Debug)]
pub struct DeviceImage<'a, P> {
    pub planes: &'a [P],
    pub pitches: &'a [usize],
    pub pixel_type: PixelType,
    pub num_components: u32,
}

pub trait Jp2kBackend: Send {
    /// Opaque engine / stream / event handle
    type Handle: Copy + fmt::Debug + Send;
    /// Device memory pointer
    type DevicePtr: Copy + fmt::Debug + Send;

    fn versions(&self) -> Result<BackendVersions>;

    // Execution stream
    fn create_stream(&mut self) -> Result<Self::Handle>;
    fn destroy_stream(&mut self, stream: Self::Handle) -> Result<()>;
    /// Block until all work queued on `stream` has finished.
    fn synchronize(&mut self, stream: Self::Handle) -> Result<()>;

    // Codec engine objects
    fn create_engine(&mut self) -> Result<Self::Handle>;
    fn destroy_engine(&mut self, engine: Self::Handle) -> Result<()>;
    fn create_decode_state(&mut self, engine: Self::Handle) -> Result<Self::Handle>;
    fn destroy_decode_state(&mut self, state: Self::Handle) -> Result<()>;
    fn create_codestream(&mut self) -> Result<Self::Handle>;
    fn destroy_codestream(&mut self, codestream: Self::Handle) -> Result<()>;
    fn create_decode_params(&mut self, params: DecodeParams) -> Result<Self::Handle>;
    fn destroy_decode_params(&mut self, params: Self::Handle) -> Result<()>;

    // Codestream metadata
    fn parse(&mut self, engine: Self::Handle, codestream: Self::Handle, data: &[u8]) -> Result<()>;
    fn image_info(&mut self, codestream: Self::Handle) -> Result<ImageInfo>;
    fn component_info(&mut self, codestream: Self::Handle, component: u32) -> Result<ComponentInfo>;

    // Device memory
    fn alloc_pitched(&mut self, width_bytes: usize, height: usize) -> Result<PitchedAlloc<Self::DevicePtr>>;
    fn free(&mut self, ptr: Self::DevicePtr) -> Result<()>;

    /// Queue a decode of the parsed codestream into `image` on the session stream.
    fn decode_image(
        &mut self,
        session: &SessionHandles<Self::Handle>,
        image: &DeviceImage<'_, Self::DevicePtr>,
    ) -> Result<()>;

    /// Queue a 2D device-to-host copy of `height` rows of `width_bytes` each.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `dst_stride * (height - 1) + width_bytes`
    /// bytes and must stay allocated and unmoved until `stream` has been
    /// synchronized.
    unsafe fn copy_to_host_async(
        &mut self,
        dst: *mut u8,
        dst_stride: usize,
        src: Self::DevicePtr,
        src_pitch: usize,
        width_bytes: usize,
        height: usize,
        stream: Self::Handle,
    ) -> Result<()>;

    // Timing events
    fn create_event(&mut self) -> Result<Self::Handle>;
    fn record_event(&mut self, event: Self::Handle, stream: Self::Handle) -> Result<()>;
    fn synchronize_event(&mut self, event: Self::Handle) -> Result<()>;
    /// Milliseconds between two recorded events.
    fn elapsed_ms(&mut self, start: Self::Handle, stop: Self::Handle) -> Result<f32>;
    fn destroy_event(&mut self, event: Self::Handle) -> Result<()>;
}
