//! # JPEG2000 Decoder
//!
//! One coded image in, one host frame out.
//!
//! ## Per-packet pipeline
//! 1. End-of-stream packet -> [`DecodeStatus::Drained`], nothing else runs
//! 2. Parse the codestream, read image and component metadata
//! 3. Check the planned planes fit the host frame; first packet only:
//!    allocate the staging planes
//! 4. Queue the decode on the session stream (timed with events)
//! 5. Queue one device-to-host copy per plane into a fresh [`VideoFrame`]
//! 6. Synchronize the stream, stamp the packet pts, hand the frame to the sink
//!
//! Every call is synchronous from the caller's side: the stream is drained
//! before `decode` returns, so consecutive packets never overlap on the
//! shared staging planes.

use crate::backend::{Jp2kBackend, SessionHandles};
use crate::error::{Jp2kError, Result};
use crate::frame::{FrameSink, Packet, VideoFrame};
use crate::negotiate::{negotiate, Negotiated};
use crate::options::{DecoderConfig, DecoderParameters};
use crate::session::Session;
use crate::staging::{StagingBuffers, StagingLayout};

/// Registered name of the nvJPEG2000 decoder.
pub const NVJP2K_NAME: &str = "nvjp2k";

/// Host result code for a drained decoder.
pub const END_OF_STREAM: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A frame was delivered to the sink
    Frame,
    /// End of stream acknowledged
    Drained,
}

/// Map a decode result onto the host's integer convention.
pub fn status_code(result: &Result<DecodeStatus>) -> i32 {
    match result {
        Ok(DecodeStatus::Drained) => END_OF_STREAM,
        Ok(DecodeStatus::Frame) => 0,
        Err(_) => -1,
    }
}

// ============================================================================
// Decoder Contract
// ============================================================================

/// Framework bookkeeping invoked around lifecycle calls.
pub trait LifecycleHooks: Send {
    fn on_open(&mut self) {}
    fn on_close(&mut self) {}
    fn on_flush(&mut self) {}
}

/// Contract every decoder variant implements.
pub trait VideoDecoder: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self) -> Result<()>;

    /// Release everything. Never fails; problems are logged.
    fn close(&mut self);

    fn flush(&mut self);

    fn decode(&mut self, packet: &Packet, sink: &mut dyn FrameSink) -> Result<DecodeStatus>;
}

// ============================================================================
// nvJPEG2000 Decoder
// ============================================================================

pub struct Jp2kDecoder<B: Jp2kBackend> {
    backend: B,
    parameters: DecoderParameters,
    hooks: Option<Box<dyn LifecycleHooks>>,
    negotiated: Option<Negotiated>,
    session: Session<B::Handle>,
    staging: Option<StagingBuffers<B::DevicePtr>>,
}

impl<B: Jp2kBackend> Jp2kDecoder<B> {
    pub fn new(backend: B, parameters: DecoderParameters) -> Self {
        Self {
            backend,
            parameters,
            hooks: None,
            negotiated: None,
            session: Session::new(),
            staging: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Output format and engine flags, once open.
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated
    }

    pub fn staging(&self) -> Option<&StagingBuffers<B::DevicePtr>> {
        self.staging.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.negotiated.is_some()
    }

    fn try_open(&mut self) -> Result<()> {
        let versions = self.backend.versions()?;
        tracing::info!(
            "nvjpeg2k version: {}, cudart: {}",
            versions.engine,
            versions.cudart
        );

        let config = DecoderConfig::from_options(&self.parameters.options)?;
        let negotiated = negotiate(self.parameters.format, &config);
        tracing::info!(
            "Requested {} -> output {} (packed: {}, rgb: {})",
            self.parameters.format,
            negotiated.format,
            negotiated.params.packed,
            negotiated.params.rgb
        );

        self.session.create(&mut self.backend, negotiated.params)?;
        self.negotiated = Some(negotiated);
        Ok(())
    }

    /// Release staging planes, then session objects. Returns failed releases.
    fn teardown(&mut self) -> usize {
        let mut failures = 0;
        if let Some(staging) = self.staging.take() {
            failures += staging.release(&mut self.backend);
        }
        failures += self.session.teardown(&mut self.backend);
        self.negotiated = None;
        failures
    }

    fn decode_packet(&mut self, packet: &Packet, sink: &mut dyn FrameSink) -> Result<DecodeStatus> {
        if packet.is_end() {
            return Ok(DecodeStatus::Drained);
        }
        let negotiated = self.negotiated.ok_or(Jp2kError::NotOpen)?;
        let handles = self.session.handles().ok_or(Jp2kError::NotOpen)?;

        self.backend
            .parse(handles.engine, handles.codestream, &packet.data)?;
        let info = self.backend.image_info(handles.codestream)?;
        let components = (0..info.num_components)
            .map(|c| self.backend.component_info(handles.codestream, c))
            .collect::<Result<Vec<_>>>()?;

        let layout = StagingLayout::plan(
            negotiated.format,
            negotiated.params.packed,
            &info,
            &components,
        )?;
        let mut frame = VideoFrame::new(info.image_width, info.image_height, negotiated.format);
        check_frame_fit(&layout, &frame)?;

        // Same geometry assumed for the whole stream
        match self.staging.as_ref().map(|existing| existing.accepts(&layout)) {
            Some(accepted) => accepted?,
            None => {
                tracing::info!(
                    "First packet: {}x{}, {} component(s), {}x{} tile(s)",
                    info.image_width,
                    info.image_height,
                    info.num_components,
                    info.num_tiles_x,
                    info.num_tiles_y
                );
                self.staging = Some(StagingBuffers::allocate(&mut self.backend, layout)?);
            }
        }
        let staging = self.staging.as_ref().ok_or(Jp2kError::NotOpen)?;

        let timer = DecodeTimer::start(&mut self.backend, handles.stream);
        let decoded = self.backend.decode_image(&handles, &staging.device_image());
        let elapsed = timer.stop(&mut self.backend, handles.stream);
        decoded?;
        if let Some(ms) = elapsed {
            tracing::debug!("Decoded pts {} in {:.3} ms", packet.pts, ms);
        }

        if let Err(e) = copy_planes(&mut self.backend, &handles, staging, &mut frame) {
            // Copies already queued still target `frame`
            if let Err(sync) = self.backend.synchronize(handles.stream) {
                tracing::warn!("Stream synchronize after failed copy: {}", sync);
            }
            return Err(e);
        }
        self.backend.synchronize(handles.stream)?;

        frame.pts = packet.pts;
        sink.frame_decoded(frame);
        Ok(DecodeStatus::Frame)
    }
}

/// Every plane copied back must fit inside the matching host frame plane.
fn check_frame_fit(layout: &StagingLayout, frame: &VideoFrame) -> Result<()> {
    for (plane, geometry) in layout.planes.iter().take(layout.output_planes).enumerate() {
        let fits = frame
            .plane(plane)
            .is_some_and(|dst| geometry.width_bytes <= dst.row_bytes && geometry.height <= dst.height);
        if !fits {
            return Err(Jp2kError::GeometryMismatch {
                plane,
                width_bytes: geometry.width_bytes,
                height: geometry.height,
            });
        }
    }
    Ok(())
}

/// Queue one device-to-host copy per output plane.
///
/// Plane sizes must already have passed [`check_frame_fit`].
fn copy_planes<B: Jp2kBackend>(
    backend: &mut B,
    handles: &SessionHandles<B::Handle>,
    staging: &StagingBuffers<B::DevicePtr>,
    frame: &mut VideoFrame,
) -> Result<()> {
    let layout = staging.layout();
    for (i, geometry) in layout.planes.iter().take(layout.output_planes).enumerate() {
        let (Some(src), Some(src_pitch)) = (staging.ptr(i), staging.pitch(i)) else {
            return Err(Jp2kError::PlaneCountChanged {
                allocated: staging.plane_count(),
                found: layout.output_planes,
            });
        };
        let dst = match frame.planes.get_mut(i) {
            Some(dst) if geometry.width_bytes <= dst.row_bytes && geometry.height <= dst.height => dst,
            _ => {
                return Err(Jp2kError::GeometryMismatch {
                    plane: i,
                    width_bytes: geometry.width_bytes,
                    height: geometry.height,
                })
            }
        };
        if geometry.height == 0 || geometry.width_bytes == 0 {
            continue;
        }

        // SAFETY: dst.data holds dst.height rows of dst.stride bytes, which
        // covers the copied region; the frame is not moved or dropped before
        // the stream is synchronized by the caller.
        unsafe {
            backend.copy_to_host_async(
                dst.data.as_mut_ptr(),
                dst.stride,
                src,
                src_pitch,
                geometry.width_bytes,
                geometry.height,
                handles.stream,
            )?;
        }
    }
    Ok(())
}

// ============================================================================
// Timing
// ============================================================================

/// Event pair around a decode submission. Failures only cost the
/// measurement, never the decode.
struct DecodeTimer<H> {
    start: Option<H>,
    stop: Option<H>,
}

impl<H: Copy> DecodeTimer<H> {
    fn start<B: Jp2kBackend<Handle = H>>(backend: &mut B, stream: H) -> Self {
        let mut create = || match backend.create_event() {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Timing event create failed: {}", e);
                None
            }
        };
        let start = create();
        let stop = create();
        if let Some(event) = start {
            if let Err(e) = backend.record_event(event, stream) {
                tracing::warn!("Timing event record failed: {}", e);
            }
        }
        Self { start, stop }
    }

    /// Record the stop event, wait for it and return elapsed milliseconds.
    fn stop<B: Jp2kBackend<Handle = H>>(self, backend: &mut B, stream: H) -> Option<f32> {
        let elapsed = match (self.start, self.stop) {
            (Some(start), Some(stop)) => backend
                .record_event(stop, stream)
                .and_then(|_| backend.synchronize_event(stop))
                .and_then(|_| backend.elapsed_ms(start, stop))
                .map_err(|e| tracing::warn!("Decode timing failed: {}", e))
                .ok(),
            _ => None,
        };
        for event in [self.start, self.stop].into_iter().flatten() {
            if let Err(e) = backend.destroy_event(event) {
                tracing::warn!("Timing event destroy failed: {}", e);
            }
        }
        elapsed
    }
}

impl<B: Jp2kBackend> VideoDecoder for Jp2kDecoder<B> {
    fn name(&self) -> &'static str {
        NVJP2K_NAME
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        if let Err(e) = self.try_open() {
            tracing::error!("{} open failed: {}", NVJP2K_NAME, e);
            self.teardown();
            return Err(e);
        }
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_open();
        }
        Ok(())
    }

    fn close(&mut self) {
        let failures = self.teardown();
        if failures > 0 {
            tracing::warn!("{} closed with {} failed release(s)", NVJP2K_NAME, failures);
        }
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_close();
        }
    }

    fn flush(&mut self) {
        // No reference frames to reset
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_flush();
        }
    }

    fn decode(&mut self, packet: &Packet, sink: &mut dyn FrameSink) -> Result<DecodeStatus> {
        self.decode_packet(packet, sink).inspect_err(|e| {
            tracing::error!("{} decode failed (pts {}): {}", NVJP2K_NAME, packet.pts, e);
        })
    }
}

impl<B: Jp2kBackend> Drop for Jp2kDecoder<B> {
    fn drop(&mut self) {
        if self.is_open() || self.staging.is_some() || !self.session.is_empty() {
            self.teardown();
        }
    }
}
