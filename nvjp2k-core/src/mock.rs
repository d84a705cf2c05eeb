// MOCK BACKEND - In-memory stand-in for CUDA + nvJPEG2000
//
// Reads geometry from the SIZ marker segment, keeps "device" memory in host
// vectors, writes a known sample pattern on decode, records every call and
// can be told to fail specific operations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    BackendVersions, ComponentInfo, DeviceImage, ImageInfo, Jp2kBackend, LibraryVersion,
    PitchedAlloc, SessionHandles,
};
use crate::error::{Jp2kError, Result};
use crate::negotiate::DecodeParams;
use crate::staging::PixelType;

pub const MOCK_PITCH_ALIGN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Versions,
    CreateStream,
    CreateEngine,
    CreateState,
    CreateCodestream,
    CreateParams,
    Destroy,
    Parse,
    ImageInfo,
    ComponentInfo,
    Alloc,
    Free,
    Decode,
    Copy,
    Synchronize,
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(Op, u64),
    Destroy(u64),
    Parse(usize),
    Alloc { width_bytes: usize, height: usize },
    Free(u64),
    Decode { packed: bool, rgb: bool },
    Copy { src: u64, width_bytes: usize, height: usize },
    Synchronize,
    RecordEvent,
}

struct DeviceBuffer {
    data: Vec<u8>,
    pitch: usize,
    height: usize,
}

#[derive(Default)]
pub struct MockState {
    next_id: u64,
    pub calls: Vec<Call>,
    plan: HashMap<Op, VecDeque<bool>>,
    live: HashSet<u64>,
    buffers: HashMap<u64, DeviceBuffer>,
    params: HashMap<u64, DecodeParams>,
    parsed: Option<(ImageInfo, Vec<ComponentInfo>)>,
    pub pending_copies: usize,
}

impl MockState {
    /// Make the next call of `op` fail.
    pub fn fail_next(&mut self, op: Op) {
        self.plan.entry(op).or_default().push_back(true);
    }

    /// Let `ok` calls of `op` through, then fail one.
    pub fn fail_after(&mut self, op: Op, ok: usize) {
        let q = self.plan.entry(op).or_default();
        q.extend(std::iter::repeat(false).take(ok));
        q.push_back(true);
    }

    /// Handles and allocations not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.live.len() + self.buffers.len()
    }

    pub fn allocations(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Alloc { .. })).count()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn check(&mut self, op: Op) -> Result<()> {
        let fail = self.plan.get_mut(&op).and_then(|q| q.pop_front()).unwrap_or(false);
        if fail {
            Err(Jp2kError::Engine {
                call: "mock",
                status: 6,
            })
        } else {
            Ok(())
        }
    }

    fn create(&mut self, op: Op) -> Result<u64> {
        self.check(op)?;
        self.next_id += 1;
        let id = self.next_id;
        self.live.insert(id);
        self.calls.push(Call::Create(op, id));
        Ok(id)
    }

    fn destroy(&mut self, id: u64) -> Result<()> {
        // Always forget the handle so a failed release still counts as gone
        let known = self.live.remove(&id);
        self.calls.push(Call::Destroy(id));
        self.check(Op::Destroy)?;
        if known {
            Ok(())
        } else {
            Err(Jp2kError::Engine {
                call: "mock destroy",
                status: 2,
            })
        }
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the recorded state.
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }
}

// ============================================================================
// Sample pattern written by decode
// ============================================================================

pub fn pattern(component: usize, x: usize, y: usize, pixel_type: PixelType) -> u16 {
    let v = (component * 40 + x + 2 * y) as u16;
    match pixel_type {
        PixelType::U8 => v & 0xFF,
        PixelType::U16 | PixelType::I16 => v & 0x0FFF,
    }
}

fn write_sample(row: &mut [u8], index: usize, value: u16, pixel_type: PixelType) {
    match pixel_type {
        PixelType::U8 => row[index] = value as u8,
        PixelType::U16 | PixelType::I16 => {
            row[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes())
        }
    }
}

// ============================================================================
// Codestream helpers
// ============================================================================

/// Component description for [`codestream`]: (precision, signed, dx, dy).
pub type CompSpec = (u8, bool, u8, u8);

/// Build SOC + SIZ + EOC for a single-tile image.
pub fn codestream(width: u32, height: u32, comps: &[CompSpec]) -> Vec<u8> {
    let mut out = vec![0xFF, 0x4F, 0xFF, 0x51];
    let lsiz = 38 + 3 * comps.len() as u16;
    out.extend_from_slice(&lsiz.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // Rsiz
    for v in [width, height, 0, 0, width, height, 0, 0] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&(comps.len() as u16).to_be_bytes());
    for &(precision, signed, dx, dy) in comps {
        let ssiz = (precision - 1) | (if signed { 0x80 } else { 0 });
        out.extend_from_slice(&[ssiz, dx, dy]);
    }
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

fn parse_siz(data: &[u8]) -> Option<(ImageInfo, Vec<ComponentInfo>)> {
    let be16 = |o: usize| -> Option<u32> { Some(u16::from_be_bytes(data.get(o..o + 2)?.try_into().ok()?) as u32) };
    let be32 = |o: usize| -> Option<u32> { Some(u32::from_be_bytes(data.get(o..o + 4)?.try_into().ok()?)) };

    if data.get(0..4)? != [0xFF, 0x4F, 0xFF, 0x51] {
        return None;
    }
    let (xsiz, ysiz, xo, yo) = (be32(8)?, be32(12)?, be32(16)?, be32(20)?);
    let (xt, yt, xto, yto) = (be32(24)?, be32(28)?, be32(32)?, be32(36)?);
    let csiz = be16(40)?;
    if xsiz <= xo || ysiz <= yo || xt == 0 || yt == 0 || csiz == 0 {
        return None;
    }

    let mut comps = Vec::with_capacity(csiz as usize);
    for c in 0..csiz as usize {
        let at = 42 + 3 * c;
        let ssiz = *data.get(at)?;
        let dx = *data.get(at + 1)? as u32;
        let dy = *data.get(at + 2)? as u32;
        if dx == 0 || dy == 0 {
            return None;
        }
        comps.push(ComponentInfo {
            component_width: xsiz.div_ceil(dx) - xo.div_ceil(dx),
            component_height: ysiz.div_ceil(dy) - yo.div_ceil(dy),
            precision: (ssiz & 0x7F) + 1,
            signed: ssiz & 0x80 != 0,
        });
    }

    let info = ImageInfo {
        image_width: xsiz - xo,
        image_height: ysiz - yo,
        tile_width: xt,
        tile_height: yt,
        num_tiles_x: (xsiz - xto).div_ceil(xt),
        num_tiles_y: (ysiz - yto).div_ceil(yt),
        num_components: csiz,
    };
    Some((info, comps))
}

// ============================================================================
// Backend implementation
// ============================================================================

impl Jp2kBackend for MockBackend {
    type Handle = u64;
    type DevicePtr = u64;

    fn versions(&self) -> Result<BackendVersions> {
        self.state.lock().check(Op::Versions)?;
        Ok(BackendVersions {
            engine: LibraryVersion { major: 0, minor: 8, patch: 1 },
            cudart: LibraryVersion { major: 12, minor: 4, patch: 0 },
        })
    }

    fn create_stream(&mut self) -> Result<u64> {
        self.state.lock().create(Op::CreateStream)
    }

    fn destroy_stream(&mut self, stream: u64) -> Result<()> {
        self.state.lock().destroy(stream)
    }

    fn synchronize(&mut self, _stream: u64) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(Call::Synchronize);
        s.check(Op::Synchronize)?;
        s.pending_copies = 0;
        Ok(())
    }

    fn create_engine(&mut self) -> Result<u64> {
        self.state.lock().create(Op::CreateEngine)
    }

    fn destroy_engine(&mut self, engine: u64) -> Result<()> {
        self.state.lock().destroy(engine)
    }

    fn create_decode_state(&mut self, _engine: u64) -> Result<u64> {
        self.state.lock().create(Op::CreateState)
    }

    fn destroy_decode_state(&mut self, state: u64) -> Result<()> {
        self.state.lock().destroy(state)
    }

    fn create_codestream(&mut self) -> Result<u64> {
        self.state.lock().create(Op::CreateCodestream)
    }

    fn destroy_codestream(&mut self, codestream: u64) -> Result<()> {
        self.state.lock().destroy(codestream)
    }

    fn create_decode_params(&mut self, params: DecodeParams) -> Result<u64> {
        let mut s = self.state.lock();
        let id = s.create(Op::CreateParams)?;
        s.params.insert(id, params);
        Ok(id)
    }

    fn destroy_decode_params(&mut self, params: u64) -> Result<()> {
        let mut s = self.state.lock();
        s.params.remove(&params);
        s.destroy(params)
    }

    fn parse(&mut self, _engine: u64, _codestream: u64, data: &[u8]) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(Call::Parse(data.len()));
        s.check(Op::Parse)?;
        match parse_siz(data) {
            Some(parsed) => {
                s.parsed = Some(parsed);
                Ok(())
            }
            None => {
                s.parsed = None;
                Err(Jp2kError::Engine {
                    call: "nvjpeg2kStreamParse",
                    status: 3,
                })
            }
        }
    }

    fn image_info(&mut self, _codestream: u64) -> Result<ImageInfo> {
        let mut s = self.state.lock();
        s.check(Op::ImageInfo)?;
        s.parsed.as_ref().map(|(info, _)| *info).ok_or(Jp2kError::Engine {
            call: "nvjpeg2kStreamGetImageInfo",
            status: 2,
        })
    }

    fn component_info(&mut self, _codestream: u64, component: u32) -> Result<ComponentInfo> {
        let mut s = self.state.lock();
        s.check(Op::ComponentInfo)?;
        s.parsed
            .as_ref()
            .and_then(|(_, comps)| comps.get(component as usize).copied())
            .ok_or(Jp2kError::Engine {
                call: "nvjpeg2kStreamGetImageComponentInfo",
                status: 2,
            })
    }

    fn alloc_pitched(&mut self, width_bytes: usize, height: usize) -> Result<PitchedAlloc<u64>> {
        let mut s = self.state.lock();
        s.calls.push(Call::Alloc { width_bytes, height });
        s.check(Op::Alloc)?;
        s.next_id += 1;
        let id = s.next_id;
        let pitch = width_bytes.max(1).next_multiple_of(MOCK_PITCH_ALIGN);
        s.buffers.insert(
            id,
            DeviceBuffer {
                data: vec![0u8; pitch * height],
                pitch,
                height,
            },
        );
        Ok(PitchedAlloc { ptr: id, pitch })
    }

    fn free(&mut self, ptr: u64) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(Call::Free(ptr));
        let known = s.buffers.remove(&ptr).is_some();
        s.check(Op::Free)?;
        if known {
            Ok(())
        } else {
            Err(Jp2kError::Cuda {
                call: "cudaFree",
                code: 1,
                message: "invalid argument".into(),
            })
        }
    }

    fn decode_image(&mut self, session: &SessionHandles<u64>, image: &DeviceImage<'_, u64>) -> Result<()> {
        let mut s = self.state.lock();
        let params = s.params.get(&session.params).copied().unwrap_or_default();
        s.calls.push(Call::Decode {
            packed: params.packed,
            rgb: params.rgb,
        });
        s.check(Op::Decode)?;
        let (info, comps) = s.parsed.clone().ok_or(Jp2kError::Engine {
            call: "nvjpeg2kDecodeImage",
            status: 2,
        })?;
        let pt = image.pixel_type;
        let sample = pt.bytes_per_sample();

        if params.packed {
            let buf = s.buffers.get_mut(&image.planes[0]).expect("unknown staging plane");
            assert!(info.image_width as usize * 3 * sample <= buf.pitch);
            assert!(info.image_height as usize <= buf.height);
            for y in 0..info.image_height as usize {
                let row = &mut buf.data[y * buf.pitch..(y + 1) * buf.pitch];
                for x in 0..info.image_width as usize {
                    for c in 0..3 {
                        write_sample(row, x * 3 + c, pattern(c, x, y, pt), pt);
                    }
                }
            }
        } else {
            for (c, comp) in comps.iter().enumerate() {
                let ptr = image.planes[c];
                assert_eq!(image.pitches[c], s.buffers[&ptr].pitch);
                let buf = s.buffers.get_mut(&ptr).expect("unknown staging plane");
                assert!(comp.component_width as usize * sample <= buf.pitch);
                assert!(comp.component_height as usize <= buf.height);
                for y in 0..comp.component_height as usize {
                    let row = &mut buf.data[y * buf.pitch..(y + 1) * buf.pitch];
                    for x in 0..comp.component_width as usize {
                        write_sample(row, x, pattern(c, x, y, pt), pt);
                    }
                }
            }
        }
        Ok(())
    }

    unsafe fn copy_to_host_async(
        &mut self,
        dst: *mut u8,
        dst_stride: usize,
        src: u64,
        src_pitch: usize,
        width_bytes: usize,
        height: usize,
        _stream: u64,
    ) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(Call::Copy {
            src,
            width_bytes,
            height,
        });
        s.check(Op::Copy)?;
        let buf = &s.buffers[&src];
        assert_eq!(src_pitch, buf.pitch);
        assert!(width_bytes <= buf.pitch && height <= buf.height);
        for y in 0..height {
            let row = &buf.data[y * buf.pitch..y * buf.pitch + width_bytes];
            // SAFETY: caller guarantees dst covers `height` rows of `dst_stride`
            unsafe {
                std::ptr::copy_nonoverlapping(row.as_ptr(), dst.add(y * dst_stride), width_bytes);
            }
        }
        s.pending_copies += 1;
        Ok(())
    }

    fn create_event(&mut self) -> Result<u64> {
        self.state.lock().create(Op::Event)
    }

    fn record_event(&mut self, _event: u64, _stream: u64) -> Result<()> {
        let mut s = self.state.lock();
        s.calls.push(Call::RecordEvent);
        s.check(Op::Event)
    }

    fn synchronize_event(&mut self, _event: u64) -> Result<()> {
        self.state.lock().check(Op::Event)
    }

    fn elapsed_ms(&mut self, _start: u64, _stop: u64) -> Result<f32> {
        self.state.lock().check(Op::Event)?;
        Ok(1.5)
    }

    fn destroy_event(&mut self, event: u64) -> Result<()> {
        self.state.lock().destroy(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siz_roundtrip_geometry() {
        let data = codestream(63, 31, &[(8, false, 1, 1), (8, false, 2, 2), (8, false, 2, 2)]);
        let (info, comps) = parse_siz(&data).unwrap();
        assert_eq!((info.image_width, info.image_height, info.num_components), (63, 31, 3));
        assert_eq!((info.num_tiles_x, info.num_tiles_y), (1, 1));
        assert_eq!((comps[0].component_width, comps[0].component_height), (63, 31));
        assert_eq!((comps[1].component_width, comps[1].component_height), (32, 16));
    }

    #[test]
    fn test_siz_rejects_garbage() {
        assert!(parse_siz(b"not a codestream").is_none());
        assert!(parse_siz(&[0xFF, 0x4F]).is_none());
        let mut truncated = codestream(8, 8, &[(8, false, 1, 1)]);
        truncated.truncate(30);
        assert!(parse_siz(&truncated).is_none());
    }
}
