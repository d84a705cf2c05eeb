// NVJPEG2K - CUDA runtime + nvJPEG2000 backend
//
// Loads libcudart and libnvjpeg2k at runtime; nothing links against CUDA at
// build time. A machine without the libraries gets LibraryLoad from
// NvJpeg2kBackend::load() and the caller can fall back to another decoder.
//
// Objects created here:
// 1. Non-blocking CUDA stream
// 2. nvjpeg2k handle, decode state, stream (codestream holder), decode params
// 3. Pitched device planes for the decoded samples
// 4. Blocking-sync events around each decode for timing

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr;
use std::sync::OnceLock;

use crate::backend::{
    BackendVersions, ComponentInfo, DeviceImage, ImageInfo, Jp2kBackend, LibraryVersion,
    PitchedAlloc, SessionHandles,
};
use crate::error::{Jp2kError, Result};
use crate::negotiate::DecodeParams;
use crate::staging::{PixelType, MAX_PLANES};

// ============================================================================
// CUDA Runtime Types (from cuda_runtime_api.h)
// ============================================================================

type CudaError = c_int;
type CudaStream = *mut c_void;
type CudaEvent = *mut c_void;

const CUDA_SUCCESS: CudaError = 0;
const CUDA_STREAM_NON_BLOCKING: u32 = 0x01;
const CUDA_EVENT_BLOCKING_SYNC: u32 = 0x01;
const CUDA_MEMCPY_DEVICE_TO_HOST: c_int = 2;

// libraryPropertyType
const MAJOR_VERSION: c_int = 0;
const MINOR_VERSION: c_int = 1;
const PATCH_LEVEL: c_int = 2;

// ============================================================================
// nvJPEG2000 Types (from nvjpeg2k.h)
// ============================================================================

type NvJpeg2kStatus = c_int;
type NvJpeg2kHandle = *mut c_void;
type NvJpeg2kDecodeState = *mut c_void;
type NvJpeg2kStream = *mut c_void;
type NvJpeg2kDecodeParams = *mut c_void;

const NVJPEG2K_STATUS_SUCCESS: NvJpeg2kStatus = 0;

// nvjpeg2kImageFormat_t
const NVJPEG2K_FORMAT_PLANAR: c_int = 0;
const NVJPEG2K_FORMAT_INTERLEAVED: c_int = 1;

// nvjpeg2kImageType_t
const NVJPEG2K_UINT8: c_int = 0;
const NVJPEG2K_UINT16: c_int = 1;
const NVJPEG2K_INT16: c_int = 2;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct NvJpeg2kImageInfo {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    num_tiles_x: u32,
    num_tiles_y: u32,
    num_components: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct NvJpeg2kImageComponentInfo {
    component_width: u32,
    component_height: u32,
    precision: u8,
    sgn: u8,
}

#[repr(C)]
struct NvJpeg2kImage {
    pixel_data: *mut *mut c_void,
    pitch_in_bytes: *mut usize,
    pixel_type: c_int,
    num_components: u32,
}

fn status_name(status: NvJpeg2kStatus) -> &'static str {
    match status {
        0 => "SUCCESS",
        1 => "NOT_INITIALIZED",
        2 => "INVALID_PARAMETER",
        3 => "BAD_JPEG",
        4 => "JPEG_NOT_SUPPORTED",
        5 => "ALLOCATOR_FAILURE",
        6 => "EXECUTION_FAILED",
        7 => "ARCH_MISMATCH",
        8 => "INTERNAL_ERROR",
        9 => "IMPLEMENTATION_NOT_SUPPORTED",
        _ => "UNKNOWN",
    }
}

// ============================================================================
// Library Path Detection
// ============================================================================

#[cfg(target_os = "windows")]
fn cudart_candidates() -> &'static [&'static str] {
    &["cudart64_12.dll", "cudart64_110.dll"]
}

#[cfg(target_os = "windows")]
fn nvjpeg2k_candidates() -> &'static [&'static str] {
    &["nvjpeg2k_0.dll"]
}

#[cfg(target_os = "linux")]
fn cudart_candidates() -> &'static [&'static str] {
    &[
        "/usr/local/cuda/lib64/libcudart.so.12",
        "/usr/lib/x86_64-linux-gnu/libcudart.so.12",
        "libcudart.so.12",
        "libcudart.so.11.0",
        "libcudart.so",
    ]
}

#[cfg(target_os = "linux")]
fn nvjpeg2k_candidates() -> &'static [&'static str] {
    &[
        "/usr/lib/x86_64-linux-gnu/libnvjpeg2k/12/libnvjpeg2k.so.0",
        "/usr/local/cuda/lib64/libnvjpeg2k.so.0",
        "libnvjpeg2k.so.0",
        "libnvjpeg2k.so",
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
fn cudart_candidates() -> &'static [&'static str] {
    &[]
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
fn nvjpeg2k_candidates() -> &'static [&'static str] {
    &[]
}

fn open_first(what: &str, candidates: &[&str]) -> std::result::Result<libloading::Library, String> {
    let mut last = format!("no {} candidates for this platform", what);
    for path in candidates {
        // SAFETY: vendor runtime libraries; their initializers have no
        // preconditions on our side.
        match unsafe { libloading::Library::new(path) } {
            Ok(lib) => {
                tracing::debug!("Loaded {} from {}", what, path);
                return Ok(lib);
            }
            Err(e) => last = format!("{}: {}", path, e),
        }
    }
    Err(format!("{} not found ({})", what, last))
}

// ============================================================================
// Function Types
// ============================================================================

type CudaGetErrorStringFn = unsafe extern "C" fn(CudaError) -> *const c_char;
type CudaStreamCreateWithFlagsFn = unsafe extern "C" fn(*mut CudaStream, u32) -> CudaError;
type CudaStreamDestroyFn = unsafe extern "C" fn(CudaStream) -> CudaError;
type CudaStreamSynchronizeFn = unsafe extern "C" fn(CudaStream) -> CudaError;
type CudaMallocPitchFn =
    unsafe extern "C" fn(*mut *mut c_void, *mut usize, usize, usize) -> CudaError;
type CudaFreeFn = unsafe extern "C" fn(*mut c_void) -> CudaError;
type CudaMemcpy2DAsyncFn = unsafe extern "C" fn(
    *mut c_void,
    usize,
    *const c_void,
    usize,
    usize,
    usize,
    c_int,
    CudaStream,
) -> CudaError;
type CudaEventCreateWithFlagsFn = unsafe extern "C" fn(*mut CudaEvent, u32) -> CudaError;
type CudaEventRecordFn = unsafe extern "C" fn(CudaEvent, CudaStream) -> CudaError;
type CudaEventSynchronizeFn = unsafe extern "C" fn(CudaEvent) -> CudaError;
type CudaEventElapsedTimeFn = unsafe extern "C" fn(*mut f32, CudaEvent, CudaEvent) -> CudaError;
type CudaEventDestroyFn = unsafe extern "C" fn(CudaEvent) -> CudaError;

type GetPropertyFn = unsafe extern "C" fn(c_int, *mut c_int) -> NvJpeg2kStatus;
type CreateSimpleFn = unsafe extern "C" fn(*mut NvJpeg2kHandle) -> NvJpeg2kStatus;
type DestroyFn = unsafe extern "C" fn(NvJpeg2kHandle) -> NvJpeg2kStatus;
type DecodeStateCreateFn =
    unsafe extern "C" fn(NvJpeg2kHandle, *mut NvJpeg2kDecodeState) -> NvJpeg2kStatus;
type DecodeStateDestroyFn = unsafe extern "C" fn(NvJpeg2kDecodeState) -> NvJpeg2kStatus;
type StreamCreateFn = unsafe extern "C" fn(*mut NvJpeg2kStream) -> NvJpeg2kStatus;
type StreamDestroyFn = unsafe extern "C" fn(NvJpeg2kStream) -> NvJpeg2kStatus;
type StreamParseFn = unsafe extern "C" fn(
    NvJpeg2kHandle,
    *const u8,
    usize,
    c_int,
    c_int,
    NvJpeg2kStream,
) -> NvJpeg2kStatus;
type StreamGetImageInfoFn =
    unsafe extern "C" fn(NvJpeg2kStream, *mut NvJpeg2kImageInfo) -> NvJpeg2kStatus;
type StreamGetImageComponentInfoFn =
    unsafe extern "C" fn(NvJpeg2kStream, *mut NvJpeg2kImageComponentInfo, u32) -> NvJpeg2kStatus;
type DecodeParamsCreateFn = unsafe extern "C" fn(*mut NvJpeg2kDecodeParams) -> NvJpeg2kStatus;
type DecodeParamsDestroyFn = unsafe extern "C" fn(NvJpeg2kDecodeParams) -> NvJpeg2kStatus;
type DecodeParamsSetRgbOutputFn = unsafe extern "C" fn(NvJpeg2kDecodeParams, i32) -> NvJpeg2kStatus;
type DecodeParamsSetOutputFormatFn =
    unsafe extern "C" fn(NvJpeg2kDecodeParams, c_int) -> NvJpeg2kStatus;
type DecodeImageFn = unsafe extern "C" fn(
    NvJpeg2kHandle,
    NvJpeg2kDecodeState,
    NvJpeg2kStream,
    NvJpeg2kDecodeParams,
    *mut NvJpeg2kImage,
    CudaStream,
) -> NvJpeg2kStatus;

// ============================================================================
// Loaded Functions Container
// ============================================================================

struct NvJp2kLibraries {
    _cudart_lib: libloading::Library,
    _nvjpeg2k_lib: libloading::Library,

    cuda_get_error_string: CudaGetErrorStringFn,
    cuda_stream_create_with_flags: CudaStreamCreateWithFlagsFn,
    cuda_stream_destroy: CudaStreamDestroyFn,
    cuda_stream_synchronize: CudaStreamSynchronizeFn,
    cuda_malloc_pitch: CudaMallocPitchFn,
    cuda_free: CudaFreeFn,
    cuda_memcpy_2d_async: CudaMemcpy2DAsyncFn,
    cuda_event_create_with_flags: CudaEventCreateWithFlagsFn,
    cuda_event_record: CudaEventRecordFn,
    cuda_event_synchronize: CudaEventSynchronizeFn,
    cuda_event_elapsed_time: CudaEventElapsedTimeFn,
    cuda_event_destroy: CudaEventDestroyFn,

    get_property: GetPropertyFn,
    get_cudart_property: GetPropertyFn,
    create_simple: CreateSimpleFn,
    destroy: DestroyFn,
    decode_state_create: DecodeStateCreateFn,
    decode_state_destroy: DecodeStateDestroyFn,
    stream_create: StreamCreateFn,
    stream_destroy: StreamDestroyFn,
    stream_parse: StreamParseFn,
    stream_get_image_info: StreamGetImageInfoFn,
    stream_get_image_component_info: StreamGetImageComponentInfoFn,
    decode_params_create: DecodeParamsCreateFn,
    decode_params_destroy: DecodeParamsDestroyFn,
    decode_params_set_rgb_output: DecodeParamsSetRgbOutputFn,
    decode_params_set_output_format: DecodeParamsSetOutputFormatFn,
    decode_image: DecodeImageFn,
}

unsafe impl Send for NvJp2kLibraries {}
unsafe impl Sync for NvJp2kLibraries {}

static NVJP2K_LIBS: OnceLock<std::result::Result<NvJp2kLibraries, String>> = OnceLock::new();

fn load_libraries() -> Result<&'static NvJp2kLibraries> {
    NVJP2K_LIBS
        .get_or_init(|| {
            let cudart = open_first("CUDA runtime", cudart_candidates())?;
            let nvjpeg2k = open_first("nvJPEG2000", nvjpeg2k_candidates())?;

            macro_rules! sym {
                ($lib:expr, $name:literal) => {{
                    // SAFETY: the declared type matches the C prototype of the symbol
                    let symbol: libloading::Symbol<_> =
                        unsafe { $lib.get(concat!($name, "\0").as_bytes()) }
                            .map_err(|e| format!("{}: {}", $name, e))?;
                    *symbol
                }};
            }

            let libs = NvJp2kLibraries {
                cuda_get_error_string: sym!(cudart, "cudaGetErrorString"),
                cuda_stream_create_with_flags: sym!(cudart, "cudaStreamCreateWithFlags"),
                cuda_stream_destroy: sym!(cudart, "cudaStreamDestroy"),
                cuda_stream_synchronize: sym!(cudart, "cudaStreamSynchronize"),
                cuda_malloc_pitch: sym!(cudart, "cudaMallocPitch"),
                cuda_free: sym!(cudart, "cudaFree"),
                cuda_memcpy_2d_async: sym!(cudart, "cudaMemcpy2DAsync"),
                cuda_event_create_with_flags: sym!(cudart, "cudaEventCreateWithFlags"),
                cuda_event_record: sym!(cudart, "cudaEventRecord"),
                cuda_event_synchronize: sym!(cudart, "cudaEventSynchronize"),
                cuda_event_elapsed_time: sym!(cudart, "cudaEventElapsedTime"),
                cuda_event_destroy: sym!(cudart, "cudaEventDestroy"),

                get_property: sym!(nvjpeg2k, "nvjpeg2kGetProperty"),
                get_cudart_property: sym!(nvjpeg2k, "nvjpeg2kGetCudartProperty"),
                create_simple: sym!(nvjpeg2k, "nvjpeg2kCreateSimple"),
                destroy: sym!(nvjpeg2k, "nvjpeg2kDestroy"),
                decode_state_create: sym!(nvjpeg2k, "nvjpeg2kDecodeStateCreate"),
                decode_state_destroy: sym!(nvjpeg2k, "nvjpeg2kDecodeStateDestroy"),
                stream_create: sym!(nvjpeg2k, "nvjpeg2kStreamCreate"),
                stream_destroy: sym!(nvjpeg2k, "nvjpeg2kStreamDestroy"),
                stream_parse: sym!(nvjpeg2k, "nvjpeg2kStreamParse"),
                stream_get_image_info: sym!(nvjpeg2k, "nvjpeg2kStreamGetImageInfo"),
                stream_get_image_component_info: sym!(
                    nvjpeg2k,
                    "nvjpeg2kStreamGetImageComponentInfo"
                ),
                decode_params_create: sym!(nvjpeg2k, "nvjpeg2kDecodeParamsCreate"),
                decode_params_destroy: sym!(nvjpeg2k, "nvjpeg2kDecodeParamsDestroy"),
                decode_params_set_rgb_output: sym!(nvjpeg2k, "nvjpeg2kDecodeParamsSetRGBOutput"),
                decode_params_set_output_format: sym!(
                    nvjpeg2k,
                    "nvjpeg2kDecodeParamsSetOutputFormat"
                ),
                decode_image: sym!(nvjpeg2k, "nvjpeg2kDecodeImage"),

                _cudart_lib: cudart,
                _nvjpeg2k_lib: nvjpeg2k,
            };

            tracing::info!("nvJPEG2000 libraries loaded successfully");
            Ok(libs)
        })
        .as_ref()
        .map_err(|e| Jp2kError::LibraryLoad(e.clone()))
}

/// Whether the CUDA runtime and nvJPEG2000 can be loaded on this machine.
pub fn nvjp2k_available() -> bool {
    load_libraries().is_ok()
}

// ============================================================================
// Handles
// ============================================================================

/// Opaque CUDA / nvJPEG2000 object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHandle(*mut c_void);

/// Device memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePtr(*mut c_void);

// Handles are only ever used by the decoder that owns them
unsafe impl Send for RawHandle {}
unsafe impl Send for DevicePtr {}

// ============================================================================
// Backend
// ============================================================================

pub struct NvJpeg2kBackend {
    libs: &'static NvJp2kLibraries,
}

impl NvJpeg2kBackend {
    pub fn load() -> Result<Self> {
        Ok(Self {
            libs: load_libraries()?,
        })
    }

    fn cuda_check(&self, call: &'static str, code: CudaError) -> Result<()> {
        if code == CUDA_SUCCESS {
            return Ok(());
        }
        // SAFETY: cudaGetErrorString returns a static NUL-terminated string
        let message = unsafe {
            let s = (self.libs.cuda_get_error_string)(code);
            if s.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(s).to_string_lossy().into_owned()
            }
        };
        Err(Jp2kError::Cuda {
            call,
            code,
            message,
        })
    }

    fn nvjp2k_check(&self, call: &'static str, status: NvJpeg2kStatus) -> Result<()> {
        if status == NVJPEG2K_STATUS_SUCCESS {
            Ok(())
        } else {
            tracing::debug!("{} returned {}", call, status_name(status));
            Err(Jp2kError::Engine { call, status })
        }
    }

    fn property(&self, call: &'static str, get: GetPropertyFn) -> Result<LibraryVersion> {
        let mut v = [0 as c_int; 3];
        for (slot, prop) in v.iter_mut().zip([MAJOR_VERSION, MINOR_VERSION, PATCH_LEVEL]) {
            // SAFETY: out-pointer to a live c_int
            self.nvjp2k_check(call, unsafe { get(prop, slot) })?;
        }
        Ok(LibraryVersion {
            major: v[0],
            minor: v[1],
            patch: v[2],
        })
    }

    fn set_decode_params(&self, handle: NvJpeg2kDecodeParams, params: DecodeParams) -> Result<()> {
        let format = if params.packed {
            NVJPEG2K_FORMAT_INTERLEAVED
        } else {
            NVJPEG2K_FORMAT_PLANAR
        };
        // Interleaved output implies RGB samples
        let rgb = i32::from(params.rgb || params.packed);
        unsafe {
            self.nvjp2k_check(
                "nvjpeg2kDecodeParamsSetRGBOutput",
                (self.libs.decode_params_set_rgb_output)(handle, rgb),
            )?;
            self.nvjp2k_check(
                "nvjpeg2kDecodeParamsSetOutputFormat",
                (self.libs.decode_params_set_output_format)(handle, format),
            )
        }
    }
}

fn pixel_type_code(pixel_type: PixelType) -> c_int {
    match pixel_type {
        PixelType::U8 => NVJPEG2K_UINT8,
        PixelType::U16 => NVJPEG2K_UINT16,
        PixelType::I16 => NVJPEG2K_INT16,
    }
}

impl Jp2kBackend for NvJpeg2kBackend {
    type Handle = RawHandle;
    type DevicePtr = DevicePtr;

    fn versions(&self) -> Result<BackendVersions> {
        Ok(BackendVersions {
            engine: self.property("nvjpeg2kGetProperty", self.libs.get_property)?,
            cudart: self.property("nvjpeg2kGetCudartProperty", self.libs.get_cudart_property)?,
        })
    }

    fn create_stream(&mut self) -> Result<RawHandle> {
        let mut stream: CudaStream = ptr::null_mut();
        let code = unsafe { (self.libs.cuda_stream_create_with_flags)(&mut stream, CUDA_STREAM_NON_BLOCKING) };
        self.cuda_check("cudaStreamCreateWithFlags", code)?;
        Ok(RawHandle(stream))
    }

    fn destroy_stream(&mut self, stream: RawHandle) -> Result<()> {
        let code = unsafe { (self.libs.cuda_stream_destroy)(stream.0) };
        self.cuda_check("cudaStreamDestroy", code)
    }

    fn synchronize(&mut self, stream: RawHandle) -> Result<()> {
        let code = unsafe { (self.libs.cuda_stream_synchronize)(stream.0) };
        self.cuda_check("cudaStreamSynchronize", code)
    }

    fn create_engine(&mut self) -> Result<RawHandle> {
        let mut handle: NvJpeg2kHandle = ptr::null_mut();
        let status = unsafe { (self.libs.create_simple)(&mut handle) };
        self.nvjp2k_check("nvjpeg2kCreateSimple", status)?;
        Ok(RawHandle(handle))
    }

    fn destroy_engine(&mut self, engine: RawHandle) -> Result<()> {
        let status = unsafe { (self.libs.destroy)(engine.0) };
        self.nvjp2k_check("nvjpeg2kDestroy", status)
    }

    fn create_decode_state(&mut self, engine: RawHandle) -> Result<RawHandle> {
        let mut state: NvJpeg2kDecodeState = ptr::null_mut();
        let status = unsafe { (self.libs.decode_state_create)(engine.0, &mut state) };
        self.nvjp2k_check("nvjpeg2kDecodeStateCreate", status)?;
        Ok(RawHandle(state))
    }

    fn destroy_decode_state(&mut self, state: RawHandle) -> Result<()> {
        let status = unsafe { (self.libs.decode_state_destroy)(state.0) };
        self.nvjp2k_check("nvjpeg2kDecodeStateDestroy", status)
    }

    fn create_codestream(&mut self) -> Result<RawHandle> {
        let mut stream: NvJpeg2kStream = ptr::null_mut();
        let status = unsafe { (self.libs.stream_create)(&mut stream) };
        self.nvjp2k_check("nvjpeg2kStreamCreate", status)?;
        Ok(RawHandle(stream))
    }

    fn destroy_codestream(&mut self, codestream: RawHandle) -> Result<()> {
        let status = unsafe { (self.libs.stream_destroy)(codestream.0) };
        self.nvjp2k_check("nvjpeg2kStreamDestroy", status)
    }

    fn create_decode_params(&mut self, params: DecodeParams) -> Result<RawHandle> {
        let mut handle: NvJpeg2kDecodeParams = ptr::null_mut();
        let status = unsafe { (self.libs.decode_params_create)(&mut handle) };
        self.nvjp2k_check("nvjpeg2kDecodeParamsCreate", status)?;
        if let Err(e) = self.set_decode_params(handle, params) {
            unsafe { (self.libs.decode_params_destroy)(handle) };
            return Err(e);
        }
        Ok(RawHandle(handle))
    }

    fn destroy_decode_params(&mut self, params: RawHandle) -> Result<()> {
        let status = unsafe { (self.libs.decode_params_destroy)(params.0) };
        self.nvjp2k_check("nvjpeg2kDecodeParamsDestroy", status)
    }

    fn parse(&mut self, engine: RawHandle, codestream: RawHandle, data: &[u8]) -> Result<()> {
        // save_metadata = 0, save_stream = 0: the packet outlives the decode call
        let status = unsafe {
            (self.libs.stream_parse)(engine.0, data.as_ptr(), data.len(), 0, 0, codestream.0)
        };
        self.nvjp2k_check("nvjpeg2kStreamParse", status)
    }

    fn image_info(&mut self, codestream: RawHandle) -> Result<ImageInfo> {
        let mut info = NvJpeg2kImageInfo::default();
        let status = unsafe { (self.libs.stream_get_image_info)(codestream.0, &mut info) };
        self.nvjp2k_check("nvjpeg2kStreamGetImageInfo", status)?;
        Ok(ImageInfo {
            image_width: info.image_width,
            image_height: info.image_height,
            tile_width: info.tile_width,
            tile_height: info.tile_height,
            num_tiles_x: info.num_tiles_x,
            num_tiles_y: info.num_tiles_y,
            num_components: info.num_components,
        })
    }

    fn component_info(&mut self, codestream: RawHandle, component: u32) -> Result<ComponentInfo> {
        let mut info = NvJpeg2kImageComponentInfo::default();
        let status = unsafe {
            (self.libs.stream_get_image_component_info)(codestream.0, &mut info, component)
        };
        self.nvjp2k_check("nvjpeg2kStreamGetImageComponentInfo", status)?;
        Ok(ComponentInfo {
            component_width: info.component_width,
            component_height: info.component_height,
            precision: info.precision,
            signed: info.sgn != 0,
        })
    }

    fn alloc_pitched(&mut self, width_bytes: usize, height: usize) -> Result<PitchedAlloc<DevicePtr>> {
        let mut ptr: *mut c_void = ptr::null_mut();
        let mut pitch = 0usize;
        let code = unsafe { (self.libs.cuda_malloc_pitch)(&mut ptr, &mut pitch, width_bytes, height) };
        self.cuda_check("cudaMallocPitch", code)?;
        Ok(PitchedAlloc {
            ptr: DevicePtr(ptr),
            pitch,
        })
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        let code = unsafe { (self.libs.cuda_free)(ptr.0) };
        self.cuda_check("cudaFree", code)
    }

    fn decode_image(
        &mut self,
        session: &SessionHandles<RawHandle>,
        image: &DeviceImage<'_, DevicePtr>,
    ) -> Result<()> {
        let mut planes = [ptr::null_mut::<c_void>(); MAX_PLANES];
        let mut pitches = [0usize; MAX_PLANES];
        for (i, (p, pitch)) in image.planes.iter().zip(image.pitches).take(MAX_PLANES).enumerate() {
            planes[i] = p.0;
            pitches[i] = *pitch;
        }
        let mut output = NvJpeg2kImage {
            pixel_data: planes.as_mut_ptr(),
            pitch_in_bytes: pitches.as_mut_ptr(),
            pixel_type: pixel_type_code(image.pixel_type),
            num_components: image.num_components,
        };
        // SAFETY: planes/pitches outlive the call; the engine reads them
        // before returning and only writes through the device pointers.
        let status = unsafe {
            (self.libs.decode_image)(
                session.engine.0,
                session.state.0,
                session.codestream.0,
                session.params.0,
                &mut output,
                session.stream.0,
            )
        };
        self.nvjp2k_check("nvjpeg2kDecodeImage", status)
    }

    unsafe fn copy_to_host_async(
        &mut self,
        dst: *mut u8,
        dst_stride: usize,
        src: DevicePtr,
        src_pitch: usize,
        width_bytes: usize,
        height: usize,
        stream: RawHandle,
    ) -> Result<()> {
        let code = unsafe {
            (self.libs.cuda_memcpy_2d_async)(
                dst.cast(),
                dst_stride,
                src.0.cast_const(),
                src_pitch,
                width_bytes,
                height,
                CUDA_MEMCPY_DEVICE_TO_HOST,
                stream.0,
            )
        };
        self.cuda_check("cudaMemcpy2DAsync", code)
    }

    fn create_event(&mut self) -> Result<RawHandle> {
        let mut event: CudaEvent = ptr::null_mut();
        let code = unsafe { (self.libs.cuda_event_create_with_flags)(&mut event, CUDA_EVENT_BLOCKING_SYNC) };
        self.cuda_check("cudaEventCreateWithFlags", code)?;
        Ok(RawHandle(event))
    }

    fn record_event(&mut self, event: RawHandle, stream: RawHandle) -> Result<()> {
        let code = unsafe { (self.libs.cuda_event_record)(event.0, stream.0) };
        self.cuda_check("cudaEventRecord", code)
    }

    fn synchronize_event(&mut self, event: RawHandle) -> Result<()> {
        let code = unsafe { (self.libs.cuda_event_synchronize)(event.0) };
        self.cuda_check("cudaEventSynchronize", code)
    }

    fn elapsed_ms(&mut self, start: RawHandle, stop: RawHandle) -> Result<f32> {
        let mut ms = 0f32;
        let code = unsafe { (self.libs.cuda_event_elapsed_time)(&mut ms, start.0, stop.0) };
        self.cuda_check("cudaEventElapsedTime", code)?;
        Ok(ms)
    }

    fn destroy_event(&mut self, event: RawHandle) -> Result<()> {
        let code = unsafe { (self.libs.cuda_event_destroy)(event.0) };
        self.cuda_check("cudaEventDestroy", code)
    }
}
