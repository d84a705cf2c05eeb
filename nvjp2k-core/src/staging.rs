//! # Staging Buffers
//!
//! Device-resident planes the engine decodes into before the copy back to
//! host memory. Sizes are only known once the first codestream has been
//! parsed, so the pool is planned from that packet and allocated once.
//! Later packets reuse the same planes; the stream is assumed to keep the
//! geometry and precision of its first image.

use crate::backend::{ComponentInfo, DeviceImage, ImageInfo, Jp2kBackend};
use crate::error::{Jp2kError, Result};
use crate::format::PixelFormat;

/// One slot per possible component.
pub const MAX_PLANES: usize = 4;

/// Samples per pixel in interleaved (RGB) output.
pub const PACKED_COMPONENTS: usize = 3;

// ============================================================================
// Pixel Type
// ============================================================================

/// Sample type the engine writes into the staging planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    U16,
    I16,
}

impl PixelType {
    /// 8 bits -> U8, 9..=15 bits -> 16-bit (signed if the component is),
    /// anything else is unsupported.
    pub fn for_component(component: &ComponentInfo) -> Result<Self> {
        match component.precision {
            8 => Ok(Self::U8),
            p if p > 8 && p < 16 => Ok(if component.signed { Self::I16 } else { Self::U16 }),
            p => Err(Jp2kError::UnsupportedPrecision(p)),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
        }
    }
}

// ============================================================================
// Layout Planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub width_bytes: usize,
    pub height: usize,
}

/// Plane shapes derived from one parsed codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    pub pixel_type: PixelType,
    pub num_components: u32,
    pub planes: Vec<PlaneGeometry>,
    /// Leading planes that end up in the host frame
    pub output_planes: usize,
}

impl StagingLayout {
    /// Work out the staging planes for `format` given the parsed metadata.
    ///
    /// Packed mode: a single interleaved plane covering the whole image.
    /// Planar mode: one plane per component at the component's own size.
    pub fn plan(
        format: PixelFormat,
        packed: bool,
        info: &ImageInfo,
        components: &[ComponentInfo],
    ) -> Result<Self> {
        let first = components.first().ok_or(Jp2kError::PlaneMismatch {
            format,
            components: 0,
            planes: format.plane_count(),
        })?;
        let pixel_type = PixelType::for_component(first)?;
        if components.len() > MAX_PLANES {
            return Err(Jp2kError::TooManyComponents(components.len() as u32));
        }
        let sample = pixel_type.bytes_per_sample();

        let planes = if packed {
            // RGB output: three interleaved samples per pixel, one per component
            if components.len() != PACKED_COMPONENTS {
                return Err(Jp2kError::PlaneMismatch {
                    format,
                    components: components.len() as u32,
                    planes: PACKED_COMPONENTS,
                });
            }
            let bpp = format.bytes_per_pixel(0);
            if bpp != PACKED_COMPONENTS * sample {
                return Err(Jp2kError::PixelLayoutMismatch {
                    format,
                    plane: 0,
                    pixel_type,
                });
            }
            vec![PlaneGeometry {
                width_bytes: info.image_width as usize * bpp,
                height: info.image_height as usize,
            }]
        } else {
            if components.len() < format.plane_count() {
                return Err(Jp2kError::PlaneMismatch {
                    format,
                    components: components.len() as u32,
                    planes: format.plane_count(),
                });
            }
            if let Some(plane) =
                (0..format.plane_count()).find(|&p| format.bytes_per_pixel(p) != sample)
            {
                return Err(Jp2kError::PixelLayoutMismatch {
                    format,
                    plane,
                    pixel_type,
                });
            }
            components
                .iter()
                .map(|c| PlaneGeometry {
                    width_bytes: c.component_width as usize * sample,
                    height: c.component_height as usize,
                })
                .collect()
        };

        Ok(Self {
            pixel_type,
            num_components: info.num_components,
            output_planes: if packed { 1 } else { format.plane_count() },
            planes,
        })
    }
}

// ============================================================================
// Staging Buffers
// ============================================================================

/// Device planes owned by one decoder instance.
#[derive(Debug)]
pub struct StagingBuffers<P> {
    layout: StagingLayout,
    ptrs: Vec<P>,
    pitches: Vec<usize>,
}

impl<P: Copy> StagingBuffers<P> {
    /// Allocate every plane of `layout`. On failure, planes allocated so far
    /// are released again and nothing is retained.
    pub fn allocate<B>(backend: &mut B, layout: StagingLayout) -> Result<Self>
    where
        B: Jp2kBackend<DevicePtr = P>,
    {
        let mut ptrs = Vec::with_capacity(layout.planes.len());
        let mut pitches = Vec::with_capacity(layout.planes.len());

        for (i, plane) in layout.planes.iter().enumerate() {
            match backend.alloc_pitched(plane.width_bytes, plane.height) {
                Ok(alloc) => {
                    ptrs.push(alloc.ptr);
                    pitches.push(alloc.pitch);
                }
                Err(e) => {
                    tracing::error!(
                        "Staging plane {} ({}x{} bytes) allocation failed: {}",
                        i,
                        plane.width_bytes,
                        plane.height,
                        e
                    );
                    free_planes(backend, &ptrs);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Allocated {} staging plane(s), {:?}, pitches {:?}",
            ptrs.len(),
            layout.pixel_type,
            pitches
        );

        Ok(Self {
            layout,
            ptrs,
            pitches,
        })
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn pixel_type(&self) -> PixelType {
        self.layout.pixel_type
    }

    pub fn plane_count(&self) -> usize {
        self.ptrs.len()
    }

    pub fn ptr(&self, plane: usize) -> Option<P> {
        self.ptrs.get(plane).copied()
    }

    pub fn pitch(&self, plane: usize) -> Option<usize> {
        self.pitches.get(plane).copied()
    }

    /// Check that a freshly planned layout fits these buffers unchanged.
    pub fn accepts(&self, layout: &StagingLayout) -> Result<()> {
        if layout.pixel_type != self.layout.pixel_type {
            return Err(Jp2kError::PixelTypeChanged {
                allocated: self.layout.pixel_type,
                found: layout.pixel_type,
            });
        }
        if layout.num_components != self.layout.num_components {
            return Err(Jp2kError::ComponentCountChanged {
                allocated: self.layout.num_components,
                found: layout.num_components,
            });
        }
        if layout.planes.len() != self.layout.planes.len() {
            return Err(Jp2kError::PlaneCountChanged {
                allocated: self.layout.planes.len(),
                found: layout.planes.len(),
            });
        }
        for (plane, (new, old)) in layout.planes.iter().zip(&self.layout.planes).enumerate() {
            if new != old {
                return Err(Jp2kError::GeometryMismatch {
                    plane,
                    width_bytes: new.width_bytes,
                    height: new.height,
                });
            }
        }
        Ok(())
    }

    pub fn device_image(&self) -> DeviceImage<'_, P> {
        DeviceImage {
            planes: &self.ptrs,
            pitches: &self.pitches,
            pixel_type: self.layout.pixel_type,
            num_components: self.layout.num_components,
        }
    }

    /// Free every plane. Failures are logged; returns how many frees failed.
    pub fn release<B>(self, backend: &mut B) -> usize
    where
        B: Jp2kBackend<DevicePtr = P>,
    {
        free_planes(backend, &self.ptrs)
    }
}

fn free_planes<B: Jp2kBackend>(backend: &mut B, ptrs: &[B::DevicePtr]) -> usize {
    let mut failures = 0;
    for (i, ptr) in ptrs.iter().enumerate() {
        if let Err(e) = backend.free(*ptr) {
            tracing::warn!("Failed to free staging plane {}: {}", i, e);
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockBackend, Op};

    fn comp(width: u32, height: u32, precision: u8, signed: bool) -> ComponentInfo {
        ComponentInfo {
            component_width: width,
            component_height: height,
            precision,
            signed,
        }
    }

    fn image(width: u32, height: u32, components: u32) -> ImageInfo {
        ImageInfo {
            image_width: width,
            image_height: height,
            tile_width: width,
            tile_height: height,
            num_tiles_x: 1,
            num_tiles_y: 1,
            num_components: components,
        }
    }

    #[test]
    fn test_pixel_type_selection() {
        assert_eq!(PixelType::for_component(&comp(1, 1, 8, false)).unwrap(), PixelType::U8);
        assert_eq!(PixelType::for_component(&comp(1, 1, 8, true)).unwrap(), PixelType::U8);
        assert_eq!(PixelType::for_component(&comp(1, 1, 9, false)).unwrap(), PixelType::U16);
        assert_eq!(PixelType::for_component(&comp(1, 1, 15, true)).unwrap(), PixelType::I16);
        for bad in [1, 7, 16, 20] {
            assert!(matches!(
                PixelType::for_component(&comp(1, 1, bad, false)),
                Err(Jp2kError::UnsupportedPrecision(p)) if p == bad
            ));
        }
    }

    #[test]
    fn test_plan_planar_follows_components() {
        let comps = [comp(63, 31, 8, false), comp(32, 16, 8, false), comp(32, 16, 8, false)];
        let layout = StagingLayout::plan(PixelFormat::Yuv420p, false, &image(63, 31, 3), &comps).unwrap();
        assert_eq!(layout.pixel_type, PixelType::U8);
        assert_eq!(layout.output_planes, 3);
        assert_eq!(
            layout.planes,
            vec![
                PlaneGeometry { width_bytes: 63, height: 31 },
                PlaneGeometry { width_bytes: 32, height: 16 },
                PlaneGeometry { width_bytes: 32, height: 16 },
            ]
        );
    }

    #[test]
    fn test_plan_packed_single_plane() {
        let comps = [comp(10, 4, 12, false); 3];
        let layout = StagingLayout::plan(PixelFormat::Rgb48le, true, &image(10, 4, 3), &comps).unwrap();
        assert_eq!(layout.output_planes, 1);
        assert_eq!(layout.planes, vec![PlaneGeometry { width_bytes: 60, height: 4 }]);
    }

    #[test]
    fn test_plan_rejects_bad_inputs() {
        let info = image(8, 8, 1);
        let gray = [comp(8, 8, 8, false)];
        assert!(matches!(
            StagingLayout::plan(PixelFormat::Yuv420p, false, &info, &gray),
            Err(Jp2kError::PlaneMismatch { components: 1, planes: 3, .. })
        ));
        assert!(matches!(
            StagingLayout::plan(PixelFormat::Gray8, false, &info, &[]),
            Err(Jp2kError::PlaneMismatch { components: 0, .. })
        ));

        let deep = [comp(8, 8, 10, false); 3];
        assert!(matches!(
            StagingLayout::plan(PixelFormat::Rgb24, true, &image(8, 8, 3), &deep),
            Err(Jp2kError::PixelLayoutMismatch { plane: 0, .. })
        ));

        let five = [comp(8, 8, 8, false); 5];
        assert!(matches!(
            StagingLayout::plan(PixelFormat::Yuv444p, false, &image(8, 8, 5), &five),
            Err(Jp2kError::TooManyComponents(5))
        ));
    }

    #[test]
    fn test_plan_packed_needs_three_components() {
        for count in [1usize, 2, 4] {
            let comps = vec![comp(16, 16, 8, false); count];
            let info = image(16, 16, count as u32);
            assert!(matches!(
                StagingLayout::plan(PixelFormat::Rgb24, true, &info, &comps),
                Err(Jp2kError::PlaneMismatch { components, planes: 3, .. }) if components == count as u32
            ));
        }
    }

    #[test]
    fn test_accepts_rejects_component_count_change() {
        let mut backend = MockBackend::new();
        let comps = [comp(16, 16, 8, false); 3];
        let layout = StagingLayout::plan(PixelFormat::Rgb24, true, &image(16, 16, 3), &comps).unwrap();
        let staging = StagingBuffers::allocate(&mut backend, layout.clone()).unwrap();

        let changed = StagingLayout {
            num_components: 4,
            ..layout
        };
        assert!(matches!(
            staging.accepts(&changed),
            Err(Jp2kError::ComponentCountChanged { allocated: 3, found: 4 })
        ));

        staging.release(&mut backend);
    }

    #[test]
    fn test_allocate_and_release() {
        let mut backend = MockBackend::new();
        let state = backend.state();
        let comps = [comp(16, 16, 8, false), comp(8, 8, 8, false), comp(8, 8, 8, false)];
        let layout = StagingLayout::plan(PixelFormat::Yuv420p, false, &image(16, 16, 3), &comps).unwrap();

        let staging = StagingBuffers::allocate(&mut backend, layout).unwrap();
        assert_eq!(staging.plane_count(), 3);
        assert!(staging.pitch(0).unwrap() >= 16);
        assert!(staging.ptr(3).is_none());
        assert_eq!(staging.device_image().planes.len(), 3);
        assert_eq!(state.lock().live_objects(), 3);

        assert_eq!(staging.release(&mut backend), 0);
        assert_eq!(state.lock().live_objects(), 0);
    }

    #[test]
    fn test_allocate_failure_frees_partial_planes() {
        let mut backend = MockBackend::new();
        let state = backend.state();
        state.lock().fail_after(Op::Alloc, 2);
        let comps = [comp(16, 16, 8, false); 3];
        let layout = StagingLayout::plan(PixelFormat::Yuv444p, false, &image(16, 16, 3), &comps).unwrap();

        assert!(StagingBuffers::allocate(&mut backend, layout).is_err());
        assert_eq!(state.lock().count(|c| matches!(c, Call::Free(_))), 2);
        assert_eq!(state.lock().live_objects(), 0);
    }

    #[test]
    fn test_accepts_same_layout_only() {
        let mut backend = MockBackend::new();
        let comps = [comp(16, 16, 10, false); 3];
        let plan = |c: &[ComponentInfo], w| {
            StagingLayout::plan(PixelFormat::Yuv444p10le, false, &image(w, 16, 3), c).unwrap()
        };
        let staging = StagingBuffers::allocate(&mut backend, plan(&comps, 16)).unwrap();

        assert!(staging.accepts(&plan(&comps, 16)).is_ok());

        let narrow = [comp(12, 16, 10, false); 3];
        assert!(matches!(
            staging.accepts(&plan(&narrow, 12)),
            Err(Jp2kError::GeometryMismatch { plane: 0, width_bytes: 24, height: 16 })
        ));

        let four = [comp(16, 16, 10, false); 4];
        assert!(matches!(
            staging.accepts(&plan(&four, 16)),
            Err(Jp2kError::PlaneCountChanged { allocated: 3, found: 4 })
        ));

        staging.release(&mut backend);
    }
}
