//! CPU render target and corrected surface

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::capture::{Frame, FrameGeometry};
use crate::component::{DriverError, RenderTarget};
use crate::homography::Transform;
use crate::pipeline::{RenderSurfaces, SurfaceSource};
use crate::PipelineError;

const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// RGBA8 pixels the compositor renders into.
pub struct Texture {
    geometry: FrameGeometry,
    pixels: Vec<u8>,
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl Texture {
    pub fn new(geometry: FrameGeometry) -> Self {
        let mut pixels = vec![0; geometry.rgba_len()];
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&OPAQUE_BLACK);
        }
        Self { geometry, pixels }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Replace the contents with `frame`, which must match the texture size.
    pub fn upload(&mut self, frame: &Frame) -> Result<(), DriverError> {
        let meta = &frame.meta;
        if meta.width != self.geometry.width || meta.height != self.geometry.height {
            return Err(DriverError::Codec(format!(
                "{}x{} frame does not fit {}x{} texture",
                meta.width, meta.height, self.geometry.width, self.geometry.height
            )));
        }
        frame.write_rgba(&mut self.pixels);
        Ok(())
    }
}

pub(crate) type SharedTexture = Arc<Mutex<Texture>>;

/// Render targets by id, shared between the core and compositor stages.
#[derive(Debug, Clone, Default)]
pub(crate) struct TextureRegistry(Arc<Mutex<HashMap<RenderTarget, SharedTexture>>>);

impl TextureRegistry {
    pub fn insert(&self, target: RenderTarget, texture: SharedTexture) {
        self.0.lock().insert(target, texture);
    }

    pub fn get(&self, target: RenderTarget) -> Result<SharedTexture, DriverError> {
        self.0
            .lock()
            .get(&target)
            .cloned()
            .ok_or_else(|| DriverError::Unavailable(format!("render target {}", target.0)))
    }
}

/// [`RenderSurfaces`] on the CPU: a perspective warp of the compositor texture
/// with nearest-neighbour sampling.
pub struct SoftSurfaces {
    texture: SharedTexture,
    corrected: Vec<u8>,
    geometry: FrameGeometry,
}

impl SoftSurfaces {
    pub(crate) fn new(texture: SharedTexture) -> Self {
        let geometry = texture.lock().geometry();
        Self {
            texture,
            corrected: Texture::new(geometry).pixels,
            geometry,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }
}

impl RenderSurfaces for SoftSurfaces {
    fn composite(&mut self, transform: &Transform) -> Result<(), PipelineError> {
        let FrameGeometry { width, height } = self.geometry;
        let (w, h) = (width as usize, height as usize);
        let texture = self.texture.lock();
        let src = texture.pixels();

        let Some(inverse) = transform.planar().inverse() else {
            debug!("degenerate homography, compositing black");
            for px in self.corrected.chunks_exact_mut(4) {
                px.copy_from_slice(&OPAQUE_BLACK);
            }
            return Ok(());
        };

        for (y, row) in self.corrected.chunks_exact_mut(4 * w).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let sample = inverse
                    .apply(x as f32 + 0.5, y as f32 + 0.5)
                    .filter(|&(sx, sy)| sx >= 0.0 && sy >= 0.0 && sx < w as f32 && sy < h as f32)
                    .map(|(sx, sy)| 4 * (sy as usize * w + sx as usize));
                match sample {
                    Some(i) => px.copy_from_slice(&src[i..i + 4]),
                    None => px.copy_from_slice(&OPAQUE_BLACK),
                }
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self, source: SurfaceSource, dst: &mut [u8]) -> Result<(), PipelineError> {
        if dst.len() != self.geometry.rgba_len() {
            return Err(PipelineError::Readback(format!(
                "destination holds {} bytes, surface has {}",
                dst.len(),
                self.geometry.rgba_len()
            )));
        }
        match source {
            SurfaceSource::Corrected => dst.copy_from_slice(&self.corrected),
            SurfaceSource::Unmodified => dst.copy_from_slice(self.texture.lock().pixels()),
        }
        Ok(())
    }
}
