use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Sensor clock, relative to capture start
}

/// Pixel formats flowing through the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, full-size Y plane then quarter-size U and V planes.
    I420,
    /// 8 bits per channel, R, G, B, A, rows tightly packed.
    Rgba8,
}

impl PixelFormat {
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::I420 => w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)),
            PixelFormat::Rgba8 => 4 * w * h,
        }
    }
}

/// Output resolution shared by every stage after the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn rgba_len(&self) -> usize {
        PixelFormat::Rgba8.frame_len(self.width, self.height)
    }
}

impl Frame {
    /// Convert into tightly packed RGBA8; `dst` must hold `4 * width * height` bytes.
    ///
    /// I420 is converted with BT.601 limited-range coefficients.
    pub fn write_rgba(&self, dst: &mut [u8]) {
        let (w, h) = (self.meta.width as usize, self.meta.height as usize);
        match self.meta.format {
            PixelFormat::Rgba8 => {
                let len = dst.len().min(self.data.len());
                dst[..len].copy_from_slice(&self.data[..len]);
            }
            PixelFormat::I420 => {
                let cw = w.div_ceil(2);
                let ch = h.div_ceil(2);
                let (y_plane, chroma) = self.data.split_at(w * h);
                let (u_plane, v_plane) = chroma.split_at(cw * ch);
                for (row, out_row) in dst.chunks_exact_mut(4 * w).take(h).enumerate() {
                    for (col, px) in out_row.chunks_exact_mut(4).enumerate() {
                        let c = (row / 2) * cw + col / 2;
                        let y = y_plane[row * w + col] as f32 - 16.0;
                        let u = u_plane[c] as f32 - 128.0;
                        let v = v_plane[c] as f32 - 128.0;
                        px[0] = (1.164 * y + 1.596 * v).clamp(0.0, 255.0) as u8;
                        px[1] = (1.164 * y - 0.392 * u - 0.813 * v).clamp(0.0, 255.0) as u8;
                        px[2] = (1.164 * y + 2.017 * u).clamp(0.0, 255.0) as u8;
                        px[3] = 255;
                    }
                }
            }
        }
    }
}
