use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::TrySendError;
use tracing::{debug, trace};

use super::worker::{Stage, StageContext};
use crate::capture::{Frame, FrameMetadata, PixelFormat};
use crate::component::{ports, DriverError, DriverEvent, LifecycleState, PortIndex, Setting};

const DEFAULT_FRAME_RATE: u32 = 30;

/// Test-pattern camera.
///
/// Preview frames flow whenever the component executes; the video port only
/// streams once capture has been started on it.
#[derive(Debug, Default)]
pub(crate) struct SensorStage {
    device_callback: bool,
    device: Option<u32>,
    capturing: bool,
    sequence: u64,
    started: Option<Instant>,
    next_frame: Option<Instant>,
    dropped: u64,
}

impl SensorStage {
    fn frame_interval(ctx: &StageContext<'_>) -> Duration {
        let rate = ctx
            .ports
            .get(ports::CAMERA_VIDEO_OUTPUT)
            .ok()
            .and_then(|slot| slot.definition)
            .and_then(|def| def.frame_rate)
            .filter(|&rate| rate > 0)
            .unwrap_or(DEFAULT_FRAME_RATE);
        Duration::from_secs(1) / rate
    }

    fn emit(&mut self, port: PortIndex, ctx: &StageContext<'_>) -> Result<(), DriverError> {
        let slot = ctx.ports.get(port)?;
        let (Some(tunnel), Some(definition)) = (&slot.tunnel_out, slot.definition) else {
            return Ok(());
        };
        if !slot.enabled {
            return Ok(());
        }

        let frame = test_pattern(
            definition.width,
            definition.height,
            self.sequence,
            self.started.map(|started| started.elapsed()),
        );
        match tunnel.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(%port, dropped = self.dropped, "downstream busy, frame dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(DriverError::Disconnected),
        }
    }
}

impl Stage for SensorStage {
    fn apply(&mut self, setting: &Setting, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        match setting {
            Setting::RequestDeviceChangeCallback(enabled) => self.device_callback = *enabled,
            Setting::CameraDevice(device) => {
                self.device = Some(*device);
                if self.device_callback {
                    ctx.callbacks
                        .event_handler(DriverEvent::ParamOrConfigChanged);
                }
            }
            Setting::PortCapturing { port, enabled } => {
                if ctx.state != LifecycleState::Executing {
                    return Err(DriverError::IncorrectState(ctx.state));
                }
                if *port != ports::CAMERA_VIDEO_OUTPUT {
                    return Err(DriverError::BadPort(*port));
                }
                debug!(device = ?self.device, enabled, "capture toggled");
                self.capturing = *enabled;
            }
            Setting::SensorMode { .. }
            | Setting::Sharpness(_)
            | Setting::Contrast(_)
            | Setting::Brightness(_)
            | Setting::Saturation(_)
            | Setting::Exposure(_)
            | Setting::ExposureControl(_)
            | Setting::FrameStabilisation(_)
            | Setting::WhiteBalance(_)
            | Setting::WhiteBalanceGains(_)
            | Setting::ImageFilter(_)
            | Setting::Mirror { .. }
            | Setting::Rotation { .. }
            | Setting::ColorEnhancement(_)
            | Setting::NoiseReduction(_)
            | Setting::InputCrop(_)
            | Setting::DynamicRange(_) => {
                trace!(setting = setting.name(), "sensor setting accepted");
            }
            other => return Err(DriverError::UnsupportedSetting(other.name())),
        }
        Ok(())
    }

    fn state_changed(&mut self, ctx: &mut StageContext<'_>) {
        if ctx.state == LifecycleState::Executing {
            let now = Instant::now();
            self.started.get_or_insert(now);
            self.next_frame = Some(now);
        } else {
            self.next_frame = None;
        }
    }

    fn wake_at(&self, state: LifecycleState) -> Option<Instant> {
        (state == LifecycleState::Executing)
            .then_some(self.next_frame)
            .flatten()
    }

    fn wake(&mut self, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let interval = Self::frame_interval(ctx);
        let now = Instant::now();
        let next = self.next_frame.map_or(now, |at| at + interval);
        self.next_frame = Some(if next < now { now + interval } else { next });

        self.emit(ports::CAMERA_PREVIEW_OUTPUT, ctx)?;
        if self.capturing {
            self.emit(ports::CAMERA_VIDEO_OUTPUT, ctx)?;
        }
        self.sequence += 1;
        Ok(())
    }
}

/// Moving diagonal luma ramp over a horizontal/vertical chroma sweep.
pub(crate) fn test_pattern(
    width: u32,
    height: u32,
    sequence: u64,
    device_timestamp: Option<Duration>,
) -> Frame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut data = Vec::with_capacity(PixelFormat::I420.frame_len(width, height));

    let phase = (sequence % 256) as usize;
    for y in 0..h {
        data.extend((0..w).map(|x| ((x + y) / 4 + phase) as u8));
    }
    for _ in 0..ch {
        data.extend((0..cw).map(|cx| (cx * 255 / cw.max(1)) as u8));
    }
    for cy in 0..ch {
        data.extend((0..cw).map(|_| (cy * 255 / ch.max(1)) as u8));
    }

    Frame {
        data: Bytes::from(data),
        meta: Arc::new(FrameMetadata {
            sequence,
            width,
            height,
            format: PixelFormat::I420,
            device_timestamp,
        }),
        timestamp: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_has_i420_layout() {
        let frame = test_pattern(6, 4, 3, None);
        assert_eq!(frame.data.len(), PixelFormat::I420.frame_len(6, 4));
        assert_eq!(frame.data[0], 3);
        assert_eq!(frame.meta.sequence, 3);
    }
}
