use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, trace};

use super::worker::{Stage, StageContext};
use crate::component::{ports, BufferHandle, DriverError, Overrun, Setting};

/// JPEG encoder; runs once both an input and an output buffer are queued.
#[derive(Debug)]
pub(crate) struct EncoderStage {
    quality: u8,
    input: Option<BufferHandle>,
    output: Option<BufferHandle>,
}

impl Default for EncoderStage {
    fn default() -> Self {
        Self {
            quality: 75,
            input: None,
            output: None,
        }
    }
}

impl EncoderStage {
    fn encode_ready(&mut self, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let (input, output) = match (self.input.take(), self.output.take()) {
            (Some(input), Some(output)) => (input, output),
            (input, output) => {
                self.input = input;
                self.output = output;
                return Ok(());
            }
        };

        let definition = ctx
            .ports
            .get(ports::ENCODER_INPUT)?
            .definition
            .ok_or(DriverError::Undefined(ports::ENCODER_INPUT))?;
        let (width, height) = (definition.width, definition.height);

        let encoded = {
            let header = input.lock();
            let rgb = rgba_to_rgb(header.valid_bytes(), width, height)?;
            let mut encoded = Vec::new();
            JpegEncoder::new_with_quality(&mut encoded, self.quality)
                .encode(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|err| DriverError::Codec(err.to_string()))?;
            encoded
        };

        {
            let mut header = output.lock();
            let capacity = header.capacity();
            if encoded.len() > capacity {
                return Err(Overrun {
                    offset: 0,
                    length: encoded.len(),
                    capacity,
                }
                .into());
            }
            let data = header
                .data_mut()
                .ok_or(DriverError::MissingBuffer(ports::ENCODER_OUTPUT))?;
            data[..encoded.len()].copy_from_slice(&encoded);
            header.set_filled(0, encoded.len())?;
        }

        trace!(len = encoded.len(), "image encoded");
        ctx.callbacks.empty_buffer_done(&input);
        ctx.callbacks.fill_buffer_done(&output);
        Ok(())
    }
}

fn rgba_to_rgb(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DriverError> {
    let pixels = width as usize * height as usize;
    let rgba = rgba.get(..4 * pixels).ok_or_else(|| {
        DriverError::Codec(format!(
            "input holds {} bytes, {width}x{height} RGBA needs {}",
            rgba.len(),
            4 * pixels
        ))
    })?;
    Ok(rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect())
}

impl Stage for EncoderStage {
    fn apply(&mut self, setting: &Setting, _ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        match setting {
            Setting::QualityFactor { port, quality } => {
                if *port != ports::ENCODER_OUTPUT {
                    return Err(DriverError::BadPort(*port));
                }
                self.quality = (*quality).clamp(1, 100);
            }
            // Only baseline JFIF comes out of this encoder.
            Setting::Exif(_) | Setting::IjgTableScaling { .. } | Setting::Thumbnail(_) => {
                debug!(setting = setting.name(), "ignored by software encoder");
            }
            other => return Err(DriverError::UnsupportedSetting(other.name())),
        }
        Ok(())
    }

    fn fill(&mut self, buffer: BufferHandle, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        self.output = Some(buffer);
        self.encode_ready(ctx)
    }

    fn empty(&mut self, buffer: BufferHandle, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        self.input = Some(buffer);
        self.encode_ready(ctx)
    }
}
