use flume::Receiver;
use tracing::trace;

use super::surfaces::TextureRegistry;
use super::worker::{Stage, StageContext};
use crate::capture::Frame;
use crate::component::{ports, BufferHandle, DriverError};

/// Renders the newest tunnelled sensor frame into the bound texture on each fill.
#[derive(Debug)]
pub(crate) struct CompositorStage {
    textures: TextureRegistry,
}

impl CompositorStage {
    pub fn new(textures: TextureRegistry) -> Self {
        Self { textures }
    }
}

/// Skip to the most recent frame, blocking only when none is queued.
fn newest(tunnel: &Receiver<Frame>) -> Result<Frame, DriverError> {
    match tunnel.try_iter().last() {
        Some(frame) => Ok(frame),
        None => tunnel.recv().map_err(|_| DriverError::Disconnected),
    }
}

impl Stage for CompositorStage {
    fn fill(&mut self, buffer: BufferHandle, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let input = ctx.ports.get(ports::COMPOSITOR_INPUT)?;
        if !input.enabled {
            return Err(DriverError::PortDisabled(ports::COMPOSITOR_INPUT));
        }
        let tunnel = input.tunnel_in.as_ref().ok_or(DriverError::Disconnected)?;
        let frame = newest(tunnel)?;

        let (port, target) = {
            let header = buffer.lock();
            (header.port(), header.render_target())
        };
        let target = target.ok_or(DriverError::MissingBuffer(port))?;
        let texture = self.textures.get(target)?;
        let len = {
            let mut texture = texture.lock();
            texture.upload(&frame)?;
            texture.pixels().len()
        };
        buffer.lock().set_filled(0, len)?;

        trace!(sequence = frame.meta.sequence, "frame rendered");
        ctx.callbacks.fill_buffer_done(&buffer);
        Ok(())
    }
}
