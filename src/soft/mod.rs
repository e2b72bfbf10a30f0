//! Software accelerator backend
//!
//! Each component runs on its own thread and reports completions through the
//! callbacks it was created with, like the hardware components do. Tunnels
//! are bounded channels of [`Frame`]s that bypass the control thread.

mod compositor;
mod encoder;
mod sensor;
mod sink;
mod surfaces;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use flume::Sender;
use parking_lot::Mutex;
use tracing::{debug, info};

pub use surfaces::{SoftSurfaces, Texture};

use crate::capture::{Frame, FrameGeometry};
use crate::component::{
    AcceleratorCore, BufferHandle, Command, ComponentCallbacks, ComponentDriver, ComponentKind,
    Direction, DriverError, PortIndex, RenderTarget, Setting, Tunnel,
};
use compositor::CompositorStage;
use encoder::EncoderStage;
use sensor::SensorStage;
use sink::DiscardStage;
use surfaces::TextureRegistry;
use worker::{Request, Stage};

/// Frames a tunnel holds before the producer starts dropping.
const TUNNEL_DEPTH: usize = 1;

/// CPU implementation of [`AcceleratorCore`].
#[derive(Debug, Default)]
pub struct SoftCore {
    components: Mutex<HashMap<ComponentKind, Sender<Request>>>,
    textures: TextureRegistry,
    next_target: AtomicU32,
}

impl SoftCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a texture the compositor can render into, along with the
    /// surfaces the control thread reads back from.
    pub fn create_render_target(&self, geometry: FrameGeometry) -> (RenderTarget, SoftSurfaces) {
        let target = RenderTarget(self.next_target.fetch_add(1, Ordering::Relaxed) + 1);
        let texture = Arc::new(Mutex::new(Texture::new(geometry)));
        self.textures.insert(target, texture.clone());
        debug!(target = target.0, ?geometry, "render target created");
        (target, SoftSurfaces::new(texture))
    }

    fn requests(&self, kind: ComponentKind) -> Result<Sender<Request>, DriverError> {
        self.components
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| DriverError::Unavailable(kind.driver_name().to_string()))
    }
}

fn check_endpoint(
    kind: ComponentKind,
    port: PortIndex,
    direction: Direction,
) -> Result<(), DriverError> {
    match kind.ports().iter().find(|p| p.index == port) {
        Some(p) if p.direction == direction => Ok(()),
        _ => Err(DriverError::BadPort(port)),
    }
}

impl AcceleratorCore for SoftCore {
    fn get_handle(
        &self,
        kind: ComponentKind,
        callbacks: ComponentCallbacks,
    ) -> Result<Box<dyn ComponentDriver>, DriverError> {
        let mut components = self.components.lock();
        if components.contains_key(&kind) {
            return Err(DriverError::Unavailable(format!(
                "{} already created",
                kind.driver_name()
            )));
        }
        let stage: Box<dyn Stage> = match kind {
            ComponentKind::Sensor => Box::<SensorStage>::default(),
            ComponentKind::DiscardSink => Box::<DiscardStage>::default(),
            ComponentKind::Compositor => Box::new(CompositorStage::new(self.textures.clone())),
            ComponentKind::Encoder => Box::<EncoderStage>::default(),
        };
        let requests = worker::spawn(kind, callbacks, stage)?;
        components.insert(kind, requests.clone());
        info!(component = %kind, "Soft component started");
        Ok(Box::new(SoftDriver {
            kind,
            requests,
            textures: self.textures.clone(),
        }))
    }

    fn setup_tunnel(&self, tunnel: Tunnel) -> Result<(), DriverError> {
        check_endpoint(tunnel.source, tunnel.source_port, Direction::Output)?;
        check_endpoint(tunnel.sink, tunnel.sink_port, Direction::Input)?;
        let source = self.requests(tunnel.source)?;
        let sink = self.requests(tunnel.sink)?;

        let (tx, rx) = flume::bounded::<Frame>(TUNNEL_DEPTH);
        source
            .send(Request::ConnectOutput {
                port: tunnel.source_port,
                tunnel: tx,
            })
            .map_err(|_| DriverError::Shutdown)?;
        sink.send(Request::ConnectInput {
            port: tunnel.sink_port,
            tunnel: rx,
        })
        .map_err(|_| DriverError::Shutdown)
    }
}

/// Submits requests to one component thread.
pub struct SoftDriver {
    kind: ComponentKind,
    requests: Sender<Request>,
    textures: TextureRegistry,
}

impl SoftDriver {
    fn submit(&self, request: Request) -> Result<(), DriverError> {
        self.requests
            .send(request)
            .map_err(|_| DriverError::Shutdown)
    }
}

impl ComponentDriver for SoftDriver {
    fn send_command(&mut self, command: Command) -> Result<(), DriverError> {
        self.submit(Request::Command(command))
    }

    fn set_setting(&mut self, setting: &Setting) -> Result<(), DriverError> {
        self.submit(Request::Setting(setting.clone()))
    }

    fn use_render_target(
        &mut self,
        port: PortIndex,
        target: RenderTarget,
    ) -> Result<BufferHandle, DriverError> {
        let capacity = self.textures.get(target)?.lock().geometry().rgba_len();
        let buffer = BufferHandle::texture(port, target, capacity);
        self.submit(Request::UseBuffer {
            port,
            buffer: buffer.clone(),
        })?;
        Ok(buffer)
    }

    fn use_buffer(&mut self, port: PortIndex, buffer: &BufferHandle) -> Result<(), DriverError> {
        self.submit(Request::UseBuffer {
            port,
            buffer: buffer.clone(),
        })
    }

    fn allocate_buffer(
        &mut self,
        port: PortIndex,
        capacity: usize,
    ) -> Result<BufferHandle, DriverError> {
        let buffer = BufferHandle::host(port, capacity);
        self.submit(Request::UseBuffer {
            port,
            buffer: buffer.clone(),
        })?;
        Ok(buffer)
    }

    fn fill_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError> {
        self.submit(Request::Fill(buffer.clone()))
    }

    fn empty_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError> {
        self.submit(Request::Empty(buffer.clone()))
    }
}

impl Drop for SoftDriver {
    fn drop(&mut self) {
        debug!(component = %self.kind, "stopping soft component");
        // The worker may already be gone after a fatal error.
        let _ = self.requests.send(Request::Shutdown);
    }
}
