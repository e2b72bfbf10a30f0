#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use visicam::component::{
    AcceleratorCore, BufferHandle, Command, ComponentCallbacks, ComponentDriver, ComponentKind,
    DriverError, DriverEvent, EventFlags, PortIndex, RenderTarget, Setting, Tunnel,
};
use visicam::homography::Transform;
use visicam::pipeline::{Clock, RenderSurfaces, SurfaceSource};
use visicam::PipelineError;

/// Route test logs through the fmt subscriber; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Command(Command),
    Setting(&'static str),
    Tunnel(Tunnel),
    UseRenderTarget(PortIndex),
    UseBuffer(PortIndex),
    AllocateBuffer(PortIndex),
    Fill(PortIndex),
    Empty(PortIndex),
}

/// One driver call, with the component's pending events as they stood when
/// the call was made.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub component: ComponentKind,
    pub op: Op,
    pub pending: EventFlags,
}

/// A driver request answered with ERROR instead of its completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    Command(ComponentKind, Command),
    /// Fill number `n` (zero based) on the component.
    Fill(ComponentKind, usize),
    /// Empty number `n` (zero based) on the component.
    Empty(ComponentKind, usize),
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Call>,
    fills: HashMap<ComponentKind, usize>,
    empties: HashMap<ComponentKind, usize>,
    faults: Vec<Fault>,
    blank_encodes: Vec<usize>,
    encoded: usize,
}

impl Script {
    fn next(counts: &mut HashMap<ComponentKind, usize>, kind: ComponentKind) -> usize {
        let count = counts.entry(kind).or_default();
        let nth = *count;
        *count += 1;
        nth
    }
}

/// Accelerator double that completes every request inline on the calling
/// thread, except port enables, which it never reports unless asked to.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCore {
    script: Arc<Mutex<Script>>,
    report_enables: bool,
}

impl ScriptedCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporting_enables() -> Self {
        Self {
            report_enables: true,
            ..Self::default()
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.script.lock().faults.push(fault);
    }

    /// Have the encoder return a zero-length image for encode number `nth`.
    pub fn blank_encode(&self, nth: usize) {
        self.script.lock().blank_encodes.push(nth);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn calls_for(&self, kind: ComponentKind) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.component == kind)
            .collect()
    }
}

/// Bytes the scripted encoder writes for its `n`th image.
pub fn encoded_marker(n: usize) -> Vec<u8> {
    format!("jpeg-{n}").into_bytes()
}

impl AcceleratorCore for ScriptedCore {
    fn get_handle(
        &self,
        kind: ComponentKind,
        callbacks: ComponentCallbacks,
    ) -> Result<Box<dyn ComponentDriver>, DriverError> {
        Ok(Box::new(ScriptedDriver {
            kind,
            callbacks,
            script: self.script.clone(),
            report_enables: self.report_enables,
            encoder_output: None,
        }))
    }

    fn setup_tunnel(&self, tunnel: Tunnel) -> Result<(), DriverError> {
        self.script.lock().calls.push(Call {
            component: tunnel.source,
            op: Op::Tunnel(tunnel),
            pending: EventFlags::empty(),
        });
        Ok(())
    }
}

struct ScriptedDriver {
    kind: ComponentKind,
    callbacks: ComponentCallbacks,
    script: Arc<Mutex<Script>>,
    report_enables: bool,
    encoder_output: Option<BufferHandle>,
}

impl ScriptedDriver {
    fn raise_error(&self) {
        self.callbacks
            .event_handler(DriverEvent::Error(DriverError::Codec("injected".into())));
    }

    fn record(&self, op: Op) {
        let pending = self.callbacks.events().pending();
        self.script.lock().calls.push(Call {
            component: self.kind,
            op,
            pending,
        });
    }
}

impl ComponentDriver for ScriptedDriver {
    fn send_command(&mut self, command: Command) -> Result<(), DriverError> {
        self.record(Op::Command(command));
        let failing = self
            .script
            .lock()
            .faults
            .contains(&Fault::Command(self.kind, command));
        if failing {
            self.raise_error();
            return Ok(());
        }
        if !matches!(command, Command::PortEnable(_)) || self.report_enables {
            self.callbacks
                .event_handler(DriverEvent::CommandComplete(command));
        }
        Ok(())
    }

    fn set_setting(&mut self, setting: &Setting) -> Result<(), DriverError> {
        self.record(Op::Setting(setting.name()));
        if let Setting::CameraDevice(_) = setting {
            self.callbacks
                .event_handler(DriverEvent::ParamOrConfigChanged);
        }
        Ok(())
    }

    fn use_render_target(
        &mut self,
        port: PortIndex,
        target: RenderTarget,
    ) -> Result<BufferHandle, DriverError> {
        self.record(Op::UseRenderTarget(port));
        Ok(BufferHandle::texture(port, target, 0))
    }

    fn use_buffer(&mut self, port: PortIndex, _buffer: &BufferHandle) -> Result<(), DriverError> {
        self.record(Op::UseBuffer(port));
        Ok(())
    }

    fn allocate_buffer(
        &mut self,
        port: PortIndex,
        capacity: usize,
    ) -> Result<BufferHandle, DriverError> {
        self.record(Op::AllocateBuffer(port));
        Ok(BufferHandle::host(port, capacity))
    }

    fn fill_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError> {
        self.record(Op::Fill(buffer.lock().port()));
        let failing = {
            let mut script = self.script.lock();
            let nth = Script::next(&mut script.fills, self.kind);
            script.faults.contains(&Fault::Fill(self.kind, nth))
        };
        if failing {
            self.raise_error();
            return Ok(());
        }
        match self.kind {
            ComponentKind::Encoder => self.encoder_output = Some(buffer.clone()),
            _ => self.callbacks.fill_buffer_done(buffer),
        }
        Ok(())
    }

    fn empty_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError> {
        self.record(Op::Empty(buffer.lock().port()));
        let failing = {
            let mut script = self.script.lock();
            let nth = Script::next(&mut script.empties, self.kind);
            script.faults.contains(&Fault::Empty(self.kind, nth))
        };
        if failing {
            self.raise_error();
            return Ok(());
        }
        if let Some(output) = self.encoder_output.take() {
            let marker = {
                let mut script = self.script.lock();
                let n = script.encoded;
                script.encoded += 1;
                if script.blank_encodes.contains(&n) {
                    Vec::new()
                } else {
                    encoded_marker(n)
                }
            };
            {
                let mut header = output.lock();
                let port = header.port();
                let data = header.data_mut().ok_or(DriverError::MissingBuffer(port))?;
                data[..marker.len()].copy_from_slice(&marker);
                header.set_filled(0, marker.len())?;
            }
            self.callbacks.empty_buffer_done(buffer);
            self.callbacks.fill_buffer_done(&output);
        } else {
            self.callbacks.empty_buffer_done(buffer);
        }
        Ok(())
    }
}

/// Clock the test advances by hand.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

/// Surfaces that fill readbacks with a per-source byte and remember every call.
#[derive(Debug, Default)]
pub struct StubSurfaces {
    pub reads: Vec<SurfaceSource>,
    pub composites: Vec<Transform>,
}

impl RenderSurfaces for StubSurfaces {
    fn composite(&mut self, transform: &Transform) -> Result<(), PipelineError> {
        self.composites.push(*transform);
        Ok(())
    }

    fn read_pixels(&mut self, source: SurfaceSource, dst: &mut [u8]) -> Result<(), PipelineError> {
        self.reads.push(source);
        dst.fill(match source {
            SurfaceSource::Corrected => 0xC0,
            SurfaceSource::Unmodified => 0x0F,
        });
        Ok(())
    }
}
