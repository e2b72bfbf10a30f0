//! Accelerator components: identities, ports, the driver seam and the
//! blocking handle the control thread drives them through.

pub mod buffer;
pub mod event;
pub mod settings;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

pub use buffer::{BufferHandle, BufferHeader, Overrun, RenderTarget};
pub use event::{EventChannel, EventFlags};
pub use settings::{ColorFormat, Coding, PortDefinition, Setting};

use crate::{PipelineError, PortEnablePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortIndex(pub u32);

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port numbers as the component firmware exposes them.
pub mod ports {
    use super::PortIndex;

    pub const CAMERA_PREVIEW_OUTPUT: PortIndex = PortIndex(70);
    pub const CAMERA_VIDEO_OUTPUT: PortIndex = PortIndex(71);
    pub const CAMERA_STILL_OUTPUT: PortIndex = PortIndex(72);
    pub const CAMERA_CLOCK_INPUT: PortIndex = PortIndex(73);
    pub const COMPOSITOR_INPUT: PortIndex = PortIndex(220);
    pub const COMPOSITOR_OUTPUT: PortIndex = PortIndex(221);
    pub const NULL_SINK_VIDEO_INPUT: PortIndex = PortIndex(240);
    pub const NULL_SINK_IMAGE_INPUT: PortIndex = PortIndex(241);
    pub const NULL_SINK_AUDIO_INPUT: PortIndex = PortIndex(242);
    pub const ENCODER_INPUT: PortIndex = PortIndex(340);
    pub const ENCODER_OUTPUT: PortIndex = PortIndex(341);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub index: PortIndex,
    pub direction: Direction,
}

const fn input(index: PortIndex) -> Port {
    Port {
        index,
        direction: Direction::Input,
    }
}

const fn output(index: PortIndex) -> Port {
    Port {
        index,
        direction: Direction::Output,
    }
}

const SENSOR_PORTS: [Port; 4] = [
    output(ports::CAMERA_PREVIEW_OUTPUT),
    output(ports::CAMERA_VIDEO_OUTPUT),
    output(ports::CAMERA_STILL_OUTPUT),
    input(ports::CAMERA_CLOCK_INPUT),
];
const DISCARD_SINK_PORTS: [Port; 3] = [
    input(ports::NULL_SINK_VIDEO_INPUT),
    input(ports::NULL_SINK_IMAGE_INPUT),
    input(ports::NULL_SINK_AUDIO_INPUT),
];
const COMPOSITOR_PORTS: [Port; 2] = [
    input(ports::COMPOSITOR_INPUT),
    output(ports::COMPOSITOR_OUTPUT),
];
const ENCODER_PORTS: [Port; 2] = [input(ports::ENCODER_INPUT), output(ports::ENCODER_OUTPUT)];

/// The four stages of the capture graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Sensor,
    DiscardSink,
    Compositor,
    Encoder,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Sensor,
        ComponentKind::DiscardSink,
        ComponentKind::Compositor,
        ComponentKind::Encoder,
    ];

    pub fn id(self) -> u32 {
        match self {
            ComponentKind::Sensor => 1,
            ComponentKind::DiscardSink => 2,
            ComponentKind::Compositor => 3,
            ComponentKind::Encoder => 4,
        }
    }

    /// Name the backend registers the component under.
    pub fn driver_name(self) -> &'static str {
        match self {
            ComponentKind::Sensor => "camera",
            ComponentKind::DiscardSink => "null_sink",
            ComponentKind::Compositor => "egl_render",
            ComponentKind::Encoder => "image_encode",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ComponentKind::Sensor => "sensor",
            ComponentKind::DiscardSink => "discard-sink",
            ComponentKind::Compositor => "compositor",
            ComponentKind::Encoder => "encoder",
        }
    }

    pub fn ports(self) -> &'static [Port] {
        match self {
            ComponentKind::Sensor => &SENSOR_PORTS,
            ComponentKind::DiscardSink => &DISCARD_SINK_PORTS,
            ComponentKind::Compositor => &COMPOSITOR_PORTS,
            ComponentKind::Encoder => &ENCODER_PORTS,
        }
    }

    pub fn owns(self, port: PortIndex) -> bool {
        self.ports().iter().any(|p| p.index == port)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Loaded,
    Idle,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    StateSet(LifecycleState),
    PortEnable(PortIndex),
    PortDisable(PortIndex),
}

impl Command {
    /// Event raised when the command completes.
    pub fn completion(self) -> EventFlags {
        match self {
            Command::StateSet(_) => EventFlags::STATE_SET,
            Command::PortEnable(_) => EventFlags::PORT_ENABLE,
            Command::PortDisable(_) => EventFlags::PORT_DISABLE,
        }
    }
}

/// A directed component-to-component connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunnel {
    pub source: ComponentKind,
    pub source_port: PortIndex,
    pub sink: ComponentKind,
    pub sink_port: PortIndex,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("component {0} is not available")]
    Unavailable(String),
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("operation not allowed in state {0:?}")]
    IncorrectState(LifecycleState),
    #[error("port {0} is enabled")]
    PortEnabled(PortIndex),
    #[error("port {0} is disabled")]
    PortDisabled(PortIndex),
    #[error("unsupported port {0}")]
    BadPort(PortIndex),
    #[error("port {0} has no definition")]
    Undefined(PortIndex),
    #[error("unsupported setting {0}")]
    UnsupportedSetting(&'static str),
    #[error("port {0} has no buffer")]
    MissingBuffer(PortIndex),
    #[error(transparent)]
    Overrun(#[from] Overrun),
    #[error("tunnel endpoint disconnected")]
    Disconnected,
    #[error("codec: {0}")]
    Codec(String),
    #[error("component has shut down")]
    Shutdown,
}

/// Asynchronous notifications a driver delivers from its own threads.
#[derive(Debug)]
pub enum DriverEvent {
    CommandComplete(Command),
    Error(DriverError),
    ParamOrConfigChanged,
}

/// Callbacks handed to a driver at creation; every one of them lands in the
/// component's [`EventChannel`].
#[derive(Debug, Clone)]
pub struct ComponentCallbacks {
    kind: ComponentKind,
    events: Arc<EventChannel>,
}

impl ComponentCallbacks {
    pub fn new(kind: ComponentKind, events: Arc<EventChannel>) -> Self {
        Self { kind, events }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    pub fn event_handler(&self, event: DriverEvent) {
        let flags = match event {
            DriverEvent::CommandComplete(command) => command.completion(),
            DriverEvent::Error(err) => {
                error!(component = %self.kind, "driver error: {err}");
                EventFlags::ERROR
            }
            DriverEvent::ParamOrConfigChanged => EventFlags::PARAM_OR_CONFIG_CHANGED,
        };
        self.events.signal(flags);
    }

    pub fn fill_buffer_done(&self, buffer: &BufferHandle) {
        buffer.complete_request();
        self.events.signal(EventFlags::FILL_BUFFER_DONE);
    }

    pub fn empty_buffer_done(&self, buffer: &BufferHandle) {
        buffer.complete_request();
        self.events.signal(EventFlags::EMPTY_BUFFER_DONE);
    }
}

/// Backend that owns the accelerator components.
pub trait AcceleratorCore: Send + Sync {
    fn get_handle(
        &self,
        kind: ComponentKind,
        callbacks: ComponentCallbacks,
    ) -> Result<Box<dyn ComponentDriver>, DriverError>;

    fn setup_tunnel(&self, tunnel: Tunnel) -> Result<(), DriverError>;
}

/// Command surface of one component.
///
/// Every method only submits; completions come back through the
/// [`ComponentCallbacks`] the driver was created with.
pub trait ComponentDriver: Send {
    fn send_command(&mut self, command: Command) -> Result<(), DriverError>;

    fn set_setting(&mut self, setting: &Setting) -> Result<(), DriverError>;

    fn use_render_target(
        &mut self,
        port: PortIndex,
        target: RenderTarget,
    ) -> Result<BufferHandle, DriverError>;

    fn use_buffer(&mut self, port: PortIndex, buffer: &BufferHandle) -> Result<(), DriverError>;

    fn allocate_buffer(
        &mut self,
        port: PortIndex,
        capacity: usize,
    ) -> Result<BufferHandle, DriverError>;

    fn fill_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError>;

    fn empty_this_buffer(&mut self, buffer: &BufferHandle) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy)]
struct PortState {
    port: Port,
    enabled: bool,
}

/// Blocking control-thread view of one component.
pub struct ComponentHandle {
    kind: ComponentKind,
    driver: Box<dyn ComponentDriver>,
    events: Arc<EventChannel>,
    ports: Vec<PortState>,
    port_enable: PortEnablePolicy,
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("kind", &self.kind)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl ComponentHandle {
    /// Create the component on `core` with callbacks bound to a fresh event channel.
    pub fn initialize(
        core: &dyn AcceleratorCore,
        kind: ComponentKind,
        port_enable: PortEnablePolicy,
    ) -> Result<Self, PipelineError> {
        let events = Arc::new(EventChannel::new(kind.driver_name()));
        let callbacks = ComponentCallbacks::new(kind, events.clone());
        let driver = core
            .get_handle(kind, callbacks)
            .map_err(|source| PipelineError::Driver {
                component: kind,
                operation: "get handle",
                source,
            })?;
        debug!(component = %kind, id = kind.id(), "component initialized");

        // Components come up with their ports enabled.
        let ports = kind
            .ports()
            .iter()
            .map(|&port| PortState {
                port,
                enabled: true,
            })
            .collect();

        Ok(Self {
            kind,
            driver,
            events,
            ports,
            port_enable,
        })
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    pub fn expect_kind(
        &self,
        expected: ComponentKind,
        operation: &'static str,
    ) -> Result<(), PipelineError> {
        if self.kind != expected {
            return Err(PipelineError::WrongComponent {
                operation,
                component: self.kind,
                expected,
            });
        }
        Ok(())
    }

    pub(crate) fn driver_error(
        &self,
        operation: &'static str,
    ) -> impl FnOnce(DriverError) -> PipelineError {
        let component = self.kind;
        move |source| PipelineError::Driver {
            component,
            operation,
            source,
        }
    }

    pub(crate) fn driver_mut(&mut self) -> &mut dyn ComponentDriver {
        self.driver.as_mut()
    }

    /// Block until one of `events` completes; an ERROR event fails the wait.
    pub fn wait_for(&self, events: EventFlags) -> Result<EventFlags, PipelineError> {
        let got = self.events.await_any(events);
        if got.contains(EventFlags::ERROR) {
            return Err(PipelineError::ErrorEvent {
                component: self.kind,
                waited: events,
            });
        }
        Ok(got)
    }

    /// Submit a lifecycle transition without waiting.
    pub fn set_state(&mut self, state: LifecycleState) -> Result<(), PipelineError> {
        debug!(component = %self.kind, ?state, "set state");
        let command = Command::StateSet(state);
        self.driver
            .send_command(command)
            .map_err(self.driver_error("set state"))
    }

    /// Submit a lifecycle transition and await its completion.
    pub fn transition(&mut self, state: LifecycleState) -> Result<(), PipelineError> {
        self.set_state(state)?;
        self.wait_for(EventFlags::STATE_SET)?;
        Ok(())
    }

    fn port_state(&mut self, port: PortIndex) -> Result<&mut PortState, PipelineError> {
        let kind = self.kind;
        self.ports
            .iter_mut()
            .find(|p| p.port.index == port)
            .ok_or(PipelineError::UnknownPort {
                component: kind,
                port,
            })
    }

    pub fn is_port_enabled(&self, port: PortIndex) -> Result<bool, PipelineError> {
        self.ports
            .iter()
            .find(|p| p.port.index == port)
            .map(|p| p.enabled)
            .ok_or(PipelineError::UnknownPort {
                component: self.kind,
                port,
            })
    }

    /// Enable or disable `port`.
    ///
    /// A disable is always awaited. An enable is only awaited under
    /// [`PortEnablePolicy::Await`]: some stages never report enable completion.
    pub fn set_port_enabled(&mut self, port: PortIndex, enabled: bool) -> Result<(), PipelineError> {
        self.port_state(port)?;
        let command = if enabled {
            Command::PortEnable(port)
        } else {
            Command::PortDisable(port)
        };
        debug!(component = %self.kind, %port, enabled, "port command");
        self.driver
            .send_command(command)
            .map_err(self.driver_error(if enabled { "port enable" } else { "port disable" }))?;
        self.port_state(port)?.enabled = enabled;

        if !enabled || self.port_enable == PortEnablePolicy::Await {
            self.wait_for(command.completion())?;
        }
        Ok(())
    }

    /// Disable every port the component owns, one awaited command each.
    pub fn disable_all_ports(&mut self) -> Result<(), PipelineError> {
        let indices: Vec<PortIndex> = self.kind.ports().iter().map(|p| p.index).collect();
        for port in indices {
            self.set_port_enabled(port, false)?;
        }
        Ok(())
    }

    /// Apply one setting. Port definitions require the port to be disabled.
    pub fn configure(&mut self, setting: Setting) -> Result<(), PipelineError> {
        if let Setting::PortDefinition(def) = &setting {
            if self.is_port_enabled(def.port)? {
                return Err(PipelineError::PortEnabled {
                    component: self.kind,
                    port: def.port,
                    operation: "changing its definition",
                });
            }
        }
        debug!(component = %self.kind, setting = setting.name(), "configure");
        self.driver
            .set_setting(&setting)
            .map_err(self.driver_error(setting.name()))
    }
}
