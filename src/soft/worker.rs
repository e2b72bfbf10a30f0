//! Per-component worker thread shared by every software stage

use std::thread;
use std::time::Instant;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::capture::Frame;
use crate::component::{
    BufferHandle, Command, ComponentCallbacks, ComponentKind, Direction, DriverError, DriverEvent,
    LifecycleState, Port, PortDefinition, PortIndex, Setting,
};

/// Work submitted to a component thread. Processed strictly in order.
#[derive(Debug)]
pub(crate) enum Request {
    Command(Command),
    Setting(Setting),
    UseBuffer { port: PortIndex, buffer: BufferHandle },
    Fill(BufferHandle),
    Empty(BufferHandle),
    ConnectOutput { port: PortIndex, tunnel: Sender<Frame> },
    ConnectInput { port: PortIndex, tunnel: Receiver<Frame> },
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct PortSlot {
    pub port: Port,
    pub enabled: bool,
    pub definition: Option<PortDefinition>,
    pub buffer: Option<BufferHandle>,
    pub tunnel_out: Option<Sender<Frame>>,
    pub tunnel_in: Option<Receiver<Frame>>,
}

impl PortSlot {
    pub fn tunnelled(&self) -> bool {
        self.tunnel_out.is_some() || self.tunnel_in.is_some()
    }

    /// Enabled, fed by no tunnel and still without a buffer.
    fn unpopulated(&self) -> bool {
        self.enabled && !self.tunnelled() && self.buffer.is_none()
    }
}

#[derive(Debug)]
pub(crate) struct PortTable(Vec<PortSlot>);

impl PortTable {
    fn new(kind: ComponentKind) -> Self {
        Self(
            kind.ports()
                .iter()
                .map(|&port| PortSlot {
                    port,
                    enabled: true,
                    definition: None,
                    buffer: None,
                    tunnel_out: None,
                    tunnel_in: None,
                })
                .collect(),
        )
    }

    pub fn get(&self, port: PortIndex) -> Result<&PortSlot, DriverError> {
        self.0
            .iter()
            .find(|slot| slot.port.index == port)
            .ok_or(DriverError::BadPort(port))
    }

    pub fn get_mut(&mut self, port: PortIndex) -> Result<&mut PortSlot, DriverError> {
        self.0
            .iter_mut()
            .find(|slot| slot.port.index == port)
            .ok_or(DriverError::BadPort(port))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortSlot> {
        self.0.iter()
    }
}

/// What a stage sees while handling a request.
pub(crate) struct StageContext<'a> {
    pub state: LifecycleState,
    pub ports: &'a mut PortTable,
    pub callbacks: &'a ComponentCallbacks,
}

/// Component-specific behaviour plugged into a [`Worker`].
pub(crate) trait Stage: Send {
    /// Apply a setting other than a port definition.
    fn apply(&mut self, setting: &Setting, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let _ = ctx;
        Err(DriverError::UnsupportedSetting(setting.name()))
    }

    /// `buffer` is bound to an output port of this component.
    fn fill(&mut self, buffer: BufferHandle, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let _ = ctx;
        Err(DriverError::BadPort(buffer.lock().port()))
    }

    /// `buffer` is bound to an input port of this component.
    fn empty(&mut self, buffer: BufferHandle, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let _ = ctx;
        Err(DriverError::BadPort(buffer.lock().port()))
    }

    fn state_changed(&mut self, ctx: &mut StageContext<'_>) {
        let _ = ctx;
    }

    /// Next time the stage wants [`wake`](Self::wake) called without a request.
    fn wake_at(&self, state: LifecycleState) -> Option<Instant> {
        let _ = state;
        None
    }

    fn wake(&mut self, ctx: &mut StageContext<'_>) -> Result<(), DriverError> {
        let _ = ctx;
        Ok(())
    }
}

pub(crate) struct Worker {
    kind: ComponentKind,
    callbacks: ComponentCallbacks,
    state: LifecycleState,
    ports: PortTable,
    stage: Box<dyn Stage>,
}

/// Start the thread for `kind`; the returned sender is its only input.
pub(crate) fn spawn(
    kind: ComponentKind,
    callbacks: ComponentCallbacks,
    stage: Box<dyn Stage>,
) -> Result<Sender<Request>, DriverError> {
    let (tx, rx) = flume::unbounded();
    let worker = Worker {
        kind,
        callbacks,
        state: LifecycleState::Loaded,
        ports: PortTable::new(kind),
        stage,
    };
    thread::Builder::new()
        .name(format!("soft-{}", kind.driver_name()))
        .spawn(move || worker.run(rx))
        .map_err(|err| DriverError::Unavailable(format!("{}: {err}", kind.driver_name())))?;
    Ok(tx)
}

impl Worker {
    fn run(mut self, requests: Receiver<Request>) {
        debug!(component = %self.kind, "worker started");
        loop {
            let request = match self.stage.wake_at(self.state) {
                Some(deadline) => match requests.recv_deadline(deadline) {
                    Ok(request) => Some(request),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match requests.recv() {
                    Ok(request) => Some(request),
                    Err(_) => break,
                },
            };
            let result = match request {
                Some(Request::Shutdown) => break,
                Some(request) => self.handle(request),
                None => self.with_stage(|stage, ctx| stage.wake(ctx)),
            };
            if let Err(err) = result {
                self.callbacks.event_handler(DriverEvent::Error(err));
            }
        }
        debug!(component = %self.kind, "worker stopped");
    }

    fn with_stage<R>(&mut self, f: impl FnOnce(&mut dyn Stage, &mut StageContext<'_>) -> R) -> R {
        let mut ctx = StageContext {
            state: self.state,
            ports: &mut self.ports,
            callbacks: &self.callbacks,
        };
        f(self.stage.as_mut(), &mut ctx)
    }

    fn complete(&self, command: Command) {
        self.callbacks
            .event_handler(DriverEvent::CommandComplete(command));
    }

    fn handle(&mut self, request: Request) -> Result<(), DriverError> {
        trace!(component = %self.kind, ?request, "request");
        match request {
            Request::Command(command) => {
                match command {
                    Command::StateSet(target) => self.transition(target)?,
                    Command::PortEnable(port) => self.ports.get_mut(port)?.enabled = true,
                    Command::PortDisable(port) => {
                        let slot = self.ports.get_mut(port)?;
                        slot.enabled = false;
                        slot.buffer = None;
                    }
                }
                self.complete(command);
                Ok(())
            }
            Request::Setting(Setting::PortDefinition(definition)) => {
                let slot = self.ports.get_mut(definition.port)?;
                if slot.enabled {
                    return Err(DriverError::PortEnabled(definition.port));
                }
                slot.definition = Some(definition);
                Ok(())
            }
            Request::Setting(setting) => self.with_stage(|stage, ctx| stage.apply(&setting, ctx)),
            Request::UseBuffer { port, buffer } => {
                if self.state != LifecycleState::Idle {
                    return Err(DriverError::IncorrectState(self.state));
                }
                if buffer.lock().port() != port {
                    return Err(DriverError::BadPort(port));
                }
                let slot = self.ports.get_mut(port)?;
                if !slot.enabled {
                    return Err(DriverError::PortDisabled(port));
                }
                if slot.tunnelled() {
                    return Err(DriverError::BadPort(port));
                }
                slot.buffer = Some(buffer);
                Ok(())
            }
            Request::Fill(buffer) => {
                self.check_bound(&buffer, Direction::Output)?;
                self.with_stage(|stage, ctx| stage.fill(buffer, ctx))
            }
            Request::Empty(buffer) => {
                self.check_bound(&buffer, Direction::Input)?;
                self.with_stage(|stage, ctx| stage.empty(buffer, ctx))
            }
            Request::ConnectOutput { port, tunnel } => {
                self.ports.get_mut(port)?.tunnel_out = Some(tunnel);
                Ok(())
            }
            Request::ConnectInput { port, tunnel } => {
                self.ports.get_mut(port)?.tunnel_in = Some(tunnel);
                Ok(())
            }
            Request::Shutdown => Ok(()),
        }
    }

    fn transition(&mut self, target: LifecycleState) -> Result<(), DriverError> {
        use LifecycleState::*;

        let from = self.state;
        if !matches!(
            (from, target),
            (Loaded, Idle) | (Idle, Executing) | (Executing, Idle) | (Idle, Loaded)
        ) {
            return Err(DriverError::InvalidTransition { from, to: target });
        }
        if matches!(target, Idle | Executing) && from != Executing {
            if let Some(slot) = self.ports.iter().find(|slot| slot.unpopulated()) {
                return Err(DriverError::MissingBuffer(slot.port.index));
            }
        }
        debug!(component = %self.kind, ?from, to = ?target, "state change");
        self.state = target;
        self.with_stage(|stage, ctx| stage.state_changed(ctx));
        Ok(())
    }

    fn check_bound(&self, buffer: &BufferHandle, direction: Direction) -> Result<(), DriverError> {
        if self.state != LifecycleState::Executing {
            return Err(DriverError::IncorrectState(self.state));
        }
        let port = buffer.lock().port();
        let slot = self.ports.get(port)?;
        if slot.port.direction != direction {
            return Err(DriverError::BadPort(port));
        }
        if !slot.enabled {
            return Err(DriverError::PortDisabled(port));
        }
        match &slot.buffer {
            Some(bound) if bound.same_buffer(buffer) => Ok(()),
            _ => Err(DriverError::MissingBuffer(port)),
        }
    }
}
