use thiserror::Error;

use crate::component::{ComponentKind, DriverError, EventFlags, PortIndex};

/// Unrecoverable pipeline failure.
///
/// Any of these means the accelerator state machine is out of step with the
/// control thread; the caller stops cycling and the process exits.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{component}: {operation} failed: {source}")]
    Driver {
        component: ComponentKind,
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("{component}: error event while waiting for {waited:?}")]
    ErrorEvent {
        component: ComponentKind,
        waited: EventFlags,
    },

    #[error("{operation} called on {component}, expected {expected}")]
    WrongComponent {
        operation: &'static str,
        component: ComponentKind,
        expected: ComponentKind,
    },

    #[error("{component}: port {port} does not belong to this component")]
    UnknownPort {
        component: ComponentKind,
        port: PortIndex,
    },

    #[error("{component}: port {port} must be disabled before {operation}")]
    PortEnabled {
        component: ComponentKind,
        port: PortIndex,
        operation: &'static str,
    },

    #[error("buffer {buffer} on port {port} already has a request in flight")]
    BufferInFlight { buffer: u32, port: PortIndex },

    #[error("buffer {buffer}: length {length} exceeds capacity {capacity}")]
    BufferOverrun {
        buffer: u32,
        length: usize,
        capacity: usize,
    },

    #[error("surface readback failed: {0}")]
    Readback(String),
}

/// Rejected configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
