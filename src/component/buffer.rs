//! Buffer headers exchanged between the control thread and components

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use super::PortIndex;

static NEXT_BUFFER_ID: AtomicU32 = AtomicU32::new(1);

/// Reference to a GPU texture a component renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget(pub u32);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("length {length} at offset {offset} exceeds capacity {capacity}")]
pub struct Overrun {
    pub offset: usize,
    pub length: usize,
    pub capacity: usize,
}

pub enum BufferMemory {
    /// CPU-resident bytes, `capacity` long.
    Host(Vec<u8>),
    /// GPU-resident; the bytes live in the texture, not here.
    Texture(RenderTarget),
}

impl fmt::Debug for BufferMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferMemory::Host(bytes) => write!(f, "Host({} bytes)", bytes.len()),
            BufferMemory::Texture(target) => write!(f, "Texture({})", target.0),
        }
    }
}

/// A fixed-capacity region with a filled-length marker.
#[derive(Debug)]
pub struct BufferHeader {
    id: u32,
    port: PortIndex,
    capacity: usize,
    offset: usize,
    filled_len: usize,
    memory: BufferMemory,
    in_flight: bool,
}

impl BufferHeader {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn port(&self) -> PortIndex {
        self.port
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn render_target(&self) -> Option<RenderTarget> {
        match self.memory {
            BufferMemory::Texture(target) => Some(target),
            BufferMemory::Host(_) => None,
        }
    }

    /// Mark `length` bytes starting at `offset` as valid.
    pub fn set_filled(&mut self, offset: usize, length: usize) -> Result<(), Overrun> {
        if offset.checked_add(length).map_or(true, |end| end > self.capacity) {
            return Err(Overrun {
                offset,
                length,
                capacity: self.capacity,
            });
        }
        self.offset = offset;
        self.filled_len = length;
        Ok(())
    }

    /// The whole backing region, `None` for texture-backed buffers.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.memory {
            BufferMemory::Host(bytes) => Some(bytes),
            BufferMemory::Texture(_) => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.memory {
            BufferMemory::Host(bytes) => Some(bytes),
            BufferMemory::Texture(_) => None,
        }
    }

    /// Bytes between `offset` and `offset + filled_len`.
    pub fn valid_bytes(&self) -> &[u8] {
        match &self.memory {
            BufferMemory::Host(bytes) => &bytes[self.offset..self.offset + self.filled_len],
            BufferMemory::Texture(_) => &[],
        }
    }
}

/// Shared handle to a [`BufferHeader`].
///
/// At most one fill or empty request may reference a buffer at a time; the
/// in-flight marker is raised on submission and cleared by the completion
/// callback before the completion event is signalled.
#[derive(Debug, Clone)]
pub struct BufferHandle(Arc<Mutex<BufferHeader>>);

impl BufferHandle {
    /// Zeroed host memory of `capacity` bytes.
    pub fn host(port: PortIndex, capacity: usize) -> Self {
        Self::with_memory(port, capacity, BufferMemory::Host(vec![0; capacity]))
    }

    pub fn texture(port: PortIndex, target: RenderTarget, capacity: usize) -> Self {
        Self::with_memory(port, capacity, BufferMemory::Texture(target))
    }

    fn with_memory(port: PortIndex, capacity: usize, memory: BufferMemory) -> Self {
        Self(Arc::new(Mutex::new(BufferHeader {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            port,
            capacity,
            offset: 0,
            filled_len: 0,
            memory,
            in_flight: false,
        })))
    }

    pub fn lock(&self) -> MutexGuard<'_, BufferHeader> {
        self.0.lock()
    }

    pub fn id(&self) -> u32 {
        self.0.lock().id
    }

    pub fn same_buffer(&self, other: &BufferHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Raise the in-flight marker; `false` if it was already raised.
    pub fn begin_request(&self) -> bool {
        let mut header = self.0.lock();
        if header.in_flight {
            return false;
        }
        header.in_flight = true;
        true
    }

    pub fn complete_request(&self) {
        self.0.lock().in_flight = false;
    }
}
