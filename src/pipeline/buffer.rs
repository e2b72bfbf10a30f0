//! Fill/empty handoff between the control thread and components

use tracing::trace;

use crate::component::{BufferHandle, ComponentHandle, EventFlags, PortIndex};
use crate::PipelineError;

/// The three buffers a running session exchanges every cycle.
#[derive(Debug, Clone)]
pub struct PipelineBuffers {
    /// Texture-backed output of the compositor.
    pub compositor_output: BufferHandle,
    /// Host pixels read back from the render surfaces; lent to the encoder.
    pub encoder_input: BufferHandle,
    /// Allocated by the encoder; read, never written, by the control thread.
    pub encoder_output: BufferHandle,
}

fn begin(buffer: &BufferHandle) -> Result<(), PipelineError> {
    if buffer.begin_request() {
        return Ok(());
    }
    let header = buffer.lock();
    Err(PipelineError::BufferInFlight {
        buffer: header.id(),
        port: header.port(),
    })
}

/// Ask `component` to produce into `buffer`; completion raises FILL_BUFFER_DONE.
pub fn request_fill(
    component: &mut ComponentHandle,
    buffer: &BufferHandle,
) -> Result<(), PipelineError> {
    begin(buffer)?;
    trace!(component = %component.kind(), buffer = buffer.id(), "fill this buffer");
    let submitted = component.driver_mut().fill_this_buffer(buffer);
    submitted.map_err(|source| {
        buffer.complete_request();
        component.driver_error("fill this buffer")(source)
    })
}

/// Hand `length` valid bytes of `buffer` to `component`; completion raises
/// EMPTY_BUFFER_DONE.
pub fn request_empty(
    component: &mut ComponentHandle,
    buffer: &BufferHandle,
    length: usize,
) -> Result<(), PipelineError> {
    begin(buffer)?;
    let filled = buffer.lock().set_filled(0, length);
    if let Err(overrun) = filled {
        buffer.complete_request();
        return Err(PipelineError::BufferOverrun {
            buffer: buffer.id(),
            length: overrun.length,
            capacity: overrun.capacity,
        });
    }
    trace!(component = %component.kind(), buffer = buffer.id(), length, "empty this buffer");
    let submitted = component.driver_mut().empty_this_buffer(buffer);
    submitted.map_err(|source| {
        buffer.complete_request();
        component.driver_error("empty this buffer")(source)
    })
}

/// Block until the fill requested on `component` is done.
pub fn await_fill(component: &ComponentHandle) -> Result<(), PipelineError> {
    component.wait_for(EventFlags::FILL_BUFFER_DONE).map(|_| ())
}

/// Block until the empty requested on `component` is done.
pub fn await_empty(component: &ComponentHandle) -> Result<(), PipelineError> {
    component.wait_for(EventFlags::EMPTY_BUFFER_DONE).map(|_| ())
}

/// Encoder input capacity: RGBA8, tightly packed.
pub fn pixel_buffer_len(width: u32, height: u32) -> usize {
    4 * width as usize * height as usize
}

/// Encoder output capacity; compressed output stays well below raw size.
pub fn encoded_buffer_len(width: u32, height: u32) -> usize {
    2 * width as usize * height as usize
}

/// Host buffer the control thread reads pixels into before lending it to the
/// encoder input port.
pub fn allocate_pixel_buffer(port: PortIndex, width: u32, height: u32) -> BufferHandle {
    BufferHandle::host(port, pixel_buffer_len(width, height))
}
