use crate::homography::Transform;
use crate::PipelineError;

/// Which surface a readback copies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSource {
    /// The surface the compositor's texture was drawn onto through the homography.
    Corrected,
    /// The compositor's texture itself, as the sensor delivered it.
    Unmodified,
}

/// Graphics-side collaborator of the frame cycle.
///
/// Owns the render target the compositor writes into and the corrected surface
/// that texture is drawn onto.
pub trait RenderSurfaces: Send {
    /// Draw the current compositor texture through `transform` into the
    /// corrected surface.
    fn composite(&mut self, transform: &Transform) -> Result<(), PipelineError>;

    /// Copy `source` as tightly packed RGBA8 rows into `dst`.
    fn read_pixels(&mut self, source: SurfaceSource, dst: &mut [u8]) -> Result<(), PipelineError>;
}
