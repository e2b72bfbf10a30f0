pub mod buffer;
pub mod cycle;
pub mod graph;
pub mod surface;

pub use buffer::PipelineBuffers;
pub use cycle::{Clock, CyclePaths, CycleReport, FrameCycleController, RefreshTimer, SystemClock};
pub use graph::{PipelineGraphBuilder, PipelineSession};
pub use surface::{RenderSurfaces, SurfaceSource};
