pub mod frame;

pub use frame::{Frame, FrameGeometry, FrameMetadata, PixelFormat};
