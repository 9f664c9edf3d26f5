//! Lucent engine crate.
//!
//! Order-independent transparency by depth peeling, plus camera-tracked
//! screen-space indicators that report their own occlusion.
//!
//! Rendering goes through the [`backend::RenderBackend`] trait. Two
//! implementations ship with the crate: a CPU reference rasterizer and a
//! headless wgpu backend.

pub mod backend;
pub mod camera;
pub mod color;
pub mod error;
pub mod indicator;
pub mod logging;
pub mod peel;
pub mod scene;

pub use camera::{Camera, PerspectiveCamera};
pub use color::Rgba;
pub use error::{BackendError, IndicatorError, IndicatorResult, PeelError};
