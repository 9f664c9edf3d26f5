//! Screen-space indicators bound to 3D positions.
//!
//! An [`IndicatorRegistry`] draws every indicator as one instance of a
//! shared sphere mesh scaled to a constant on-screen size. Camera motion
//! (fed through a [`MotionSender`]) switches indicators `On`; after a quiet
//! window they switch `Off`, and each one learns whether it was actually
//! visible in the last frame through a single-pixel color probe.

mod config;
mod handle;
mod marker;
mod motion;
mod probe;
mod registry;

pub use config::IndicatorConfig;
pub use handle::{IndicatorCallback, IndicatorEvent, IndicatorHandle, IndicatorId};
pub use marker::marker_transform;
pub use motion::{
    MotionEvent, MotionReactor, MotionReceiver, MotionSender, ReactorStep, VisibilityMode,
    motion_channel,
};
pub use probe::VisibilityProber;
pub use registry::{IndicatorRegistry, RenderRequest, render_channel};
