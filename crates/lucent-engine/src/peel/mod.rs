//! Depth-peeling order-independent transparency.
//!
//! [`DepthPeeling::prepare`] instruments the scene's fragment programs once;
//! [`DepthPeeling::render`] then runs `max_depth` peel passes per frame,
//! folding each peeled layer under the running composite with [`under`].

mod buffers;
mod composite;
mod config;
mod engine;
mod inject;

pub use buffers::{LayerBuffers, LayerPair};
pub use composite::{stacked_alpha, under, under_all};
pub use config::PeelConfig;
pub use engine::{DepthPeeling, PeelTarget};
pub use inject::{
    Instrumented, PEEL_DISCARD_BEGIN, PEEL_UNIFORMS_BEGIN, ShaderInjector, has_discard_test,
    instrument,
};
