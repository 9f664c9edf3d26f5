//! Error types.
//!
//! Each subsystem reports through its own enum. Device bring-up in the wgpu
//! backend uses `anyhow` instead, since its failures are only ever shown to
//! a human.

use thiserror::Error;

use crate::indicator::IndicatorId;

/// Failures reported by a [`RenderBackend`](crate::backend::RenderBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A read-back coordinate fell outside the current render target.
    #[error("pixel ({x}, {y}) is outside the {width}x{height} render target")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    /// A target handle no longer refers to a live render target.
    #[error("render target {0} does not exist")]
    UnknownTarget(String),

    /// The GPU could not deliver the requested pixels.
    #[error("pixel read-back failed: {0}")]
    ReadbackFailed(String),
}

/// Failures of the depth-peeling engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeelError {
    #[error("invalid peel configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of the indicator registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    /// Every instance slot of the registry is taken.
    #[error("indicator registry full: capacity {capacity}")]
    CapacityExceeded { capacity: usize },

    /// An event referenced an indicator the registry does not hold.
    ///
    /// This is an internal invariant violation and is not recoverable.
    #[error("indicator {0} not found in registry")]
    UnknownIndicator(IndicatorId),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for indicator operations.
pub type IndicatorResult<T> = Result<T, IndicatorError>;
