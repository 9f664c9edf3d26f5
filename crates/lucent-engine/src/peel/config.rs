use crate::error::PeelError;

/// Depth-peeling parameters.
///
/// `width`/`height` size the layer buffers in physical pixels and should
/// match the drawable. `max_depth` is the number of peel passes, i.e. the
/// number of overlapping surfaces resolved per pixel.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PeelConfig {
    pub width: u32,
    pub height: u32,
    pub max_depth: u32,

    /// Minimum depth separation between consecutive layers.
    ///
    /// Fragments within `epsilon` of the previously peeled depth are treated
    /// as already peeled.
    pub epsilon: f32,
}

impl PeelConfig {
    pub const DEFAULT_EPSILON: f32 = 1e-5;

    pub fn new(width: u32, height: u32, max_depth: u32) -> Self {
        Self {
            width,
            height,
            max_depth,
            epsilon: Self::DEFAULT_EPSILON,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn validate(&self) -> Result<(), PeelError> {
        if self.width == 0 || self.height == 0 {
            return Err(PeelError::InvalidConfig(format!(
                "layer buffers must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_depth == 0 {
            return Err(PeelError::InvalidConfig("max_depth must be at least 1".into()));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(PeelError::InvalidConfig(format!(
                "epsilon must be finite and non-negative, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}
