use std::time::Duration;

use crate::color::Rgba;

/// Indicator registry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    /// Maximum number of live indicators (instance slots of the marker mesh).
    pub capacity: usize,

    /// Logical viewport height in pixels; drives the constant on-screen size.
    pub viewport_height: f32,

    /// Sphere tessellation of the marker mesh.
    pub segments: u32,

    /// Sphere radius of the marker mesh before scaling.
    pub radius: f32,

    /// Marker color, used both for drawing and for visibility probing.
    ///
    /// Probing compares read-back bytes against `floor(255 * channel)`, so
    /// channels should be exactly representable (0.0 and 1.0 always are).
    pub color: Rgba,

    /// Time without camera motion after which indicators switch off.
    pub quiet_window: Duration,
}

impl IndicatorConfig {
    pub const DEFAULT_CAPACITY: usize = 100;
    pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(300);

    pub fn new(viewport_height: f32) -> Self {
        Self {
            viewport_height,
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: Rgba) -> Self {
        self.color = color;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_quiet_window(mut self, quiet_window: Duration) -> Self {
        self.quiet_window = quiet_window;
        self
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            viewport_height: 600.0,
            segments: 16,
            radius: 1.0,
            color: Rgba::opaque(1.0, 0.0, 1.0),
            quiet_window: Self::DEFAULT_QUIET_WINDOW,
        }
    }
}
