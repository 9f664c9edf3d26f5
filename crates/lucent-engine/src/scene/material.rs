use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::color::Rgba;

/// Fragment body used when a material does not supply its own.
///
/// Programs are WGSL functions named `shade` that write `frag_color`; the
/// backend prelude declares `FragInput`, `frag_coord`, `frag_color` and the
/// `draw` uniforms (`draw.color` is the material color).
pub const DEFAULT_FRAGMENT_PROGRAM: &str = "\
fn shade(in: FragInput) {
    frag_color = draw.color;
}
";

/// Content hash used to key shader variants and pipelines.
pub fn content_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// How a drawable's output is combined with the render target.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum BlendMode {
    /// Replace the destination ("no blending").
    Opaque,
    /// Straight-alpha source-over.
    #[default]
    Normal,
}

/// A fragment program plus its optional depth-peeling variant.
///
/// The base text is never mutated. Instrumentation stores the variant next
/// to it, and renderers use [`FragmentProgram::active`].
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentProgram {
    base: Arc<str>,
    base_hash: u64,
    variant: Option<(Arc<str>, u64)>,
}

impl FragmentProgram {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        let base: Arc<str> = source.into();
        let base_hash = content_hash(&base);
        Self {
            base,
            base_hash,
            variant: None,
        }
    }

    #[inline]
    pub fn base(&self) -> &Arc<str> {
        &self.base
    }

    #[inline]
    pub fn base_hash(&self) -> u64 {
        self.base_hash
    }

    /// The text renderers compile: the variant when present, else the base.
    #[inline]
    pub fn active(&self) -> &Arc<str> {
        self.variant.as_ref().map_or(&self.base, |(src, _)| src)
    }

    #[inline]
    pub fn active_hash(&self) -> u64 {
        self.variant.as_ref().map_or(self.base_hash, |(_, h)| *h)
    }

    #[inline]
    pub fn is_instrumented(&self) -> bool {
        self.variant.is_some()
    }

    pub fn set_variant(&mut self, variant: Arc<str>) {
        let hash = content_hash(&variant);
        self.variant = Some((variant, hash));
    }

    pub fn clear_variant(&mut self) {
        self.variant = None;
    }
}

impl Default for FragmentProgram {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_PROGRAM)
    }
}

/// Surface description consumed by the backends.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub program: FragmentProgram,
    /// Exposed to programs as `draw.color`; the reference rasterizer shades with it directly.
    pub color: Rgba,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    /// When false, clockwise (back-facing) triangles are culled.
    pub double_sided: bool,
}

impl Material {
    /// Source-over blended, depth-testing and depth-writing material.
    ///
    /// Translucency comes from `color.a`; depth is still written so that
    /// peeling can separate the layers.
    pub fn basic(color: Rgba) -> Self {
        Self {
            program: FragmentProgram::default(),
            color,
            blend: BlendMode::Normal,
            depth_test: true,
            depth_write: true,
            double_sided: true,
        }
    }

    pub fn with_program(mut self, program: FragmentProgram) -> Self {
        self.program = program;
        self
    }

    pub fn with_depth_write(mut self, depth_write: bool) -> Self {
        self.depth_write = depth_write;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.double_sided = double_sided;
        self
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::basic(Rgba::WHITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_prefers_variant() {
        let mut p = FragmentProgram::new("fn shade(in: FragInput) {\n}\n");
        assert_eq!(p.active(), p.base());
        assert_eq!(p.active_hash(), p.base_hash());

        p.set_variant(Arc::from("// instrumented\n"));
        assert!(p.is_instrumented());
        assert_eq!(&**p.active(), "// instrumented\n");
        assert_ne!(p.active_hash(), p.base_hash());

        p.clear_variant();
        assert!(!p.is_instrumented());
        assert_eq!(p.active(), p.base());
    }

    #[test]
    fn content_hash_tracks_text() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
