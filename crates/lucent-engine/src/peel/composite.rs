//! The "under" compositing operator.
//!
//! Layers are peeled nearest first. Each new layer (`src`) is folded under
//! the composite accumulated so far (`dst`):
//!
//! ```text
//! out.rgb = dst.a * dst.rgb + (1 - dst.a) * src.a * src.rgb
//! out.a   = src.a - src.a * dst.a + dst.a
//! ```
//!
//! Backends run the same expression in their full-screen composite pass
//! (see `backend/gpu/shaders/under.wgsl`); this is the CPU definition.

use crate::color::Rgba;

/// Folds `src` under `dst`.
#[inline]
pub fn under(dst: Rgba, src: Rgba) -> Rgba {
    let k = (1.0 - dst.a) * src.a;
    Rgba {
        r: dst.a * dst.r + k * src.r,
        g: dst.a * dst.g + k * src.g,
        b: dst.a * dst.b + k * src.b,
        a: src.a - src.a * dst.a + dst.a,
    }
}

/// Composites `layers` (nearest first) starting from transparent black.
pub fn under_all<I>(layers: I) -> Rgba
where
    I: IntoIterator<Item = Rgba>,
{
    layers.into_iter().fold(Rgba::TRANSPARENT, under)
}

/// Alpha of `layers` stacked layers of uniform opacity `alpha`.
#[inline]
pub fn stacked_alpha(alpha: f32, layers: u32) -> f32 {
    1.0 - (1.0 - alpha).powi(layers as i32)
}
