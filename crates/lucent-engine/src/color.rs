/// Straight-alpha linear RGBA color.
///
/// Unlike a premultiplied UI color, peeled layers and composites store the
/// color channels independently of alpha; the under operator applies alpha
/// itself.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn opaque(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Builds a color from a `0xRRGGBB` literal, fully opaque.
    #[inline]
    pub fn from_hex(rgb: u32) -> Self {
        let r = ((rgb >> 16) & 0xff) as f32 / 255.0;
        let g = ((rgb >> 8) & 0xff) as f32 / 255.0;
        let b = (rgb & 0xff) as f32 / 255.0;
        Self::opaque(r, g, b)
    }

    #[inline]
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Quantizes the color the way an `Rgba8Unorm` attachment stores it.
    #[inline]
    pub fn to_unorm8(self) -> [u8; 4] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    /// `floor(255 * channel)` for r, g, b.
    ///
    /// This is the key read-back pixels are compared against when probing
    /// marker visibility.
    #[inline]
    pub fn truncated_rgb8(self) -> [u8; 3] {
        let t = |c: f32| (255.0 * c.clamp(0.0, 1.0)).floor() as u8;
        [t(self.r), t(self.g), t(self.b)]
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    /// Component-wise comparison within `tolerance`.
    #[inline]
    pub fn approx_eq(self, other: Rgba, tolerance: f32) -> bool {
        (self.r - other.r).abs() <= tolerance
            && (self.g - other.g).abs() <= tolerance
            && (self.b - other.b).abs() <= tolerance
            && (self.a - other.a).abs() <= tolerance
    }
}
