use crate::backend::{Destination, RenderBackend, TargetDesc};

/// One half of the ping-pong set: a peeled layer and an accumulated composite.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LayerPair<T> {
    /// Color + sampleable depth.
    pub layer: T,
    /// Color only.
    pub composite: T,
}

/// Two alternating [`LayerPair`]s.
///
/// During the pass loop the *source* pair holds the most recently written
/// depth and composite. The *target* pair receives the next layer and
/// composite. [`LayerBuffers::swap`] flips the roles.
#[derive(Debug)]
pub struct LayerBuffers<T> {
    pairs: [LayerPair<T>; 2],
    source: usize,
    width: u32,
    height: u32,
}

impl<T: Copy + Eq + std::fmt::Debug> LayerBuffers<T> {
    pub fn new<B>(backend: &mut B, width: u32, height: u32) -> Self
    where
        B: RenderBackend<Target = T>,
    {
        let mut pair = |name: &'static str, composite: &'static str| LayerPair {
            layer: backend.create_target(TargetDesc {
                label: name,
                width,
                height,
                depth: true,
            }),
            composite: backend.create_target(TargetDesc {
                label: composite,
                width,
                height,
                depth: false,
            }),
        };
        let ping = pair("peel ping layer", "peel ping composite");
        let pong = pair("peel pong layer", "peel pong composite");

        log::debug!("allocated peel buffers {width}x{height}");
        Self {
            pairs: [ping, pong],
            source: 0,
            width,
            height,
        }
    }

    /// Releases all four targets.
    pub fn destroy<B>(self, backend: &mut B)
    where
        B: RenderBackend<Target = T>,
    {
        for pair in self.pairs {
            backend.destroy_target(pair.layer);
            backend.destroy_target(pair.composite);
        }
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn source(&self) -> LayerPair<T> {
        self.pairs[self.source]
    }

    #[inline]
    pub fn target(&self) -> LayerPair<T> {
        self.pairs[1 - self.source]
    }

    #[inline]
    pub fn swap(&mut self) {
        self.source = 1 - self.source;
    }

    /// Restores the initial roles and clears both layers and the first composite.
    ///
    /// The target composite needs no clear: it is fully overwritten before it
    /// is read.
    pub fn reset<B>(&mut self, backend: &mut B)
    where
        B: RenderBackend<Target = T>,
    {
        self.source = 0;
        let [ping, pong] = self.pairs;
        for target in [ping.layer, ping.composite, pong.layer] {
            backend.set_render_target(Destination::Target(target));
            backend.clear();
        }
    }
}
