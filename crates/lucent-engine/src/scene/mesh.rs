use std::sync::Arc;

use glam::Mat4;

use super::{Geometry, Material};

/// A drawable: geometry + material, optionally instanced.
///
/// Instanced meshes draw `instance_count` copies, each placed by
/// `transform * instances[i]`. Slots past `instance_count` are kept allocated
/// but ignored.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub geometry: Arc<Geometry>,
    pub material: Material,
    pub transform: Mat4,
    pub visible: bool,
    instances: Option<Vec<Mat4>>,
    instance_count: usize,
}

impl Mesh {
    pub fn new(geometry: Arc<Geometry>, material: Material) -> Self {
        Self {
            geometry,
            material,
            transform: Mat4::IDENTITY,
            visible: true,
            instances: None,
            instance_count: 0,
        }
    }

    /// Instanced mesh with a fixed number of slots, initially drawing none.
    pub fn instanced(geometry: Arc<Geometry>, material: Material, capacity: usize) -> Self {
        Self {
            instances: Some(vec![Mat4::IDENTITY; capacity]),
            ..Self::new(geometry, material)
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    pub fn is_instanced(&self) -> bool {
        self.instances.is_some()
    }

    /// Number of instance slots (0 for non-instanced meshes).
    #[inline]
    pub fn instance_capacity(&self) -> usize {
        self.instances.as_ref().map_or(0, Vec::len)
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    /// Sets how many leading slots are drawn. Clamped to the capacity.
    pub fn set_instance_count(&mut self, count: usize) {
        debug_assert!(count <= self.instance_capacity());
        self.instance_count = count.min(self.instance_capacity());
    }

    /// Writes slot `index`. Returns `false` when the slot does not exist.
    pub fn set_instance(&mut self, index: usize, transform: Mat4) -> bool {
        match self.instances.as_mut().and_then(|v| v.get_mut(index)) {
            Some(slot) => {
                *slot = transform;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn instance(&self, index: usize) -> Option<Mat4> {
        self.instances.as_ref().and_then(|v| v.get(index)).copied()
    }

    /// World transforms of every copy that should be drawn.
    pub fn world_transforms(&self) -> impl Iterator<Item = Mat4> + '_ {
        let base = self.transform;
        let locals: &[Mat4] = match &self.instances {
            Some(v) => &v[..self.instance_count.min(v.len())],
            None => std::slice::from_ref(&Mat4::IDENTITY),
        };
        locals.iter().map(move |m| base * *m)
    }
}
