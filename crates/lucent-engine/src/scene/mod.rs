//! Scene graph consumed by the depth-peeling engine and the backends.
//!
//! Deliberately thin: nodes are either drawables ([`Mesh`]) or structure.
//! Meshes that another subsystem keeps updating (the indicator batch) are
//! shared through [`SharedMesh`]; everything runs on one thread.

mod geometry;
mod material;
mod mesh;

use std::cell::RefCell;
use std::rc::Rc;

pub use geometry::Geometry;
pub use material::{
    BlendMode, DEFAULT_FRAGMENT_PROGRAM, FragmentProgram, Material, content_hash,
};
pub use mesh::Mesh;

/// Mesh owned jointly by the scene and an updater.
pub type SharedMesh = Rc<RefCell<Mesh>>;

/// Scene node.
#[derive(Debug)]
pub enum Node {
    /// Placeholder with no rendering (lights, anchors, ...).
    Empty,
    Group(Vec<Node>),
    Mesh(Mesh),
    Shared(SharedMesh),
}

impl From<Mesh> for Node {
    fn from(mesh: Mesh) -> Self {
        Node::Mesh(mesh)
    }
}

impl From<SharedMesh> for Node {
    fn from(mesh: SharedMesh) -> Self {
        Node::Shared(mesh)
    }
}

impl Node {
    fn visit(&self, f: &mut dyn FnMut(&Mesh)) {
        match self {
            Node::Empty => {}
            Node::Group(children) => {
                for child in children {
                    child.visit(f);
                }
            }
            Node::Mesh(mesh) => f(mesh),
            Node::Shared(mesh) => f(&mesh.borrow()),
        }
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Mesh)) {
        match self {
            Node::Empty => {}
            Node::Group(children) => {
                for child in children {
                    child.visit_mut(f);
                }
            }
            Node::Mesh(mesh) => f(mesh),
            Node::Shared(mesh) => f(&mut mesh.borrow_mut()),
        }
    }
}

/// Root container, traversed depth-first in insertion order.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<Node>,
}

impl Scene {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: impl Into<Node>) {
        self.nodes.push(node.into());
    }

    /// Detaches a shared mesh added at the top level. Returns whether it was found.
    pub fn remove_shared(&mut self, mesh: &SharedMesh) -> bool {
        let before = self.nodes.len();
        self.nodes
            .retain(|n| !matches!(n, Node::Shared(m) if Rc::ptr_eq(m, mesh)));
        self.nodes.len() != before
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Visits every drawable. Non-drawable nodes are skipped.
    pub fn for_each_mesh(&self, f: &mut dyn FnMut(&Mesh)) {
        for node in &self.nodes {
            node.visit(f);
        }
    }

    pub fn for_each_mesh_mut(&mut self, f: &mut dyn FnMut(&mut Mesh)) {
        for node in &mut self.nodes {
            node.visit_mut(f);
        }
    }

    pub fn mesh_count(&self) -> usize {
        let mut n = 0;
        self.for_each_mesh(&mut |_| n += 1);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn quad_mesh() -> Mesh {
        Mesh::new(Arc::new(Geometry::quad(1.0, 1.0, 0.0)), Material::default())
    }

    #[test]
    fn traversal_skips_empty_and_enters_groups() {
        let mut scene = Scene::new();
        scene.add(Node::Empty);
        scene.add(quad_mesh());
        scene.add(Node::Group(vec![Node::Empty, quad_mesh().into()]));
        assert_eq!(scene.mesh_count(), 2);
    }

    #[test]
    fn shared_meshes_are_visited_and_removable() {
        let shared: SharedMesh = Rc::new(RefCell::new(quad_mesh()));
        let mut scene = Scene::new();
        scene.add(shared.clone());
        assert_eq!(scene.mesh_count(), 1);

        scene.for_each_mesh_mut(&mut |m| m.visible = false);
        assert!(!shared.borrow().visible);

        assert!(scene.remove_shared(&shared));
        assert!(!scene.remove_shared(&shared));
        assert_eq!(scene.mesh_count(), 0);
    }
}
