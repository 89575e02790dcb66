use glam::Mat4;

use crate::asset::{Handle, Material, Mesh};

/// One node of a geometry sub-hierarchy. Transforms compose parent-to-child
/// during the scene walk; a node only produces a draw when it carries both a
/// mesh and a material.
#[derive(Clone, Debug)]
pub struct Node {
    pub transform: Mat4,
    pub mesh: Option<Handle<Mesh>>,
    pub material: Option<Handle<Material>>,
    pub visible: bool,
    pub children: Vec<Node>,
}

impl Node {
    pub fn empty() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            mesh: None,
            material: None,
            visible: true,
            children: Vec::new(),
        }
    }

    pub fn with_mesh(mesh: Handle<Mesh>, material: Handle<Material>) -> Self {
        Self {
            mesh: Some(mesh),
            material: Some(material),
            ..Self::empty()
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn add_child(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        self.children.last_mut().unwrap()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::empty()
    }
}
