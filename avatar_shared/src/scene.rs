//! Scene graph abstraction.
//!
//! The client drives a DOM-like entity tree: elements are created detached,
//! carry string attributes, and become visible once appended under the scene
//! root. A rendering engine implements [`SceneGraph`]; [`Scene`] is a headless
//! in-memory tree for tests and demos.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{error::SceneError, math::Vec3};

/// Element id of the scene root that holds every avatar.
pub const SCENE_ID: &str = "scene";

/// Element id of the local viewpoint.
pub const CAMERA_ID: &str = "user-cam";

/// Eye height of the default camera.
pub const CAMERA_HEIGHT: f64 = 1.6;

/// Opaque node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// A minimal DOM-style scene API.
pub trait SceneGraph: Send + 'static {
    fn create_element(&mut self, tag: &str) -> NodeId;
    /// Appends `child` under `parent`, detaching it from any previous parent.
    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError>;
    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError>;
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), SceneError>;
    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;
    /// Finds an element attached to the tree by its `id` attribute.
    fn element_by_id(&self, id: &str) -> Option<NodeId>;
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// Headless in-memory scene.
///
/// Detached nodes stay allocated, like DOM nodes that are still referenced.
#[derive(Debug, Clone)]
pub struct Scene {
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Creates a scene with the `scene` root and a `user-cam` camera at eye
    /// height.
    pub fn new() -> Self {
        let mut scene = Self {
            next_id: 0,
            nodes: HashMap::new(),
            root: NodeId(0),
        };
        scene.root = scene.create_element("a-scene");
        scene.put_attributes(scene.root, [("id", SCENE_ID.to_string())]);

        let cam = scene.create_element("a-entity");
        scene.put_attributes(
            cam,
            [
                ("id", CAMERA_ID.to_string()),
                ("camera", String::new()),
                ("position", Vec3::new(0.0, CAMERA_HEIGHT, 0.0).to_attr()),
                ("rotation", Vec3::ZERO.to_attr()),
            ],
        );
        if let Some(node) = scene.nodes.get_mut(&cam) {
            node.parent = Some(scene.root);
        }
        if let Some(root) = scene.nodes.get_mut(&scene.root) {
            root.children.push(cam);
        }
        scene
    }

    fn put_attributes<const N: usize>(&mut self, node: NodeId, attrs: [(&str, String); N]) {
        if let Some(node) = self.nodes.get_mut(&node) {
            for (name, value) in attrs {
                node.attributes.insert(name.to_string(), value);
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.tag.as_str())
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    /// Whether the node is reachable from the scene root.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == self.root {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// Parses a `"x y z"` attribute.
    pub fn vec3_attribute(&self, node: NodeId, name: &str) -> Option<Vec3> {
        self.get_attribute(node, name)
            .and_then(|s| Vec3::parse_attr(&s))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SceneError> {
        self.nodes.get_mut(&id).ok_or(SceneError::UnknownNode(id.0))
    }
}

impl SceneGraph for Scene {
    fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                tag: tag.to_string(),
                attributes: BTreeMap::new(),
                children: Vec::new(),
                parent: None,
            },
        );
        id
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        self.node_mut(parent)?;
        let previous = self.node_mut(child)?.parent;
        if let Some(previous) = previous {
            self.remove_child(previous, child)?;
        }
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        let node = self.node_mut(parent)?;
        let pos = node
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(SceneError::NotAChild {
                parent: parent.0,
                child: child.0,
            })?;
        node.children.remove(pos);
        self.node_mut(child)?.parent = None;
        Ok(())
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), SceneError> {
        self.node_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name))
            .cloned()
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            let node = self.nodes.get(&current)?;
            if node.attributes.get("id").map(String::as_str) == Some(id) {
                return Some(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }
}
