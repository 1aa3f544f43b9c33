//! Remote avatar rendering.
//!
//! Every remote client is drawn as a root entity holding a body plus eyes,
//! pupils and arms. Part positions are derived once, at construction, from the
//! body's x coordinate; later pose changes only move the root.
//!
//! Create-vs-update is decided by [`AvatarState`]:
//! - `Unknown` + attribute change → construct, becomes `Constructed`
//! - `Constructed` + attribute change → update root pose
//! - `Constructed` + offline → remove, back to `Unknown`

use std::collections::HashMap;

use avatar_shared::{
    error::SceneError,
    math::{Rotation, Vec3},
    record::{get_path, paths, ClientId},
    scene::{NodeId, SceneGraph, SCENE_ID},
};
use serde_json::Value;
use tracing::debug;

use crate::error::SessionError;

pub const EYE_OFFSET_X: f64 = 0.25;
pub const EYE_Y: f64 = 0.20;
pub const EYE_Z: f64 = -0.6;
pub const PUPIL_Z: f64 = -0.8;
pub const ARM_OFFSET_X: f64 = 0.5;
pub const ARM_Y: f64 = -1.8;
pub const ARM_TILT_DEG: f64 = 10.0;

/// Tag of the root and part entities.
pub const ENTITY_TAG: &str = "a-entity";

const PART_PREFIXES: [&str; 6] = ["leye", "reye", "lpupil", "rpupil", "larm", "rarm"];

/// Part positions for a body at `(x, 0, 0)`.
///
/// Left parts sit at `+x` for eyes/pupils and `-x` for arms; right parts
/// mirror them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartLayout {
    pub left_eye: Vec3,
    pub right_eye: Vec3,
    pub left_pupil: Vec3,
    pub right_pupil: Vec3,
    pub left_arm: Vec3,
    pub right_arm: Vec3,
}

impl PartLayout {
    pub fn around(x: f64) -> Self {
        let body = Vec3::new(x, 0.0, 0.0);
        Self {
            left_eye: body.offset(EYE_OFFSET_X, EYE_Y, EYE_Z),
            right_eye: body.offset(-EYE_OFFSET_X, EYE_Y, EYE_Z),
            left_pupil: body.offset(EYE_OFFSET_X, EYE_Y, PUPIL_Z),
            right_pupil: body.offset(-EYE_OFFSET_X, EYE_Y, PUPIL_Z),
            left_arm: body.offset(-ARM_OFFSET_X, ARM_Y, 0.0),
            right_arm: body.offset(ARM_OFFSET_X, ARM_Y, 0.0),
        }
    }

    pub fn left_arm_rotation() -> Rotation {
        Rotation::degrees(0.0, 0.0, -ARM_TILT_DEG)
    }

    pub fn right_arm_rotation() -> Rotation {
        Rotation::degrees(0.0, 0.0, ARM_TILT_DEG)
    }
}

/// Rendering state of one remote identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarState {
    Unknown,
    Constructed,
}

/// What an attribute change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Updated,
}

/// Formats a record value as a scene attribute.
///
/// Objects with numeric `x`, `y`, `z` become `"x y z"`, strings pass through,
/// anything else is written as JSON text.
pub fn attr_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let axis = |k: &str| map.get(k).and_then(Value::as_f64);
            match (axis("x"), axis("y"), axis("z")) {
                (Some(x), Some(y), Some(z)) => Vec3::new(x, y, z).to_attr(),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// Lookup tables for rendered avatars, scoped to one session.
///
/// `avatars` holds one root per constructed identity. The part tables are keyed
/// by part element id (`leye<id>`, `larm<id>`, ...) and are not cleared on
/// removal.
#[derive(Debug, Default)]
pub struct AvatarRegistry {
    avatars: HashMap<ClientId, NodeId>,
    eyes: HashMap<String, NodeId>,
    pupils: HashMap<String, NodeId>,
    arms: HashMap<String, NodeId>,
}

impl AvatarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: &ClientId) -> AvatarState {
        if self.avatars.contains_key(id) {
            AvatarState::Constructed
        } else {
            AvatarState::Unknown
        }
    }

    pub fn root(&self, id: &ClientId) -> Option<NodeId> {
        self.avatars.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ClientId> {
        self.avatars.keys()
    }

    pub fn eye(&self, part_id: &str) -> Option<NodeId> {
        self.eyes.get(part_id).copied()
    }

    pub fn pupil(&self, part_id: &str) -> Option<NodeId> {
        self.pupils.get(part_id).copied()
    }

    pub fn arm(&self, part_id: &str) -> Option<NodeId> {
        self.arms.get(part_id).copied()
    }

    /// Part entries left behind by removed avatars.
    pub fn stale_part_count(&self) -> usize {
        self.eyes
            .keys()
            .chain(self.pupils.keys())
            .chain(self.arms.keys())
            .filter(|part_id| {
                let owner = PART_PREFIXES
                    .iter()
                    .find_map(|prefix| part_id.strip_prefix(prefix));
                owner.map_or(true, |owner| !self.avatars.contains_key(&ClientId::new(owner)))
            })
            .count()
    }

    /// Applies an attribute-change notification for `id`.
    pub fn apply_attr_change<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        id: &ClientId,
        record: &Value,
    ) -> Result<Transition, SessionError> {
        match self.state(id) {
            AvatarState::Unknown => {
                self.construct(scene, id, record)?;
                Ok(Transition::Created)
            }
            AvatarState::Constructed => {
                self.update(scene, id, record)?;
                Ok(Transition::Updated)
            }
        }
    }

    /// Builds the avatar tree for `id` and attaches it under the scene root.
    ///
    /// The record is checked before anything is created, so a malformed record
    /// leaves the scene untouched.
    pub fn construct<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        id: &ClientId,
        record: &Value,
    ) -> Result<NodeId, SessionError> {
        let malformed = |field| SessionError::MalformedRecord {
            id: id.clone(),
            field,
        };
        let tag = get_path(record, paths::TYPE)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(paths::TYPE))?;
        let attr = get_path(record, paths::ATTR)
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(paths::ATTR))?;
        let x = get_path(record, paths::POSITION_X)
            .and_then(Value::as_f64)
            .ok_or_else(|| malformed(paths::POSITION_X))?;
        let scene_root = scene
            .element_by_id(SCENE_ID)
            .ok_or(SceneError::MissingElement(SCENE_ID))?;

        let body = scene.create_element(tag);
        for (name, value) in attr {
            scene.set_attribute(body, name, &attr_string(value))?;
        }

        let layout = PartLayout::around(x);
        let leye = make_part(scene, "eye", &format!("leye{id}"), layout.left_eye, None)?;
        let reye = make_part(scene, "eye", &format!("reye{id}"), layout.right_eye, None)?;
        let lpupil = make_part(
            scene,
            "pupil",
            &format!("lpupil{id}"),
            layout.left_pupil,
            None,
        )?;
        let rpupil = make_part(
            scene,
            "pupil",
            &format!("rpupil{id}"),
            layout.right_pupil,
            None,
        )?;
        let larm = make_part(
            scene,
            "arm",
            &format!("larm{id}"),
            layout.left_arm,
            Some(PartLayout::left_arm_rotation()),
        )?;
        let rarm = make_part(
            scene,
            "arm",
            &format!("rarm{id}"),
            layout.right_arm,
            Some(PartLayout::right_arm_rotation()),
        )?;

        let root = scene.create_element(ENTITY_TAG);
        for part in [body, leye, reye, lpupil, rpupil, larm, rarm] {
            scene.append_child(root, part)?;
        }
        scene.append_child(scene_root, root)?;

        self.avatars.insert(id.clone(), root);
        self.eyes.insert(format!("leye{id}"), leye);
        self.eyes.insert(format!("reye{id}"), reye);
        self.pupils.insert(format!("lpupil{id}"), lpupil);
        self.pupils.insert(format!("rpupil{id}"), rpupil);
        self.arms.insert(format!("larm{id}"), larm);
        self.arms.insert(format!("rarm{id}"), rarm);

        debug!(client_id = %id, x, "Avatar constructed");
        Ok(root)
    }

    /// Overwrites the root's pose. Parts keep their construction-time offsets
    /// and move with the root.
    pub fn update<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        id: &ClientId,
        record: &Value,
    ) -> Result<(), SessionError> {
        let malformed = |field| SessionError::MalformedRecord {
            id: id.clone(),
            field,
        };
        let root = self.root(id).ok_or_else(|| malformed("avatar"))?;
        let position =
            get_path(record, paths::POSITION).ok_or_else(|| malformed(paths::POSITION))?;
        let rotation =
            get_path(record, paths::ROTATION).ok_or_else(|| malformed(paths::ROTATION))?;

        scene.set_attribute(root, "position", &attr_string(position))?;
        scene.set_attribute(root, "rotation", &attr_string(rotation))?;
        Ok(())
    }

    /// Detaches the avatar of `id` from the scene.
    ///
    /// Returns whether an avatar existed. The part tables keep their entries.
    pub fn remove<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        id: &ClientId,
    ) -> Result<bool, SessionError> {
        let Some(root) = self.avatars.remove(id) else {
            return Ok(false);
        };
        let scene_root = scene
            .element_by_id(SCENE_ID)
            .ok_or(SceneError::MissingElement(SCENE_ID))?;
        scene.remove_child(scene_root, root)?;
        debug!(client_id = %id, "Avatar removed");
        Ok(true)
    }
}

fn make_part<S: SceneGraph>(
    scene: &mut S,
    mixin: &str,
    part_id: &str,
    position: Vec3,
    rotation: Option<Rotation>,
) -> Result<NodeId, SceneError> {
    let node = scene.create_element(ENTITY_TAG);
    scene.set_attribute(node, "mixin", mixin)?;
    scene.set_attribute(node, "position", &position.to_attr())?;
    scene.set_attribute(node, "id", part_id)?;
    if let Some(rotation) = rotation {
        scene.set_attribute(node, "rotation", &rotation.to_attr())?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::scene::Scene;
    use serde_json::json;

    fn record_at(x: f64) -> Value {
        json!({
            "type": "a-box",
            "attr": {
                "position": {"x": x, "y": 0.0, "z": 0.0},
                "rotation": "0 0 0",
                "color": "#222",
                "id": "u1",
                "depth": "1",
                "height": "1",
                "width": "1"
            }
        })
    }

    fn pose_record(position: Vec3, rotation: &str) -> Value {
        json!({
            "type": "a-box",
            "attr": {
                "position": {"x": position.x, "y": position.y, "z": position.z},
                "rotation": rotation
            }
        })
    }

    fn u1() -> ClientId {
        ClientId::new("u1")
    }

    #[test]
    fn construction_builds_seven_parts_with_fixed_offsets() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let x = 2.0;

        let root = reg.construct(&mut scene, &u1(), &record_at(x)).unwrap();
        let children = scene.children(root).to_vec();
        assert_eq!(children.len(), 7);
        assert_eq!(scene.parent(root), Some(scene.root()));

        let body = children[0];
        assert_eq!(scene.tag(body), Some("a-box"));
        assert_eq!(scene.get_attribute(body, "color").as_deref(), Some("#222"));
        assert_eq!(scene.get_attribute(body, "position").as_deref(), Some("2 0 0"));

        let pos = |part: &str| {
            let node = scene.element_by_id(part).unwrap();
            scene.vec3_attribute(node, "position").unwrap()
        };
        assert_eq!(pos("leyeu1"), Vec3::new(x + 0.25, 0.20, -0.6));
        assert_eq!(pos("reyeu1"), Vec3::new(x - 0.25, 0.20, -0.6));
        assert_eq!(pos("lpupilu1"), Vec3::new(x + 0.25, 0.20, -0.8));
        assert_eq!(pos("rpupilu1"), Vec3::new(x - 0.25, 0.20, -0.8));
        assert_eq!(pos("larmu1"), Vec3::new(x - 0.5, -1.8, 0.0));
        assert_eq!(pos("rarmu1"), Vec3::new(x + 0.5, -1.8, 0.0));

        let larm = scene.element_by_id("larmu1").unwrap();
        let rarm = scene.element_by_id("rarmu1").unwrap();
        assert_eq!(scene.get_attribute(larm, "rotation").as_deref(), Some("0 0 -10"));
        assert_eq!(scene.get_attribute(rarm, "rotation").as_deref(), Some("0 0 10"));
        assert_eq!(scene.get_attribute(larm, "mixin").as_deref(), Some("arm"));

        assert_eq!(reg.eye("leyeu1"), Some(children[1]));
        assert_eq!(reg.pupil("rpupilu1"), Some(children[4]));
        assert_eq!(reg.arm("rarmu1"), Some(rarm));
    }

    #[test]
    fn first_change_creates_then_updates() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        assert_eq!(reg.state(&u1()), AvatarState::Unknown);

        let t = reg.apply_attr_change(&mut scene, &u1(), &record_at(1.0)).unwrap();
        assert_eq!(t, Transition::Created);
        assert_eq!(reg.state(&u1()), AvatarState::Constructed);

        let t = reg.apply_attr_change(&mut scene, &u1(), &record_at(3.0)).unwrap();
        assert_eq!(t, Transition::Updated);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn repeated_update_does_not_drift() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let root = reg.construct(&mut scene, &u1(), &record_at(0.0)).unwrap();

        let rec = pose_record(Vec3::new(1.5, 1.6, -2.0), "0 45 0");
        reg.update(&mut scene, &u1(), &rec).unwrap();
        let first = (
            scene.get_attribute(root, "position"),
            scene.get_attribute(root, "rotation"),
        );
        reg.update(&mut scene, &u1(), &rec).unwrap();
        let second = (
            scene.get_attribute(root, "position"),
            scene.get_attribute(root, "rotation"),
        );
        assert_eq!(first, second);
        assert_eq!(first.0.as_deref(), Some("1.5 1.6 -2"));
        assert_eq!(first.1.as_deref(), Some("0 45 0"));
    }

    #[test]
    fn update_moves_root_but_not_parts() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let root = reg.construct(&mut scene, &u1(), &record_at(2.0)).unwrap();

        reg.update(&mut scene, &u1(), &pose_record(Vec3::new(5.0, 0.0, 0.0), "0 0 0"))
            .unwrap();

        assert_eq!(scene.vec3_attribute(root, "position"), Some(Vec3::new(5.0, 0.0, 0.0)));
        let leye = reg.eye("leyeu1").unwrap();
        assert_eq!(
            scene.vec3_attribute(leye, "position"),
            Some(Vec3::new(2.25, 0.20, -0.6))
        );
    }

    #[test]
    fn malformed_record_leaves_scene_untouched() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let before = scene.node_count();

        let no_x = json!({"type": "a-box", "attr": {"position": {"y": 0}}});
        let err = reg.construct(&mut scene, &u1(), &no_x).unwrap_err();
        assert!(matches!(
            err,
            SessionError::MalformedRecord { field: paths::POSITION_X, .. }
        ));

        let no_type = json!({"attr": {"position": {"x": 1}}});
        assert!(reg.construct(&mut scene, &u1(), &no_type).is_err());

        assert_eq!(scene.node_count(), before);
        assert_eq!(reg.state(&u1()), AvatarState::Unknown);
    }

    #[test]
    fn malformed_values_are_passed_through_as_text() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let rec = json!({
            "type": "a-box",
            "attr": {"position": {"x": 0.0, "y": 0.0, "z": 0.0}, "height": 2, "weird": [1, 2]}
        });
        let root = reg.construct(&mut scene, &u1(), &rec).unwrap();
        let body = scene.children(root)[0];
        assert_eq!(scene.get_attribute(body, "height").as_deref(), Some("2"));
        assert_eq!(scene.get_attribute(body, "weird").as_deref(), Some("[1,2]"));

        // Update writes whatever the record holds.
        let bad = json!({"attr": {"position": "nowhere", "rotation": 5}});
        reg.update(&mut scene, &u1(), &bad).unwrap();
        assert_eq!(scene.get_attribute(root, "position").as_deref(), Some("nowhere"));
        assert_eq!(scene.get_attribute(root, "rotation").as_deref(), Some("5"));
    }

    #[test]
    fn removal_detaches_root_and_leaves_part_entries() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let root = reg.construct(&mut scene, &u1(), &record_at(0.0)).unwrap();
        assert_eq!(reg.stale_part_count(), 0);

        assert!(reg.remove(&mut scene, &u1()).unwrap());
        assert!(!scene.is_attached(root));
        assert_eq!(reg.state(&u1()), AvatarState::Unknown);
        assert_eq!(reg.stale_part_count(), 6);
        assert!(reg.eye("leyeu1").is_some());

        assert!(!reg.remove(&mut scene, &u1()).unwrap());
    }

    #[test]
    fn removed_avatar_can_be_recreated() {
        let mut scene = Scene::new();
        let mut reg = AvatarRegistry::new();
        let old = reg.construct(&mut scene, &u1(), &record_at(0.0)).unwrap();
        reg.remove(&mut scene, &u1()).unwrap();

        let t = reg.apply_attr_change(&mut scene, &u1(), &record_at(4.0)).unwrap();
        assert_eq!(t, Transition::Created);
        let new = reg.root(&u1()).unwrap();
        assert_ne!(old, new);
        assert!(scene.is_attached(new));
        assert_eq!(reg.stale_part_count(), 0);
    }

    #[test]
    fn construct_requires_scene_root() {
        struct Detached(Scene);
        impl SceneGraph for Detached {
            fn create_element(&mut self, tag: &str) -> NodeId {
                self.0.create_element(tag)
            }
            fn append_child(&mut self, p: NodeId, c: NodeId) -> Result<(), SceneError> {
                self.0.append_child(p, c)
            }
            fn remove_child(&mut self, p: NodeId, c: NodeId) -> Result<(), SceneError> {
                self.0.remove_child(p, c)
            }
            fn set_attribute(&mut self, n: NodeId, k: &str, v: &str) -> Result<(), SceneError> {
                self.0.set_attribute(n, k, v)
            }
            fn get_attribute(&self, n: NodeId, k: &str) -> Option<String> {
                self.0.get_attribute(n, k)
            }
            fn element_by_id(&self, _id: &str) -> Option<NodeId> {
                None
            }
        }

        let mut scene = Detached(Scene::new());
        let mut reg = AvatarRegistry::new();
        let err = reg.construct(&mut scene, &u1(), &record_at(0.0)).unwrap_err();
        assert!(matches!(err, SessionError::Scene(SceneError::MissingElement(SCENE_ID))));
    }

    #[test]
    fn attr_string_formats() {
        assert_eq!(attr_string(&json!({"x": 1, "y": 2.5, "z": -3})), "1 2.5 -3");
        assert_eq!(attr_string(&json!("0 0 0")), "0 0 0");
        assert_eq!(attr_string(&json!({"x": 1})), r#"{"x":1}"#);
        assert_eq!(attr_string(&Value::Null), "null");
    }
}
