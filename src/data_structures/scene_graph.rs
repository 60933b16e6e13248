//! Scene graph and hierarchical scene organization.
//!
//! The [`Scene`] is a flat list of top level objects: the camera, the lights
//! and at most a handful of models. Each [`Model`] owns its own node
//! hierarchy, stored as an arena so skins and animation channels can refer to
//! nodes by index.

use cgmath::{Matrix4, SquareMatrix};

use crate::{
    camera::PerspectiveCamera,
    config::ModelConfig,
    data_structures::{
        animation::AnimationClip,
        instance::Instance,
        light::Light,
        model::{Geometry, ImageData, Material},
    },
};

/// Joint limit of a single skin, matching the joint array in the model shader.
pub const MAX_JOINTS: usize = 128;

/// One mesh primitive: a geometry drawn with a material.
#[derive(Clone, Debug, PartialEq)]
pub struct Primitive {
    pub geometry: usize,
    pub material: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshNode {
    pub name: String,
    pub primitives: Vec<Primitive>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    /// Current local transform, rewritten by the mixer.
    pub transform: Instance,
    /// Local transform as authored. Partially weighted animations blend
    /// against it.
    pub rest: Instance,
    pub children: Vec<usize>,
    pub mesh: Option<MeshNode>,
    pub skin: Option<usize>,
}

impl Node {
    pub fn new(name: impl Into<String>, transform: Instance) -> Self {
        Self {
            name: name.into(),
            transform,
            rest: transform,
            children: Vec::new(),
            mesh: None,
            skin: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Skin {
    pub name: String,
    /// Node indices, in joint order.
    pub joints: Vec<usize>,
    /// One per joint; identity when the asset omits them.
    pub inverse_bind_matrices: Vec<Matrix4<f32>>,
}

/// A loaded model: node hierarchy plus everything the nodes refer to.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub name: String,
    /// Transform of the model root, applied above every root node.
    pub transform: Instance,
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
    pub geometries: Vec<Geometry>,
    pub materials: Vec<Material>,
    pub images: Vec<ImageData>,
    pub skins: Vec<Skin>,
    pub animations: Vec<std::sync::Arc<AnimationClip>>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Instance::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
            geometries: Vec::new(),
            materials: Vec::new(),
            images: Vec::new(),
            skins: Vec::new(),
            animations: Vec::new(),
        }
    }

    /// Applies the display overrides the stage uses for every model: root
    /// scale, shadow flags on every mesh and a uniform roughness/metalness.
    pub fn prepare(&mut self, config: &ModelConfig) {
        self.transform = self.transform.with_uniform_scale(config.scale);
        let mut touched = vec![false; self.materials.len()];
        for node in self.nodes.iter_mut() {
            let Some(mesh) = node.mesh.as_mut() else {
                continue;
            };
            mesh.cast_shadow = config.cast_shadow;
            mesh.receive_shadow = config.receive_shadow;
            for primitive in &mesh.primitives {
                if let Some(flag) = touched.get_mut(primitive.material) {
                    *flag = true;
                }
            }
        }
        for (material, _) in self
            .materials
            .iter_mut()
            .zip(touched)
            .filter(|(_, touched)| *touched)
        {
            material.roughness = config.roughness;
            material.metalness = config.metalness;
            material.needs_update = true;
        }
    }

    /// Visits every node below the roots, parents before children, together
    /// with its world matrix.
    pub fn traverse(&self, mut visit: impl FnMut(usize, &Node, &Matrix4<f32>)) {
        let root = self.transform.to_matrix();
        let mut stack: Vec<(usize, Matrix4<f32>)> =
            self.roots.iter().rev().map(|&idx| (idx, root)).collect();
        let mut visited = vec![false; self.nodes.len()];
        while let Some((idx, parent)) = stack.pop() {
            let Some(node) = self.nodes.get(idx) else {
                continue;
            };
            // glTF forbids cycles, but a broken file must not hang the loop
            if std::mem::replace(&mut visited[idx], true) {
                continue;
            }
            let world = parent * node.transform.to_matrix();
            visit(idx, node, &world);
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
    }

    /// World matrix of every node; unreachable nodes get the identity.
    pub fn world_transforms(&self) -> Vec<Matrix4<f32>> {
        let mut world = vec![Matrix4::identity(); self.nodes.len()];
        self.traverse(|idx, _, matrix| world[idx] = *matrix);
        world
    }

    /// Skinning matrices of `skin` for the given world transforms.
    pub fn joint_matrices(&self, skin: usize, world: &[Matrix4<f32>]) -> Vec<[[f32; 4]; 4]> {
        let Some(skin) = self.skins.get(skin) else {
            return Vec::new();
        };
        skin.joints
            .iter()
            .take(MAX_JOINTS)
            .enumerate()
            .map(|(i, &joint)| {
                let joint_world = world.get(joint).copied().unwrap_or(Matrix4::identity());
                let inverse_bind = skin
                    .inverse_bind_matrices
                    .get(i)
                    .copied()
                    .unwrap_or(Matrix4::identity());
                (joint_world * inverse_bind).into()
            })
            .collect()
    }

    pub fn mesh_nodes(&self) -> impl Iterator<Item = (usize, &Node, &MeshNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.mesh.as_ref().map(|mesh| (idx, node, mesh)))
    }

    pub fn node_by_name(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }
}

/// Anything that can be added to the scene.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneObject {
    Camera(PerspectiveCamera),
    Light(Light),
    Model(Model),
}

/// Top level objects, in insertion order. The position in the list is the
/// only identity an object has.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    children: Vec<SceneObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `object` as a new root and returns its index.
    pub fn add(&mut self, object: SceneObject) -> usize {
        self.children.push(object);
        self.children.len() - 1
    }

    /// Top level objects in insertion order. Their positions are the
    /// indices returned by [`Scene::add`].
    pub fn children(&self) -> &[SceneObject] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The first camera in the scene.
    pub fn camera(&self) -> Option<&PerspectiveCamera> {
        self.children.iter().find_map(|child| match child {
            SceneObject::Camera(camera) => Some(camera),
            _ => None,
        })
    }

    pub fn camera_mut(&mut self) -> Option<&mut PerspectiveCamera> {
        self.children.iter_mut().find_map(|child| match child {
            SceneObject::Camera(camera) => Some(camera),
            _ => None,
        })
    }

    /// Every light, in insertion order.
    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.children.iter().filter_map(|child| match child {
            SceneObject::Light(light) => Some(light),
            _ => None,
        })
    }

    /// Models together with their index in the scene.
    pub fn models(&self) -> impl Iterator<Item = (usize, &Model)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(idx, child)| match child {
                SceneObject::Model(model) => Some((idx, model)),
                _ => None,
            })
    }

    /// The model at scene index `idx`; `None` if `idx` holds something else.
    pub fn model(&self, idx: usize) -> Option<&Model> {
        match self.children.get(idx) {
            Some(SceneObject::Model(model)) => Some(model),
            _ => None,
        }
    }

    pub fn model_mut(&mut self, idx: usize) -> Option<&mut Model> {
        match self.children.get_mut(idx) {
            Some(SceneObject::Model(model)) => Some(model),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Point3, Transform, Vector3};

    use super::*;
    use crate::data_structures::light::studio_rig;

    /// root -> arm -> hand, with the arm carrying a mesh.
    fn arm() -> Model {
        let mut model = Model::new("arm");
        let mut root = Node::new("root", Instance::from(Vector3::new(0.0, 1.0, 0.0)));
        root.children = vec![1];
        let mut arm = Node::new("arm", Instance::from(Vector3::new(2.0, 0.0, 0.0)));
        arm.children = vec![2];
        arm.mesh = Some(MeshNode {
            name: "arm".into(),
            primitives: vec![Primitive {
                geometry: 0,
                material: 1,
            }],
            cast_shadow: false,
            receive_shadow: false,
        });
        let hand = Node::new("hand", Instance::from(Vector3::new(0.0, 0.0, 1.0)));
        model.nodes = vec![root, arm, hand];
        model.roots = vec![0];
        model.geometries = vec![Geometry::default()];
        model.materials = vec![Material::default(), Material::default()];
        model
    }

    #[test]
    fn world_transforms_compose_down_the_hierarchy() {
        let model = arm();
        let world = model.world_transforms();
        let hand = world[2].transform_point(Point3::new(0.0, 0.0, 0.0));
        assert_eq!(hand, Point3::new(2.0, 1.0, 1.0));
    }

    #[test]
    fn root_transform_scales_every_node() {
        let mut model = arm();
        model.prepare(&ModelConfig::default());
        let world = model.world_transforms();
        let hand = world[2].transform_point(Point3::new(0.0, 0.0, 0.0));
        assert!((hand.x - 7.0).abs() < 1e-5);
        assert!((hand.y - 3.5).abs() < 1e-5);
        assert!((hand.z - 3.5).abs() < 1e-5);
    }

    #[test]
    fn prepare_touches_only_materials_in_use() {
        let mut model = arm();
        model.prepare(&ModelConfig::default());
        let mesh = model.nodes[1].mesh.as_ref().unwrap();
        assert!(mesh.cast_shadow && mesh.receive_shadow);
        assert_eq!(model.materials[1].roughness, 0.5);
        assert_eq!(model.materials[1].metalness, 0.5);
        assert!(model.materials[1].needs_update);
        assert!(!model.materials[0].needs_update);
        assert_eq!(model.materials[0].roughness, 1.0);
    }

    #[test]
    fn bind_pose_joint_matrices_are_identity() {
        let mut model = arm();
        let world = model.world_transforms();
        model.skins.push(Skin {
            name: "skin".into(),
            joints: vec![1, 2],
            inverse_bind_matrices: vec![
                world[1].invert().unwrap(),
                world[2].invert().unwrap(),
            ],
        });
        let identity: [[f32; 4]; 4] = Matrix4::identity().into();
        for joint in model.joint_matrices(0, &world) {
            for (row, expected) in joint.iter().zip(identity.iter()) {
                for (a, b) in row.iter().zip(expected) {
                    assert!((a - b).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn cyclic_children_are_visited_once() {
        let mut model = arm();
        model.nodes[2].children = vec![0];
        let mut visits = 0;
        model.traverse(|_, _, _| visits += 1);
        assert_eq!(visits, 3);
    }

    #[test]
    fn scene_finds_camera_lights_and_models() {
        let mut scene = Scene::new();
        scene.add(SceneObject::Camera(PerspectiveCamera::from_config(
            &Default::default(),
            4,
            3,
        )));
        for light in studio_rig() {
            scene.add(SceneObject::Light(light));
        }
        assert!(scene.camera().is_some());
        assert_eq!(scene.lights().count(), 8);
        assert_eq!(scene.models().count(), 0);

        let idx = scene.add(SceneObject::Model(arm()));
        assert_eq!(idx, 9);
        assert_eq!(scene.model(idx).map(|m| m.name.as_str()), Some("arm"));
        assert!(scene.model(0).is_none());
    }
}
