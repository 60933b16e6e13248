use cgmath::{Matrix4, SquareMatrix};

use crate::data_structures::{
    instance::Instance,
    model::{Geometry, Material, ModelVertex},
    scene_graph::{MAX_JOINTS, MeshNode, Model, Node, Primitive, Skin},
};

/// Builds the node hierarchy, geometry and skins of a glTF document.
///
/// Primitives that cannot be drawn as triangle lists are dropped with a
/// warning. Primitives without a material share a default one appended to
/// `materials`.
pub fn load_model(document: &gltf::Document, buffers: &[Vec<u8>], materials: Vec<Material>) -> Model {
    let mut model = Model::new("");
    model.materials = materials;
    let mut default_material = None;

    // meshes can be shared by several nodes, convert each one once
    let mut meshes: Vec<Vec<Primitive>> = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            let Some(geometry) = load_geometry(&mesh, &primitive, buffers) else {
                continue;
            };
            let material = match primitive.material().index() {
                Some(idx) if idx < model.materials.len() => idx,
                _ => *default_material.get_or_insert_with(|| {
                    model.materials.push(Material::default());
                    model.materials.len() - 1
                }),
            };
            primitives.push(Primitive {
                geometry: model.geometries.len(),
                material,
            });
            model.geometries.push(geometry);
        }
        meshes.push(primitives);
    }

    for node in document.nodes() {
        let name = node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index()));
        let mut scene_node = Node::new(name, Instance::from_gltf(node.transform().decomposed()));
        scene_node.children = node.children().map(|child| child.index()).collect();
        scene_node.skin = node.skin().map(|skin| skin.index());
        scene_node.mesh = node.mesh().map(|mesh| MeshNode {
            name: mesh
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("mesh_{}", mesh.index())),
            primitives: meshes.get(mesh.index()).cloned().unwrap_or_default(),
            cast_shadow: false,
            receive_shadow: false,
        });
        model.nodes.push(scene_node);
    }

    model.roots = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().map(|node| node.index()).collect(),
        None => orphans(&model.nodes),
    };

    model.skins = document
        .skins()
        .map(|skin| load_skin(&skin, buffers))
        .collect();
    model
}

/// Nodes nobody lists as a child.
fn orphans(nodes: &[Node]) -> Vec<usize> {
    let mut has_parent = vec![false; nodes.len()];
    for child in nodes.iter().flat_map(|node| node.children.iter()) {
        if let Some(flag) = has_parent.get_mut(*child) {
            *flag = true;
        }
    }
    has_parent
        .iter()
        .enumerate()
        .filter(|(_, has_parent)| !**has_parent)
        .map(|(idx, _)| idx)
        .collect()
}

fn load_geometry(
    mesh: &gltf::Mesh,
    primitive: &gltf::Primitive,
    buffers: &[Vec<u8>],
) -> Option<Geometry> {
    let name = format!(
        "{}#{}",
        mesh.name().unwrap_or("mesh"),
        primitive.index()
    );
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        log::warn!("Skipping {}: {:?} primitives are not supported", name, primitive.mode());
        return None;
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));

    let Some(positions) = reader.read_positions() else {
        log::warn!("Skipping {}: no positions", name);
        return None;
    };
    let mut vertices: Vec<ModelVertex> = positions
        .map(|position| ModelVertex {
            position,
            ..Default::default()
        })
        .collect();

    let has_normals = match reader.read_normals() {
        Some(normals) => {
            vertices
                .iter_mut()
                .zip(normals)
                .for_each(|(vertex, normal)| vertex.normal = normal);
            true
        }
        None => false,
    };
    if let Some(tex_coords) = reader.read_tex_coords(0) {
        vertices
            .iter_mut()
            .zip(tex_coords.into_f32())
            .for_each(|(vertex, uv)| vertex.tex_coords = uv);
    }
    if let Some(joints) = reader.read_joints(0) {
        vertices
            .iter_mut()
            .zip(joints.into_u16())
            .for_each(|(vertex, joints)| vertex.joints = joints.map(u32::from));
    }
    if let Some(weights) = reader.read_weights(0) {
        vertices
            .iter_mut()
            .zip(weights.into_f32())
            .for_each(|(vertex, weights)| vertex.weights = weights);
    }

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..vertices.len() as u32).collect(),
    };
    if let Some(bad) = indices.iter().find(|&&idx| idx as usize >= vertices.len()) {
        log::warn!(
            "Skipping {}: index {} out of range for {} vertices",
            name,
            bad,
            vertices.len()
        );
        return None;
    }

    let mut geometry = Geometry {
        name,
        vertices,
        indices,
    };
    if !has_normals {
        log::warn!("{} has no normals, computing them", geometry.name);
        geometry.compute_normals();
    }
    Some(geometry)
}

fn load_skin(skin: &gltf::Skin, buffers: &[Vec<u8>]) -> Skin {
    let name = skin
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("skin_{}", skin.index()));
    let joints: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
    if joints.len() > MAX_JOINTS {
        log::warn!(
            "{} has {} joints, only the first {} are used",
            name,
            joints.len(),
            MAX_JOINTS
        );
    }
    let reader = skin.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
    let inverse_bind_matrices = match reader.read_inverse_bind_matrices() {
        Some(matrices) => matrices.map(Matrix4::from).collect(),
        None => vec![Matrix4::identity(); joints.len()],
    };
    Skin {
        name,
        joints,
        inverse_bind_matrices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphans_are_roots() {
        let mut parent = Node::new("parent", Instance::new());
        parent.children = vec![2];
        let nodes = vec![
            parent,
            Node::new("loner", Instance::new()),
            Node::new("child", Instance::new()),
        ];
        assert_eq!(orphans(&nodes), vec![0, 1]);
    }
}
