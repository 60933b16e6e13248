//! Geometry and materials of a loaded model.
//!
//! The CPU side ([`Geometry`], [`Material`], [`ImageData`]) is what the loader
//! produces and what the stage edits. The GPU side ([`Mesh`]) is created by
//! the renderer the first time it sees the model.

use cgmath::{InnerSpace, Vector3};
use wgpu::util::DeviceExt;

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
    /// Indices into the skin's joint list. Ignored for unskinned meshes.
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Uint32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Triangle list of one glTF primitive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Area-weighted vertex normals, for primitives exported without any.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vector3::new(0.0_f32, 0.0, 0.0); self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= normals.len() || b >= normals.len() || c >= normals.len() {
                continue;
            }
            let p0: Vector3<f32> = self.vertices[a].position.into();
            let p1: Vector3<f32> = self.vertices[b].position.into();
            let p2: Vector3<f32> = self.vertices[c].position.into();
            // not normalised: longer cross products weigh more
            let face = (p1 - p0).cross(p2 - p0);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        for (vertex, normal) in self.vertices.iter_mut().zip(normals) {
            vertex.normal = if normal.magnitude2() > 0.0 {
                normal.normalize().into()
            } else {
                [0.0, 1.0, 0.0]
            };
        }
    }
}

/// Decoded RGBA8 image, ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Metallic-roughness material parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    /// Index into the model's images.
    pub base_color_texture: Option<usize>,
    pub roughness: f32,
    pub metalness: f32,
    pub double_sided: bool,
    /// Set when the parameters changed and the GPU copy is stale.
    pub needs_update: bool,
}

impl Default for Material {
    /// The glTF default material.
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [1.0; 4],
            base_color_texture: None,
            roughness: 1.0,
            metalness: 1.0,
            double_sided: false,
            needs_update: false,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    base_color: [f32; 4],
    // roughness, metalness, unused, unused
    params: [f32; 4],
}

impl From<&Material> for MaterialUniform {
    fn from(material: &Material) -> Self {
        Self {
            base_color: material.base_color,
            params: [material.roughness, material.metalness, 0.0, 0.0],
        }
    }
}

/// GPU buffers of one [`Geometry`].
#[derive(Debug)]
pub struct Mesh {
    pub name: String,
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_elements: u32,
}

impl Mesh {
    pub fn from_geometry(device: &wgpu::Device, geometry: &Geometry) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&geometry.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            name: geometry.name.clone(),
            vertex_buffer,
            index_buffer,
            num_elements: geometry.indices.len() as u32,
        }
    }
}

pub trait DrawMesh {
    /// Binds `bind_groups` to slots `0..n` and draws `mesh` once.
    fn draw_mesh(&mut self, mesh: &Mesh, bind_groups: &[&wgpu::BindGroup]);
}

impl DrawMesh for wgpu::RenderPass<'_> {
    fn draw_mesh(&mut self, mesh: &Mesh, bind_groups: &[&wgpu::BindGroup]) {
        self.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        self.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        for (slot, group) in bind_groups.iter().enumerate() {
            self.set_bind_group(slot as u32, *group, &[]);
        }
        self.draw_indexed(0..mesh.num_elements, 0, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(position: [f32; 3]) -> ModelVertex {
        ModelVertex {
            position,
            ..Default::default()
        }
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<ModelVertex>(), 64);
        let desc = ModelVertex::desc();
        assert_eq!(desc.array_stride, 64);
        assert_eq!(desc.attributes.len(), 5);
    }

    #[test]
    fn computed_normals_face_out_of_ccw_triangle() {
        let mut geometry = Geometry {
            name: "quad".into(),
            vertices: vec![
                vertex([0.0, 0.0, 0.0]),
                vertex([1.0, 0.0, 0.0]),
                vertex([0.0, 1.0, 0.0]),
            ],
            indices: vec![0, 1, 2],
        };
        geometry.compute_normals();
        for v in &geometry.vertices {
            assert_eq!(v.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn unreferenced_vertices_get_up_normal() {
        let mut geometry = Geometry {
            name: "loose".into(),
            vertices: vec![vertex([0.0; 3])],
            indices: vec![],
        };
        geometry.compute_normals();
        assert_eq!(geometry.vertices[0].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn material_uniform_carries_roughness_and_metalness() {
        let material = Material {
            roughness: 0.5,
            metalness: 0.25,
            ..Default::default()
        };
        let uniform = MaterialUniform::from(&material);
        assert_eq!(uniform.params[0], 0.5);
        assert_eq!(uniform.params[1], 0.25);
    }
}
