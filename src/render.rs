//! Frame capture and GPU rendering.
//!
//! Rendering happens in two steps. [`Frame::capture`] walks the scene once on
//! the CPU and records everything a frame needs: camera and light uniforms,
//! one [`MeshDraw`] per visible primitive and the joint matrices of every
//! skin. The [`Renderer`] then uploads that snapshot and records one shadow
//! pass per shadow map layer followed by the main pass. Keeping the snapshot free of GPU handles means
//! the whole stage can be tested without a device.
//!
//! # Key types
//!
//! - [`Frame`] is the per frame snapshot of the scene
//! - [`MeshDraw`] is one primitive to draw, with its matrices and flags
//! - [`Renderer`] owns pipelines, GPU copies of loaded models and the passes
//!

use std::collections::HashMap;

use cgmath::{Matrix, Matrix4, SquareMatrix};
use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    config::RendererSettings,
    data_structures::{
        light::{Light, LightsUniform, light_view_projection, shadow_casters, shadow_map_size},
        model::{DrawMesh, MaterialUniform, Mesh},
        scene_graph::{MAX_JOINTS, Model, Scene},
        texture::{Texture, create_default_sampler},
    },
    pipelines::{
        light::LightResources,
        model::{
            JOINTS_BUFFER_SIZE, ObjectUniform, mk_camera_layout, mk_material_bind_group,
            mk_material_layout, mk_model_pipeline, mk_object_bind_group, mk_object_layout,
        },
        shadow::ShadowResources,
    },
    stage::Stage,
};

/// One primitive of one mesh node, ready to be drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshDraw {
    /// Scene index of the model.
    pub model: usize,
    pub node: usize,
    /// Index of the primitive within the node's mesh.
    pub primitive: usize,
    pub geometry: usize,
    pub material: usize,
    /// Identity for skinned meshes; their joints already carry the world
    /// transform.
    pub model_matrix: Matrix4<f32>,
    pub normal_matrix: Matrix4<f32>,
    /// Index into the model's skins.
    pub skin: Option<usize>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl MeshDraw {
    /// Contents of the draw's object uniform.
    pub fn uniform(&self) -> ObjectUniform {
        ObjectUniform {
            model: self.model_matrix.into(),
            normal: self.normal_matrix.into(),
            flags: [
                if self.skin.is_some() { 1.0 } else { 0.0 },
                if self.receive_shadow { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
        }
    }
}

/// Joint matrices of one skin for the current pose.
#[derive(Clone, Debug, PartialEq)]
pub struct SkinPose {
    pub model: usize,
    pub skin: usize,
    pub matrices: Vec<[[f32; 4]; 4]>,
}

/// A material whose parameters changed since the last frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialUpdate {
    pub model: usize,
    pub material: usize,
    pub uniform: MaterialUniform,
}

/// Everything the renderer needs for one frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub camera: CameraUniform,
    pub lights: LightsUniform,
    /// Camera of each shadow casting light, indexed by shadow map layer.
    /// Empty when nothing casts or shadows are disabled.
    pub shadow_casters: Vec<CameraUniform>,
    pub draws: Vec<MeshDraw>,
    pub joints: Vec<SkinPose>,
    pub material_updates: Vec<MaterialUpdate>,
    pub clear_colour: wgpu::Color,
}

impl Frame {
    /// Records the current state of `scene`.
    ///
    /// Materials flagged with `needs_update` are collected into
    /// `material_updates` and the flag is cleared.
    pub fn capture(scene: &mut Scene, settings: &RendererSettings) -> Frame {
        let mut camera = CameraUniform::new();
        if let Some(perspective) = scene.camera() {
            camera.update_view_proj(perspective);
        }

        let lights: Vec<&Light> = scene.lights().collect();
        let light_uniform = LightsUniform::new(&lights, &settings.shadow_map);
        let casters = if settings.shadow_map.enabled {
            shadow_casters(lights.iter().copied())
                .into_iter()
                .map(|light| CameraUniform::from_matrix(light_view_projection(light), light.position))
                .collect()
        } else {
            Vec::new()
        };

        let mut draws = Vec::new();
        let mut joints = Vec::new();
        for (idx, model) in scene.models() {
            capture_model(idx, model, &mut draws, &mut joints);
        }

        let mut material_updates = Vec::new();
        let model_indices: Vec<usize> = scene.models().map(|(idx, _)| idx).collect();
        for idx in model_indices {
            let Some(model) = scene.model_mut(idx) else {
                continue;
            };
            for (material_idx, material) in model
                .materials
                .iter_mut()
                .enumerate()
                .filter(|(_, material)| material.needs_update)
            {
                material_updates.push(MaterialUpdate {
                    model: idx,
                    material: material_idx,
                    uniform: MaterialUniform::from(&*material),
                });
                material.needs_update = false;
            }
        }

        Frame {
            camera,
            lights: light_uniform,
            shadow_casters: casters,
            draws,
            joints,
            material_updates,
            clear_colour: settings.clear_colour,
        }
    }
}

fn capture_model(idx: usize, model: &Model, draws: &mut Vec<MeshDraw>, joints: &mut Vec<SkinPose>) {
    let mut world = vec![Matrix4::identity(); model.nodes.len()];
    let mut visible = Vec::new();
    model.traverse(|node_idx, node, matrix| {
        world[node_idx] = *matrix;
        if node.mesh.is_some() {
            visible.push(node_idx);
        }
    });

    for skin in 0..model.skins.len() {
        joints.push(SkinPose {
            model: idx,
            skin,
            matrices: model.joint_matrices(skin, &world),
        });
    }

    for node_idx in visible {
        let node = &model.nodes[node_idx];
        let Some(mesh) = node.mesh.as_ref() else {
            continue;
        };
        let skin = node.skin.filter(|&skin| skin < model.skins.len());
        let model_matrix = if skin.is_some() {
            Matrix4::identity()
        } else {
            world[node_idx]
        };
        let normal_matrix = model_matrix
            .invert()
            .map(|inverse| inverse.transpose())
            .unwrap_or(Matrix4::identity());
        for (primitive_idx, primitive) in mesh.primitives.iter().enumerate() {
            draws.push(MeshDraw {
                model: idx,
                node: node_idx,
                primitive: primitive_idx,
                geometry: primitive.geometry,
                material: primitive.material,
                model_matrix,
                normal_matrix,
                skin,
                cast_shadow: mesh.cast_shadow,
                receive_shadow: mesh.receive_shadow,
            });
        }
    }
}

struct GpuMaterial {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    double_sided: bool,
}

struct GpuObject {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// GPU copy of one scene model, created the first time the renderer sees it.
struct GpuModel {
    meshes: Vec<Mesh>,
    materials: Vec<GpuMaterial>,
    joints: Vec<wgpu::Buffer>,
    objects: HashMap<(usize, usize), GpuObject>,
}

/// Owns every GPU resource needed to draw a [`Stage`].
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    size: (u32, u32),
    depth_texture: Texture,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    material_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    lights: LightResources,
    shadow: ShadowResources,
    model_pipeline: wgpu::RenderPipeline,
    double_sided_pipeline: wgpu::RenderPipeline,
    white: Texture,
    default_sampler: wgpu::Sampler,
    // bound as joints of unskinned meshes
    no_joints: wgpu::Buffer,
    models: HashMap<usize, GpuModel>,
}

impl Renderer {
    /// Builds pipelines and resources for `stage`, rendering to targets of
    /// `format`. Every shadow map layer is sized for the stage's largest
    /// shadow camera.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        format: wgpu::TextureFormat,
        stage: &Stage,
    ) -> anyhow::Result<Self> {
        let viewport = stage.viewport();
        let settings = stage.renderer_settings();
        let lights: Vec<&Light> = stage.scene().lights().collect();
        let map_size = if settings.shadow_map.enabled {
            shadow_map_size(&shadow_casters(lights.iter().copied()))
        } else {
            1
        };
        let light_uniform = LightsUniform::new(&lights, &settings.shadow_map);

        let camera_layout = mk_camera_layout(device);
        let material_layout = mk_material_layout(device);
        let object_layout = mk_object_layout(device);

        let mut camera_uniform = CameraUniform::new();
        if let Some(camera) = stage.camera() {
            camera_uniform.update_view_proj(camera);
        }
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let lights = LightResources::new(device, &light_uniform, map_size)?;
        let shadow = ShadowResources::new(device, &camera_layout, &object_layout);
        let model_pipeline = mk_model_pipeline(
            device,
            format,
            &camera_layout,
            &lights.bind_group_layout,
            &material_layout,
            &object_layout,
            false,
        );
        let double_sided_pipeline = mk_model_pipeline(
            device,
            format,
            &camera_layout,
            &lights.bind_group_layout,
            &material_layout,
            &object_layout,
            true,
        );

        let size = (viewport.width.max(1), viewport.height.max(1));
        let depth_texture = Texture::create_depth_texture(device, [size.0, size.1], "depth_texture");
        let no_joints = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Empty Joints Buffer"),
            size: JOINTS_BUFFER_SIZE,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });

        Ok(Self {
            white: Texture::create_solid(device, queue, [255; 4], "white"),
            default_sampler: create_default_sampler(device),
            device: device.clone(),
            queue: queue.clone(),
            format,
            size,
            depth_texture,
            camera_buffer,
            camera_bind_group,
            material_layout,
            object_layout,
            lights,
            shadow,
            model_pipeline,
            double_sided_pipeline,
            no_joints,
            models: HashMap::new(),
        })
    }

    /// Colour format of the targets passed to [`Renderer::render`].
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Size of the depth buffer, matching the last accepted resize.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Recreates the depth buffer. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.size {
            return;
        }
        self.size = (width, height);
        self.depth_texture =
            Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
    }

    /// Whether the model at scene index `idx` has been uploaded.
    pub fn is_uploaded(&self, idx: usize) -> bool {
        self.models.contains_key(&idx)
    }

    /// Uploads every model of the stage that has no GPU copy yet.
    pub fn prepare(&mut self, stage: &Stage) {
        for (idx, model) in stage.scene().models() {
            if self.models.contains_key(&idx) {
                continue;
            }
            let gpu_model = self.upload(model);
            log::info!(
                "Uploaded {}: {} meshes, {} materials",
                model.name,
                gpu_model.meshes.len(),
                gpu_model.materials.len()
            );
            self.models.insert(idx, gpu_model);
        }
    }

    fn upload(&self, model: &Model) -> GpuModel {
        let meshes = model
            .geometries
            .iter()
            .map(|geometry| Mesh::from_geometry(&self.device, geometry))
            .collect();

        let textures: Vec<Option<Texture>> = model
            .images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let label = format!("{} image {}", model.name, i);
                Texture::from_image_data(&self.device, &self.queue, image, Some(label.as_str()))
                    .inspect_err(|e| log::warn!("{:#}", e))
                    .ok()
            })
            .collect();

        let materials = model
            .materials
            .iter()
            .map(|material| {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{} Material Buffer", material.name)),
                    contents: bytemuck::cast_slice(&[MaterialUniform::from(material)]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let texture = material
                    .base_color_texture
                    .and_then(|idx| textures.get(idx))
                    .and_then(Option::as_ref)
                    .unwrap_or(&self.white);
                let sampler = texture.sampler.as_ref().unwrap_or(&self.default_sampler);
                let bind_group = mk_material_bind_group(
                    &self.device,
                    &self.material_layout,
                    &buffer,
                    &texture.view,
                    sampler,
                    &material.name,
                );
                GpuMaterial {
                    buffer,
                    bind_group,
                    double_sided: material.double_sided,
                }
            })
            .collect();

        let joints: Vec<wgpu::Buffer> = model
            .skins
            .iter()
            .map(|skin| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{} Joints Buffer", skin.name)),
                    size: JOINTS_BUFFER_SIZE,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let mut objects = HashMap::new();
        for (node_idx, node, mesh) in model.mesh_nodes() {
            let joints_buffer = node
                .skin
                .and_then(|skin| joints.get(skin))
                .unwrap_or(&self.no_joints);
            for primitive_idx in 0..mesh.primitives.len() {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{} Object Buffer {}", node.name, primitive_idx)),
                    size: std::mem::size_of::<ObjectUniform>() as wgpu::BufferAddress,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = mk_object_bind_group(
                    &self.device,
                    &self.object_layout,
                    &buffer,
                    joints_buffer,
                    &node.name,
                );
                objects.insert((node_idx, primitive_idx), GpuObject { buffer, bind_group });
            }
        }

        GpuModel {
            meshes,
            materials,
            joints,
            objects,
        }
    }

    /// Uploads the frame's uniforms and records the shadow and main passes
    /// into `target`. Draws of models that were never prepared are skipped.
    pub fn render(&self, frame: &Frame, target: &wgpu::TextureView) {
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[frame.camera]));
        self.lights.update(&self.queue, &frame.lights);
        for update in &frame.material_updates {
            if let Some(material) = self
                .models
                .get(&update.model)
                .and_then(|model| model.materials.get(update.material))
            {
                self.queue
                    .write_buffer(&material.buffer, 0, bytemuck::cast_slice(&[update.uniform]));
            }
        }
        for pose in &frame.joints {
            if let Some(buffer) = self
                .models
                .get(&pose.model)
                .and_then(|model| model.joints.get(pose.skin))
            {
                let count = pose.matrices.len().min(MAX_JOINTS);
                self.queue
                    .write_buffer(buffer, 0, bytemuck::cast_slice(&pose.matrices[..count]));
            }
        }

        let draws: Vec<(&MeshDraw, &Mesh, &GpuMaterial, &GpuObject)> = frame
            .draws
            .iter()
            .filter_map(|draw| {
                let model = self.models.get(&draw.model)?;
                Some((
                    draw,
                    model.meshes.get(draw.geometry)?,
                    model.materials.get(draw.material)?,
                    model.objects.get(&(draw.node, draw.primitive))?,
                ))
            })
            .collect();
        for (draw, _, _, object) in &draws {
            self.queue
                .write_buffer(&object.buffer, 0, bytemuck::cast_slice(&[draw.uniform()]));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // every layer is cleared, used or not, so none holds stale depth
        for (layer, target) in self.lights.shadow_layers.iter().enumerate() {
            let caster = frame.shadow_casters.get(layer);
            if let Some(camera) = caster {
                self.shadow.update(&self.queue, layer, camera);
            }
            let mut shadow_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: target,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
            let Some(light_camera) = caster.and(self.shadow.layers.get(layer)) else {
                continue;
            };
            shadow_pass.set_pipeline(&self.shadow.pipeline);
            for (_, mesh, _, object) in draws.iter().filter(|(draw, ..)| draw.cast_shadow) {
                shadow_pass.draw_mesh(mesh, &[&light_camera.bind_group, &object.bind_group]);
            }
        }

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(frame.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
            for (_, mesh, material, object) in &draws {
                render_pass.set_pipeline(if material.double_sided {
                    &self.double_sided_pipeline
                } else {
                    &self.model_pipeline
                });
                render_pass.draw_mesh(
                    mesh,
                    &[
                        &self.camera_bind_group,
                        &self.lights.bind_group,
                        &material.bind_group,
                        &object.bind_group,
                    ],
                );
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;
    use crate::{
        config::{ModelConfig, ShadowMapSettings},
        data_structures::{
            instance::Instance,
            model::{Geometry, Material},
            scene_graph::{MeshNode, Node, Primitive, SceneObject, Skin},
        },
    };

    fn mesh_node(name: &str, skin: Option<usize>) -> Node {
        let mut node = Node::new(name, Instance::new());
        node.mesh = Some(MeshNode {
            name: name.to_string(),
            primitives: vec![Primitive {
                geometry: 0,
                material: 0,
            }],
            cast_shadow: true,
            receive_shadow: true,
        });
        node.skin = skin;
        node
    }

    fn model() -> Model {
        let mut model = Model::new("test");
        let mut rigid = mesh_node("rigid", None);
        rigid.transform.position = Vector3::new(1.0, 0.0, 0.0);
        let skinned = mesh_node("skinned", Some(0));
        let mut joint = Node::new("joint", Instance::new());
        joint.transform.position = Vector3::new(0.0, 2.0, 0.0);
        model.nodes = vec![rigid, skinned, joint, mesh_node("unreachable", None)];
        model.roots = vec![0, 1, 2];
        model.geometries = vec![Geometry::default()];
        model.materials = vec![Material::default()];
        model.skins = vec![Skin {
            name: "skin".into(),
            joints: vec![2],
            inverse_bind_matrices: vec![Matrix4::identity()],
        }];
        model
    }

    fn scene_with(model: Model) -> (Scene, usize) {
        let mut scene = Scene::new();
        let idx = scene.add(SceneObject::Model(model));
        (scene, idx)
    }

    #[test]
    fn draws_cover_reachable_mesh_nodes_only() {
        let (mut scene, idx) = scene_with(model());
        let frame = Frame::capture(&mut scene, &RendererSettings::default());
        let nodes: Vec<usize> = frame.draws.iter().map(|d| d.node).collect();
        assert_eq!(nodes, vec![0, 1]);
        assert!(frame.draws.iter().all(|d| d.model == idx));
    }

    #[test]
    fn skinned_draws_use_identity_and_joints_carry_the_pose() {
        let (mut scene, _) = scene_with(model());
        let frame = Frame::capture(&mut scene, &RendererSettings::default());

        let rigid = &frame.draws[0];
        assert_eq!(rigid.skin, None);
        assert_eq!(rigid.model_matrix.w.x, 1.0);
        assert_eq!(rigid.uniform().flags[0], 0.0);

        let skinned = &frame.draws[1];
        assert_eq!(skinned.skin, Some(0));
        assert_eq!(skinned.model_matrix, Matrix4::identity());
        assert_eq!(skinned.uniform().flags[0], 1.0);

        assert_eq!(frame.joints.len(), 1);
        assert_eq!(frame.joints[0].matrices[0][3][1], 2.0);
    }

    #[test]
    fn material_updates_are_reported_once() {
        let mut model = model();
        model.prepare(&ModelConfig::default());
        let (mut scene, idx) = scene_with(model);
        let settings = RendererSettings::default();

        let first = Frame::capture(&mut scene, &settings);
        assert_eq!(first.material_updates.len(), 1);
        assert_eq!(first.material_updates[0].model, idx);
        assert!(!scene.model(idx).unwrap().materials[0].needs_update);

        let second = Frame::capture(&mut scene, &settings);
        assert!(second.material_updates.is_empty());
    }

    #[test]
    fn no_caster_without_shadow_lights_or_when_disabled() {
        let (mut scene, _) = scene_with(model());
        let frame = Frame::capture(&mut scene, &RendererSettings::default());
        assert!(frame.shadow_casters.is_empty());

        let mut scene = Scene::new();
        for light in crate::data_structures::light::studio_rig() {
            scene.add(SceneObject::Light(light));
        }
        let enabled = Frame::capture(&mut scene, &RendererSettings::default());
        // key, top and both spots
        assert_eq!(enabled.shadow_casters.len(), 4);
        assert_eq!(enabled.lights.shadow_caster_count(), 4);
        assert!(enabled.lights.shadows_enabled());
        // layers follow rig order, the second one looks down from the top light
        assert_eq!(enabled.shadow_casters[1].view_position, [0.0, 10.0, 0.0, 1.0]);

        let settings = RendererSettings {
            shadow_map: ShadowMapSettings {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let disabled = Frame::capture(&mut scene, &settings);
        assert!(disabled.shadow_casters.is_empty());
        assert!(!disabled.lights.shadows_enabled());
    }

    #[test]
    fn clear_colour_comes_from_settings() {
        let mut scene = Scene::new();
        let frame = Frame::capture(&mut scene, &RendererSettings::default());
        assert_eq!(frame.clear_colour, wgpu::Color::TRANSPARENT);
    }
}
