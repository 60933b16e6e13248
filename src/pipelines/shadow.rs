use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    data_structures::{
        light::MAX_SHADOW_CASTERS,
        model::{ModelVertex, Vertex},
        texture::Texture,
    },
    pipelines::model::mk_render_pipeline,
};

/// Camera of one shadow map layer.
#[derive(Debug)]
pub struct ShadowLayer {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl ShadowLayer {
    fn new(device: &wgpu::Device, camera_layout: &wgpu::BindGroupLayout, layer: usize) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("Shadow Camera Buffer {}", layer)),
            contents: bytemuck::cast_slice(&[CameraUniform::new()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some(&format!("shadow_camera_bind_group_{}", layer)),
        });
        Self { buffer, bind_group }
    }
}

/// Depth only passes, one per shadow casting light.
///
/// Shares the object bind group layout with the model pipeline so skinned
/// meshes cast animated shadows.
#[derive(Debug)]
pub struct ShadowResources {
    pub layers: Vec<ShadowLayer>,
    pub pipeline: wgpu::RenderPipeline,
}

impl ShadowResources {
    /// # Arguments
    ///
    /// * `camera_layout` - layout of the light camera bind group (group 0)
    /// * `object_layout` - layout of the per-object bind group (group 1)
    pub fn new(
        device: &wgpu::Device,
        camera_layout: &wgpu::BindGroupLayout,
        object_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let layers = (0..MAX_SHADOW_CASTERS)
            .map(|layer| ShadowLayer::new(device, camera_layout, layer))
            .collect();
        let pipeline = mk_shadow_pipeline(device, camera_layout, object_layout);
        Self { layers, pipeline }
    }

    /// Sets the light camera `layer` is rendered with. Out of range layers
    /// are ignored.
    pub fn update(&self, queue: &wgpu::Queue, layer: usize, camera: &CameraUniform) {
        if let Some(layer) = self.layers.get(layer) {
            queue.write_buffer(&layer.buffer, 0, bytemuck::cast_slice(&[*camera]));
        }
    }
}

pub fn mk_shadow_pipeline(
    device: &wgpu::Device,
    camera_layout: &wgpu::BindGroupLayout,
    object_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Shadow Pipeline Layout"),
        bind_group_layouts: &[Some(camera_layout), Some(object_layout)],
        immediate_size: 0,
    });
    let shader = wgpu::ShaderModuleDescriptor {
        label: Some("Shadow Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shadow.wgsl").into()),
    };
    mk_render_pipeline(
        device,
        "Shadow Pipeline",
        &layout,
        None,
        Texture::DEPTH_FORMAT,
        // slope scaled bias against acne on surfaces facing away from the light
        wgpu::DepthBiasState {
            constant: 2,
            slope_scale: 2.0,
            clamp: 0.0,
        },
        None,
        &[ModelVertex::desc()],
        shader,
    )
}
