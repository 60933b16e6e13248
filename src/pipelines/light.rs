use anyhow::Context;
use wgpu::util::DeviceExt;

use crate::data_structures::{
    light::{LightsUniform, MAX_SHADOW_CASTERS},
    texture::Texture,
};

/// GPU side of the light rig: the packed lights uniform and the shadow map
/// array the main pass samples. Bind group 1 of the model pipeline.
///
/// The array always has [`MAX_SHADOW_CASTERS`] layers so the binding stays
/// an array view whatever the rig looks like.
#[derive(Debug)]
pub struct LightResources {
    pub buffer: wgpu::Buffer,
    pub shadow_map: Texture,
    /// Render attachment of each layer of `shadow_map`.
    pub shadow_layers: Vec<wgpu::TextureView>,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl LightResources {
    /// # Arguments
    ///
    /// * `uniform` - initial contents of the lights buffer
    /// * `shadow_map_size` - edge length of every shadow map layer
    pub fn new(
        device: &wgpu::Device,
        uniform: &LightsUniform,
        shadow_map_size: u32,
    ) -> anyhow::Result<Self> {
        let buffer = mk_buffer(device, uniform);
        let shadow_map =
            Texture::create_shadow_map(device, shadow_map_size, MAX_SHADOW_CASTERS as u32);
        let shadow_layers = (0..MAX_SHADOW_CASTERS as u32)
            .map(|layer| shadow_map.layer_view(layer))
            .collect();
        let bind_group_layout = mk_bind_group_layout(device);
        let sampler = shadow_map
            .sampler
            .as_ref()
            .context("Shadow map has no comparison sampler")?;
        let bind_group = mk_bind_group(
            device,
            &bind_group_layout,
            &buffer,
            &shadow_map.view,
            sampler,
        );
        Ok(Self {
            buffer,
            shadow_map,
            shadow_layers,
            bind_group,
            bind_group_layout,
        })
    }

    /// Uploads the lights packed for the current frame.
    pub fn update(&self, queue: &wgpu::Queue, uniform: &LightsUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[*uniform]));
    }
}

pub fn mk_buffer(device: &wgpu::Device, uniform: &LightsUniform) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Lights Buffer"),
        contents: bytemuck::cast_slice(&[*uniform]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                    sample_type: wgpu::TextureSampleType::Depth,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
        ],
        label: Some("lights_bind_group_layout"),
    })
}

pub fn mk_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    shadow_map: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(shadow_map),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("lights_bind_group"),
    })
}
