use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Context;
use stage_ngin::{
    resources::{AssetLoadError, AssetSource, ProgressObserver},
    stage::ErrorReporter,
};

pub const ASSET_URL: &str = "https://assets.test/models/dancer.glb";

/// Appends one triangle: positions (36 bytes) then u16 indices (6 bytes),
/// padded to 44 bytes.
fn triangle(bin: &mut Vec<u8>) {
    for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        bin.extend(v.iter().flat_map(|c| c.to_le_bytes()));
    }
    bin.extend([0u16, 1, 2].iter().flat_map(|i| i.to_le_bytes()));
    bin.extend([0u8; 2]);
}

const TRIANGLE_ACCESSORS: &str = r#"{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3","min":[0,0,0],"max":[1,1,0]},
{"bufferView":1,"componentType":5123,"count":3,"type":"SCALAR"}"#;

const TRIANGLE_VIEWS: &str = r#"{"buffer":0,"byteOffset":0,"byteLength":36,"target":34962},
{"buffer":0,"byteOffset":36,"byteLength":6,"target":34963}"#;

/// Assembles a small GLB in memory: a root node with two mesh nodes below it
/// (sharing one triangle mesh and one material) and `clips` animations that
/// move the first mesh node along +X over one second.
pub fn animated_glb(clips: usize) -> Vec<u8> {
    let mut bin = Vec::new();
    triangle(&mut bin);
    // keyframe times, 8 bytes at 44
    bin.extend([0.0f32, 1.0].iter().flat_map(|t| t.to_le_bytes()));
    // translations, 24 bytes at 52
    for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]] {
        bin.extend(v.iter().flat_map(|c| c.to_le_bytes()));
    }
    assert_eq!(bin.len(), 76);

    let animations: Vec<String> = (0..clips)
        .map(|i| {
            format!(
                r#"{{"name":"clip_{i}","channels":[{{"sampler":0,"target":{{"node":1,"path":"translation"}}}}],"samplers":[{{"input":2,"output":3,"interpolation":"LINEAR"}}]}}"#
            )
        })
        .collect();
    let json = format!(
        r#"{{
"asset":{{"version":"2.0"}},
"scene":0,
"scenes":[{{"nodes":[0]}}],
"nodes":[{{"name":"root","children":[1]}},{{"name":"body","mesh":0,"children":[2]}},{{"name":"hat","mesh":0}}],
"meshes":[{{"name":"triangle","primitives":[{{"attributes":{{"POSITION":0}},"indices":1,"material":0}}]}}],
"materials":[{{"name":"cloth","pbrMetallicRoughness":{{"baseColorFactor":[1,0,0,1],"metallicFactor":0.0,"roughnessFactor":1.0}}}}],
"accessors":[
{{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3","min":[0,0,0],"max":[1,1,0]}},
{{"bufferView":1,"componentType":5123,"count":3,"type":"SCALAR"}},
{{"bufferView":2,"componentType":5126,"count":2,"type":"SCALAR","min":[0],"max":[1]}},
{{"bufferView":3,"componentType":5126,"count":2,"type":"VEC3"}}
],
"bufferViews":[
{{"buffer":0,"byteOffset":0,"byteLength":36,"target":34962}},
{{"buffer":0,"byteOffset":36,"byteLength":6,"target":34963}},
{{"buffer":0,"byteOffset":44,"byteLength":8}},
{{"buffer":0,"byteOffset":52,"byteLength":24}}
],
"buffers":[{{"byteLength":76}}],
"animations":[{}]
}}"#,
        animations.join(",")
    );
    glb(json.into_bytes(), bin)
}

/// A `.gltf` document whose triangle lives in the external buffer `bin_uri`.
/// Returns the JSON and the buffer contents.
pub fn split_gltf(bin_uri: &str) -> (Vec<u8>, Vec<u8>) {
    let mut bin = Vec::new();
    triangle(&mut bin);
    let json = format!(
        r#"{{
"asset":{{"version":"2.0"}},
"scene":0,
"scenes":[{{"nodes":[0]}}],
"nodes":[{{"name":"body","mesh":0}}],
"meshes":[{{"name":"triangle","primitives":[{{"attributes":{{"POSITION":0}},"indices":1}}]}}],
"accessors":[{TRIANGLE_ACCESSORS}],
"bufferViews":[{TRIANGLE_VIEWS}],
"buffers":[{{"uri":"{bin_uri}","byteLength":{}}}]
}}"#,
        bin.len()
    );
    (json.into_bytes(), bin)
}

/// A GLB with one skinned triangle. The skin has a single joint, node
/// "joint" at y = 2, with an identity inverse bind matrix, and every vertex
/// is fully bound to it.
pub fn skinned_glb() -> Vec<u8> {
    let mut bin = Vec::new();
    triangle(&mut bin);
    // joints, 12 bytes at 44
    for _ in 0..3 {
        bin.extend([0u8, 0, 0, 0]);
    }
    // weights, 48 bytes at 56
    for _ in 0..3 {
        bin.extend([1.0f32, 0.0, 0.0, 0.0].iter().flat_map(|w| w.to_le_bytes()));
    }
    // inverse bind matrix, 64 bytes at 104
    let identity = [
        1.0f32, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ];
    bin.extend(identity.iter().flat_map(|c| c.to_le_bytes()));
    assert_eq!(bin.len(), 168);

    let json = format!(
        r#"{{
"asset":{{"version":"2.0"}},
"scene":0,
"scenes":[{{"nodes":[0]}}],
"nodes":[{{"name":"armature","children":[1,2]}},{{"name":"body","mesh":0,"skin":0}},{{"name":"joint","translation":[0,2,0]}}],
"meshes":[{{"name":"triangle","primitives":[{{"attributes":{{"POSITION":0,"JOINTS_0":2,"WEIGHTS_0":3}},"indices":1}}]}}],
"skins":[{{"name":"rig","joints":[2],"inverseBindMatrices":4}}],
"accessors":[{TRIANGLE_ACCESSORS},
{{"bufferView":2,"componentType":5121,"count":3,"type":"VEC4"}},
{{"bufferView":3,"componentType":5126,"count":3,"type":"VEC4"}},
{{"bufferView":4,"componentType":5126,"count":1,"type":"MAT4"}}
],
"bufferViews":[{TRIANGLE_VIEWS},
{{"buffer":0,"byteOffset":44,"byteLength":12,"target":34962}},
{{"buffer":0,"byteOffset":56,"byteLength":48,"target":34962}},
{{"buffer":0,"byteOffset":104,"byteLength":64}}
],
"buffers":[{{"byteLength":168}}]
}}"#
    );
    glb(json.into_bytes(), bin)
}

/// A GLB whose material samples a 2x2 PNG stored in the binary chunk.
pub fn textured_glb() -> Vec<u8> {
    let mut png = Vec::new();
    image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 255, 0, 255]))
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .expect("encode png");

    let mut bin = Vec::new();
    triangle(&mut bin);
    // tex coords, 24 bytes at 44
    for uv in [[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]] {
        bin.extend(uv.iter().flat_map(|c| c.to_le_bytes()));
    }
    // image at 68
    bin.extend(&png);

    let json = format!(
        r#"{{
"asset":{{"version":"2.0"}},
"scene":0,
"scenes":[{{"nodes":[0]}}],
"nodes":[{{"name":"body","mesh":0}}],
"meshes":[{{"name":"triangle","primitives":[{{"attributes":{{"POSITION":0,"TEXCOORD_0":2}},"indices":1,"material":0}}]}}],
"materials":[{{"name":"printed","pbrMetallicRoughness":{{"baseColorTexture":{{"index":0}}}}}}],
"textures":[{{"source":0}}],
"images":[{{"bufferView":3,"mimeType":"image/png"}}],
"accessors":[{TRIANGLE_ACCESSORS},
{{"bufferView":2,"componentType":5126,"count":3,"type":"VEC2"}}
],
"bufferViews":[{TRIANGLE_VIEWS},
{{"buffer":0,"byteOffset":44,"byteLength":24,"target":34962}},
{{"buffer":0,"byteOffset":68,"byteLength":{png_len}}}
],
"buffers":[{{"byteLength":{total}}}]
}}"#,
        png_len = png.len(),
        total = bin.len()
    );
    glb(json.into_bytes(), bin)
}

fn glb(mut json: Vec<u8>, mut bin: Vec<u8>) -> Vec<u8> {
    while json.len() % 4 != 0 {
        json.push(b' ');
    }
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
    let total = 12 + 8 + json.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend(b"glTF");
    out.extend(2u32.to_le_bytes());
    out.extend((total as u32).to_le_bytes());
    out.extend((json.len() as u32).to_le_bytes());
    out.extend(b"JSON");
    out.extend(json);
    out.extend((bin.len() as u32).to_le_bytes());
    out.extend(b"BIN\0");
    out.extend(bin);
    out
}

/// Serves files from memory and records every fetch.
#[derive(Clone, Default)]
pub struct StaticSource {
    files: HashMap<String, Vec<u8>>,
    fetches: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticSource {
    pub fn with_file(mut self, url: &str, data: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), data);
        self
    }

    pub fn fetches(&self) -> Arc<AtomicUsize> {
        self.fetches.clone()
    }

    /// Every requested URL, in order.
    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        self.requests.clone()
    }
}

impl AssetSource for StaticSource {
    async fn fetch(
        &self,
        url: &str,
        progress: &mut dyn ProgressObserver,
    ) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        let data = self
            .files
            .get(url)
            .cloned()
            .with_context(|| format!("404 Not Found: {}", url))?;
        let total = data.len() as u64;
        progress.on_progress(total / 2, Some(total));
        progress.on_progress(total, Some(total));
        Ok(data)
    }
}

/// Fails every fetch like an unreachable host.
#[derive(Clone, Copy, Default)]
pub struct FailingSource;

impl AssetSource for FailingSource {
    async fn fetch(&self, url: &str, _: &mut dyn ProgressObserver) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("connection refused while fetching {}", url)
    }
}

/// Records every reported error message.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    reports: Rc<RefCell<Vec<String>>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<String> {
        self.reports.borrow().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&mut self, error: &AssetLoadError) {
        self.reports.borrow_mut().push(error.to_string());
    }
}

/// Progress observer that keeps every update.
#[derive(Clone, Default)]
pub struct ProgressLog(pub Arc<Mutex<Vec<(u64, Option<u64>)>>>);

impl ProgressObserver for ProgressLog {
    fn on_progress(&mut self, loaded: u64, total: Option<u64>) {
        if let Ok(mut log) = self.0.lock() {
            log.push((loaded, total));
        }
    }
}

/// Headless device for GPU tests. `None` when the machine has no adapter.
#[cfg(feature = "integration-tests")]
pub async fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());
    match stage_ngin::context::request_device(&instance, None).await {
        Ok((_, device, queue)) => Some((device, queue)),
        Err(e) => {
            eprintln!("Skipping GPU test: {:#}", e);
            None
        }
    }
}

/// Copies `texture` (RGBA8, `width` a multiple of 64) back to the CPU.
#[cfg(feature = "integration-tests")]
pub async fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> image::RgbaImage {
    let bytes_per_row = 4 * width;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: (bytes_per_row * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    let slice = buffer.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).unwrap();
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(std::time::Duration::from_secs(3)),
        })
        .unwrap();
    rx.receive().await.unwrap().unwrap();
    let data = slice.get_mapped_range().to_vec();
    image::RgbaImage::from_raw(width, height, data).unwrap()
}
