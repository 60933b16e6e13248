//! Asset loading.
//!
//! The stage loads exactly one model: [`AssetLoader::load`] fetches the file
//! through an [`AssetSource`], parses it as glTF/GLB, fetches whatever
//! buffers and images it references and returns a CPU side [`ModelAsset`].
//! GPU resources are created later by the renderer.

use std::{fmt, future::Future};

use anyhow::{Context, bail};

use crate::data_structures::scene_graph::Model;

pub mod animation;
pub mod mesh;
pub mod texture;

/// Receives `(loaded_bytes, total_bytes)` while a file downloads. The total
/// is unknown when the server sends no content length.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, loaded: u64, total: Option<u64>);
}

impl<F> ProgressObserver for F
where
    F: FnMut(u64, Option<u64>) + Send,
{
    fn on_progress(&mut self, loaded: u64, total: Option<u64>) {
        self(loaded, total)
    }
}

/// Default observer: progress goes to the debug log.
#[derive(Clone, Debug, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, loaded: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                log::debug!("Loaded {} of {} bytes ({}%)", loaded, total, loaded * 100 / total)
            }
            _ => log::debug!("Loaded {} bytes", loaded),
        }
    }
}

/// Somewhere bytes can be fetched from.
pub trait AssetSource {
    fn fetch(
        &self,
        url: &str,
        progress: &mut dyn ProgressObserver,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>>;
}

/// HTTP(S) through `reqwest`. Native builds also read plain file paths.
#[derive(Clone, Debug, Default)]
pub struct RemoteSource {
    client: reqwest::Client,
}

impl RemoteSource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Upper bound of the buffer reserved up front from a content length.
const MAX_PREALLOCATION: u64 = 64 << 20;

/// Bytes to reserve for a body announced as `total` bytes. A bogus content
/// length must not reserve more than [`MAX_PREALLOCATION`].
#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
fn preallocation(total: Option<u64>) -> usize {
    total.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl AssetSource for RemoteSource {
    async fn fetch(
        &self,
        url: &str,
        progress: &mut dyn ProgressObserver,
    ) -> anyhow::Result<Vec<u8>> {
        #[cfg(not(target_arch = "wasm32"))]
        if !is_remote(url) {
            let data = tokio::fs::read(url)
                .await
                .with_context(|| format!("Cannot read {}", url))?;
            let len = data.len() as u64;
            progress.on_progress(len, Some(len));
            return Ok(data);
        }
        #[cfg(target_arch = "wasm32")]
        let url = crate::web::absolute_url(url)?;
        #[cfg(target_arch = "wasm32")]
        let url = url.as_str();

        let mut response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        let total = response.content_length();

        #[cfg(not(target_arch = "wasm32"))]
        let data = {
            let mut data = Vec::with_capacity(preallocation(total));
            while let Some(chunk) = response.chunk().await? {
                data.extend_from_slice(&chunk);
                progress.on_progress(data.len() as u64, total);
            }
            data
        };
        #[cfg(target_arch = "wasm32")]
        let data = {
            // the fetch backend has no streaming body
            let data = response.bytes().await?.to_vec();
            progress.on_progress(data.len() as u64, total);
            data
        };

        Ok(data)
    }
}

/// Resolves a URI found inside a glTF file against the file's own URL.
pub fn resolve_uri(base: &str, uri: &str) -> anyhow::Result<String> {
    if uri.starts_with("data:") {
        bail!("Embedded data URIs are not supported");
    }
    if is_remote(uri) {
        return Ok(uri.to_string());
    }
    if is_remote(base) {
        let base = reqwest::Url::parse(base).with_context(|| format!("Invalid URL {}", base))?;
        let joined = base
            .join(uri)
            .with_context(|| format!("Cannot resolve {} against {}", uri, base))?;
        return Ok(joined.to_string());
    }
    let path = std::path::Path::new(base).with_file_name(uri);
    Ok(path.to_string_lossy().into_owned())
}

/// A parsed model, ready to be added to a stage.
#[derive(Clone, Debug)]
pub struct ModelAsset {
    pub url: String,
    pub model: Model,
}

/// The asset at `url` could not be fetched or parsed.
#[derive(Debug)]
pub struct AssetLoadError {
    pub url: String,
    pub source: anyhow::Error,
}

impl fmt::Display for AssetLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to load asset {}: {:#}", self.url, self.source)
    }
}

impl std::error::Error for AssetLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Single-shot loader for one model file. [`AssetLoader::load`] consumes the
/// loader, so the same loader can never start a second load.
pub struct AssetLoader<S> {
    url: String,
    source: S,
    progress: Box<dyn ProgressObserver>,
}

impl<S: AssetSource> AssetLoader<S> {
    pub fn new(url: impl Into<String>, source: S) -> Self {
        Self {
            url: url.into(),
            source,
            progress: Box::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressObserver + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// The URL of the model file.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn load(self) -> Result<ModelAsset, AssetLoadError> {
        let Self {
            url,
            source,
            mut progress,
        } = self;
        match load_model_gltf(&url, &source, progress.as_mut()).await {
            Ok(model) => Ok(ModelAsset { url, model }),
            Err(source) => Err(AssetLoadError { url, source }),
        }
    }
}

async fn load_model_gltf<S: AssetSource>(
    url: &str,
    source: &S,
    progress: &mut dyn ProgressObserver,
) -> anyhow::Result<Model> {
    let data = source
        .fetch(url, progress)
        .await
        .with_context(|| format!("Cannot fetch {}", url))?;
    let gltf = gltf::Gltf::from_slice(&data).context("Not a glTF asset")?;

    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => gltf
                .blob
                .clone()
                .context("Binary chunk referenced but missing")?,
            gltf::buffer::Source::Uri(uri) => {
                let location = resolve_uri(url, uri)?;
                source
                    .fetch(&location, progress)
                    .await
                    .with_context(|| format!("Cannot fetch buffer {}", location))?
            }
        };
        if data.len() < buffer.length() {
            bail!(
                "Buffer {} holds {} bytes but declares {}",
                buffer.index(),
                data.len(),
                buffer.length()
            );
        }
        buffers.push(data);
    }

    let (images, image_slots) =
        texture::load_images(&gltf.document, &buffers, url, source, progress).await;
    let materials = texture::load_materials(&gltf.document, &image_slots);
    let mut model = mesh::load_model(&gltf.document, &buffers, materials);
    model.name = url
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(url)
        .to_string();
    model.images = images;
    model.animations = animation::load_animations(&gltf.document, &buffers);

    log::info!(
        "Loaded {}: {} nodes, {} meshes, {} skins, {} animations",
        model.name,
        model.nodes.len(),
        model.geometries.len(),
        model.skins.len(),
        model.animations.len()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_uris_resolve_next_to_the_asset() {
        assert_eq!(
            resolve_uri("https://host/models/dance.gltf", "dance.bin").unwrap(),
            "https://host/models/dance.bin"
        );
        assert_eq!(
            resolve_uri("https://host/models/dance.gltf", "../tex/skin.png").unwrap(),
            "https://host/tex/skin.png"
        );
        assert_eq!(
            resolve_uri("assets/dance.gltf", "dance.bin").unwrap(),
            std::path::Path::new("assets")
                .join("dance.bin")
                .to_string_lossy()
        );
    }

    #[test]
    fn preallocation_is_capped() {
        assert_eq!(preallocation(None), 0);
        assert_eq!(preallocation(Some(1024)), 1024);
        assert_eq!(preallocation(Some(u64::MAX)), 64 << 20);
    }

    #[test]
    fn absolute_uris_are_kept() {
        assert_eq!(
            resolve_uri("assets/dance.gltf", "https://cdn/dance.bin").unwrap(),
            "https://cdn/dance.bin"
        );
    }

    #[test]
    fn data_uris_are_rejected() {
        assert!(resolve_uri("assets/a.gltf", "data:application/octet-stream;base64,AAAA").is_err());
    }

    #[test]
    fn closures_observe_progress() {
        let mut seen = Vec::new();
        {
            let mut observer = |loaded: u64, total: Option<u64>| seen.push((loaded, total));
            let observer: &mut dyn ProgressObserver = &mut observer;
            observer.on_progress(10, Some(20));
            observer.on_progress(20, Some(20));
        }
        assert_eq!(seen, vec![(10, Some(20)), (20, Some(20))]);
    }

    #[test]
    fn load_error_names_the_asset_and_the_cause() {
        let error = AssetLoadError {
            url: "missing.glb".into(),
            source: anyhow::anyhow!("404 Not Found"),
        };
        let message = error.to_string();
        assert!(message.contains("missing.glb"));
        assert!(message.contains("404"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
