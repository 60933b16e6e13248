use anyhow::Context;

use crate::{
    data_structures::model::{ImageData, Material},
    resources::{AssetSource, ProgressObserver, resolve_uri},
};

/// Fetches and decodes every image of the document.
///
/// Images that cannot be fetched or decoded are skipped with a warning; the
/// materials using them fall back to their base colour. The second vector
/// maps glTF image indices to indices into the first.
pub async fn load_images<S: AssetSource>(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    base_url: &str,
    source: &S,
    progress: &mut dyn ProgressObserver,
) -> (Vec<ImageData>, Vec<Option<usize>>) {
    let mut images = Vec::new();
    let mut slots = Vec::new();
    for image in document.images() {
        let decoded = match image.source() {
            gltf::image::Source::View { view, .. } => view_bytes(&view, buffers).and_then(decode),
            gltf::image::Source::Uri { uri, .. } => match resolve_uri(base_url, uri) {
                Ok(location) => source
                    .fetch(&location, progress)
                    .await
                    .with_context(|| format!("Cannot fetch image {}", location))
                    .and_then(|bytes| decode(&bytes)),
                Err(e) => Err(e),
            },
        };
        match decoded {
            Ok(data) => {
                slots.push(Some(images.len()));
                images.push(data);
            }
            Err(e) => {
                log::warn!(
                    "Skipping image {} ({}): {:#}",
                    image.index(),
                    image.name().unwrap_or("unnamed"),
                    e
                );
                slots.push(None);
            }
        }
    }
    (images, slots)
}

fn view_bytes<'a>(view: &gltf::buffer::View, buffers: &'a [Vec<u8>]) -> anyhow::Result<&'a [u8]> {
    let buffer = buffers
        .get(view.buffer().index())
        .context("Image refers to a missing buffer")?;
    let start = view.offset();
    let end = start + view.length();
    buffer
        .get(start..end)
        .with_context(|| format!("Image view {}..{} exceeds its buffer", start, end))
}

fn decode(bytes: &[u8]) -> anyhow::Result<ImageData> {
    let img = image::load_from_memory(bytes).context("Cannot decode image")?;
    let rgba = img.to_rgba8();
    Ok(ImageData {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

/// Converts the document's metallic-roughness materials.
pub fn load_materials(document: &gltf::Document, image_slots: &[Option<usize>]) -> Vec<Material> {
    document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let base_color_texture = pbr
                .base_color_texture()
                .and_then(|info| image_slots.get(info.texture().source().index()).copied())
                .flatten();
            Material {
                name: material
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("material_{}", material.index().unwrap_or(0))),
                base_color: pbr.base_color_factor(),
                base_color_texture,
                roughness: pbr.roughness_factor(),
                metalness: pbr.metallic_factor(),
                double_sided: material.double_sided(),
                needs_update: false,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_png_to_rgba() {
        let data = decode(&png(3, 2)).unwrap();
        assert_eq!((data.width, data.height), (3, 2));
        assert_eq!(data.rgba.len(), 3 * 2 * 4);
        assert_eq!(&data.rgba[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn garbage_is_not_an_image() {
        assert!(decode(b"definitely not a png").is_err());
    }
}
