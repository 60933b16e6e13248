//! Window, surface and GPU device.

use std::sync::Arc;

use anyhow::Context as _;
use winit::window::Window;

use crate::{config::RendererSettings, stage::Viewport};

/// Outcome of acquiring the next surface texture.
#[derive(Debug)]
pub enum SurfaceFrame {
    /// Render into it and present.
    Ready(wgpu::SurfaceTexture),
    /// Render into it and present, then reconfigure the surface.
    Suboptimal(wgpu::SurfaceTexture),
    /// Reconfigure and try again next frame.
    Reconfigure,
    /// Nothing to draw into this frame.
    Skip,
}

#[derive(Debug)]
pub struct Context {
    pub(crate) window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    is_surface_configured: bool,
}

impl Context {
    pub async fn new(window: Arc<Window>, settings: RendererSettings) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let mut descriptor = wgpu::InstanceDescriptor::new_without_display_handle();
        #[cfg(not(target_arch = "wasm32"))]
        {
            descriptor.backends = wgpu::Backends::PRIMARY;
        }
        #[cfg(target_arch = "wasm32")]
        {
            descriptor.backends = wgpu::Backends::GL;
        }
        let instance = wgpu::Instance::new(descriptor);

        let surface = instance
            .create_surface(window.clone())
            .context("Cannot create a surface for the window")?;
        let (adapter, device, queue) = request_device(&instance, Some(&surface)).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // The model shader writes linear colour and relies on an sRGB target
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("The surface supports no formats on this adapter")?;
        let alpha_mode = pick_alpha_mode(&surface_caps.alpha_modes, settings.alpha);
        log::info!(
            "Surface {:?} with {:?} alpha on {}",
            surface_format,
            alpha_mode,
            adapter.get_info().name
        );
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let mut ctx = Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
        };
        ctx.resize(size.width, size.height);
        Ok(ctx)
    }

    /// The window the surface presents to.
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Current surface size with the window's pixel ratio.
    pub fn viewport(&self) -> Viewport {
        let size = self.window.inner_size();
        Viewport::new(size.width, size.height, self.window.scale_factor())
    }

    /// Reconfigures the surface. Zero sizes leave it untouched.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            self.is_surface_configured = true;
        }
    }

    pub fn reconfigure(&mut self) {
        let size = self.window.inner_size();
        self.resize(size.width, size.height);
    }

    /// Acquires the texture to draw the next frame into.
    pub fn next_frame(&self) -> SurfaceFrame {
        if !self.is_surface_configured {
            return SurfaceFrame::Skip;
        }
        match self.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(texture) => SurfaceFrame::Ready(texture),
            wgpu::CurrentSurfaceTexture::Suboptimal(texture) => SurfaceFrame::Suboptimal(texture),
            wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
                SurfaceFrame::Reconfigure
            }
            wgpu::CurrentSurfaceTexture::Timeout | wgpu::CurrentSurfaceTexture::Occluded => {
                SurfaceFrame::Skip
            }
            wgpu::CurrentSurfaceTexture::Validation => {
                log::error!("Unable to acquire the surface texture: validation error");
                SurfaceFrame::Skip
            }
        }
    }
}

/// Picks an adapter compatible with `surface`, if any, and opens a device on
/// it. Limits are reduced to WebGL2 on the web.
pub async fn request_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> anyhow::Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .context("No suitable graphics adapter")?;
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            // WebGL doesn't support all of wgpu's features
            required_limits: if cfg!(target_arch = "wasm32") {
                wgpu::Limits::downlevel_webgl2_defaults()
            } else {
                wgpu::Limits::default()
            },
            ..Default::default()
        })
        .await
        .context("Cannot open the graphics device")?;
    Ok((adapter, device, queue))
}

/// A transparent stage needs a compositing alpha mode; an opaque one prefers
/// `Opaque`. Falls back to whatever the surface offers first.
pub fn pick_alpha_mode(
    supported: &[wgpu::CompositeAlphaMode],
    transparent: bool,
) -> wgpu::CompositeAlphaMode {
    use wgpu::CompositeAlphaMode as Mode;

    let preferred: &[Mode] = if transparent {
        &[Mode::PreMultiplied, Mode::PostMultiplied, Mode::Inherit]
    } else {
        &[Mode::Opaque]
    };
    if let Some(mode) = preferred.iter().find(|mode| supported.contains(mode)) {
        return *mode;
    }
    if transparent {
        log::warn!("The surface cannot be composited transparently, rendering opaque");
    }
    supported.first().copied().unwrap_or(Mode::Auto)
}
