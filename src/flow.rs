//! Application event loop.
//!
//! [`run`] opens a window (or binds the page canvas on the web), creates a
//! [`Stage`] and starts loading its model in the background. Once the GPU
//! context is ready every redraw advances the stage by one frame and renders
//! it.
//!
//! # Lifecycle
//!
//! 1. `resumed`: create the window and the stage, start the model load and
//!    the GPU setup (blocking natively, spawned on the web)
//! 2. [`StageEvent::ModelLoaded`]: add the model to the stage or report the
//!    failure
//! 3. `Resized` / [`StageEvent::ViewportChanged`]: resize surface, depth
//!    buffer and camera
//! 4. `RedrawRequested`: advance the animation, capture a frame, render and
//!    present, request the next redraw

use std::sync::Arc;

use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use crate::{
    config::StageConfig,
    context::{Context, SurfaceFrame},
    render::{Frame, Renderer},
    resources::{AssetLoadError, AssetLoader, ModelAsset, RemoteSource},
    stage::{Stage, Viewport},
};

/// Everything that only exists once the GPU is ready.
pub struct AppState {
    pub(crate) ctx: Context,
    renderer: Renderer,
}

impl AppState {
    fn resize(&mut self, stage: &mut Stage, viewport: Viewport) {
        if !stage.resize(viewport) {
            return;
        }
        self.ctx.resize(viewport.width, viewport.height);
        self.renderer.resize(viewport.width, viewport.height);
    }

    fn render(&mut self, stage: &mut Stage, frame: &Frame) {
        self.renderer.prepare(stage);
        match self.ctx.next_frame() {
            SurfaceFrame::Ready(output) => self.present(frame, output),
            SurfaceFrame::Suboptimal(output) => {
                self.present(frame, output);
                self.ctx.reconfigure();
            }
            SurfaceFrame::Reconfigure => self.ctx.reconfigure(),
            SurfaceFrame::Skip => (),
        }
    }

    fn present(&self, frame: &Frame, output: wgpu::SurfaceTexture) {
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.renderer.render(frame, &view);
        output.present();
    }
}

pub enum StageEvent {
    #[cfg(target_arch = "wasm32")]
    Initialized(anyhow::Result<Context>),
    ModelLoaded(Result<ModelAsset, AssetLoadError>),
    ViewportChanged(Viewport),
}

impl std::fmt::Debug for StageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(target_arch = "wasm32")]
            Self::Initialized(ctx) => f.debug_tuple("Initialized").field(&ctx.is_ok()).finish(),
            Self::ModelLoaded(Ok(asset)) => f.debug_tuple("ModelLoaded").field(&asset.url).finish(),
            Self::ModelLoaded(Err(e)) => f.debug_tuple("ModelLoaded").field(&e.url).finish(),
            Self::ViewportChanged(viewport) => {
                f.debug_tuple("ViewportChanged").field(viewport).finish()
            }
        }
    }
}

pub struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: winit::event_loop::EventLoopProxy<StageEvent>,
    config: StageConfig,
    stage: Option<Stage>,
    state: Option<AppState>,
    // taken when the load starts, so it starts once
    loader: Option<AssetLoader<RemoteSource>>,
    last_time: Instant,
}

impl App {
    fn new(event_loop: &EventLoop<StageEvent>, config: StageConfig) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        #[cfg(not(target_arch = "wasm32"))]
        let async_runtime = tokio::runtime::Runtime::new()?;
        let loader = AssetLoader::new(config.asset_url.clone(), RemoteSource::new());
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy,
            config,
            stage: None,
            state: None,
            loader: Some(loader),
            last_time: Instant::now(),
        })
    }

    fn start_loading(&mut self) {
        let Some(loader) = self.loader.take() else {
            return;
        };
        log::info!("Loading {}", loader.url());
        let proxy = self.proxy.clone();
        let load = async move {
            let result = loader.load().await;
            if proxy.send_event(StageEvent::ModelLoaded(result)).is_err() {
                log::warn!("The event loop closed before the model finished loading");
            }
        };
        #[cfg(not(target_arch = "wasm32"))]
        self.async_runtime.spawn(load);
        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(load);
    }

    fn attach(&mut self, event_loop: &ActiveEventLoop, ctx: Context) {
        let Some(stage) = self.stage.as_mut() else {
            return;
        };
        let renderer = match Renderer::new(&ctx.device, &ctx.queue, ctx.config.format, stage) {
            Ok(renderer) => renderer,
            Err(e) => {
                log::error!("Cannot create the renderer: {:#}", e);
                event_loop.exit();
                return;
            }
        };
        let mut state = AppState { ctx, renderer };
        // the canvas may have changed size while the context was created
        let viewport = state.ctx.viewport();
        state.resize(stage, viewport);
        state.ctx.window.request_redraw();
        self.last_time = Instant::now();
        self.state = Some(state);
    }

    fn window_attributes(&self) -> anyhow::Result<winit::window::WindowAttributes> {
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("stage");

        #[cfg(target_arch = "wasm32")]
        {
            use winit::platform::web::WindowAttributesExtWebSys;

            let canvas = crate::web::canvas(&self.config.canvas_selector)?;
            let viewport = crate::web::viewport()?;
            let (width, height) = viewport.logical_size();
            window_attributes = window_attributes
                .with_canvas(Some(canvas))
                .with_inner_size(winit::dpi::LogicalSize::new(width, height));
        }
        Ok(window_attributes)
    }
}

impl ApplicationHandler<StageEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.stage.is_some() {
            return;
        }
        let window = match self
            .window_attributes()
            .and_then(|attributes| Ok(event_loop.create_window(attributes)?))
        {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Cannot create the window: {:#}", e);
                event_loop.exit();
                return;
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        let viewport = {
            let size = window.inner_size();
            Viewport::new(size.width, size.height, window.scale_factor())
        };
        #[cfg(target_arch = "wasm32")]
        let viewport = match crate::web::viewport() {
            Ok(viewport) => viewport,
            Err(e) => {
                log::error!("{:#}", e);
                event_loop.exit();
                return;
            }
        };
        self.stage = Some(Stage::new(self.config.clone(), viewport));
        self.start_loading();

        let settings = self.config.renderer;
        #[cfg(not(target_arch = "wasm32"))]
        match self.async_runtime.block_on(Context::new(window, settings)) {
            Ok(ctx) => self.attach(event_loop, ctx),
            Err(e) => {
                log::error!("App initialization failed. Cannot create the main context: {:#}", e);
                event_loop.exit();
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            if let Err(e) = crate::web::on_resize(self.proxy.clone()) {
                log::warn!("{:#}", e);
            }
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let ctx = Context::new(window, settings).await;
                if proxy.send_event(StageEvent::Initialized(ctx)).is_err() {
                    log::warn!("The event loop closed before the context was ready");
                }
            });
        }
    }

    #[cfg_attr(not(target_arch = "wasm32"), allow(unused_variables))]
    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: StageEvent) {
        match event {
            #[cfg(target_arch = "wasm32")]
            StageEvent::Initialized(Ok(ctx)) => self.attach(event_loop, ctx),
            #[cfg(target_arch = "wasm32")]
            StageEvent::Initialized(Err(e)) => {
                log::error!("App initialization failed. Cannot create the main context: {:#}", e);
                event_loop.exit();
            }
            StageEvent::ModelLoaded(result) => {
                let Some(stage) = self.stage.as_mut() else {
                    return;
                };
                stage.finish_load(result);
                if let Some(state) = &self.state {
                    state.ctx.window.request_redraw();
                }
            }
            StageEvent::ViewportChanged(viewport) => {
                let Some(stage) = self.stage.as_mut() else {
                    return;
                };
                match self.state.as_mut() {
                    Some(state) => {
                        let (width, height) = viewport.logical_size();
                        let _ = state
                            .ctx
                            .window
                            .request_inner_size(winit::dpi::LogicalSize::new(width, height));
                        state.resize(stage, viewport);
                    }
                    None => _ = stage.resize(viewport),
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let (Some(stage), Some(state)) = (self.stage.as_mut(), self.state.as_mut()) else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                let scale_factor = state.ctx.window.scale_factor();
                state.resize(stage, Viewport::new(size.width, size.height, scale_factor));
            }
            WindowEvent::RedrawRequested => {
                // invoke main render loop
                state.ctx.window.request_redraw();

                let elapsed = self.last_time.elapsed();
                self.last_time = Instant::now();
                let frame = stage.frame(elapsed);
                state.render(stage, &frame);
            }
            _ => {}
        }
    }
}

/// Runs the stage until its window is closed.
pub fn run(config: StageConfig) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            web_sys::console::warn_1(&format!("Could not initialize logger: {}", e).into());
        }
    }

    log::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let event_loop: EventLoop<StageEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config)?;

    event_loop.run_app(&mut app)?;

    Ok(())
}
