//! Startup configuration.
//!
//! Everything the stage needs to know before the first frame lives in
//! [`StageConfig`]. The defaults reproduce the reference deployment: a dancing
//! character fetched from a fixed URL, shown through a 75° camera at half
//! playback speed. Tests and embedders inject their own values instead of
//! patching literals.

use instant::Duration;

/// The model shown when nothing else is configured.
pub const DEFAULT_ASSET_URL: &str =
    "https://raw.githubusercontent.com/brice913/threejswebflow/main/animationdance.glb";

/// CSS selector of the canvas the web build renders into.
pub const DEFAULT_CANVAS_SELECTOR: &str = "canvas.webgl";

#[derive(Clone, Debug, PartialEq)]
pub struct StageConfig {
    pub asset_url: String,
    pub canvas_selector: String,
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub animation: AnimationConfig,
    pub renderer: RendererSettings,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            asset_url: DEFAULT_ASSET_URL.to_string(),
            canvas_selector: DEFAULT_CANVAS_SELECTOR.to_string(),
            camera: CameraConfig::default(),
            model: ModelConfig::default(),
            animation: AnimationConfig::default(),
            renderer: RendererSettings::default(),
        }
    }
}

impl StageConfig {
    pub fn with_asset_url(mut self, url: impl Into<String>) -> Self {
        self.asset_url = url.into();
        self
    }

    pub fn with_canvas_selector(mut self, selector: impl Into<String>) -> Self {
        self.canvas_selector = selector.into();
        self
    }

    pub fn with_frame_step(mut self, step: FrameStep) -> Self {
        self.animation.step = step;
        self
    }

    pub fn with_renderer(mut self, renderer: RendererSettings) -> Self {
        self.renderer = renderer;
        self
    }
}

/// Perspective camera parameters. Angles are in degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 75.0,
            near: 0.1,
            far: 1000.0,
            position: [0.0, 2.5, 7.0],
        }
    }
}

/// Appearance overrides applied to the model once it has loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    /// Uniform scale of the model root.
    pub scale: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            scale: 3.5,
            roughness: 0.5,
            metalness: 0.5,
            cast_shadow: true,
            receive_shadow: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnimationConfig {
    /// Time scale given to every playback action.
    pub time_scale: f32,
    pub step: FrameStep,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            time_scale: 0.5,
            step: FrameStep::default(),
        }
    }
}

/// How far the mixer advances on each frame.
///
/// `Fixed` ties animation speed to the display refresh rate: a 120 Hz display
/// plays twice as fast as a 60 Hz one. `Elapsed` follows the wall clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameStep {
    Fixed(f32),
    Elapsed,
}

impl Default for FrameStep {
    fn default() -> Self {
        FrameStep::Fixed(0.01)
    }
}

impl FrameStep {
    /// The mixer delta (seconds of animation time) for a frame that took `elapsed`.
    pub fn delta(&self, elapsed: Duration) -> f32 {
        match self {
            FrameStep::Fixed(step) => *step,
            FrameStep::Elapsed => elapsed.as_secs_f32(),
        }
    }
}

/// Filtering applied when sampling the shadow map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowMapKind {
    /// One comparison tap, hard edges.
    Basic,
    /// 3x3 taps.
    Pcf,
    /// 5x5 taps.
    PcfSoft,
}

impl ShadowMapKind {
    /// Kernel radius in texels, as consumed by the model shader.
    pub fn kernel_radius(&self) -> u32 {
        match self {
            ShadowMapKind::Basic => 0,
            ShadowMapKind::Pcf => 1,
            ShadowMapKind::PcfSoft => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowMapSettings {
    pub enabled: bool,
    pub kind: ShadowMapKind,
}

impl Default for ShadowMapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: ShadowMapKind::PcfSoft,
        }
    }
}

/// Output surface settings.
///
/// With `alpha` enabled the surface is composited over the page (or desktop)
/// and the clear colour should be transparent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RendererSettings {
    pub alpha: bool,
    pub clear_colour: wgpu::Color,
    pub shadow_map: ShadowMapSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            alpha: true,
            clear_colour: wgpu::Color::TRANSPARENT,
            shadow_map: ShadowMapSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_scene() {
        let config = StageConfig::default();
        assert_eq!(config.asset_url, DEFAULT_ASSET_URL);
        assert_eq!(config.canvas_selector, "canvas.webgl");
        assert_eq!(config.camera.fov_y_degrees, 75.0);
        assert_eq!(config.camera.position, [0.0, 2.5, 7.0]);
        assert_eq!(config.model.scale, 3.5);
        assert_eq!(config.animation.time_scale, 0.5);
        assert_eq!(config.animation.step, FrameStep::Fixed(0.01));
        assert!(config.renderer.alpha);
        assert_eq!(config.renderer.clear_colour.a, 0.0);
        assert_eq!(config.renderer.shadow_map.kind, ShadowMapKind::PcfSoft);
    }

    #[test]
    fn fixed_step_ignores_wall_clock() {
        let step = FrameStep::Fixed(0.01);
        assert_eq!(step.delta(Duration::from_millis(7)), 0.01);
        assert_eq!(step.delta(Duration::from_secs(3)), 0.01);
    }

    #[test]
    fn elapsed_step_follows_wall_clock() {
        let step = FrameStep::Elapsed;
        assert!((step.delta(Duration::from_millis(250)) - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = StageConfig::default()
            .with_asset_url("assets/test.glb")
            .with_canvas_selector("#stage");
        assert_eq!(config.asset_url, "assets/test.glb");
        assert_eq!(config.canvas_selector, "#stage");
    }
}
