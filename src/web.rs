//! Browser glue for the WASM build: the target canvas, the page viewport and
//! the window resize listener.

use anyhow::{Context, anyhow};
use wasm_bindgen::{JsCast, prelude::Closure};
use web_sys::HtmlCanvasElement;
use winit::event_loop::EventLoopProxy;

use crate::{flow::StageEvent, stage::Viewport};

fn window() -> anyhow::Result<web_sys::Window> {
    web_sys::window().context("No global window")
}

/// The first element matching `selector`, which has to be a canvas.
pub fn canvas(selector: &str) -> anyhow::Result<HtmlCanvasElement> {
    let document = window()?.document().context("No document")?;
    let element = document
        .query_selector(selector)
        .map_err(|e| anyhow!("Invalid selector {}: {:?}", selector, e))?
        .with_context(|| format!("No element matches {}", selector))?;
    element
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| anyhow!("{} is not a canvas", selector))
}

/// Inner size of the browser window in physical pixels.
pub fn viewport() -> anyhow::Result<Viewport> {
    let window = window()?;
    let dimension = |value: Result<wasm_bindgen::JsValue, wasm_bindgen::JsValue>| {
        value
            .ok()
            .and_then(|value| value.as_f64())
            .context("Window size is not a number")
    };
    let width = dimension(window.inner_width())?;
    let height = dimension(window.inner_height())?;
    let scale_factor = window.device_pixel_ratio();
    Ok(Viewport::new(
        (width * scale_factor).round() as u32,
        (height * scale_factor).round() as u32,
        scale_factor,
    ))
}

/// Sends a [`StageEvent::ViewportChanged`] whenever the browser window is
/// resized. The listener lives as long as the page.
pub fn on_resize(proxy: EventLoopProxy<StageEvent>) -> anyhow::Result<()> {
    let listener = Closure::<dyn FnMut()>::new(move || match viewport() {
        Ok(viewport) => {
            if proxy.send_event(StageEvent::ViewportChanged(viewport)).is_err() {
                log::warn!("Resize after the event loop closed");
            }
        }
        Err(e) => log::warn!("Cannot read the viewport: {:#}", e),
    });
    window()?
        .add_event_listener_with_callback("resize", listener.as_ref().unchecked_ref())
        .map_err(|e| anyhow!("Cannot listen for resize: {:?}", e))?;
    listener.forget();
    Ok(())
}

/// Resolves `url` against the page location, the way `fetch` would.
pub fn absolute_url(url: &str) -> anyhow::Result<String> {
    let href = window()?
        .location()
        .href()
        .map_err(|e| anyhow!("Cannot read the page location: {:?}", e))?;
    let base = reqwest::Url::parse(&href).with_context(|| format!("Invalid page URL {}", href))?;
    let joined = base
        .join(url)
        .with_context(|| format!("Cannot resolve {} against {}", url, href))?;
    Ok(joined.to_string())
}
