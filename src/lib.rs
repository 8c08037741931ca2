use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use web_sys::HtmlCanvasElement;

pub mod api;
pub mod grid;
pub mod randomizer;
pub mod render;
pub mod session;
pub mod shapes;

pub use grid::{Grid, COLS, ROWS};
pub use session::{Action, ActivePiece, GameConfig, ScoreReporter, Session, TickOutcome};
pub use shapes::{Shape, Tetromino};

use api::FetchScoreReporter;
use render::CanvasSurface;

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn log(msg: &str) {
    web_sys::console::log_1(&JsValue::from_str(msg));
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn warn(msg: &str) {
    web_sys::console::warn_1(&JsValue::from_str(msg));
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn log(msg: &str) {
    eprintln!("{}", msg);
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn warn(msg: &str) {
    eprintln!("warning: {}", msg);
}

/// One game session bound to an optional canvas. The host page forwards
/// animation-frame deltas to `tick` and `keydown` keys to `keyDown`.
#[wasm_bindgen]
pub struct GameClient {
    session: Session,
    surface: Option<CanvasSurface>,
}

#[wasm_bindgen]
impl GameClient {
    #[wasm_bindgen(constructor)]
    pub fn new(
        canvas: Option<HtmlCanvasElement>,
        settings: JsValue,
        token: Option<String>,
    ) -> Result<GameClient, JsValue> {
        let config: GameConfig = if settings.is_undefined() || settings.is_null() {
            GameConfig::default()
        } else {
            from_value(settings).unwrap_or_else(|e| {
                warn(&format!("Invalid settings, using defaults: {}", e));
                GameConfig::default()
            })
        };
        let reporter = FetchScoreReporter::new(config.score_endpoint.clone(), token);
        let surface = canvas.map(CanvasSurface::new).transpose()?;
        let mut client = Self {
            session: Session::new(config, Box::new(reporter)),
            surface,
        };
        client.repaint();
        Ok(client)
    }

    #[wasm_bindgen(js_name = tick)]
    pub fn tick(&mut self, dt_ms: f64) -> Result<JsValue, JsValue> {
        self.session.advance(dt_ms);
        self.repaint();
        self.snapshot()
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, key: &str) -> bool {
        let applied = self.session.handle_key(key);
        self.repaint();
        applied
    }

    #[wasm_bindgen(js_name = toggleRunning)]
    pub fn toggle_running(&mut self) {
        self.session.toggle_running();
        self.repaint();
    }

    #[wasm_bindgen(js_name = restart)]
    pub fn restart(&mut self) {
        self.session.restart();
        self.repaint();
    }

    #[wasm_bindgen(js_name = snapshot)]
    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        to_value(&self.session.view()).map_err(|e| e.into())
    }

    fn repaint(&mut self) {
        if !self.session.take_dirty() {
            return;
        }
        if let Some(surface) = self.surface.as_mut() {
            render::draw(&self.session, surface);
        }
    }
}
