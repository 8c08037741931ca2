//! Full-repaint renderer. Nothing is retained between frames: every call
//! resizes the target, clears it and paints the locked cells followed by the
//! visible part of the active piece.

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

use crate::grid::{COLS, ROWS};
use crate::session::Session;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct RenderStyle {
    pub block: u32,
    pub background: String,
    pub locked: String,
    pub active: String,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            block: 20,
            background: "#111".to_string(),
            locked: "#66ccff".to_string(),
            active: "#ffcc66".to_string(),
        }
    }
}

pub trait Surface {
    fn resize(&mut self, width: u32, height: u32);
    fn fill_rect(&mut self, color: &str, x: f64, y: f64, w: f64, h: f64);
}

pub fn draw(session: &Session, surface: &mut dyn Surface) {
    let style = &session.config().style;
    let block = style.block.max(1);
    let width = COLS as u32 * block;
    let height = ROWS as u32 * block;
    let b = block as f64;

    surface.resize(width, height);
    surface.fill_rect(&style.background, 0.0, 0.0, width as f64, height as f64);

    for (y, row) in session.grid().rows().iter().enumerate() {
        for (x, &filled) in row.iter().enumerate() {
            if filled {
                surface.fill_rect(&style.locked, x as f64 * b, y as f64 * b, b - 1.0, b - 1.0);
            }
        }
    }

    if let Some(piece) = session.active() {
        for (gx, gy) in piece.cells() {
            if gy < 0 {
                continue;
            }
            surface.fill_rect(&style.active, gx as f64 * b, gy as f64 * b, b - 1.0, b - 1.0);
        }
    }
}

pub struct CanvasSurface {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
}

impl CanvasSurface {
    pub fn new(canvas: HtmlCanvasElement) -> Result<Self, JsValue> {
        let ctx: CanvasRenderingContext2d = canvas
            .get_context("2d")?
            .ok_or_else(|| JsValue::from_str("canvas has no 2d context"))?
            .dyn_into()?;
        Ok(Self { canvas, ctx })
    }
}

impl Surface for CanvasSurface {
    fn resize(&mut self, width: u32, height: u32) {
        // assigning the same size still clears the canvas
        self.canvas.set_width(width);
        self.canvas.set_height(height);
    }

    fn fill_rect(&mut self, color: &str, x: f64, y: f64, w: f64, h: f64) {
        self.ctx.set_fill_style(&JsValue::from_str(color));
        self.ctx.fill_rect(x, y, w, h);
    }
}
