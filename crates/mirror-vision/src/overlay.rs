//! Per-frame box overlay. Stateless: detections in, drawing commands out.

use image::{Rgba, RgbaImage};
use serde::Deserialize;

use crate::preprocess::ScaleRatios;
use crate::{ClassCatalog, Detection};

pub const PALETTE: [&str; 20] = [
    "#FF3838", "#FF9D97", "#FF701F", "#FFB21D", "#CFD231",
    "#48F90A", "#92CC17", "#3DDB86", "#1A9334", "#00D4BB",
    "#2C99A8", "#00C2FF", "#344593", "#6473FF", "#0018EC",
    "#8438FF", "#520085", "#CB38FF", "#FF95C8", "#FF37C7",
];

const FILL_ALPHA: f32 = 0.2;
// no font metrics here; average glyph width relative to the font size
const GLYPH_WIDTH: f32 = 0.6;

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Boxes whose display-space area is not above this are not drawn.
    #[serde(default = "default_min_area")]
    pub min_area: f32,
    #[serde(default = "default_canvas")]
    pub canvas_width: u32,
    #[serde(default = "default_canvas")]
    pub canvas_height: u32,
    /// Write the latest overlay here as PNG (optional).
    pub output_path: Option<String>,
}

fn default_min_area() -> f32 { 5000.0 }
fn default_canvas() -> u32 { 640 }

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_area: default_min_area(),
            canvas_width: default_canvas(),
            canvas_height: default_canvas(),
            output_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub rgb: [u8; 3],
    pub alpha: f32,
}

impl Color {
    pub const WHITE: Color = Color { rgb: [255, 255, 255], alpha: 1.0 };

    pub fn with_alpha(self, alpha: f32) -> Self {
        Self { alpha, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    FillRect { x: f32, y: f32, w: f32, h: f32, color: Color },
    StrokeRect { x: f32, y: f32, w: f32, h: f32, color: Color, line_width: f32 },
    Text { x: f32, y: f32, text: String, color: Color, font_px: u32 },
}

pub fn hex_to_rgb(hex: &str) -> Option<[u8; 3]> {
    let h = hex.strip_prefix('#').unwrap_or(hex);
    if h.len() != 6 {
        return None;
    }
    let p = |i: usize| u8::from_str_radix(h.get(i..i + 2)?, 16).ok();
    Some([p(0)?, p(2)?, p(4)?])
}

/// Same class, same color, for the whole session.
pub fn color_for(class_index: usize) -> Color {
    let rgb = hex_to_rgb(PALETTE[class_index % PALETTE.len()]).unwrap_or([255, 255, 255]);
    Color { rgb, alpha: 1.0 }
}

pub fn label(class_name: &str, score: f32) -> String {
    format!("{} - {:.1}%", class_name, score * 100.0)
}

pub fn render(dets: &[Detection], ratios: ScaleRatios, catalog: &ClassCatalog, cfg: &OverlayConfig) -> Vec<DrawCommand> {
    let (cw, ch) = (cfg.canvas_width as f32, cfg.canvas_height as f32);
    let font_px = ((cw.max(ch) / 40.0).round() as u32).max(14);
    let line_width = (cw.min(ch) / 200.0).max(2.5);

    let mut cmds = vec![DrawCommand::Clear];
    for d in dets {
        let x1 = d.bbox.x1 * ratios.x;
        let x2 = d.bbox.x2 * ratios.x;
        let y1 = d.bbox.y1 * ratios.y;
        let y2 = d.bbox.y2 * ratios.y;
        let (w, h) = (x2 - x1, y2 - y1);
        if !(w * h > cfg.min_area) {
            continue;
        }

        let color = color_for(d.class_index);
        let text = label(catalog.name(d.class_index).unwrap_or("?"), d.score);
        let text_w = text.chars().count() as f32 * font_px as f32 * GLYPH_WIDTH;
        let y_text = (y1 - (font_px as f32 + line_width)).max(0.0);

        cmds.push(DrawCommand::FillRect { x: x1, y: y1, w, h, color: color.with_alpha(FILL_ALPHA) });
        cmds.push(DrawCommand::StrokeRect { x: x1, y: y1, w, h, color, line_width });
        cmds.push(DrawCommand::FillRect {
            x: x1 - 1.0,
            y: y_text,
            w: text_w + line_width,
            h: font_px as f32 + line_width,
            color,
        });
        cmds.push(DrawCommand::Text { x: x1 - 1.0, y: y_text, text, color: Color::WHITE, font_px });
    }
    cmds
}

/// Rasterize boxes onto a transparent canvas. There is no font here, so a
/// label (its background tab and its text) is left to the real display
/// surface.
pub fn rasterize(cmds: &[DrawCommand], width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::new(width, height);
    let mut iter = cmds.iter().peekable();
    while let Some(cmd) = iter.next() {
        match cmd {
            DrawCommand::Clear => img.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0])),
            DrawCommand::FillRect { .. } if matches!(iter.peek(), Some(DrawCommand::Text { .. })) => {}
            DrawCommand::FillRect { x, y, w, h, color } => fill(&mut img, *x, *y, *x + *w, *y + *h, *color),
            DrawCommand::StrokeRect { x, y, w, h, color, line_width } => {
                let half = line_width / 2.0;
                let (x2, y2) = (*x + *w, *y + *h);
                fill(&mut img, x - half, y - half, x2 + half, y + half, *color);
                fill(&mut img, x - half, y2 - half, x2 + half, y2 + half, *color);
                fill(&mut img, x - half, y + half, x + half, y2 - half, *color);
                fill(&mut img, x2 - half, y + half, x2 + half, y2 - half, *color);
            }
            DrawCommand::Text { .. } => {}
        }
    }
    img
}

fn fill(img: &mut RgbaImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Color) {
    let clamp_x = |v: f32| v.round().clamp(0.0, img.width() as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, img.height() as f32) as u32;
    let (xa, xb, ya, yb) = (clamp_x(x1), clamp_x(x2), clamp_y(y1), clamp_y(y2));
    let a = color.alpha.clamp(0.0, 1.0);
    for y in ya..yb {
        for x in xa..xb {
            let p = img.get_pixel_mut(x, y);
            let dst_a = p[3] as f32 / 255.0;
            let out_a = a + dst_a * (1.0 - a);
            for c in 0..3 {
                let src = color.rgb[c] as f32 * a;
                let dst = p[c] as f32 * dst_a * (1.0 - a);
                p[c] = if out_a > 0.0 { ((src + dst) / out_a).round() as u8 } else { 0 };
            }
            p[3] = (out_a * 255.0).round() as u8;
        }
    }
}
