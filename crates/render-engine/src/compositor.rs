//! Device frame compositor.
//!
//! Wraps a still capture in a device-style bezel. Geometry is a fixed
//! fraction of the image's longer side, so framing is deterministic for a
//! given image size and style.

use std::io::Cursor;
use std::str::FromStr;

use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tabsnap_common::error::{TabsnapError, TabsnapResult};

const BEZEL: Rgba<u8> = Rgba([17, 17, 20, 255]);
const BORDER: Rgba<u8> = Rgba([58, 58, 64, 255]);
const PILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Which bezel to draw around a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStyle {
    #[default]
    None,
    Phone,
    Tablet,
}

impl FrameStyle {
    pub const ALL: [FrameStyle; 3] = [FrameStyle::None, FrameStyle::Phone, FrameStyle::Tablet];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Phone => "phone",
            Self::Tablet => "tablet",
        }
    }

    /// (padding, corner radius) as fractions of the longer image side.
    fn proportions(self) -> Option<(f64, f64)> {
        match self {
            Self::None => None,
            Self::Phone => Some((0.04, 0.12)),
            Self::Tablet => Some((0.06, 0.05)),
        }
    }
}

impl std::fmt::Display for FrameStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameStyle {
    type Err = TabsnapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "phone" => Ok(Self::Phone),
            "tablet" => Ok(Self::Tablet),
            other => Err(TabsnapError::config(format!(
                "unknown frame style '{other}' (expected none, phone, or tablet)"
            ))),
        }
    }
}

/// Axis-aligned box in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where everything goes for one framed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub padding: u32,
    pub corner_radius: u32,
    pub border: u32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Camera-island decoration, phone only.
    pub pill: Option<PixelRect>,
}

/// Layout for framing a `width`×`height` image, or `None` for no frame.
pub fn frame_geometry(width: u32, height: u32, style: FrameStyle) -> Option<FrameGeometry> {
    let (pad_frac, radius_frac) = style.proportions()?;
    let longest = width.max(height) as f64;
    let padding = (longest * pad_frac).round().max(1.0) as u32;
    let corner_radius = (longest * radius_frac).round() as u32;
    let border = (padding as f64 * 0.15).round().max(1.0) as u32;
    let canvas_width = width + 2 * padding;
    let canvas_height = height + 2 * padding;

    let pill = (style == FrameStyle::Phone).then(|| {
        let pill_width = ((canvas_width as f64 * 0.3).round() as u32).max(1);
        let pill_height = ((padding as f64 * 0.8).round() as u32).max(1);
        PixelRect {
            x: (canvas_width - pill_width) / 2,
            y: (padding - pill_height.min(padding)) / 2,
            width: pill_width,
            height: pill_height,
        }
    });

    Some(FrameGeometry {
        padding,
        corner_radius,
        border,
        canvas_width,
        canvas_height,
        pill,
    })
}

/// Frame an encoded image and re-encode it as PNG.
///
/// `FrameStyle::None` returns the input bytes untouched.
pub fn compose_frame(image_bytes: &[u8], style: FrameStyle) -> TabsnapResult<Vec<u8>> {
    if style == FrameStyle::None {
        return Ok(image_bytes.to_vec());
    }
    let source = image::load_from_memory(image_bytes)?.to_rgba8();
    let framed = compose_image(&source, style);

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(framed).write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    tracing::debug!(style = %style, bytes = out.len(), "Framed screenshot");
    Ok(out)
}

/// Frame decoded pixels. The source is left untouched.
pub fn compose_image(source: &RgbaImage, style: FrameStyle) -> RgbaImage {
    let (width, height) = source.dimensions();
    let Some(geometry) = frame_geometry(width, height, style) else {
        return source.clone();
    };

    let mut canvas = RgbaImage::new(geometry.canvas_width, geometry.canvas_height);
    let full = PixelRect {
        x: 0,
        y: 0,
        width: geometry.canvas_width,
        height: geometry.canvas_height,
    };
    fill_rounded_rect(&mut canvas, full, geometry.corner_radius, BORDER);

    let inset = geometry.border.min(geometry.padding);
    let inner = PixelRect {
        x: inset,
        y: inset,
        width: geometry.canvas_width - 2 * inset,
        height: geometry.canvas_height - 2 * inset,
    };
    fill_rounded_rect(
        &mut canvas,
        inner,
        geometry.corner_radius.saturating_sub(inset),
        BEZEL,
    );

    imageops::overlay(
        &mut canvas,
        source,
        geometry.padding as i64,
        geometry.padding as i64,
    );

    if let Some(pill) = geometry.pill {
        fill_rounded_rect(&mut canvas, pill, pill.height / 2, PILL);
    }
    canvas
}

fn fill_rounded_rect(canvas: &mut RgbaImage, area: PixelRect, radius: u32, color: Rgba<u8>) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let r = radius.min((area.width - 1) / 2).min((area.height - 1) / 2) as i64;
    let (left, top) = (area.x as i64, area.y as i64);
    let right = (left + area.width as i64).min(canvas.width() as i64) - 1;
    let bottom = (top + area.height as i64).min(canvas.height() as i64) - 1;
    let (full_right, full_bottom) = (
        left + area.width as i64 - 1,
        top + area.height as i64 - 1,
    );

    for y in top..=bottom {
        let cy = y.clamp(top + r, full_bottom - r);
        for x in left..=right {
            // Nearest point on the inner rectangle; corners are quarter circles.
            let cx = x.clamp(left + r, full_right - r);
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r * r {
                canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}
