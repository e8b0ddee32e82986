//! Box and label rendering for the annotated output frame.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::AnnotationSettings;
use crate::convert::ReportBox;

const LABEL_HEIGHT_PX: f32 = 16.0;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [203, 56, 255],
];

pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// The input frame, converted to RGB, with the display boxes drawn on it.
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub source_seq: u64,
    pub frame_id: String,
    pub stamp_ms: u64,
    pub boxes_drawn: usize,
}

pub struct Annotator {
    font: Option<FontVec>,
    line_thickness: u32,
    scale: PxScale,
}

impl Annotator {
    pub fn new(settings: &AnnotationSettings) -> Result<Self> {
        let font = match settings.font_path.as_deref() {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("failed to read label font '{}'", path.display()))?;
                let font = FontVec::try_from_vec(bytes)
                    .with_context(|| format!("invalid label font '{}'", path.display()))?;
                Some(font)
            }
            None => None,
        };
        Ok(Self {
            font,
            line_thickness: settings.line_thickness.max(1),
            scale: PxScale::from(LABEL_HEIGHT_PX),
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every box onto `image`. Returns how many boxes were visible.
    pub fn draw(&self, image: &mut RgbImage, boxes: &[ReportBox]) -> usize {
        let mut drawn = 0;
        for b in boxes {
            let Some((x0, y0, x1, y1)) = clip(b, image.width(), image.height()) else {
                continue;
            };
            let color = class_color(b.class_id);
            for inset in 0..self.line_thickness {
                let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
                if 2 * inset >= w || 2 * inset >= h {
                    break;
                }
                let rect = Rect::at((x0 + inset) as i32, (y0 + inset) as i32)
                    .of_size(w - 2 * inset, h - 2 * inset);
                draw_hollow_rect_mut(image, rect, color);
            }
            if let Some(font) = &self.font {
                self.draw_label(image, font, b, x0, y0, color);
            }
            drawn += 1;
        }
        drawn
    }

    fn draw_label(
        &self,
        image: &mut RgbImage,
        font: &FontVec,
        b: &ReportBox,
        x: u32,
        y: u32,
        color: Rgb<u8>,
    ) {
        let text = label_text(b);
        let (tw, th) = text_size(self.scale, font, &text);
        if tw == 0 || th == 0 {
            return;
        }
        // Above the box when there is room, else inside its top edge.
        let top = if y >= th + 2 { y - th - 2 } else { y };
        let background = Rect::at(x as i32, top as i32).of_size(tw + 4, th + 2);
        draw_filled_rect_mut(image, background, color);
        draw_text_mut(
            image,
            LABEL_TEXT,
            x as i32 + 2,
            top as i32,
            self.scale,
            font,
            &text,
        );
    }
}

pub fn label_text(b: &ReportBox) -> String {
    match &b.class_name {
        Some(name) => format!("{} {:.2}", name, b.confidence),
        None => format!("class {} {:.2}", b.class_id, b.confidence),
    }
}

/// Inclusive pixel bounds of `b` inside a `width` x `height` image, if any part is visible.
///
/// Boxes thinner than a pixel still get a one-pixel outline.
fn clip(b: &ReportBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    if !(b.x_min.is_finite() && b.y_min.is_finite() && b.x_max.is_finite() && b.y_max.is_finite())
    {
        return None;
    }
    if b.x_max < b.x_min || b.y_max < b.y_min {
        return None;
    }
    if b.x_max < 0.0 || b.y_max < 0.0 || b.x_min >= width as f32 || b.y_min >= height as f32 {
        return None;
    }
    let x0 = (b.x_min.max(0.0).round() as u32).min(width - 1);
    let y0 = (b.y_min.max(0.0).round() as u32).min(height - 1);
    let x1 = (b.x_max.round() as u32).clamp(x0, width - 1);
    let y1 = (b.y_max.round() as u32).clamp(y0, height - 1);
    Some((x0, y0, x1, y1))
}
