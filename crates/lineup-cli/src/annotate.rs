//! Face annotation: bounding-box outlines and word-wrapped name labels.
//!
//! The label is wrapped at a character count derived from the face width
//! (`box_width / (font_scale * 10)`), which keeps the rendered line width
//! roughly constant in pixels as the face — and therefore the font — grows.
//! This is the documented heuristic of the original layout; an exact
//! pixel-boundary wrap would measure cumulative glyph widths instead.
//!
//! Each wrapped line gets its own backing plate sized to that line's
//! measured text width, stacked top-to-bottom below the face and centered
//! on the face's horizontal midpoint.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use lineup_core::BoundingBox;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const PLATE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Outline stroke width in pixels.
const OUTLINE_THICKNESS: i32 = 2;
/// Divisor calibrating font scale against face width: scale = width / 200.
const FONT_SCALE_DIVISOR: f32 = 200.0;
/// Wrap width in characters = box_width / (font_scale * WRAP_DIVISOR).
const WRAP_DIVISOR: f32 = 10.0;
/// Pixel height of the label font at scale 1.0.
const BASE_FONT_PX: f32 = 24.0;
/// Vertical gap between the face's bottom edge and the first plate bottom.
const LABEL_OFFSET_Y: i32 = 20;
/// Vertical padding added to the measured text height per line.
const LINE_PADDING: i32 = 10;
/// Text sits this many pixels above the plate's bottom edge.
const TEXT_RAISE: i32 = 5;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("label font not found: {0} — set LINEUP_FONT to a TTF file")]
    FontNotFound(PathBuf),
    #[error("failed to read font {path}: {source}")]
    FontUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    FontInvalid(PathBuf),
}

/// Font scale for a detected face of the given pixel width.
///
/// Monotonic non-decreasing in face width: wider faces get larger labels.
pub fn font_scale(face_width: f32) -> f32 {
    face_width / FONT_SCALE_DIVISOR
}

/// Wrap width in characters for a label box of the given pixel width.
///
/// Shrinks proportionally as the font grows, so the rendered line width in
/// pixels stays roughly constant. Floored at one character.
pub fn wrap_width(box_width: f32, scale: f32) -> usize {
    ((box_width / (scale * WRAP_DIVISOR)) as usize).max(1)
}

/// Greedy word wrap at a character count.
///
/// Words are separated by whitespace; a word longer than the width is
/// broken at the width. Empty input produces no lines.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word;
        loop {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };

            if needed <= width {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                break;
            }

            if current.is_empty() {
                // Over-long word: break it at the wrap width.
                let split_at = word
                    .char_indices()
                    .nth(width)
                    .map(|(i, _)| i)
                    .unwrap_or(word.len());
                let (head, rest) = word.split_at(split_at);
                lines.push(head.to_string());
                word = rest;
                if word.is_empty() {
                    break;
                }
            } else {
                lines.push(std::mem::take(&mut current));
            }
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// One laid-out label line: plate geometry plus the text draw position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLine {
    pub text: String,
    /// Left edge of the backing plate (text draws at the same x).
    pub x: i32,
    /// Top edge of the backing plate.
    pub top: i32,
    /// Plate width: this line's own measured text width.
    pub width: i32,
    /// Plate height: measured text height plus padding.
    pub height: i32,
    /// Top coordinate for the rendered text.
    pub text_y: i32,
}

/// Lay out a label below a face.
///
/// `anchor_x` is the face's horizontal center; `anchor_y` is where the first
/// plate's bottom edge lands. `measure` returns the rendered (width, height)
/// of a line in pixels at the chosen font scale. Lines stack downward, each
/// horizontally centered on the anchor, each plate sized to its own line.
pub fn layout_label<F>(
    text: &str,
    anchor_x: i32,
    anchor_y: i32,
    box_width: f32,
    scale: f32,
    measure: F,
) -> Vec<LabelLine>
where
    F: Fn(&str) -> (u32, u32),
{
    let lines = wrap_text(text, wrap_width(box_width, scale));

    let mut laid_out = Vec::with_capacity(lines.len());
    let mut y = anchor_y;

    for line in lines {
        let (text_width, text_height) = measure(&line);
        let line_height = text_height as i32 + LINE_PADDING;
        let x = anchor_x - text_width as i32 / 2;
        let top = y - line_height;

        laid_out.push(LabelLine {
            text: line,
            x,
            top,
            width: text_width as i32,
            height: line_height,
            text_y: top + TEXT_RAISE,
        });

        y += line_height;
    }

    laid_out
}

/// Draws face annotations with a loaded TTF font.
#[derive(Debug)]
pub struct Annotator {
    font: FontVec,
}

impl Annotator {
    /// Load the label font from a TTF file.
    pub fn load(font_path: &Path) -> Result<Self, AnnotateError> {
        if !font_path.exists() {
            return Err(AnnotateError::FontNotFound(font_path.to_path_buf()));
        }

        let bytes =
            std::fs::read(font_path).map_err(|source| AnnotateError::FontUnreadable {
                path: font_path.to_path_buf(),
                source,
            })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::FontInvalid(font_path.to_path_buf()))?;

        tracing::debug!(path = %font_path.display(), "label font loaded");
        Ok(Self { font })
    }

    /// Draw the bounding-box outline and the name label for one face.
    pub fn annotate(&self, image: &mut RgbImage, bbox: &BoundingBox, name: &str) {
        draw_outline(image, bbox);

        let scale = font_scale(bbox.width);
        let px = PxScale::from(scale * BASE_FONT_PX);

        let anchor_x = (bbox.x + bbox.width / 2.0) as i32;
        let anchor_y = (bbox.y + bbox.height) as i32 + LABEL_OFFSET_Y;

        let lines = layout_label(name, anchor_x, anchor_y, bbox.width, scale, |line| {
            text_size(px, &self.font, line)
        });

        for line in &lines {
            if line.width > 0 && line.height > 0 {
                draw_filled_rect_mut(
                    image,
                    Rect::at(line.x, line.top).of_size(line.width as u32, line.height as u32),
                    PLATE_COLOR,
                );
            }
            draw_text_mut(image, TEXT_COLOR, line.x, line.text_y, px, &self.font, &line.text);
        }
    }
}

/// 2-px rectangle outline, drawn as nested 1-px rectangles.
fn draw_outline(image: &mut RgbImage, bbox: &BoundingBox) {
    let x = bbox.x as i32;
    let y = bbox.y as i32;
    let w = bbox.width as i32;
    let h = bbox.height as i32;

    for i in 0..OUTLINE_THICKNESS {
        let inner_w = w - 2 * i;
        let inner_h = h - 2 * i;
        if inner_w <= 0 || inner_h <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            image,
            Rect::at(x + i, y + i).of_size(inner_w as u32, inner_h as u32),
            BOX_COLOR,
        );
    }
}
