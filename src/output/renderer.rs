use super::OutputError;
use crate::config::RenderConfig;
use crate::segmentation::{Mask, ObjectId};
use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const CONTOUR_EPSILON: f64 = 0.01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutlineError {
    #[error("mask has no outer boundary")]
    NoBoundary,
}

#[derive(Debug, Clone, Copy)]
pub struct Outline {
    pub color: Rgba<u8>,
    pub width: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MaskStyle {
    pub fill: Rgba<u8>,
    pub outline: Option<Outline>,
}

/// Turns boolean masks into RGBA images: `fill` inside the mask, fully
/// transparent outside, optionally traced with the mask's outer contour.
pub struct MaskRenderer {
    frame: MaskStyle,
    preview: MaskStyle,
}

impl MaskRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        let outline = (config.outline_width > 0).then_some(Outline {
            color: Rgba(config.outline),
            width: config.outline_width,
        });
        Self {
            frame: MaskStyle {
                fill: Rgba(config.fill),
                outline,
            },
            preview: MaskStyle {
                fill: Rgba(config.preview_fill),
                outline,
            },
        }
    }

    pub fn render_preview(&self, mask: &Mask, object: ObjectId) -> RgbaImage {
        render(&[(object, mask)], &self.preview)
    }

    /// Render and save a preview next to `base`, suffixed with the frame index.
    pub fn save_preview(
        &self,
        mask: &Mask,
        object: ObjectId,
        base: &Path,
        frame: usize,
    ) -> Result<PathBuf, OutputError> {
        let path = preview_path(base, frame);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        save(&self.render_preview(mask, object), &path)?;
        Ok(path)
    }

    /// Write `output_dir/{index:05}.png` with every object's mask composited.
    ///
    /// Frames without any tracked object produce no file.
    pub fn render_frame(
        &self,
        masks: &BTreeMap<ObjectId, Mask>,
        index: usize,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>, OutputError> {
        let layers: Vec<(ObjectId, &Mask)> = masks.iter().map(|(id, m)| (*id, m)).collect();
        let Some((_, first)) = layers.first() else {
            return Ok(None);
        };
        if layers
            .iter()
            .any(|(_, m)| m.dimensions() != first.dimensions())
        {
            return Err(OutputError::SizeMismatch(index));
        }

        let path = frame_path(output_dir, index);
        save(&render(&layers, &self.frame), &path)?;
        Ok(Some(path))
    }
}

/// `/tmp/preview.png` + frame 3 → `/tmp/preview-00003.png`
fn preview_path(base: &Path, frame: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());
    base.with_file_name(format!("{}-{:05}.png", stem, frame))
}

fn frame_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("{:05}.png", index))
}

fn render(layers: &[(ObjectId, &Mask)], style: &MaskStyle) -> RgbaImage {
    let (width, height) = layers
        .first()
        .map(|(_, m)| m.dimensions())
        .unwrap_or((0, 0));

    let mut canvas = RgbaImage::from_fn(width, height, |x, y| {
        if layers.iter().any(|(_, m)| m.get(x, y)) {
            style.fill
        } else {
            TRANSPARENT
        }
    });

    if let Some(outline) = style.outline {
        for (object, mask) in layers {
            match outer_contours(mask) {
                Ok(polygons) => draw_outline(&mut canvas, &polygons, outline),
                Err(e) => tracing::warn!("Object {}: drawing without outline ({})", object, e),
            }
        }
    }

    canvas
}

/// Outer boundary polygons of the mask, simplified.
fn outer_contours(mask: &Mask) -> Result<Vec<Vec<Point<i32>>>, OutlineError> {
    let (width, height) = mask.dimensions();
    let binary = GrayImage::from_fn(width, height, |x, y| {
        Luma([if mask.get(x, y) { 255 } else { 0 }])
    });

    let polygons: Vec<Vec<Point<i32>>> = find_contours::<i32>(&binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| approximate_polygon_dp(&c.points, CONTOUR_EPSILON, true))
        .filter(|polygon| !polygon.is_empty())
        .collect();

    if polygons.is_empty() {
        return Err(OutlineError::NoBoundary);
    }
    Ok(polygons)
}

fn draw_outline(canvas: &mut RgbaImage, polygons: &[Vec<Point<i32>>], outline: Outline) {
    let low = -((outline.width / 2) as i32);
    let high = ((outline.width.saturating_sub(1)) / 2) as i32;

    for polygon in polygons {
        for (i, start) in polygon.iter().enumerate() {
            let end = polygon[(i + 1) % polygon.len()];
            for dy in low..=high {
                for dx in low..=high {
                    draw_line_segment_mut(
                        canvas,
                        ((start.x + dx) as f32, (start.y + dy) as f32),
                        ((end.x + dx) as f32, (end.y + dy) as f32),
                        outline.color,
                    );
                }
            }
        }
    }
}

fn save(image: &RgbaImage, path: &Path) -> Result<(), OutputError> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| OutputError::Write {
            path: path.to_path_buf(),
            source,
        })
}
