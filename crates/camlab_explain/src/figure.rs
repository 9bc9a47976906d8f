//! Saliency figures: three aligned rows per target layer.
//!
//! Row 0 holds the inputs, row 1 the grayscale saliency maps and row 2 the
//! jet overlays. Figures are data; [`SaliencyFigure::save`] draws them with
//! plotters into a PNG titled with the method and layer, with row names on
//! the left and each column's label above it, plus a JSON caption sidecar.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cam::CamMethod;
use crate::error::{ExplainError, Result};
use crate::image::{resize_bilinear, RgbImage};
use crate::target::TargetSpec;

/// Row names, top to bottom.
pub const FIGURE_ROWS: [&str; 3] = ["input", "saliency", "overlay"];

const PADDING: u32 = 4;
const TITLE_HEIGHT: u32 = 28;
const LABEL_HEIGHT: u32 = 18;
const ROW_TITLE_WIDTH: u32 = 72;
const FONT: &str = "sans-serif";

/// Pixel geometry of a rendered figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    width: u32,
    height: u32,
    cell_w: u32,
    cell_h: u32,
    scale: u32,
}

impl Layout {
    /// Top-left corner of the cell at `(row, column)`.
    fn cell_origin(&self, row: usize, column: usize) -> (i32, i32) {
        let x = ROW_TITLE_WIDTH + PADDING + column as u32 * (self.cell_w + PADDING);
        let y = TITLE_HEIGHT + LABEL_HEIGHT + PADDING + row as u32 * (self.cell_h + PADDING);
        (x as i32, y as i32)
    }
}

fn render_error(e: impl std::fmt::Display) -> ExplainError {
    ExplainError::Render(e.to_string())
}

/// One column of a figure.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureColumn {
    /// Dataset index of the sample.
    pub sample_index: usize,
    /// Explained target.
    pub target: TargetSpec,
    /// Ground-truth label, when shown.
    pub label: Option<String>,
    /// Gray input at input resolution.
    pub input: Array2<f32>,
    /// Saliency map at layer resolution.
    pub map: Array2<f32>,
    /// Overlay at input resolution.
    pub overlay: RgbImage,
}

/// Saliency figure for one target layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyFigure {
    /// Target layer name.
    pub layer: String,
    /// Attribution method.
    pub method: CamMethod,
    /// Columns, left to right.
    pub columns: Vec<FigureColumn>,
}

/// Caption of one figure column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCaption {
    /// Column position.
    pub column: usize,
    /// Dataset index of the sample.
    pub sample_index: usize,
    /// Explained target.
    pub target: TargetSpec,
    /// Ground-truth label, when shown.
    pub label: Option<String>,
}

/// JSON sidecar of a figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureCaptions {
    /// Target layer name.
    pub layer: String,
    /// Attribution method name.
    pub method: String,
    /// Row names, top to bottom.
    pub rows: Vec<String>,
    /// Saliency map resolution `(h, w)`.
    pub map_shape: (usize, usize),
    /// Per-column captions.
    pub columns: Vec<ColumnCaption>,
}

impl SaliencyFigure {
    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Saliency maps, left to right.
    pub fn maps(&self) -> impl Iterator<Item = &Array2<f32>> {
        self.columns.iter().map(|c| &c.map)
    }

    /// Column labels; `None` where labels are hidden or unknown.
    pub fn labels(&self) -> Vec<Option<&str>> {
        self.columns.iter().map(|c| c.label.as_deref()).collect()
    }

    /// Caption sidecar.
    pub fn captions(&self) -> FigureCaptions {
        FigureCaptions {
            layer: self.layer.clone(),
            method: self.method.to_string(),
            rows: FIGURE_ROWS.iter().map(|r| r.to_string()).collect(),
            map_shape: self.columns.first().map(|c| c.map.dim()).unwrap_or_default(),
            columns: self
                .columns
                .iter()
                .enumerate()
                .map(|(column, c)| ColumnCaption {
                    column,
                    sample_index: c.sample_index,
                    target: c.target,
                    label: c.label.clone(),
                })
                .collect(),
        }
    }

    fn layout(&self, scale: usize) -> Result<Layout> {
        let first = self
            .columns
            .first()
            .ok_or_else(|| ExplainError::InvalidOption("figure has no columns".to_string()))?;
        let scale = scale.max(1) as u32;
        let (in_h, in_w) = first.input.dim();
        let (cell_h, cell_w) = (in_h as u32 * scale, in_w as u32 * scale);
        let n_columns = self.columns.len() as u32;
        let n_rows = FIGURE_ROWS.len() as u32;
        Ok(Layout {
            width: ROW_TITLE_WIDTH + PADDING + n_columns * (cell_w + PADDING),
            height: TITLE_HEIGHT + LABEL_HEIGHT + PADDING + n_rows * (cell_h + PADDING),
            cell_w,
            cell_h,
            scale,
        })
    }

    /// Figure title, `<method> @ <layer>`.
    pub fn title(&self) -> String {
        format!("{} @ {}", self.method, self.layer)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, layout: &Layout) -> Result<()> {
        root.fill(&WHITE).map_err(render_error)?;

        for (i, column) in self.columns.iter().enumerate() {
            let map = resize_bilinear(
                column.map.view(),
                layout.cell_h as usize,
                layout.cell_w as usize,
            )?;
            let cells = [
                (RgbImage::from_gray(column.input.view()), layout.scale),
                (RgbImage::from_gray(map.view()), 1),
                (column.overlay.clone(), layout.scale),
            ];
            for (row, (cell, pixel)) in cells.iter().enumerate() {
                draw_cell(root, cell, layout.cell_origin(row, i), *pixel)?;
            }
        }

        let mut texts = vec![(self.title(), (PADDING as i32, PADDING as i32), 18.0)];
        for (row, name) in FIGURE_ROWS.iter().enumerate() {
            let (_, y) = layout.cell_origin(row, 0);
            let y = y + layout.cell_h as i32 / 2 - 6;
            texts.push((name.to_string(), (PADDING as i32, y), 13.0));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(label) = &column.label {
                let (x, _) = layout.cell_origin(0, i);
                texts.push((label.clone(), (x, (TITLE_HEIGHT + 2) as i32), 12.0));
            }
        }

        // Text needs a system font; the pixel rows are complete without it.
        let failures = texts
            .into_iter()
            .filter_map(|(text, pos, size)| {
                let style = (FONT, size).into_font().color(&BLACK);
                root.draw(&Text::new(text, pos, style)).err()
            })
            .map(|e| e.to_string())
            .collect::<Vec<_>>();
        if let Some(first) = failures.first() {
            tracing::warn!(
                figure = %self.title(),
                n_failed = failures.len(),
                error = %first,
                "Figure text could not be drawn"
            );
        }
        Ok(())
    }

    /// Render the figure into an in-memory RGB raster.
    ///
    /// Cells are the input resolution times `scale`. Saliency maps are
    /// upsampled bilinearly to the cell size.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty figure or a failed draw.
    pub fn render(&self, scale: usize) -> Result<RgbImage> {
        let layout = self.layout(scale)?;
        let mut buffer = vec![0u8; layout.width as usize * layout.height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (layout.width, layout.height))
                .into_drawing_area();
            self.draw(&root, &layout)?;
            root.present().map_err(render_error)?;
        }
        RgbImage::from_raw(layout.width as usize, layout.height as usize, buffer)
    }

    /// Write the figure as a PNG file.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty figure or if the file cannot be written.
    pub fn write_png(&self, path: impl AsRef<Path>, scale: usize) -> Result<()> {
        let layout = self.layout(scale)?;
        let root = BitMapBackend::new(path.as_ref(), (layout.width, layout.height))
            .into_drawing_area();
        self.draw(&root, &layout)?;
        root.present().map_err(render_error)?;
        Ok(())
    }

    /// Write the caption sidecar as pretty JSON.
    pub fn write_captions(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.captions())?;
        Ok(())
    }

    /// File stem used by [`save`](Self::save): `<method>_<layer>`.
    pub fn file_stem(&self) -> String {
        let layer: String = self
            .layer
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
            .collect();
        let method = self.method.name().replace('+', "p");
        format!("{}_{}", method, layer)
    }

    /// Write `<stem>.png` and `<stem>.json` into `dir`, returning both paths.
    pub fn save(&self, dir: impl AsRef<Path>, scale: usize) -> Result<(PathBuf, PathBuf)> {
        let stem = self.file_stem();
        let image_path = dir.as_ref().join(format!("{}.png", stem));
        let captions_path = dir.as_ref().join(format!("{}.json", stem));
        self.write_png(&image_path, scale)?;
        self.write_captions(&captions_path)?;
        tracing::debug!(path = %image_path.display(), "Wrote saliency figure");
        Ok((image_path, captions_path))
    }
}

/// Draw `image` with its top-left corner at `origin`, each source pixel
/// covering a `pixel`×`pixel` square.
fn draw_cell<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    image: &RgbImage,
    origin: (i32, i32),
    pixel: u32,
) -> Result<()> {
    let pixel = pixel.max(1) as usize;
    for y in 0..image.height() * pixel {
        for x in 0..image.width() * pixel {
            if let Some([r, g, b]) = image.pixel(x / pixel, y / pixel) {
                let pos = (origin.0 + x as i32, origin.1 + y as i32);
                root.draw_pixel(pos, &RGBColor(r, g, b)).map_err(render_error)?;
            }
        }
    }
    Ok(())
}
