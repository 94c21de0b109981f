//! Final PDF artifacts built from session state.

use anyhow::{Context, Result, anyhow};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocumentReference,
    PdfLayerReference, Point, Polygon, PolygonMode, Rgb, WindingOrder,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::PDF_MIME;
use crate::error::{TranslateError, TranslateResult};
use crate::geom::{BBox, PageSize};
use crate::overlay::{Compositor, FontMetrics, PlacedText};
use crate::session::PageTranslation;
use crate::settings::ExportSettings;

mod filename;
mod overlay_only;
mod side_by_side;

pub use filename::{content_disposition, export_filename};

const A4_LONG_PT: f32 = 842.0;
const A4_SHORT_PT: f32 = 595.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// A4 in points.
    pub fn page_size(self) -> PageSize {
        match self {
            Orientation::Landscape => PageSize {
                width: A4_LONG_PT,
                height: A4_SHORT_PT,
            },
            Orientation::Portrait => PageSize {
                width: A4_SHORT_PT,
                height: A4_LONG_PT,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    #[default]
    #[serde(alias = "overlay", alias = "overlay_only")]
    TranslationOnly,
    SideBySide,
}

impl ExportMode {
    fn filename_suffix(self) -> &'static str {
        match self {
            ExportMode::TranslationOnly => "_translated",
            ExportMode::SideBySide => "_sidebyside",
        }
    }
}

/// One source page with the translation to apply to it.
#[derive(Debug, Clone)]
pub struct ExportPage {
    pub number: u32,
    pub raster: Vec<u8>,
    /// Source page size in points.
    pub size: PageSize,
    pub translation: Option<PageTranslation>,
    /// Client-supplied blocks replace the stored bbox blocks entirely.
    pub from_client: bool,
}

#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_disposition: String,
    pub mime: &'static str,
    pub page_count: usize,
}

pub fn export_document(
    source_filename: &str,
    pages: &[ExportPage],
    mode: ExportMode,
    orientation: Orientation,
    compositor: &Compositor,
    settings: &ExportSettings,
) -> TranslateResult<ExportArtifact> {
    let translated = pages
        .iter()
        .filter_map(|page| page.translation.as_ref())
        .any(|translation| !translation.is_empty());
    if !translated {
        return Err(TranslateError::validation("translate the document first"));
    }

    let title = export_filename(source_filename, mode);
    let bytes = match mode {
        ExportMode::TranslationOnly => overlay_only::render(&title, pages, compositor)?,
        ExportMode::SideBySide => {
            side_by_side::render(&title, pages, orientation, compositor, settings)?
        }
    };
    info!(
        "exported {} pages as {:?} ({} bytes)",
        pages.len(),
        mode,
        bytes.len()
    );
    Ok(ExportArtifact {
        bytes,
        content_disposition: content_disposition(&title),
        filename: title,
        mime: PDF_MIME,
        page_count: pages.len(),
    })
}

fn mm(pt: f32) -> Mm {
    Mm(pt * 25.4 / 72.0)
}

/// Parses `#rrggbb`, falling back to `fallback` for anything else.
fn rgb_color(hex: &str, fallback: [f32; 3]) -> Color {
    let [r, g, b] = parse_hex(hex).unwrap_or(fallback);
    Color::Rgb(Rgb::new(r, g, b, None))
}

fn parse_hex(hex: &str) -> Option<[f32; 3]> {
    let hex = hex.trim().strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(hex.get(range)?, 16)
            .ok()
            .map(|value| value as f32 / 255.0)
    };
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

/// Embeds the overlay font when it is a single TrueType face.
fn embedded_font<'a>(
    doc: &PdfDocumentReference,
    font: Option<&'a FontMetrics>,
) -> Option<(IndirectFontRef, &'a FontMetrics)> {
    let metrics = font.filter(|metrics| metrics.is_single_face())?;
    match doc.add_external_font(metrics.data()) {
        Ok(font_ref) => Some((font_ref, metrics)),
        Err(err) => {
            warn!("failed to embed overlay font: {}", err);
            None
        }
    }
}

/// The embedded overlay font, or Helvetica for Latin-only furniture such as labels.
fn pdf_font<'a>(
    doc: &PdfDocumentReference,
    font: Option<&'a FontMetrics>,
) -> Result<(IndirectFontRef, Option<&'a FontMetrics>)> {
    if let Some((font_ref, metrics)) = embedded_font(doc, font) {
        return Ok((font_ref, Some(metrics)));
    }
    let builtin = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| anyhow!("failed to add builtin font: {}", err))?;
    Ok((builtin, None))
}

fn decode_pdf_image(bytes: &[u8]) -> Result<printpdf::image_crate::DynamicImage> {
    let image = printpdf::image_crate::load_from_memory(bytes)
        .with_context(|| "failed to decode page image")?;
    Ok(printpdf::image_crate::DynamicImage::ImageRgb8(
        image.to_rgb8(),
    ))
}

fn save_pdf(doc: PdfDocumentReference) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer).with_context(|| "failed to write pdf")?;
    }
    Ok(buffer)
}

/// Drawing surface in top-left-origin points over one PDF page.
struct PdfCanvas {
    layer: PdfLayerReference,
    height: f32,
}

impl PdfCanvas {
    fn point(&self, x: f32, y: f32) -> (Point, bool) {
        (Point::new(mm(x), mm(self.height - y)), false)
    }

    fn image(&self, image: &printpdf::image_crate::DynamicImage, rect: BBox) {
        let width = image.width().max(1) as f32;
        let height = image.height().max(1) as f32;
        let transform = ImageTransform {
            translate_x: Some(mm(rect.x0)),
            translate_y: Some(mm(self.height - rect.y1)),
            rotate: None,
            scale_x: Some(rect.width() / width),
            scale_y: Some(rect.height() / height),
            dpi: Some(72.0),
        };
        Image::from_dynamic_image(image).add_to_layer(self.layer.clone(), transform);
    }

    fn fill_rect(&self, rect: BBox, color: Color) {
        self.layer.set_fill_color(color);
        self.layer.add_polygon(Polygon {
            rings: vec![vec![
                self.point(rect.x0, rect.y0),
                self.point(rect.x1, rect.y0),
                self.point(rect.x1, rect.y1),
                self.point(rect.x0, rect.y1),
            ]],
            mode: PolygonMode::Fill,
            winding_order: WindingOrder::NonZero,
        });
    }

    fn line(&self, from: (f32, f32), to: (f32, f32), color: Color, thickness: f32) {
        self.layer.set_outline_color(color);
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(Line {
            points: vec![self.point(from.0, from.1), self.point(to.0, to.1)],
            is_closed: false,
        });
    }

    /// `baseline` is measured from the top of the page.
    fn text(&self, text: &str, size: f32, x: f32, baseline: f32, font: &IndirectFontRef, color: Color) {
        self.layer.set_fill_color(color);
        self.layer
            .use_text(text, size, mm(x), mm(self.height - baseline), font);
    }

    fn placed_text(&self, placed: &PlacedText, font: &IndirectFontRef, color: &Color) {
        for line in &placed.lines {
            self.text(
                &line.text,
                placed.font_size,
                line.x,
                line.top + placed.font_size,
                font,
                color.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_orientation_sizes() {
        assert_eq!(
            Orientation::Landscape.page_size(),
            PageSize {
                width: 842.0,
                height: 595.0
            }
        );
        assert_eq!(Orientation::Portrait.page_size().width, 595.0);
    }

    #[test]
    fn export_mode_accepts_client_spellings() {
        let mode: ExportMode = serde_json::from_str("\"side_by_side\"").unwrap();
        assert_eq!(mode, ExportMode::SideBySide);
        let mode: ExportMode = serde_json::from_str("\"translation_only\"").unwrap();
        assert_eq!(mode, ExportMode::TranslationOnly);
        let mode: ExportMode = serde_json::from_str("\"overlay\"").unwrap();
        assert_eq!(mode, ExportMode::TranslationOnly);
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex("#ff0000"), Some([1.0, 0.0, 0.0]));
        assert_eq!(parse_hex("white"), None);
        assert_eq!(parse_hex("#fff"), None);
    }

    #[test]
    fn canvas_draws_filled_boxes_and_lines() {
        let (doc, page, layer) = printpdf::PdfDocument::new("boxes", mm(200.0), mm(100.0), "Page 1");
        let canvas = PdfCanvas {
            layer: doc.get_page(page).get_layer(layer),
            height: 100.0,
        };
        canvas.fill_rect(
            BBox::new(10.0, 10.0, 90.0, 40.0),
            rgb_color("#ffffff", [1.0, 1.0, 1.0]),
        );
        canvas.line((100.0, 0.0), (100.0, 100.0), rgb_color("#cccccc", [0.8, 0.8, 0.8]), 0.5);

        let bytes = save_pdf(doc).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
