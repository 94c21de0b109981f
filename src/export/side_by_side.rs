use anyhow::{Result, anyhow};
use printpdf::{Color, PdfDocument, Rgb};
use tracing::warn;

use super::{
    ExportPage, Orientation, PdfCanvas, decode_pdf_image, mm, pdf_font, rgb_color, save_pdf,
};
use crate::geom::{BBox, PageSize};
use crate::overlay::{
    Anchor, BlockSizing, Compositor, encode_png, measure_text_width, page_blocks,
};
use crate::settings::ExportSettings;

const LABEL_FONT_SIZE: f32 = 12.0;
const LABEL_BASELINE_INSET: f32 = 8.0;
const FOOTER_FONT_SIZE: f32 = 10.0;
const FOOTER_BASELINE_OFFSET: f32 = 7.0;
const SEPARATOR_GREY: f32 = 0.8;
const SEPARATOR_THICKNESS: f32 = 0.5;

/// Column geometry shared by every output page.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Columns {
    page: PageSize,
    margin: f32,
    gap: f32,
    label_height: f32,
    content_width: f32,
    content_height: f32,
}

impl Columns {
    fn new(page: PageSize, settings: &ExportSettings) -> Self {
        Self {
            page,
            margin: settings.margin,
            gap: settings.gap,
            label_height: settings.label_height,
            content_width: (page.width - settings.margin * 2.0 - settings.gap) / 2.0,
            content_height: page.height - settings.margin * 2.0 - settings.label_height,
        }
    }

    fn left_x(&self) -> f32 {
        self.margin
    }

    fn right_x(&self) -> f32 {
        self.margin + self.content_width + self.gap
    }

    /// Image slot of `width` x `height` pixels centred in the column starting at `column_x`.
    fn image_rect(&self, column_x: f32, width: u32, height: u32) -> BBox {
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        let scale = (self.content_width / width).min(self.content_height / height);
        let (scaled_w, scaled_h) = (width * scale, height * scale);
        let x = column_x + (self.content_width - scaled_w) / 2.0;
        let y = self.margin + self.label_height + (self.content_height - scaled_h) / 2.0;
        BBox::new(x, y, x + scaled_w, y + scaled_h)
    }

    fn separator_x(&self) -> f32 {
        self.margin + self.content_width + self.gap / 2.0
    }
}

/// Original raster on the left, composited translation on the right, one output page per source page.
pub(super) fn render(
    title: &str,
    pages: &[ExportPage],
    orientation: Orientation,
    compositor: &Compositor,
    settings: &ExportSettings,
) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(anyhow!("no pages to export"));
    }
    let columns = Columns::new(orientation.page_size(), settings);
    let (doc, first_page, first_layer) = PdfDocument::new(
        title,
        mm(columns.page.width),
        mm(columns.page.height),
        "Page 1",
    );
    let (font, metrics) = pdf_font(&doc, compositor.font())?;
    let text_color = rgb_color(&compositor.style().text_color, [0.0, 0.0, 0.0]);
    let separator = Color::Rgb(Rgb::new(SEPARATOR_GREY, SEPARATOR_GREY, SEPARATOR_GREY, None));
    let total = pages.len();

    for (idx, page) in pages.iter().enumerate() {
        let (page_index, layer_index) = if idx == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(
                mm(columns.page.width),
                mm(columns.page.height),
                format!("Page {}", idx + 1),
            )
        };
        let canvas = PdfCanvas {
            layer: doc.get_page(page_index).get_layer(layer_index),
            height: columns.page.height,
        };

        let original = decode_pdf_image(&page.raster)?;
        let translated = translated_raster(page, compositor);
        let translated = decode_pdf_image(&translated)?;

        let left = columns.image_rect(columns.left_x(), original.width(), original.height());
        let right = columns.image_rect(columns.right_x(), original.width(), original.height());
        canvas.image(&original, left);
        canvas.image(&translated, right);

        let label_baseline = columns.margin + columns.label_height - LABEL_BASELINE_INSET;
        for (label, column_x) in [
            (&settings.original_label, columns.left_x()),
            (&settings.translated_label, columns.right_x()),
        ] {
            let width = measure_text_width(label, LABEL_FONT_SIZE, metrics);
            let x = column_x + (columns.content_width - width) / 2.0;
            canvas.text(label, LABEL_FONT_SIZE, x, label_baseline, &font, text_color.clone());
        }

        let footer = format!("{} / {}", idx + 1, total);
        let footer_width = measure_text_width(&footer, FOOTER_FONT_SIZE, metrics);
        canvas.text(
            &footer,
            FOOTER_FONT_SIZE,
            (columns.page.width - footer_width) / 2.0,
            columns.page.height - FOOTER_BASELINE_OFFSET,
            &font,
            text_color.clone(),
        );

        canvas.line(
            (columns.separator_x(), columns.margin + columns.label_height),
            (columns.separator_x(), columns.page.height - columns.margin),
            separator.clone(),
            SEPARATOR_THICKNESS,
        );
    }

    save_pdf(doc)
}

/// Raster with every block of the page fitted into its box; the original page when that fails.
fn translated_raster(page: &ExportPage, compositor: &Compositor) -> Vec<u8> {
    let Some(translation) = page.translation.as_ref() else {
        return page.raster.clone();
    };
    let mut blocks = page_blocks(translation, Some(page.size), BlockSizing::Fit);
    if page.from_client {
        blocks.retain(|block| matches!(block.anchor, Anchor::Percent(_)));
    }
    match compositor
        .composite_image(&page.raster, &blocks)
        .and_then(|image| encode_png(image).map_err(Into::into))
    {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("page {} overlay failed, exporting original: {}", page.number, err);
            page.raster.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    #[test]
    fn landscape_columns_split_evenly() {
        let settings = Settings::default().export;
        let columns = Columns::new(Orientation::Landscape.page_size(), &settings);
        assert_eq!(columns.content_width, 396.0);
        assert_eq!(columns.content_height, 530.0);
        assert_eq!(columns.right_x(), 426.0);
        assert_eq!(columns.separator_x(), 421.0);
    }

    #[test]
    fn images_are_scaled_into_their_column() {
        let settings = Settings::default().export;
        let columns = Columns::new(Orientation::Landscape.page_size(), &settings);
        // portrait page raster: height bound
        let rect = columns.image_rect(columns.left_x(), 893, 1263);
        assert!((rect.height() - 530.0).abs() < 1e-3);
        assert!(rect.width() < 396.0);
        assert!((rect.y0 - 45.0).abs() < 1e-3);
        let centre = (rect.x0 + rect.x1) / 2.0;
        assert!((centre - (20.0 + 198.0)).abs() < 1e-3);
    }
}
