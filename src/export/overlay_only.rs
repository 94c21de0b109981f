use anyhow::{Context, Result, anyhow};
use printpdf::PdfDocument;
use tracing::info;

use super::{ExportPage, PdfCanvas, decode_pdf_image, embedded_font, mm, rgb_color, save_pdf};
use crate::geom::BBox;
use crate::overlay::{
    Anchor, Compositor, FontSizing, OverlayBlock, measure_text_width, place_block,
};
use crate::session::PageTranslation;

const BBOX_FONT_FACTOR: f32 = 0.9;
const BBOX_FONT_MIN: f32 = 8.0;
const BBOX_FONT_MAX: f32 = 14.0;
const REGION_FONT_SIZE: f32 = 10.0;

/// Source pages at their own size with an opaque box and a text run per translated block.
///
/// Without an embeddable overlay font the blocks are composited into the page raster instead,
/// since the builtin PDF fonts carry no CJK glyphs.
pub(super) fn render(title: &str, pages: &[ExportPage], compositor: &Compositor) -> Result<Vec<u8>> {
    let first = pages.first().ok_or_else(|| anyhow!("no pages to export"))?;
    let (doc, first_page, first_layer) = PdfDocument::new(
        title,
        mm(first.size.width),
        mm(first.size.height),
        "Page 1",
    );
    let font = embedded_font(&doc, compositor.font());
    if font.is_none() {
        info!("no embeddable overlay font; flattening translated pages");
    }
    let params = compositor.params();
    let style = compositor.style();
    let fill = rgb_color(&style.fill_color, [1.0, 1.0, 1.0]);
    let text_color = rgb_color(&style.text_color, [0.0, 0.0, 0.0]);

    for (idx, page) in pages.iter().enumerate() {
        let (page_index, layer_index) = if idx == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(
                mm(page.size.width),
                mm(page.size.height),
                format!("Page {}", page.number),
            )
        };
        let canvas = PdfCanvas {
            layer: doc.get_page(page_index).get_layer(layer_index),
            height: page.size.height,
        };
        let blocks = page
            .translation
            .as_ref()
            .map(|translation| document_blocks(translation, page))
            .unwrap_or_default();
        let full_page = BBox::new(0.0, 0.0, page.size.width, page.size.height);

        let Some((font_ref, metrics)) = font.as_ref() else {
            let flattened = flatten_page(page, &blocks, compositor)?;
            canvas.image(&decode_pdf_image(&flattened)?, full_page);
            continue;
        };
        canvas.image(&decode_pdf_image(&page.raster)?, full_page);
        for block in &blocks {
            let Some(placed) = place_block(
                block,
                page.size.width,
                page.size.height,
                params,
                |text, size| measure_text_width(text, size, Some(*metrics)),
            ) else {
                continue;
            };
            canvas.fill_rect(placed.target, fill.clone());
            canvas.placed_text(&placed, font_ref, &text_color);
        }
    }

    save_pdf(doc)
}

/// Page raster with `blocks` painted in, their point sizes scaled to raster pixels.
fn flatten_page(page: &ExportPage, blocks: &[OverlayBlock], compositor: &Compositor) -> Result<Vec<u8>> {
    if blocks.is_empty() {
        return Ok(page.raster.clone());
    }
    let raster = image::load_from_memory(&page.raster)
        .with_context(|| format!("failed to decode page {} image", page.number))?;
    let scale = raster.width() as f32 / page.size.width.max(1.0);
    let scaled: Vec<OverlayBlock> = blocks
        .iter()
        .cloned()
        .map(|mut block| {
            if let FontSizing::Fixed(size) = block.sizing {
                block.sizing = FontSizing::Fixed(size * scale);
            }
            block
        })
        .collect();
    Ok(compositor.composite_or_original(&page.raster, &scaled))
}

/// Stored bbox blocks unless the client overrode the page, then every region block.
fn document_blocks(translation: &PageTranslation, page: &ExportPage) -> Vec<OverlayBlock> {
    let mut blocks = Vec::new();
    if !page.from_client {
        let source = translation.page_size().unwrap_or(page.size);
        for block in &translation.blocks {
            blocks.push(OverlayBlock {
                text: block.translated.clone(),
                anchor: Anchor::Document {
                    bbox: block.bbox,
                    page: source,
                },
                sizing: FontSizing::Fixed(bbox_font_size(block.font_size)),
            });
        }
    }
    for region in &translation.region_blocks {
        blocks.push(OverlayBlock {
            text: region.text.clone(),
            anchor: Anchor::Percent(region.rect()),
            sizing: FontSizing::Fixed(REGION_FONT_SIZE),
        });
    }
    blocks
}

fn bbox_font_size(source: f32) -> f32 {
    (source * BBOX_FONT_FACTOR).clamp(BBOX_FONT_MIN, BBOX_FONT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::PageSize;
    use crate::region::RegionBlock;
    use crate::session::TranslatedBlock;
    use crate::settings::Settings;
    use crate::test_util::{pixel, png_page};

    fn page(from_client: bool) -> ExportPage {
        ExportPage {
            number: 1,
            raster: Vec::new(),
            size: PageSize {
                width: 595.0,
                height: 842.0,
            },
            translation: Some(PageTranslation {
                page: 1,
                blocks: vec![TranslatedBlock {
                    original: "Revenue".to_string(),
                    translated: "收入".to_string(),
                    bbox: BBox::new(10.0, 10.0, 100.0, 30.0),
                    font_size: 20.0,
                }],
                region_blocks: vec![RegionBlock {
                    x: 10.0,
                    y: 50.0,
                    width: 30.0,
                    height: 10.0,
                    text: "备注".to_string(),
                }],
                page_width: Some(595.0),
                page_height: Some(842.0),
            }),
            from_client,
        }
    }

    #[test]
    fn stored_pages_draw_both_lists() {
        let page = page(false);
        let blocks = document_blocks(page.translation.as_ref().unwrap(), &page);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].sizing, FontSizing::Fixed(14.0));
        assert_eq!(blocks[1].sizing, FontSizing::Fixed(10.0));
    }

    #[test]
    fn client_pages_draw_only_region_blocks() {
        let page = page(true);
        let blocks = document_blocks(page.translation.as_ref().unwrap(), &page);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "备注");
    }

    #[test]
    fn bbox_font_is_clamped() {
        assert_eq!(bbox_font_size(4.0), 8.0);
        assert_eq!(bbox_font_size(30.0), 14.0);
        assert!((bbox_font_size(12.0) - 10.8).abs() < 1e-4);
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn cjk_export_with_default_settings_avoids_builtin_fonts() {
        let compositor = Compositor::new(&Settings::default().overlay);
        let mut page = page(false);
        page.raster = png_page(595, 842, [200, 200, 200]);

        let bytes = render("deck_translated.pdf", &[page], &compositor).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!contains(&bytes, b"/Helvetica"));
    }

    #[test]
    fn flattened_pages_white_out_blocks_at_raster_scale() {
        let compositor = Compositor::new(&Settings::default().overlay);
        let mut page = page(false);
        // raster at twice the page size in points
        page.raster = png_page(1190, 1684, [200, 200, 200]);
        let blocks = document_blocks(page.translation.as_ref().unwrap(), &page);

        let flattened = flatten_page(&page, &blocks, &compositor).unwrap();
        assert_eq!(pixel(&flattened, 190, 55), [255, 255, 255]);
        assert_eq!(pixel(&flattened, 600, 300), [200, 200, 200]);
    }

    #[test]
    fn untranslated_pages_keep_their_raster() {
        let compositor = Compositor::new(&Settings::default().overlay);
        let mut page = page(false);
        page.raster = png_page(20, 20, [10, 20, 30]);
        assert_eq!(flatten_page(&page, &[], &compositor).unwrap(), page.raster);
    }
}
