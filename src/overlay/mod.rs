//! Paints translated text over whited-out source regions.

use anyhow::Context;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use usvg::fontdb;

use crate::data;
use crate::error::{TranslateError, TranslateResult};
use crate::geom::PageSize;
use crate::session::PageTranslation;
use crate::settings::OverlaySettings;

mod font;
mod layout;
mod render;

pub use font::{FontMetrics, ResolvedFont, measure_text_width, resolve_font};
pub use layout::{
    Anchor, FontSizing, LayoutParams, OverlayBlock, PlacedLine, PlacedText, choose_fit_size,
    place_block, wrap_chars,
};
pub use render::OverlayStyle;

/// How bbox-anchored blocks pick their font size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSizing {
    /// Follow the source font size, as in live previews.
    Scaled,
    /// Shrink to fit the box, as in side-by-side pages.
    Fit,
}

/// Collects a page's bbox blocks followed by its region blocks, in stored order.
pub fn page_blocks(
    translation: &PageTranslation,
    fallback_size: Option<PageSize>,
    sizing: BlockSizing,
) -> Vec<OverlayBlock> {
    let mut blocks = Vec::new();
    let page_size = translation.page_size().or(fallback_size);
    match page_size {
        Some(page) => {
            for block in &translation.blocks {
                blocks.push(OverlayBlock {
                    text: block.translated.clone(),
                    anchor: Anchor::Document {
                        bbox: block.bbox,
                        page,
                    },
                    sizing: match sizing {
                        BlockSizing::Scaled => FontSizing::Scaled {
                            source_size: block.font_size,
                        },
                        BlockSizing::Fit => FontSizing::Fit,
                    },
                });
            }
        }
        None if !translation.blocks.is_empty() => {
            warn!(
                "page {} has no document size; skipping {} bbox blocks",
                translation.page,
                translation.blocks.len()
            );
        }
        None => {}
    }
    for region in &translation.region_blocks {
        blocks.push(OverlayBlock {
            text: region.text.clone(),
            anchor: Anchor::Percent(region.rect()),
            sizing: FontSizing::Fit,
        });
    }
    blocks
}

/// Renders overlay blocks onto page rasters.
pub struct Compositor {
    params: LayoutParams,
    style: OverlayStyle,
    font: Option<ResolvedFont>,
    fontdb: Arc<fontdb::Database>,
}

impl Compositor {
    pub fn new(settings: &OverlaySettings) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let font = match resolve_font(
            &db,
            settings.font_path.as_deref().map(Path::new),
            settings.font_family.as_deref(),
            &settings.font_fallbacks,
        ) {
            Ok(font) => {
                debug!("overlay font: {}", font.family);
                Some(font)
            }
            Err(err) => {
                warn!("overlay font unavailable, using estimated metrics: {:#}", err);
                None
            }
        };
        if let Some(font) = &font {
            db.load_font_data(font.metrics.data().to_vec());
        }
        let style = OverlayStyle {
            fill_color: settings.fill_color.clone(),
            text_color: settings.text_color.clone(),
            font_family: font_stack(font.as_ref(), &settings.font_fallbacks),
        };
        Self {
            params: LayoutParams::from(settings),
            style,
            font,
            fontdb: Arc::new(db),
        }
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn font(&self) -> Option<&FontMetrics> {
        self.font.as_ref().map(|font| &font.metrics)
    }

    pub fn measure(&self, text: &str, font_size: f32) -> f32 {
        measure_text_width(text, font_size, self.font())
    }

    pub fn layout(&self, blocks: &[OverlayBlock], width: f32, height: f32) -> Vec<PlacedText> {
        blocks
            .iter()
            .filter_map(|block| {
                place_block(block, width, height, &self.params, |text, size| {
                    self.measure(text, size)
                })
            })
            .collect()
    }

    pub fn composite_image(
        &self,
        image: &[u8],
        blocks: &[OverlayBlock],
    ) -> TranslateResult<image::RgbaImage> {
        let decoded = image::load_from_memory(image)
            .map_err(|err| TranslateError::composition(format!("unreadable page image: {}", err)))?;
        let (width, height) = (decoded.width(), decoded.height());
        if blocks.is_empty() {
            return Ok(decoded.to_rgba8());
        }
        let placed = self.layout(blocks, width as f32, height as f32);
        let svg = render::render_svg(
            image,
            data::image_mime(image),
            width,
            height,
            &placed,
            &self.style,
        );
        render::rasterize_svg(&svg, self.fontdb.clone())
            .map_err(|err| TranslateError::composition(format!("{:#}", err)))
    }

    /// PNG of `image` with `blocks` painted over it.
    pub fn composite(&self, image: &[u8], blocks: &[OverlayBlock]) -> TranslateResult<Vec<u8>> {
        let rendered = self.composite_image(image, blocks)?;
        encode_png(rendered).map_err(|err| TranslateError::composition(format!("{:#}", err)))
    }

    /// Like [`Compositor::composite`], but hands back the untouched image on failure.
    pub fn composite_or_original(&self, image: &[u8], blocks: &[OverlayBlock]) -> Vec<u8> {
        match self.composite(image, blocks) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("overlay failed, returning original page: {}", err);
                image.to_vec()
            }
        }
    }
}

pub fn encode_png(image: image::RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode overlay image")?;
    Ok(bytes)
}

fn font_stack(font: Option<&ResolvedFont>, fallbacks: &[String]) -> String {
    let mut families = Vec::new();
    if let Some(font) = font {
        families.push(font.family.clone());
    }
    families.extend(fallbacks.iter().cloned());
    if !families.iter().any(|family| family == "sans-serif") {
        families.push("sans-serif".to_string());
    }
    families
        .into_iter()
        .map(|family| {
            if family.contains(' ') {
                format!("'{}'", family)
            } else {
                family
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{BBox, PercentRect};
    use crate::region::RegionBlock;
    use crate::session::TranslatedBlock;
    use crate::settings::Settings;
    use crate::test_util::{pixel, png_page};

    fn compositor() -> Compositor {
        Compositor::new(&Settings::default().overlay)
    }

    #[test]
    fn region_is_whited_out_and_rest_untouched() {
        let page = png_page(200, 100, [200, 0, 0]);
        let blocks = vec![OverlayBlock {
            text: "译文".to_string(),
            anchor: Anchor::Percent(PercentRect::new(10.0, 10.0, 50.0, 50.0)),
            sizing: FontSizing::Fit,
        }];
        let output = compositor().composite(&page, &blocks).unwrap();
        assert_eq!(pixel(&output, 19, 9), [255, 255, 255]);
        assert_eq!(pixel(&output, 121, 61), [255, 255, 255]);
        assert_eq!(pixel(&output, 190, 90), [200, 0, 0]);
    }

    #[test]
    fn corrupt_image_falls_back_to_original() {
        let compositor = compositor();
        let blocks = vec![OverlayBlock {
            text: "x".to_string(),
            anchor: Anchor::Percent(PercentRect::new(0.0, 0.0, 10.0, 10.0)),
            sizing: FontSizing::Fit,
        }];
        let err = compositor.composite(b"not an image", &blocks).unwrap_err();
        assert_eq!(err.kind(), "composition");
        assert_eq!(
            compositor.composite_or_original(b"not an image", &blocks),
            b"not an image".to_vec()
        );
    }

    #[test]
    fn page_blocks_unions_both_lists() {
        let translation = PageTranslation {
            page: 1,
            blocks: vec![TranslatedBlock {
                original: "Hello".to_string(),
                translated: "你好".to_string(),
                bbox: BBox::new(0.0, 0.0, 50.0, 20.0),
                font_size: 12.0,
            }],
            region_blocks: vec![RegionBlock {
                x: 50.0,
                y: 50.0,
                width: 10.0,
                height: 10.0,
                text: "区域".to_string(),
            }],
            page_width: Some(595.0),
            page_height: Some(842.0),
        };
        let blocks = page_blocks(&translation, None, BlockSizing::Scaled);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].sizing, FontSizing::Scaled { source_size: 12.0 });
        assert_eq!(blocks[1].anchor, Anchor::Percent(PercentRect::new(50.0, 50.0, 10.0, 10.0)));

        let without_size = PageTranslation {
            page_width: None,
            page_height: None,
            ..translation
        };
        assert_eq!(page_blocks(&without_size, None, BlockSizing::Fit).len(), 1);
    }

    #[test]
    fn font_stack_quotes_multi_word_names() {
        let stack = font_stack(None, &["Noto Sans CJK SC".to_string(), "PingFang SC".to_string()]);
        assert_eq!(stack, "'Noto Sans CJK SC', 'PingFang SC', sans-serif");
    }
}
