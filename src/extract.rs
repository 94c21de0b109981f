use serde::{Deserialize, Serialize};

use crate::document::{RawBlock, RawPage};
use crate::error::{TranslateError, TranslateResult};
use crate::geom::BBox;

pub const DEFAULT_FONT_SIZE: f32 = 12.0;

/// Positioned source text, the unit of translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BBox,
    pub font_size: f32,
}

/// Blocks worth translating, in reading order. Blocks of one character or less are noise.
pub fn extract_blocks(page: &RawPage) -> Vec<TextBlock> {
    page.blocks.iter().filter_map(text_block).collect()
}

/// Like [`extract_blocks`], but an empty page is an extraction failure.
pub fn extract_page(page: &RawPage, page_number: u32) -> TranslateResult<Vec<TextBlock>> {
    let blocks = extract_blocks(page);
    if blocks.is_empty() {
        return Err(TranslateError::extraction(format!(
            "no text detected on page {}",
            page_number
        )));
    }
    Ok(blocks)
}

/// Plain text of every qualifying block, used for the upload summary.
pub fn page_texts(page: &RawPage) -> Vec<String> {
    extract_blocks(page)
        .into_iter()
        .map(|block| block.text)
        .collect()
}

fn text_block(block: &RawBlock) -> Option<TextBlock> {
    let mut text = String::new();
    let mut font_size = None;
    for line in &block.lines {
        for span in &line.spans {
            text.push_str(&span.text);
            if let Some(size) = span.size.filter(|size| *size > 0.0) {
                font_size = Some(size);
            }
        }
        text.push('\n');
    }
    let text = text.trim_end().to_string();
    if text.trim().chars().count() <= 1 {
        return None;
    }
    Some(TextBlock {
        text,
        bbox: block.bbox,
        font_size: font_size.unwrap_or(DEFAULT_FONT_SIZE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{RawLine, RawSpan};
    use crate::geom::PageSize;

    fn block(lines: &[&[(&str, Option<f32>)]]) -> RawBlock {
        RawBlock {
            bbox: BBox::new(10.0, 10.0, 100.0, 40.0),
            lines: lines
                .iter()
                .map(|spans| RawLine {
                    spans: spans
                        .iter()
                        .map(|(text, size)| RawSpan {
                            text: text.to_string(),
                            size: *size,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn page(blocks: Vec<RawBlock>) -> RawPage {
        RawPage {
            size: PageSize {
                width: 595.0,
                height: 842.0,
            },
            blocks,
        }
    }

    #[test]
    fn lines_keep_their_breaks() {
        let raw = page(vec![block(&[
            &[("Quarterly ", Some(14.0)), ("results", Some(14.0))],
            &[("by region  ", Some(11.0))],
        ])]);
        let blocks = extract_blocks(&raw);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Quarterly results\nby region");
        assert_eq!(blocks[0].font_size, 11.0);
    }

    #[test]
    fn short_blocks_are_skipped() {
        let raw = page(vec![
            block(&[&[("7", Some(9.0))]]),
            block(&[&[(" -\n", None)]]),
            block(&[&[("OK", None)]]),
        ]);
        let blocks = extract_blocks(&raw);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "OK");
        assert_eq!(blocks[0].font_size, DEFAULT_FONT_SIZE);
    }

    #[test]
    fn noise_only_page_is_not_a_success() {
        let raw = page(vec![block(&[&[("1", Some(9.0))]]), block(&[&[("•", None)]])]);
        assert!(extract_blocks(&raw).is_empty());
        let err = extract_page(&raw, 3).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert_eq!(err.to_string(), "no text detected on page 3");
    }
}
