use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::DataAttachment;
use crate::error::{TranslateError, TranslateResult};
use crate::extract::TextBlock;
use crate::providers::Provider;
use crate::region::RegionBlock;
use crate::session::TranslatedBlock;
use crate::translations::{PageLine, VerticalBand};
use crate::translator::{CallClass, Translator};

const BAND_HEIGHT: f32 = 100.0 / 3.0;
const BAND_MARGIN_X: f32 = 3.0;
const BAND_WIDTH: f32 = 94.0;

/// Configured approach for whole pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStrategy {
    Text,
    Vision,
}

/// Configured approach for user-selected regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStrategy {
    Direct,
    OcrThenTranslate,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStrategy {
    TextBatch,
    VisionOcrThenTranslate,
    VisionDirectTranslate,
}

pub enum PageInput<'a> {
    TextLayer(Vec<TextBlock>),
    Raster(&'a [u8]),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutput {
    Blocks(Vec<TranslatedBlock>),
    Regions(Vec<RegionBlock>),
}

pub enum RegionInput {
    /// Text-layer blocks inside the region.
    TextLayer(Vec<TextBlock>),
    Image(DataAttachment),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionTranslation {
    pub original: String,
    pub translated: String,
}

impl TranslationStrategy {
    pub fn for_page(configured: PageStrategy, vision: bool) -> Self {
        match configured {
            PageStrategy::Text => Self::TextBatch,
            PageStrategy::Vision if vision => Self::VisionDirectTranslate,
            PageStrategy::Vision => {
                warn!("provider has no vision input; translating pages from the text layer");
                Self::TextBatch
            }
        }
    }

    pub fn for_region(configured: RegionStrategy, vision: bool) -> Self {
        match configured {
            RegionStrategy::Text => Self::TextBatch,
            RegionStrategy::Direct if vision => Self::VisionDirectTranslate,
            RegionStrategy::OcrThenTranslate if vision => Self::VisionOcrThenTranslate,
            _ => {
                warn!("provider has no vision input; translating regions from the text layer");
                Self::TextBatch
            }
        }
    }

    pub fn wants_text_layer(self) -> bool {
        self == Self::TextBatch
    }

    pub async fn translate_page<P: Provider>(
        self,
        translator: &Translator<P>,
        input: PageInput<'_>,
        target_lang: &str,
        class: CallClass,
    ) -> TranslateResult<PageOutput> {
        match (self, input) {
            (Self::TextBatch, PageInput::TextLayer(blocks)) => {
                let texts = blocks
                    .iter()
                    .map(|block| block.text.clone())
                    .collect::<Vec<_>>();
                let translated = translator
                    .translate_batch(&texts, target_lang, class)
                    .await?;
                let blocks = blocks
                    .into_iter()
                    .zip(translated)
                    .map(|(block, translated)| TranslatedBlock {
                        original: block.text,
                        translated,
                        bbox: block.bbox,
                        font_size: block.font_size,
                    })
                    .collect();
                Ok(PageOutput::Blocks(blocks))
            }
            (Self::VisionDirectTranslate, PageInput::Raster(raster)) => {
                let lines = translator
                    .translate_page_image(DataAttachment::png(raster.to_vec()), target_lang, class)
                    .await?;
                Ok(PageOutput::Regions(stack_bands(&lines)))
            }
            (Self::VisionOcrThenTranslate, PageInput::Raster(raster)) => {
                let text = translator
                    .transcribe_image(DataAttachment::png(raster.to_vec()), class)
                    .await?;
                if text.is_empty() {
                    return Err(TranslateError::extraction("no text detected on page"));
                }
                let translated = translate_one(translator, text.clone(), target_lang, class).await?;
                let line = PageLine {
                    original: text,
                    translated,
                    band: VerticalBand::Middle,
                };
                Ok(PageOutput::Regions(stack_bands(&[line])))
            }
            (strategy, _) => Err(anyhow!("{:?} was given the wrong page input", strategy).into()),
        }
    }

    pub async fn translate_region<P: Provider>(
        self,
        translator: &Translator<P>,
        input: RegionInput,
        target_lang: &str,
    ) -> TranslateResult<RegionTranslation> {
        let class = CallClass::Region;
        match (self, input) {
            (Self::TextBatch, RegionInput::TextLayer(blocks)) => {
                let original = blocks
                    .into_iter()
                    .map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                if original.trim().is_empty() {
                    return Err(TranslateError::extraction("no text detected in region"));
                }
                let translated = translate_one(translator, original.clone(), target_lang, class).await?;
                Ok(RegionTranslation {
                    original,
                    translated,
                })
            }
            (Self::VisionDirectTranslate, RegionInput::Image(image)) => {
                let parsed = translator
                    .translate_region_image(image, target_lang, class)
                    .await?;
                Ok(RegionTranslation {
                    original: parsed.original().unwrap_or_default().to_string(),
                    translated: parsed.translated().to_string(),
                })
            }
            (Self::VisionOcrThenTranslate, RegionInput::Image(image)) => {
                let original = translator.transcribe_image(image, class).await?;
                if original.is_empty() {
                    return Err(TranslateError::extraction("no text detected in region"));
                }
                debug!("recognised {} chars in region", original.chars().count());
                let translated = translate_one(translator, original.clone(), target_lang, class).await?;
                Ok(RegionTranslation {
                    original,
                    translated,
                })
            }
            (strategy, _) => Err(anyhow!("{:?} was given the wrong region input", strategy).into()),
        }
    }
}

async fn translate_one<P: Provider>(
    translator: &Translator<P>,
    text: String,
    target_lang: &str,
    class: CallClass,
) -> TranslateResult<String> {
    let mut translated = translator
        .translate_batch(&[text], target_lang, class)
        .await?;
    Ok(translated.pop().unwrap_or_default())
}

/// Lays vision lines out top to bottom within their third of the page.
pub fn stack_bands(lines: &[PageLine]) -> Vec<RegionBlock> {
    let mut blocks = Vec::new();
    for (index, band) in [VerticalBand::Top, VerticalBand::Middle, VerticalBand::Bottom]
        .into_iter()
        .enumerate()
    {
        let members = lines
            .iter()
            .filter(|line| line.band == band)
            .collect::<Vec<_>>();
        if members.is_empty() {
            continue;
        }
        let top = BAND_HEIGHT * index as f32;
        let height = BAND_HEIGHT / members.len() as f32;
        for (position, line) in members.into_iter().enumerate() {
            blocks.push(RegionBlock {
                x: BAND_MARGIN_X,
                y: top + height * position as f32,
                width: BAND_WIDTH,
                height,
                text: line.translated.clone(),
            });
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::BBox;
    use crate::glossary::Glossary;
    use crate::settings::Settings;
    use crate::test_util::StubProvider;
    use std::sync::Arc;

    fn translator(provider: StubProvider) -> Translator<StubProvider> {
        Translator::new(provider, Arc::new(Glossary::in_memory()), &Settings::default())
    }

    fn text_block(text: &str) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            bbox: BBox::new(0.0, 0.0, 100.0, 20.0),
            font_size: 11.0,
        }
    }

    #[test]
    fn vision_falls_back_without_vision_input() {
        assert_eq!(
            TranslationStrategy::for_page(PageStrategy::Vision, false),
            TranslationStrategy::TextBatch
        );
        assert_eq!(
            TranslationStrategy::for_page(PageStrategy::Vision, true),
            TranslationStrategy::VisionDirectTranslate
        );
        assert_eq!(
            TranslationStrategy::for_region(RegionStrategy::OcrThenTranslate, true),
            TranslationStrategy::VisionOcrThenTranslate
        );
        assert_eq!(
            TranslationStrategy::for_region(RegionStrategy::Direct, false),
            TranslationStrategy::TextBatch
        );
    }

    #[tokio::test]
    async fn text_batch_keeps_block_geometry() {
        let provider = StubProvider::replying(|_| Ok("标题\n[SEP]\n正文".to_string()));
        let output = TranslationStrategy::TextBatch
            .translate_page(
                &translator(provider),
                PageInput::TextLayer(vec![text_block("Title"), text_block("Body")]),
                "zh",
                CallClass::Page,
            )
            .await
            .unwrap();
        let PageOutput::Blocks(blocks) = output else {
            panic!("expected bbox blocks");
        };
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].original, "Body");
        assert_eq!(blocks[1].translated, "正文");
        assert_eq!(blocks[1].font_size, 11.0);
    }

    #[tokio::test]
    async fn vision_page_lines_become_banded_regions() {
        let provider = StubProvider::replying(|_| {
            Ok("Original: A | Translation: 甲 | Position: top\n\
                Original: B | Translation: 乙 | Position: bottom\n\
                Original: C | Translation: 丙 | Position: bottom"
                .to_string())
        });
        let raster = vec![0u8; 4];
        let output = TranslationStrategy::VisionDirectTranslate
            .translate_page(&translator(provider.clone()), PageInput::Raster(&raster), "zh", CallClass::Page)
            .await
            .unwrap();
        let PageOutput::Regions(regions) = output else {
            panic!("expected region blocks");
        };
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].text, "甲");
        assert_eq!(regions[0].y, 0.0);
        assert!((regions[1].y - 200.0 / 3.0).abs() < 1e-3);
        assert!((regions[2].y - (200.0 / 3.0 + 50.0 / 3.0)).abs() < 1e-3);
        assert_eq!(provider.calls()[0].images.len(), 1);
    }

    #[tokio::test]
    async fn ocr_then_translate_makes_two_calls() {
        let provider = StubProvider::replying(|request| {
            if request.images.is_empty() {
                Ok("吞吐量".to_string())
            } else {
                Ok("Throughput".to_string())
            }
        });
        let result = TranslationStrategy::VisionOcrThenTranslate
            .translate_region(
                &translator(provider.clone()),
                RegionInput::Image(DataAttachment::png(vec![1])),
                "zh",
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            RegionTranslation {
                original: "Throughput".to_string(),
                translated: "吞吐量".to_string(),
            }
        );
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].timeout, Some(std::time::Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn empty_text_region_is_an_extraction_error() {
        let provider = StubProvider::replying(|_| Ok("unused".to_string()));
        let err = TranslationStrategy::TextBatch
            .translate_region(&translator(provider.clone()), RegionInput::TextLayer(Vec::new()), "zh")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(provider.calls().is_empty());
    }
}
