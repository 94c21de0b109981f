//! Document sessions end to end: upload, translate, edit region blocks, preview and export.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::{self, DocumentKind};
use crate::document::{CommandBackend, DocumentBackend, RawPage};
use crate::error::{TranslateError, TranslateResult};
use crate::export::{self, ExportArtifact, ExportMode, ExportPage, Orientation};
use crate::extract::{extract_blocks, extract_page, page_texts};
use crate::geom::{PageSize, PercentRect};
use crate::glossary::Glossary;
use crate::overlay::{BlockSizing, Compositor, encode_png, page_blocks};
use crate::providers::{Provider, ProviderImpl, build_provider};
use crate::region::{self, ClientBlock, RegionBlock, RegionRules};
use crate::session::{
    FileSessionStore, PageTranslation, SessionRecord, SessionStore, new_session_id,
};
use crate::settings::{ExportSettings, Settings, TranslationSettings};
use crate::strategy::{
    PageInput, PageOutput, RegionInput, RegionTranslation, TranslationStrategy,
};
use crate::translator::{CallClass, ConnectivityReport, Translator};

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub file_id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub filename: String,
    pub total: u32,
    /// Page rasters as data URIs.
    pub pages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texts: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    #[serde(flatten)]
    pub translation: PageTranslation,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMarker {
    pub page: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: u32,
    pub translated: usize,
    pub failed: usize,
    pub pages: Vec<PageMarker>,
    /// One preview per page; failed pages show their previous state.
    pub previews: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionResult {
    pub page: u32,
    pub region: PercentRect,
    #[serde(flatten)]
    pub translation: RegionTranslation,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionBlocks {
    pub page: u32,
    pub removed: usize,
    pub region_blocks: Vec<RegionBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub page: u32,
    pub preview: String,
}

/// Service wired to the configured provider, external document tools and on-disk sessions.
pub type AppService = DocumentService<ProviderImpl, CommandBackend, FileSessionStore>;

pub fn open_service(settings: &Settings) -> TranslateResult<AppService> {
    let provider = build_provider(&settings.provider)?;
    let glossary = Arc::new(Glossary::open(settings.glossary_path()));
    let translator = Translator::new(provider, glossary, settings);
    info!(
        "provider {} ready (vision: {})",
        settings.provider.name,
        translator.supports_vision()
    );
    Ok(DocumentService::new(
        translator,
        CommandBackend::default(),
        FileSessionStore::new(&settings.data_dir),
        settings,
    ))
}

struct PageOutcome {
    output: PageOutput,
    size: Option<PageSize>,
}

pub struct DocumentService<P: Provider, B: DocumentBackend, S: SessionStore> {
    translator: Translator<P>,
    backend: B,
    store: S,
    compositor: Compositor,
    translation: TranslationSettings,
    rules: RegionRules,
    export: ExportSettings,
    raster_zoom: f32,
}

impl<P: Provider, B: DocumentBackend, S: SessionStore> DocumentService<P, B, S> {
    pub fn new(translator: Translator<P>, backend: B, store: S, settings: &Settings) -> Self {
        Self {
            translator,
            backend,
            store,
            compositor: Compositor::new(&settings.overlay),
            translation: settings.translation.clone(),
            rules: settings.regions.clone(),
            export: settings.export.clone(),
            raster_zoom: settings.raster_zoom,
        }
    }

    pub fn glossary(&self) -> &Glossary {
        self.translator.glossary()
    }

    pub async fn check_connectivity(&self) -> TranslateResult<ConnectivityReport> {
        self.translator.check_connectivity().await
    }

    /// Normalises the upload to PDF, rasterises every page and opens a session for it.
    pub fn upload(&self, filename: &str, bytes: &[u8]) -> TranslateResult<UploadSummary> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(TranslateError::validation("missing filename"));
        }
        let format = data::detect_document(filename, bytes)?;
        let pdf = self.backend.normalize(format, bytes)?;
        let rasters = self.backend.rasterize(&pdf, self.raster_zoom)?;
        if rasters.is_empty() {
            return Err(TranslateError::extraction(format!(
                "no pages could be rendered from {}",
                filename
            )));
        }
        let text_layer = match self.backend.read_document(&pdf) {
            Ok(pages) => Some(pages),
            Err(err) => {
                warn!("{} has no readable text layer: {}", filename, err);
                None
            }
        };

        let mut record = SessionRecord::new(
            new_session_id(),
            format.kind,
            filename.to_string(),
            rasters.len() as u32,
        );
        record.page_sizes = page_sizes(text_layer.as_deref(), &rasters, self.raster_zoom)?;
        record.texts = text_layer
            .as_ref()
            .map(|pages| pages.iter().map(page_texts).collect());
        self.store.create(&record, &pdf, &rasters)?;
        info!(
            "session {} created for {} ({} pages)",
            record.id, record.filename, record.total
        );

        Ok(UploadSummary {
            file_id: record.id,
            kind: record.kind,
            filename: record.filename,
            total: record.total,
            pages: rasters.iter().map(|raster| data::to_data_uri(raster)).collect(),
            texts: record.texts,
        })
    }

    /// Translates one page and replaces its whole-page result; region blocks stay.
    pub async fn translate_page(
        &self,
        file_id: &str,
        page: u32,
        target_lang: Option<&str>,
    ) -> TranslateResult<PageResult> {
        let mut record = self.store.load(file_id)?;
        record.check_page(page)?;
        let target_lang = self.target_lang(target_lang);
        let outcome = self
            .run_page(&record, page, &target_lang, CallClass::Page)
            .await?;
        self.commit_page(&mut record, page, outcome);
        self.store.save(&record)?;
        info!("session {} page {} translated into {}", file_id, page, target_lang);

        let translation = record.page_mut(page).clone();
        let preview = self.render_preview(&record, page)?;
        Ok(PageResult {
            translation,
            preview,
        })
    }

    /// Translates every page in order. A failed page is reported and keeps its previous state.
    pub async fn translate_all(
        &self,
        file_id: &str,
        target_lang: Option<&str>,
    ) -> TranslateResult<BatchSummary> {
        let mut record = self.store.load(file_id)?;
        let target_lang = self.target_lang(target_lang);
        let mut markers = Vec::new();
        for page in 1..=record.total {
            match self
                .run_page(&record, page, &target_lang, CallClass::Document)
                .await
            {
                Ok(outcome) => {
                    self.commit_page(&mut record, page, outcome);
                    markers.push(PageMarker {
                        page,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!("session {} page {} failed: {}", file_id, page, err);
                    markers.push(PageMarker {
                        page,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        self.store.save(&record)?;

        let previews = (1..=record.total)
            .map(|page| self.render_preview(&record, page))
            .collect::<TranslateResult<Vec<_>>>()?;
        let translated = markers.iter().filter(|marker| marker.success).count();
        info!(
            "session {} translated {}/{} pages",
            file_id, translated, record.total
        );
        Ok(BatchSummary {
            total: record.total,
            translated,
            failed: markers.len() - translated,
            pages: markers,
            previews,
        })
    }

    /// Translates a selected area. Nothing is stored; the caller saves the block it keeps.
    pub async fn translate_region(
        &self,
        file_id: &str,
        page: u32,
        region: PercentRect,
        image: Option<&str>,
        target_lang: Option<&str>,
    ) -> TranslateResult<RegionResult> {
        let record = self.store.load(file_id)?;
        record.check_page(page)?;
        if region.width <= 0.0 || region.height <= 0.0 {
            return Err(TranslateError::validation("selected region is empty"));
        }
        let target_lang = self.target_lang(target_lang);
        let strategy = TranslationStrategy::for_region(
            self.translation.region_strategy,
            self.translator.supports_vision(),
        );

        let input = if strategy.wants_text_layer() {
            let source = self.store.source(file_id)?;
            let raw = self.backend.read_page(&source, page)?;
            RegionInput::TextLayer(blocks_in_region(&raw, region))
        } else {
            let image = match image.filter(|image| !image.trim().is_empty()) {
                Some(image) => data::decode_data_uri(image)?,
                None => crop_region(&self.store.raster(file_id, page)?, region)?,
            };
            debug!("region image of {} bytes on page {}", image.len(), page);
            RegionInput::Image(data::DataAttachment {
                mime: data::image_mime(&image).to_string(),
                bytes: image,
                name: None,
            })
        };
        let translation = strategy
            .translate_region(&self.translator, input, &target_lang)
            .await?;
        Ok(RegionResult {
            page,
            region,
            translation,
        })
    }

    pub fn save_region_block(
        &self,
        file_id: &str,
        page: u32,
        block: RegionBlock,
    ) -> TranslateResult<RegionBlocks> {
        let mut record = self.store.load(file_id)?;
        record.check_page(page)?;
        let entry = record.page_mut(page);
        let before = entry.region_blocks.len();
        region::save(&mut entry.region_blocks, block, &self.rules);
        let removed = before + 1 - entry.region_blocks.len();
        let region_blocks = entry.region_blocks.clone();
        self.store.save(&record)?;
        Ok(RegionBlocks {
            page,
            removed,
            region_blocks,
        })
    }

    /// Removes the blocks at `probe`'s position. A page without blocks is not an error.
    pub fn delete_region_block(
        &self,
        file_id: &str,
        page: u32,
        probe: &RegionBlock,
    ) -> TranslateResult<RegionBlocks> {
        let mut record = self.store.load(file_id)?;
        record.check_page(page)?;
        let Some(entry) = record.translations.get_mut(&page) else {
            return Ok(RegionBlocks {
                page,
                removed: 0,
                region_blocks: Vec::new(),
            });
        };
        let removed = region::delete(&mut entry.region_blocks, probe, &self.rules);
        let region_blocks = entry.region_blocks.clone();
        if removed > 0 {
            self.store.save(&record)?;
        }
        Ok(RegionBlocks {
            page,
            removed,
            region_blocks,
        })
    }

    pub fn preview(&self, file_id: &str, page: u32) -> TranslateResult<Preview> {
        let record = self.store.load(file_id)?;
        record.check_page(page)?;
        Ok(Preview {
            page,
            preview: self.render_preview(&record, page)?,
        })
    }

    /// Builds the export artifact. Client blocks replace stored translations for this call only.
    pub fn export(
        &self,
        file_id: &str,
        mode: ExportMode,
        orientation: Option<Orientation>,
        client_blocks: Option<Vec<ClientBlock>>,
    ) -> TranslateResult<ExportArtifact> {
        let record = self.store.load(file_id)?;
        let client = client_blocks
            .filter(|blocks| !blocks.is_empty())
            .map(region::reorganize_from_client_blocks);
        if let Some(client) = &client {
            for page in client.keys().filter(|page| **page == 0 || **page > record.total) {
                warn!("ignoring client blocks for page {} of {}", page, record.total);
            }
        }

        let mut pages = Vec::new();
        for number in 1..=record.total {
            let raster = self.store.raster(file_id, number)?;
            let size = match record.page_size(number) {
                Some(size) => size,
                None => raster_page_size(&raster, self.raster_zoom)?,
            };
            let translation = match &client {
                Some(client) => client_translation(client, number, size),
                None => record.translations.get(&number).cloned(),
            };
            pages.push(ExportPage {
                number,
                raster,
                size,
                translation,
                from_client: client.is_some(),
            });
        }
        export::export_document(
            &record.filename,
            &pages,
            mode,
            orientation.unwrap_or(self.export.orientation),
            &self.compositor,
            &self.export,
        )
    }

    fn target_lang(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(self.translator.default_target_lang())
            .to_string()
    }

    async fn run_page(
        &self,
        record: &SessionRecord,
        page: u32,
        target_lang: &str,
        class: CallClass,
    ) -> TranslateResult<PageOutcome> {
        let strategy = TranslationStrategy::for_page(
            self.translation.page_strategy,
            self.translator.supports_vision(),
        );
        if strategy.wants_text_layer() {
            let source = self.store.source(&record.id)?;
            let raw = self.backend.read_page(&source, page)?;
            let blocks = extract_page(&raw, page)?;
            debug!("page {}: {} text blocks", page, blocks.len());
            let output = strategy
                .translate_page(&self.translator, PageInput::TextLayer(blocks), target_lang, class)
                .await?;
            Ok(PageOutcome {
                output,
                size: Some(raw.size),
            })
        } else {
            let raster = self.store.raster(&record.id, page)?;
            let output = strategy
                .translate_page(&self.translator, PageInput::Raster(&raster), target_lang, class)
                .await?;
            Ok(PageOutcome {
                output,
                size: record.page_size(page),
            })
        }
    }

    fn commit_page(&self, record: &mut SessionRecord, page: u32, outcome: PageOutcome) {
        let entry = record.page_mut(page);
        match outcome.output {
            PageOutput::Blocks(blocks) => entry.blocks = blocks,
            PageOutput::Regions(regions) => {
                entry.blocks.clear();
                for block in regions {
                    region::save(&mut entry.region_blocks, block, &self.rules);
                }
            }
        }
        if let Some(size) = outcome.size {
            entry.page_width = Some(size.width);
            entry.page_height = Some(size.height);
        }
    }

    fn render_preview(&self, record: &SessionRecord, page: u32) -> TranslateResult<String> {
        let raster = self.store.raster(&record.id, page)?;
        let Some(translation) = record.translations.get(&page) else {
            return Ok(data::to_data_uri(&raster));
        };
        let blocks = page_blocks(translation, record.page_size(page), BlockSizing::Scaled);
        let rendered = self.compositor.composite_or_original(&raster, &blocks);
        Ok(data::to_data_uri(&rendered))
    }
}

fn client_translation(
    client: &BTreeMap<u32, Vec<RegionBlock>>,
    page: u32,
    size: PageSize,
) -> Option<PageTranslation> {
    let region_blocks = client.get(&page)?.clone();
    Some(PageTranslation {
        region_blocks,
        page_width: Some(size.width),
        page_height: Some(size.height),
        ..PageTranslation::empty(page)
    })
}

/// Text-layer size when known, otherwise the raster size scaled back to points.
fn page_sizes(
    text_layer: Option<&[RawPage]>,
    rasters: &[Vec<u8>],
    zoom: f32,
) -> TranslateResult<Vec<PageSize>> {
    rasters
        .iter()
        .enumerate()
        .map(|(index, raster)| {
            let known = text_layer
                .and_then(|pages| pages.get(index))
                .map(|page| page.size)
                .filter(|size| size.width > 0.0 && size.height > 0.0);
            match known {
                Some(size) => Ok(size),
                None => raster_page_size(raster, zoom),
            }
        })
        .collect()
}

fn raster_page_size(raster: &[u8], zoom: f32) -> TranslateResult<PageSize> {
    let image = image::load_from_memory(raster)
        .map_err(|err| TranslateError::extraction(format!("unreadable page image: {}", err)))?;
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };
    Ok(PageSize {
        width: image.width() as f32 / zoom,
        height: image.height() as f32 / zoom,
    })
}

/// Text-layer blocks whose centre lies inside `region`.
fn blocks_in_region(page: &RawPage, region: PercentRect) -> Vec<crate::extract::TextBlock> {
    let area = region.to_surface(page.size.width, page.size.height);
    extract_blocks(page)
        .into_iter()
        .filter(|block| {
            let (x, y) = block.bbox.center();
            area.contains_point(x, y)
        })
        .collect()
}

fn crop_region(raster: &[u8], region: PercentRect) -> TranslateResult<Vec<u8>> {
    let image = image::load_from_memory(raster)
        .map_err(|err| TranslateError::extraction(format!("unreadable page image: {}", err)))?;
    let (width, height) = (image.width(), image.height());
    let rect = region.to_surface(width as f32, height as f32);
    let x0 = rect.x0.floor().max(0.0) as u32;
    let y0 = rect.y0.floor().max(0.0) as u32;
    let x1 = (rect.x1.ceil().max(0.0) as u32).min(width);
    let y1 = (rect.y1.ceil().max(0.0) as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return Err(TranslateError::validation("selected region is empty"));
    }
    let cropped = image.crop_imm(x0, y0, x1 - x0, y1 - y0).to_rgba8();
    Ok(encode_png(cropped)?)
}
