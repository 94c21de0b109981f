use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::data::{DataAttachment, DetectedFormat};
use crate::document::{DocumentBackend, RawBlock, RawLine, RawPage, RawSpan};
use crate::error::{TranslateError, TranslateResult};
use crate::geom::{BBox, PageSize};
use crate::providers::{Provider, ProviderError, ProviderFuture, ProviderResponse};

type Responder = dyn Fn(&StubRequest) -> Result<String, ProviderError> + Send + Sync;

/// Everything a stubbed completion call was given.
#[derive(Debug, Clone, Default)]
pub(crate) struct StubRequest {
    pub(crate) system: Vec<String>,
    pub(crate) user: Vec<String>,
    pub(crate) images: Vec<DataAttachment>,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) timeout: Option<Duration>,
}

#[derive(Clone)]
pub(crate) struct StubProvider {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<StubRequest>>>,
    pending: StubRequest,
    vision: bool,
}

impl StubProvider {
    pub(crate) fn replying<F>(responder: F) -> Self
    where
        F: Fn(&StubRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
            pending: StubRequest::default(),
            vision: true,
        }
    }

    pub(crate) fn without_vision(mut self) -> Self {
        self.vision = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<StubRequest> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Provider for StubProvider {
    fn append_system_input(mut self, input: String) -> Self {
        self.pending.system.push(input);
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.pending.user.push(input);
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.pending.images.push(data);
        self
    }

    fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.pending.max_tokens = Some(max_tokens);
        self
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.pending.timeout = Some(timeout);
        self
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls lock")
                .push(self.pending.clone());
            let text = (self.responder)(&self.pending)?;
            Ok(ProviderResponse {
                text,
                model: Some("stub-model".to_string()),
                usage: None,
            })
        })
    }
}

/// Solid-colour PNG used as a page raster.
pub(crate) fn png_page(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub(crate) fn pixel(png: &[u8], x: u32, y: u32) -> [u8; 3] {
    let image = image::load_from_memory(png).expect("decode png").to_rgb8();
    image.get_pixel(x, y).0
}

/// Document backend serving fixed pages from memory; every upload becomes the same document.
#[derive(Debug, Clone)]
pub(crate) struct FakeBackend {
    pages: Vec<RawPage>,
    rasters: Vec<Vec<u8>>,
    text_layer: bool,
}

impl FakeBackend {
    /// One white raster of `width` x `height` pixels per text page.
    pub(crate) fn new(pages: Vec<RawPage>, width: u32, height: u32) -> Self {
        let rasters = pages
            .iter()
            .map(|_| png_page(width, height, [255, 255, 255]))
            .collect();
        Self {
            pages,
            rasters,
            text_layer: true,
        }
    }

    pub(crate) fn without_text_layer(mut self) -> Self {
        self.text_layer = false;
        self
    }

    fn check_text_layer(&self) -> TranslateResult<()> {
        if self.text_layer {
            Ok(())
        } else {
            Err(TranslateError::extraction("document has no text layer"))
        }
    }
}

impl DocumentBackend for FakeBackend {
    fn normalize(&self, _format: DetectedFormat, bytes: &[u8]) -> TranslateResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn rasterize(&self, _pdf: &[u8], _zoom: f32) -> TranslateResult<Vec<Vec<u8>>> {
        Ok(self.rasters.clone())
    }

    fn read_document(&self, _pdf: &[u8]) -> TranslateResult<Vec<RawPage>> {
        self.check_text_layer()?;
        Ok(self.pages.clone())
    }

    fn read_page(&self, _pdf: &[u8], page: u32) -> TranslateResult<RawPage> {
        self.check_text_layer()?;
        page.checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .cloned()
            .ok_or_else(|| TranslateError::extraction(format!("page {} has no text layer", page)))
    }
}

/// Text-layer page of `width` x `height` points with one single-line block per entry.
pub(crate) fn raw_page(width: f32, height: f32, blocks: &[(BBox, &str)]) -> RawPage {
    RawPage {
        size: PageSize { width, height },
        blocks: blocks
            .iter()
            .map(|(bbox, text)| RawBlock {
                bbox: *bbox,
                lines: vec![RawLine {
                    spans: vec![RawSpan {
                        text: text.to_string(),
                        size: Some(11.0),
                    }],
                }],
            })
            .collect(),
    }
}
