use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub mod batch;
pub mod data;
pub mod document;
pub mod error;
pub mod export;
pub mod extract;
pub mod geom;
pub mod glossary;
pub mod logging;
pub mod overlay;
pub mod providers;
pub mod region;
pub mod server;
pub mod service;
pub mod session;
pub mod settings;
pub mod strategy;
pub mod translations;
pub mod translator;

#[cfg(test)]
mod test_util;

pub use error::{TranslateError, TranslateResult};
pub use export::{ExportMode, Orientation};
pub use providers::{Claude, OpenAI, Provider, ProviderKind, ProviderUsage};
pub use service::{AppService, BatchSummary, DocumentService, open_service};
pub use translator::Translator;

/// One-shot translation of a document file into an exported PDF.
#[derive(Debug, Clone)]
pub struct TranslateJob {
    pub input: PathBuf,
    /// Defaults to the export filename next to the input.
    pub output: Option<PathBuf>,
    pub target_lang: Option<String>,
    pub mode: ExportMode,
    pub orientation: Option<Orientation>,
}

#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    pub output: PathBuf,
    pub summary: BatchSummary,
}

pub async fn run_translate(
    settings: &settings::Settings,
    job: TranslateJob,
) -> Result<TranslateOutcome> {
    let bytes = fs::read(&job.input)
        .with_context(|| format!("failed to read {}", job.input.display()))?;
    let filename = job
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid input path: {}", job.input.display()))?;

    let service = open_service(settings)?;
    let upload = service.upload(filename, &bytes)?;
    info!("{}: {} pages", filename, upload.total);
    let summary = service
        .translate_all(&upload.file_id, job.target_lang.as_deref())
        .await?;
    for marker in summary.pages.iter().filter(|marker| !marker.success) {
        warn!(
            "page {} left untranslated: {}",
            marker.page,
            marker.error.as_deref().unwrap_or("unknown error")
        );
    }

    let artifact = service.export(&upload.file_id, job.mode, job.orientation, None)?;
    let output = job
        .output
        .unwrap_or_else(|| job.input.with_file_name(&artifact.filename));
    fs::write(&output, &artifact.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(TranslateOutcome { output, summary })
}
