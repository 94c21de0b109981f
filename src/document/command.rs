use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;
use tracing::{debug, info};

use super::{DocumentBackend, RawPage, command_exists, parse_bbox_layout, parse_stext};
use crate::data::{DetectedFormat, DocumentKind, SlideFormat};
use crate::error::{TranslateError, TranslateResult};

const BASE_DPI: f32 = 72.0;

/// Backend driving mupdf/poppler and LibreOffice command-line tools.
#[derive(Debug, Clone, Default)]
pub struct CommandBackend;

impl DocumentBackend for CommandBackend {
    fn normalize(&self, format: DetectedFormat, bytes: &[u8]) -> TranslateResult<Vec<u8>> {
        match format.kind {
            DocumentKind::Pdf => Ok(bytes.to_vec()),
            DocumentKind::Ppt => {
                let extension = match format.slides {
                    Some(SlideFormat::Legacy) => "ppt",
                    _ => "pptx",
                };
                convert_slides_to_pdf(bytes, extension).map_err(|err| {
                    TranslateError::extraction(format!("presentation conversion failed: {:#}", err))
                })
            }
        }
    }

    fn rasterize(&self, pdf: &[u8], zoom: f32) -> TranslateResult<Vec<Vec<u8>>> {
        let pages = render_pdf_pages(pdf, zoom).map_err(|err| {
            TranslateError::extraction(format!("rasterization failed: {:#}", err))
        })?;
        if pages.is_empty() {
            return Err(TranslateError::extraction("document has no pages"));
        }
        Ok(pages)
    }

    fn read_document(&self, pdf: &[u8]) -> TranslateResult<Vec<RawPage>> {
        read_text_layer(pdf, None)
            .map_err(|err| TranslateError::extraction(format!("text extraction failed: {:#}", err)))
    }

    fn read_page(&self, pdf: &[u8], page: u32) -> TranslateResult<RawPage> {
        let pages = read_text_layer(pdf, Some(page)).map_err(|err| {
            TranslateError::extraction(format!("text extraction failed: {:#}", err))
        })?;
        pages
            .into_iter()
            .next()
            .ok_or_else(|| TranslateError::extraction(format!("page {} not found", page)))
    }
}

fn convert_slides_to_pdf(bytes: &[u8], extension: &str) -> Result<Vec<u8>> {
    let office = ["soffice", "libreoffice"]
        .into_iter()
        .find(|cmd| command_exists(cmd))
        .ok_or_else(|| anyhow!("presentation support requires LibreOffice (soffice)"))?;
    let dir = tempdir().with_context(|| "failed to create temp dir for presentation")?;
    let input_path = dir.path().join(format!("input.{}", extension));
    fs::write(&input_path, bytes).with_context(|| "failed to write temp presentation")?;

    info!("converting presentation to pdf with {}", office);
    let output = Command::new(office)
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(dir.path())
        .arg(&input_path)
        .output()
        .with_context(|| format!("failed to run {}", office))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} failed: {}", office, stderr.trim()));
    }
    let pdf_path = dir.path().join("input.pdf");
    fs::read(&pdf_path).with_context(|| "converted pdf not found")
}

fn render_pdf_pages(pdf: &[u8], zoom: f32) -> Result<Vec<Vec<u8>>> {
    let dir = tempdir().with_context(|| "failed to create temp dir for pdf")?;
    let input_path = write_input(dir.path(), pdf)?;
    let dpi = format!("{}", (BASE_DPI * zoom).round() as u32);

    if command_exists("mutool") {
        run(Command::new("mutool")
            .arg("draw")
            .arg("-r")
            .arg(&dpi)
            .arg("-o")
            .arg(dir.path().join("page-%03d.png"))
            .arg(&input_path))?;
    } else if command_exists("pdftoppm") {
        run(Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(&dpi)
            .arg(&input_path)
            .arg(dir.path().join("page")))?;
    } else {
        return Err(anyhow!(
            "pdf rendering requires mutool or pdftoppm (install mupdf or poppler)"
        ));
    }

    let mut entries = fs::read_dir(dir.path())
        .with_context(|| "failed to read temp pdf directory")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_page_png(path))
        .collect::<Vec<_>>();
    entries.sort();

    let mut pages = Vec::with_capacity(entries.len());
    for path in entries {
        pages.push(fs::read(&path).with_context(|| "failed to read rendered pdf page")?);
    }
    debug!("rendered {} pages at {} dpi", pages.len(), dpi);
    Ok(pages)
}

fn read_text_layer(pdf: &[u8], page: Option<u32>) -> Result<Vec<RawPage>> {
    let dir = tempdir().with_context(|| "failed to create temp dir for text layer")?;
    let input_path = write_input(dir.path(), pdf)?;

    if command_exists("mutool") {
        let output_path = dir.path().join("text.stext");
        let mut command = Command::new("mutool");
        command
            .arg("draw")
            .arg("-F")
            .arg("stext")
            .arg("-o")
            .arg(&output_path)
            .arg(&input_path);
        if let Some(page) = page {
            command.arg(page.to_string());
        }
        run(&mut command)?;
        let xml = fs::read(&output_path).with_context(|| "failed to read stext output")?;
        return parse_stext(&xml);
    }

    if command_exists("pdftotext") {
        let output_path = dir.path().join("text.html");
        let mut command = Command::new("pdftotext");
        command.arg("-bbox-layout");
        if let Some(page) = page {
            command
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string());
        }
        command.arg(&input_path).arg(&output_path);
        run(&mut command)?;
        let xml = fs::read(&output_path).with_context(|| "failed to read bbox layout")?;
        return parse_bbox_layout(&xml);
    }

    Err(anyhow!(
        "text extraction requires mutool or pdftotext (install mupdf or poppler)"
    ))
}

fn write_input(dir: &Path, pdf: &[u8]) -> Result<PathBuf> {
    let path = dir.join("input.pdf");
    fs::write(&path, pdf).with_context(|| "failed to write temp pdf")?;
    Ok(path)
}

fn run(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().to_string();
    let output = command
        .output()
        .with_context(|| format!("failed to run {}", program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} failed: {}", program, stderr.trim()));
    }
    Ok(())
}

fn is_page_png(path: &Path) -> bool {
    let is_page = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("page"));
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    is_page && is_png
}
