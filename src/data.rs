use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TranslateError, TranslateResult};

pub const PDF_MIME: &str = "application/pdf";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const PPT_MIME: &str = "application/vnd.ms-powerpoint";
pub const PNG_MIME: &str = "image/png";
pub const ZIP_MIME: &str = "application/zip";
pub const CFB_MIME: &str = "application/x-ole-storage";

#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime: PNG_MIME.to_string(),
            name: None,
        }
    }
}

/// Source document formats accepted on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Ppt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Ppt => "ppt",
        }
    }
}

/// Office flavour of a PPT upload; only the XML variant carries slide text we can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    Pptx,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedFormat {
    pub kind: DocumentKind,
    pub slides: Option<SlideFormat>,
}

pub fn detect_document(filename: &str, bytes: &[u8]) -> TranslateResult<DetectedFormat> {
    if bytes.is_empty() {
        return Err(TranslateError::validation("uploaded file is empty"));
    }
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => return Ok(pdf()),
        Some("pptx") => return Ok(slides(SlideFormat::Pptx)),
        Some("ppt") => return Ok(slides(SlideFormat::Legacy)),
        _ => {}
    }

    match sniff_mime(bytes) {
        Some(PDF_MIME) => Ok(pdf()),
        Some(ZIP_MIME) | Some(PPTX_MIME) if is_pptx_archive(bytes) => {
            Ok(slides(SlideFormat::Pptx))
        }
        Some(PPT_MIME) | Some(CFB_MIME) => Ok(slides(SlideFormat::Legacy)),
        _ => Err(TranslateError::validation(format!(
            "unsupported document format: {}",
            filename
        ))),
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

pub fn image_mime(bytes: &[u8]) -> &'static str {
    match sniff_mime(bytes) {
        Some(mime) if mime.starts_with("image/") => mime,
        _ => PNG_MIME,
    }
}

/// `data:<mime>;base64,...` for an image payload.
pub fn to_data_uri(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", image_mime(bytes), BASE64.encode(bytes))
}

/// Accepts either a data URI or bare base64.
pub fn decode_data_uri(value: &str) -> TranslateResult<Vec<u8>> {
    let value = value.trim();
    let payload = match value.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => value,
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| TranslateError::validation(format!("invalid base64 image: {}", err)))?;
    if bytes.is_empty() {
        return Err(TranslateError::validation("image payload is empty"));
    }
    Ok(bytes)
}

fn is_pptx_archive(bytes: &[u8]) -> bool {
    let Ok(archive) = zip::ZipArchive::new(std::io::Cursor::new(bytes)) else {
        return false;
    };
    archive.file_names().any(|name| name.starts_with("ppt/"))
}

fn pdf() -> DetectedFormat {
    DetectedFormat {
        kind: DocumentKind::Pdf,
        slides: None,
    }
}

fn slides(format: SlideFormat) -> DetectedFormat {
    DetectedFormat {
        kind: DocumentKind::Ppt,
        slides: Some(format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension_first() {
        let detected = detect_document("Deck.PPTX", b"anything").unwrap();
        assert_eq!(detected.kind, DocumentKind::Ppt);
        assert_eq!(detected.slides, Some(SlideFormat::Pptx));
        assert_eq!(
            detect_document("report.pdf", b"x").unwrap().kind,
            DocumentKind::Pdf
        );
    }

    #[test]
    fn sniffs_pdf_without_extension() {
        let detected = detect_document("upload", b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();
        assert_eq!(detected.kind, DocumentKind::Pdf);
    }

    #[test]
    fn data_uris_decode_with_or_without_header() {
        assert_eq!(decode_data_uri("data:image/png;base64,AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_data_uri("AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_data_uri("data:image/png;base64,").is_err());
        assert!(decode_data_uri("%%%").is_err());
    }

    #[test]
    fn rejects_empty_and_unknown_uploads() {
        assert!(matches!(
            detect_document("a.pdf", b""),
            Err(TranslateError::Validation(_))
        ));
        assert!(matches!(
            detect_document("notes.txt", b"plain text"),
            Err(TranslateError::Validation(_))
        ));
    }
}
