use serde::{Deserialize, Serialize};

use crate::export::{ExportMode, Orientation};
use crate::geom::PercentRect;
use crate::region::{ClientBlock, RegionBlock};

const DEFAULT_PAGE: u32 = 1;

fn default_page() -> u32 {
    DEFAULT_PAGE
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct UploadRequest {
    pub(crate) filename: String,
    pub(crate) data_base64: String,
}

/// Target language either named directly or as an `en2zh` / `zh2en` direction.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct LanguageChoice {
    pub(crate) target_lang: Option<String>,
    pub(crate) direction: Option<String>,
}

impl LanguageChoice {
    pub(crate) fn resolve(&self) -> Result<Option<String>, String> {
        if let Some(lang) = self.target_lang.as_deref().map(str::trim)
            && !lang.is_empty()
        {
            return Ok(Some(lang.to_string()));
        }
        match self.direction.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(direction) => match direction.split_once('2') {
                Some((source, target)) if !source.is_empty() && !target.is_empty() => {
                    Ok(Some(target.to_string()))
                }
                _ => Err(format!("invalid direction '{}'", direction)),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageRequest {
    #[serde(default)]
    pub(crate) file_id: String,
    #[serde(default = "default_page")]
    pub(crate) page: u32,
    #[serde(flatten)]
    pub(crate) language: LanguageChoice,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentRequest {
    #[serde(default)]
    pub(crate) file_id: String,
    #[serde(flatten)]
    pub(crate) language: LanguageChoice,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegionRequest {
    #[serde(default)]
    pub(crate) file_id: String,
    #[serde(default = "default_page")]
    pub(crate) page: u32,
    pub(crate) region: Option<PercentRect>,
    /// Cropped image as a data URI; the stored page raster is cropped when absent.
    pub(crate) image: Option<String>,
    #[serde(flatten)]
    pub(crate) language: LanguageChoice,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockRequest {
    #[serde(default)]
    pub(crate) file_id: String,
    #[serde(default = "default_page")]
    pub(crate) page: u32,
    pub(crate) block: Option<RegionBlock>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewQuery {
    #[serde(default)]
    pub(crate) file_id: String,
    #[serde(default = "default_page")]
    pub(crate) page: u32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct ExportRequest {
    pub(crate) file_id: String,
    pub(crate) mode: Option<ExportMode>,
    pub(crate) orientation: Option<Orientation>,
    /// Client-adjusted positions; replaces stored translations for this export.
    pub(crate) translation_blocks: Option<Vec<ClientBlock>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) success: bool,
    pub(crate) error: String,
    pub(crate) kind: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(target_lang: Option<&str>, direction: Option<&str>) -> LanguageChoice {
        LanguageChoice {
            target_lang: target_lang.map(str::to_string),
            direction: direction.map(str::to_string),
        }
    }

    #[test]
    fn direction_names_the_target_language() {
        assert_eq!(choice(None, Some("en2zh")).resolve(), Ok(Some("zh".to_string())));
        assert_eq!(choice(None, Some("zh2en")).resolve(), Ok(Some("en".to_string())));
        assert_eq!(choice(Some("ja"), Some("zh2en")).resolve(), Ok(Some("ja".to_string())));
        assert_eq!(choice(None, None).resolve(), Ok(None));
        assert!(choice(None, Some("sideways")).resolve().is_err());
    }

    #[test]
    fn page_requests_default_to_first_page() {
        let request: PageRequest =
            serde_json::from_str(r#"{"file_id":"abc12345","direction":"en2zh"}"#).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.language.resolve(), Ok(Some("zh".to_string())));
    }

    #[test]
    fn export_request_reads_client_blocks() {
        let request: ExportRequest = serde_json::from_str(
            r#"{"file_id":"abc12345","mode":"side_by_side","orientation":"portrait",
                "translation_blocks":[{"page":2,"x":1.5,"y":2,"text":"hi"}]}"#,
        )
        .unwrap();
        assert_eq!(request.mode, Some(ExportMode::SideBySide));
        assert_eq!(request.orientation, Some(Orientation::Portrait));
        let blocks = request.translation_blocks.unwrap();
        assert_eq!(blocks[0].page, Some(2));
        assert_eq!(blocks[0].width, None);
    }
}
