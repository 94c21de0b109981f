//! Access to source documents: normalisation to PDF, rasterisation and the positioned text layer.

use std::env;
use std::fs;
use std::path::Path;

use crate::data::DetectedFormat;
use crate::error::TranslateResult;
use crate::geom::{BBox, PageSize};

mod command;
mod stext;

pub use command::CommandBackend;
pub use stext::{parse_bbox_layout, parse_stext};

#[derive(Debug, Clone, PartialEq)]
pub struct RawSpan {
    pub text: String,
    pub size: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawLine {
    pub spans: Vec<RawSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub bbox: BBox,
    pub lines: Vec<RawLine>,
}

/// One page of the text layer, in document units.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub size: PageSize,
    pub blocks: Vec<RawBlock>,
}

pub trait DocumentBackend: Send + Sync {
    /// Converts an upload into the PDF every later step works on.
    fn normalize(&self, format: DetectedFormat, bytes: &[u8]) -> TranslateResult<Vec<u8>>;

    /// One PNG per page at `zoom` times the 72 dpi document scale.
    fn rasterize(&self, pdf: &[u8], zoom: f32) -> TranslateResult<Vec<Vec<u8>>>;

    fn read_document(&self, pdf: &[u8]) -> TranslateResult<Vec<RawPage>>;

    /// `page` is 1-based.
    fn read_page(&self, pdf: &[u8], page: u32) -> TranslateResult<RawPage>;
}

pub(crate) fn command_exists(cmd: &str) -> bool {
    let path = Path::new(cmd);
    if path.components().count() > 1 {
        return is_executable(path);
    }
    let Some(path_var) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path_var).any(|dir| is_executable(&dir.join(cmd)))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
