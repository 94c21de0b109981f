use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;

use super::ExportMode;

/// Everything but RFC 3986 unreserved characters gets escaped.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const DEFAULT_BASE: &str = "document";

pub fn export_filename(original: &str, mode: ExportMode) -> String {
    let base = Path::new(original.trim())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or(DEFAULT_BASE);
    format!("{}{}.pdf", base, mode.filename_suffix())
}

/// `attachment` disposition carrying the UTF-8 name percent-encoded.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(filename, FILENAME_ESCAPE)
    )
}
