use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::data::DocumentKind;
use crate::error::{TranslateError, TranslateResult};
use crate::geom::{BBox, PageSize};
use crate::region::RegionBlock;

const METADATA_FILE: &str = "metadata.json";
const SOURCE_FILE: &str = "source.pdf";
const PAGES_DIR: &str = "pages";

/// Persisted state of one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub filename: String,
    pub total: u32,
    /// Raster references relative to the session, one per page.
    pub pages: Vec<String>,
    /// Page sizes of the source PDF in points.
    #[serde(default)]
    pub page_sizes: Vec<PageSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texts: Option<Vec<Vec<String>>>,
    /// Keyed by 1-based page number.
    #[serde(default)]
    pub translations: BTreeMap<u32, PageTranslation>,
}

impl SessionRecord {
    pub fn new(id: String, kind: DocumentKind, filename: String, total: u32) -> Self {
        let pages = (1..=total).map(page_ref).collect();
        Self {
            id,
            kind,
            filename,
            total,
            pages,
            page_sizes: Vec::new(),
            texts: None,
            translations: BTreeMap::new(),
        }
    }

    pub fn check_page(&self, page: u32) -> TranslateResult<()> {
        if page == 0 || page > self.total {
            return Err(TranslateError::validation(format!(
                "page {} out of range (document has {} pages)",
                page, self.total
            )));
        }
        Ok(())
    }

    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        let index = page.checked_sub(1)? as usize;
        self.page_sizes.get(index).copied()
    }

    /// Entry for `page`, created empty on first access.
    pub fn page_mut(&mut self, page: u32) -> &mut PageTranslation {
        self.translations
            .entry(page)
            .or_insert_with(|| PageTranslation::empty(page))
    }

    pub fn has_translations(&self) -> bool {
        self.translations.values().any(|page| !page.is_empty())
    }
}

/// Translation state of one page. Both block lists may be populated at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTranslation {
    pub page: u32,
    #[serde(default)]
    pub blocks: Vec<TranslatedBlock>,
    #[serde(default)]
    pub region_blocks: Vec<RegionBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_height: Option<f32>,
}

impl PageTranslation {
    pub fn empty(page: u32) -> Self {
        Self {
            page,
            blocks: Vec::new(),
            region_blocks: Vec::new(),
            page_width: None,
            page_height: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.region_blocks.is_empty()
    }

    pub fn page_size(&self) -> Option<PageSize> {
        match (self.page_width, self.page_height) {
            (Some(width), Some(height)) if width > 0.0 && height > 0.0 => {
                Some(PageSize { width, height })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedBlock {
    pub original: String,
    pub translated: String,
    pub bbox: BBox,
    pub font_size: f32,
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn validate_session_id(id: &str) -> TranslateResult<()> {
    if id.is_empty() {
        return Err(TranslateError::validation("missing file_id"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TranslateError::validation(format!("invalid file_id '{}'", id)));
    }
    Ok(())
}

fn page_ref(page: u32) -> String {
    format!("{}/page-{:03}.png", PAGES_DIR, page)
}

fn not_found(id: &str) -> TranslateError {
    TranslateError::validation(format!("session {} not found", id))
}

pub trait SessionStore: Send + Sync {
    /// Persists a new session with its source PDF and page rasters.
    fn create(
        &self,
        record: &SessionRecord,
        source_pdf: &[u8],
        rasters: &[Vec<u8>],
    ) -> TranslateResult<()>;

    fn load(&self, id: &str) -> TranslateResult<SessionRecord>;

    fn save(&self, record: &SessionRecord) -> TranslateResult<()>;

    fn raster(&self, id: &str, page: u32) -> TranslateResult<Vec<u8>>;

    fn source(&self, id: &str) -> TranslateResult<Vec<u8>>;
}

/// Stores each session under `<root>/<id>/`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("sessions"),
        }
    }

    fn session_dir(&self, id: &str) -> TranslateResult<PathBuf> {
        validate_session_id(id)?;
        Ok(self.root.join(id))
    }

    fn existing_dir(&self, id: &str) -> TranslateResult<PathBuf> {
        let dir = self.session_dir(id)?;
        if !dir.join(METADATA_FILE).is_file() {
            return Err(not_found(id));
        }
        Ok(dir)
    }
}

impl SessionStore for FileSessionStore {
    fn create(
        &self,
        record: &SessionRecord,
        source_pdf: &[u8],
        rasters: &[Vec<u8>],
    ) -> TranslateResult<()> {
        let dir = self.session_dir(&record.id)?;
        fs::create_dir_all(dir.join(PAGES_DIR))
            .with_context(|| format!("failed to create session dir: {}", dir.display()))?;
        fs::write(dir.join(SOURCE_FILE), source_pdf)
            .with_context(|| "failed to write session source")?;
        for (reference, raster) in record.pages.iter().zip(rasters) {
            fs::write(dir.join(reference), raster)
                .with_context(|| format!("failed to write page raster {}", reference))?;
        }
        self.save(record)?;
        debug!("created session {} in {}", record.id, dir.display());
        Ok(())
    }

    fn load(&self, id: &str) -> TranslateResult<SessionRecord> {
        let path = self.existing_dir(id)?.join(METADATA_FILE);
        let content = fs::read(&path)
            .with_context(|| format!("failed to read session metadata: {}", path.display()))?;
        let record = serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse session metadata: {}", path.display()))?;
        Ok(record)
    }

    fn save(&self, record: &SessionRecord) -> TranslateResult<()> {
        let path = self.session_dir(&record.id)?.join(METADATA_FILE);
        let content = serde_json::to_vec_pretty(record)
            .with_context(|| "failed to serialize session metadata")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write session metadata: {}", path.display()))?;
        Ok(())
    }

    fn raster(&self, id: &str, page: u32) -> TranslateResult<Vec<u8>> {
        let path = self.existing_dir(id)?.join(page_ref(page));
        if !path.is_file() {
            return Err(TranslateError::validation(format!(
                "page {} not found in session {}",
                page, id
            )));
        }
        Ok(fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?)
    }

    fn source(&self, id: &str) -> TranslateResult<Vec<u8>> {
        let path = self.existing_dir(id)?.join(SOURCE_FILE);
        Ok(fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?)
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    record: SessionRecord,
    source: Vec<u8>,
    rasters: Vec<Vec<u8>>,
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredSession) -> TranslateResult<T>,
    ) -> TranslateResult<T> {
        validate_session_id(id)?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        f(session)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(
        &self,
        record: &SessionRecord,
        source_pdf: &[u8],
        rasters: &[Vec<u8>],
    ) -> TranslateResult<()> {
        validate_session_id(&record.id)?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        sessions.insert(
            record.id.clone(),
            StoredSession {
                record: record.clone(),
                source: source_pdf.to_vec(),
                rasters: rasters.to_vec(),
            },
        );
        Ok(())
    }

    fn load(&self, id: &str) -> TranslateResult<SessionRecord> {
        self.with_session(id, |session| Ok(session.record.clone()))
    }

    fn save(&self, record: &SessionRecord) -> TranslateResult<()> {
        self.with_session(&record.id, |session| {
            session.record = record.clone();
            Ok(())
        })
    }

    fn raster(&self, id: &str, page: u32) -> TranslateResult<Vec<u8>> {
        self.with_session(id, |session| {
            page.checked_sub(1)
                .and_then(|index| session.rasters.get(index as usize))
                .cloned()
                .ok_or_else(|| {
                    TranslateError::validation(format!(
                        "page {} not found in session {}",
                        page, id
                    ))
                })
        })
    }

    fn source(&self, id: &str) -> TranslateResult<Vec<u8>> {
        self.with_session(id, |session| Ok(session.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str) -> SessionRecord {
        let mut record = SessionRecord::new(id.to_string(), DocumentKind::Pdf, "季度报告.pdf".to_string(), 2);
        record.page_mut(1).region_blocks.push(RegionBlock {
            x: 10.0,
            y: 10.0,
            width: 20.0,
            height: 10.0,
            text: "摘要".to_string(),
        });
        record
    }

    #[test]
    fn session_ids_are_short_hex() {
        let id = new_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(validate_session_id(&id).is_ok());
    }

    #[test]
    fn unsafe_ids_are_rejected() {
        for id in ["", "../etc", "ab/cd", "a b"] {
            let err = validate_session_id(id).unwrap_err();
            assert_eq!(err.kind(), "validation", "id {:?}", id);
        }
    }

    #[test]
    fn file_store_round_trips_metadata_and_rasters() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let record = record("abc12345");
        store
            .create(&record, b"%PDF-1.7", &[vec![1, 2], vec![3]])
            .unwrap();

        assert!(dir.path().join("sessions/abc12345/pages/page-002.png").is_file());
        assert_eq!(store.load("abc12345").unwrap(), record);
        assert_eq!(store.raster("abc12345", 2).unwrap(), vec![3]);
        assert_eq!(store.source("abc12345").unwrap(), b"%PDF-1.7".to_vec());

        let metadata = fs::read_to_string(dir.path().join("sessions/abc12345/metadata.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(value["type"], "pdf");
        assert_eq!(value["translations"]["1"]["region_blocks"][0]["text"], "摘要");
        assert!(value.get("texts").is_none());
    }

    #[test]
    fn unknown_session_is_a_validation_error() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert_eq!(store.load("deadbeef").unwrap_err().kind(), "validation");
        assert_eq!(
            MemorySessionStore::new().load("deadbeef").unwrap_err().kind(),
            "validation"
        );
    }

    #[test]
    fn memory_store_saves_updates() {
        let store = MemorySessionStore::new();
        let mut record = record("feed0001");
        store.create(&record, b"pdf", &[vec![9], vec![8]]).unwrap();
        record.page_mut(2).page_width = Some(595.0);
        store.save(&record).unwrap();
        assert_eq!(store.load("feed0001").unwrap(), record);
        assert_eq!(store.raster("feed0001", 1).unwrap(), vec![9]);
        assert!(store.raster("feed0001", 3).is_err());
    }
}
