use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use uuid::Uuid;

use crate::error::{TranslateError, TranslateResult};

const GLOSSARY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewGlossaryEntry {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlossaryPatch {
    pub source: Option<String>,
    pub target: Option<String>,
    pub context: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GlossaryFile {
    version: u32,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    glossary: Vec<GlossaryEntry>,
}

impl Default for GlossaryFile {
    fn default() -> Self {
        Self {
            version: GLOSSARY_VERSION,
            updated_at: String::new(),
            glossary: Vec::new(),
        }
    }
}

enum Backend {
    File(PathBuf),
    Memory(Mutex<GlossaryFile>),
}

/// Terminology pairs the translator must honor. Every call reads the backing store, nothing is cached.
pub struct Glossary {
    backend: Backend,
    /// Held across every read-modify-write.
    edits: Mutex<()>,
}

impl Glossary {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
            edits: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(GlossaryFile::default())),
            edits: Mutex::new(()),
        }
    }

    pub fn list(&self) -> TranslateResult<Vec<GlossaryEntry>> {
        Ok(self.read()?.glossary)
    }

    pub fn add(&self, entry: NewGlossaryEntry) -> TranslateResult<GlossaryEntry> {
        let source = entry.source.trim();
        let target = entry.target.trim();
        if source.is_empty() || target.is_empty() {
            return Err(TranslateError::validation(
                "glossary source and target are required",
            ));
        }
        let created = GlossaryEntry {
            id: new_term_id(),
            source: source.to_string(),
            target: target.to_string(),
            context: clean_optional(entry.context),
            note: clean_optional(entry.note),
        };
        let _edit = lock(&self.edits)?;
        let mut file = self.read()?;
        file.glossary.push(created.clone());
        self.write(file)?;
        debug!("glossary term {} added", created.id);
        Ok(created)
    }

    pub fn update(&self, id: &str, patch: GlossaryPatch) -> TranslateResult<GlossaryEntry> {
        let _edit = lock(&self.edits)?;
        let mut file = self.read()?;
        let entry = file
            .glossary
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| TranslateError::validation(format!("glossary term not found: {}", id)))?;
        if let Some(source) = patch.source {
            let source = source.trim();
            if source.is_empty() {
                return Err(TranslateError::validation("glossary source cannot be empty"));
            }
            entry.source = source.to_string();
        }
        if let Some(target) = patch.target {
            let target = target.trim();
            if target.is_empty() {
                return Err(TranslateError::validation("glossary target cannot be empty"));
            }
            entry.target = target.to_string();
        }
        if patch.context.is_some() {
            entry.context = clean_optional(patch.context);
        }
        if patch.note.is_some() {
            entry.note = clean_optional(patch.note);
        }
        let updated = entry.clone();
        self.write(file)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> TranslateResult<()> {
        let _edit = lock(&self.edits)?;
        let mut file = self.read()?;
        let before = file.glossary.len();
        file.glossary.retain(|entry| entry.id != id);
        if file.glossary.len() == before {
            return Err(TranslateError::validation(format!(
                "glossary term not found: {}",
                id
            )));
        }
        self.write(file)
    }

    /// Markdown table of the current entries, or `None` when there is nothing to constrain.
    pub fn to_prompt_table(&self) -> TranslateResult<Option<String>> {
        Ok(render_prompt_table(&self.list()?))
    }

    fn read(&self) -> TranslateResult<GlossaryFile> {
        match &self.backend {
            Backend::File(path) => {
                if !path.exists() {
                    return Ok(GlossaryFile::default());
                }
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read glossary: {}", path.display()))?;
                let file = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse glossary: {}", path.display()))?;
                Ok(file)
            }
            Backend::Memory(file) => Ok(lock(file)?.clone()),
        }
    }

    fn write(&self, mut file: GlossaryFile) -> TranslateResult<()> {
        file.version = GLOSSARY_VERSION;
        file.updated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        match &self.backend {
            Backend::File(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create glossary directory: {}", parent.display())
                    })?;
                }
                let content = serde_json::to_string_pretty(&file)
                    .with_context(|| "failed to serialize glossary")?;
                // staged then renamed over the old file
                let dir = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let mut staged = NamedTempFile::new_in(dir)
                    .with_context(|| format!("failed to stage glossary in {}", dir.display()))?;
                staged
                    .write_all(content.as_bytes())
                    .with_context(|| "failed to write staged glossary")?;
                staged
                    .persist(path)
                    .map_err(|err| err.error)
                    .with_context(|| format!("failed to write glossary: {}", path.display()))?;
            }
            Backend::Memory(stored) => {
                *lock(stored)? = file;
            }
        }
        Ok(())
    }
}

pub fn render_prompt_table(entries: &[GlossaryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut lines = vec![
        "| Term A | Term B | Note |".to_string(),
        "|------|------|------|".to_string(),
    ];
    for entry in entries {
        lines.push(format!(
            "| {} | {} | {} |",
            table_cell(&entry.source),
            table_cell(&entry.target),
            table_cell(entry.note.as_deref().unwrap_or(""))
        ));
    }
    Some(lines.join("\n"))
}

fn table_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn new_term_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("term_{}", &hex[..8])
}

fn lock<T>(mutex: &Mutex<T>) -> TranslateResult<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TranslateError::Internal(anyhow::anyhow!("glossary lock poisoned")))
}
