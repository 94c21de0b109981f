use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::export::Orientation;
use crate::region::RegionRules;
use crate::strategy::{PageStrategy, RegionStrategy};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const HOME_DIR_NAME: &str = ".page-overlay-translator";
const GLOSSARY_FILE: &str = "glossary.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub timeouts: Timeouts,
    pub translation: TranslationSettings,
    pub regions: RegionRules,
    pub overlay: OverlaySettings,
    pub raster_zoom: f32,
    pub export: ExportSettings,
    pub data_dir: PathBuf,
    pub server_addr: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub name: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub vision: Option<bool>,
}

/// Upper bounds for a single provider call, per call class.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connectivity: Duration,
    pub region: Duration,
    pub page: Duration,
    pub document: Duration,
}

#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub target_lang: String,
    pub separator: String,
    pub max_tokens: u32,
    pub page_strategy: PageStrategy,
    pub region_strategy: RegionStrategy,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub fill_color: String,
    pub text_color: String,
    pub padding: f32,
    pub line_gap: f32,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub fit_sizes: Vec<f32>,
    pub font_family: Option<String>,
    pub font_path: Option<String>,
    pub font_fallbacks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub orientation: Orientation,
    pub original_label: String,
    pub translated_label: String,
    pub margin: f32,
    pub gap: f32,
    pub label_height: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings {
                name: "doubao".to_string(),
                ..ProviderSettings::default()
            },
            timeouts: Timeouts {
                connectivity: Duration::from_secs(15),
                region: Duration::from_secs(60),
                page: Duration::from_secs(120),
                document: Duration::from_secs(300),
            },
            translation: TranslationSettings {
                target_lang: "zh".to_string(),
                separator: "[SEP]".to_string(),
                max_tokens: 4096,
                page_strategy: PageStrategy::Text,
                region_strategy: RegionStrategy::Direct,
            },
            regions: RegionRules::default(),
            overlay: OverlaySettings {
                fill_color: "#ffffff".to_string(),
                text_color: "#000000".to_string(),
                padding: 2.0,
                line_gap: 2.0,
                min_font_size: 8.0,
                max_font_size: 24.0,
                fit_sizes: vec![12.0, 10.0, 8.0, 6.0],
                font_family: None,
                font_path: None,
                font_fallbacks: Vec::new(),
            },
            raster_zoom: 1.5,
            export: ExportSettings {
                orientation: Orientation::Landscape,
                original_label: "Original".to_string(),
                translated_label: "Translated".to_string(),
                margin: 20.0,
                gap: 10.0,
                label_height: 25.0,
            },
            data_dir: default_data_dir(),
            server_addr: "127.0.0.1:2008".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    provider: Option<ProviderSection>,
    timeouts: Option<TimeoutSection>,
    translation: Option<TranslationSection>,
    regions: Option<RegionSection>,
    overlay: Option<OverlaySection>,
    raster: Option<RasterSection>,
    export: Option<ExportSection>,
    storage: Option<StorageSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSection {
    name: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    vision: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutSection {
    connectivity_secs: Option<u64>,
    region_secs: Option<u64>,
    page_secs: Option<u64>,
    document_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSection {
    target_lang: Option<String>,
    separator: Option<String>,
    max_tokens: Option<u32>,
    page_strategy: Option<PageStrategy>,
    region_strategy: Option<RegionStrategy>,
}

#[derive(Debug, Default, Deserialize)]
struct RegionSection {
    overlap_threshold: Option<f32>,
    match_tolerance: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySection {
    fill_color: Option<String>,
    text_color: Option<String>,
    padding: Option<f32>,
    line_gap: Option<f32>,
    min_font_size: Option<f32>,
    max_font_size: Option<f32>,
    fit_sizes: Option<Vec<f32>>,
    font_family: Option<String>,
    font_path: Option<String>,
    font_fallbacks: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RasterSection {
    zoom: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportSection {
    orientation: Option<Orientation>,
    original_label: Option<String>,
    translated_label: Option<String>,
    margin: Option<f32>,
    gap: Option<f32>,
    label_height: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let embedded: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse bundled settings")?;
    settings.merge(embedded);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content).with_context(|| {
                format!("failed to parse settings: {}", path.display())
            })?;
        }
    }

    if let Some(dir) = env_value("PAGE_OVERLAY_DATA_DIR") {
        settings.data_dir = PathBuf::from(dir);
    }
    Ok(settings)
}

impl Settings {
    pub fn glossary_path(&self) -> PathBuf {
        self.data_dir.join(GLOSSARY_FILE)
    }

    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(provider) = incoming.provider {
            if let Some(name) = non_empty(provider.name) {
                self.provider.name = name;
            }
            if let Some(model) = non_empty(provider.model) {
                self.provider.model = Some(model);
            }
            if let Some(url) = non_empty(provider.base_url) {
                self.provider.base_url = Some(url);
            }
            if let Some(key) = non_empty(provider.api_key) {
                self.provider.api_key = Some(key);
            }
            if provider.vision.is_some() {
                self.provider.vision = provider.vision;
            }
        }
        if let Some(timeouts) = incoming.timeouts {
            merge_secs(&mut self.timeouts.connectivity, timeouts.connectivity_secs);
            merge_secs(&mut self.timeouts.region, timeouts.region_secs);
            merge_secs(&mut self.timeouts.page, timeouts.page_secs);
            merge_secs(&mut self.timeouts.document, timeouts.document_secs);
        }
        if let Some(translation) = incoming.translation {
            if let Some(lang) = non_empty(translation.target_lang) {
                self.translation.target_lang = lang;
            }
            if let Some(separator) = non_empty(translation.separator) {
                self.translation.separator = separator;
            }
            if let Some(max_tokens) = translation.max_tokens
                && max_tokens > 0
            {
                self.translation.max_tokens = max_tokens;
            }
            if let Some(strategy) = translation.page_strategy {
                self.translation.page_strategy = strategy;
            }
            if let Some(strategy) = translation.region_strategy {
                self.translation.region_strategy = strategy;
            }
        }
        if let Some(regions) = incoming.regions {
            if let Some(threshold) = regions.overlap_threshold
                && threshold > 0.0
            {
                self.regions.overlap_threshold = threshold;
            }
            if let Some(tolerance) = regions.match_tolerance
                && tolerance >= 0.0
            {
                self.regions.match_tolerance = tolerance;
            }
        }
        if let Some(overlay) = incoming.overlay {
            self.merge_overlay(overlay);
        }
        if let Some(raster) = incoming.raster
            && let Some(zoom) = raster.zoom
            && zoom > 0.0
        {
            self.raster_zoom = zoom;
        }
        if let Some(export) = incoming.export {
            if let Some(orientation) = export.orientation {
                self.export.orientation = orientation;
            }
            if let Some(label) = non_empty(export.original_label) {
                self.export.original_label = label;
            }
            if let Some(label) = non_empty(export.translated_label) {
                self.export.translated_label = label;
            }
            merge_positive(&mut self.export.margin, export.margin);
            merge_positive(&mut self.export.gap, export.gap);
            merge_positive(&mut self.export.label_height, export.label_height);
        }
        if let Some(storage) = incoming.storage
            && let Some(dir) = non_empty(storage.data_dir)
        {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(server) = incoming.server
            && let Some(addr) = non_empty(server.addr)
        {
            self.server_addr = addr;
        }
    }

    fn merge_overlay(&mut self, overlay: OverlaySection) {
        let target = &mut self.overlay;
        if let Some(color) = non_empty(overlay.fill_color) {
            target.fill_color = color;
        }
        if let Some(color) = non_empty(overlay.text_color) {
            target.text_color = color;
        }
        if let Some(padding) = overlay.padding
            && padding >= 0.0
        {
            target.padding = padding;
        }
        if let Some(gap) = overlay.line_gap
            && gap >= 0.0
        {
            target.line_gap = gap;
        }
        merge_positive(&mut target.min_font_size, overlay.min_font_size);
        merge_positive(&mut target.max_font_size, overlay.max_font_size);
        if target.max_font_size < target.min_font_size {
            target.max_font_size = target.min_font_size;
        }
        if let Some(mut sizes) = overlay.fit_sizes {
            sizes.retain(|size| *size > 0.0);
            sizes.sort_by(|a, b| b.total_cmp(a));
            if !sizes.is_empty() {
                target.fit_sizes = sizes;
            }
        }
        if let Some(family) = non_empty(overlay.font_family) {
            target.font_family = Some(family);
        }
        if let Some(path) = non_empty(overlay.font_path) {
            target.font_path = Some(path);
        }
        if let Some(fallbacks) = overlay.font_fallbacks {
            target.font_fallbacks = fallbacks;
        }
    }

    /// Settings as shown to clients, with the API key masked.
    pub fn public_view(&self) -> PublicSettings {
        PublicSettings {
            provider: self.provider.name.clone(),
            model: self.provider.model.clone(),
            base_url: self.provider.base_url.clone(),
            api_key: self.provider.api_key.as_deref().map(mask_key),
            target_lang: self.translation.target_lang.clone(),
            page_strategy: self.translation.page_strategy,
            region_strategy: self.translation.region_strategy,
            orientation: self.export.orientation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicSettings {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub target_lang: String,
    pub page_strategy: PageStrategy,
    pub region_strategy: RegionStrategy,
    pub orientation: Orientation,
}

pub fn mask_key(key: &str) -> String {
    let chars = key.chars().collect::<Vec<_>>();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head = chars[..8].iter().collect::<String>();
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{}****{}", head, tail)
}

fn merge_secs(target: &mut Duration, value: Option<u64>) {
    if let Some(secs) = value
        && secs > 0
    {
        *target = Duration::from_secs(secs);
    }
}

fn merge_positive(target: &mut f32, value: Option<f32>) {
    if let Some(value) = value
        && value > 0.0
    {
        *target = value;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn home_dir() -> Option<PathBuf> {
    env_value("HOME").map(|home| Path::new(home.trim()).join(HOME_DIR_NAME))
}

fn default_data_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join("data"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_settings_parse() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        assert_eq!(settings.provider.name, "doubao");
        assert_eq!(settings.timeouts.connectivity, Duration::from_secs(15));
        assert_eq!(settings.timeouts.document, Duration::from_secs(300));
        assert_eq!(settings.overlay.fit_sizes, vec![12.0, 10.0, 8.0, 6.0]);
        assert_eq!(settings.regions.overlap_threshold, 0.3);
        assert_eq!(settings.server_addr, "127.0.0.1:2008");
    }

    #[test]
    fn later_layers_override_individual_keys() {
        let mut settings = Settings::default();
        settings
            .merge_str(
                r#"
[regions]
overlap_threshold = 0.5

[overlay]
fit_sizes = [6.0, 14.0, 0.0]

[export]
orientation = "portrait"
"#,
            )
            .unwrap();
        assert_eq!(settings.regions.overlap_threshold, 0.5);
        assert_eq!(settings.regions.match_tolerance, 0.5);
        assert_eq!(settings.overlay.fit_sizes, vec![14.0, 6.0]);
        assert_eq!(settings.export.orientation, Orientation::Portrait);
        assert_eq!(settings.export.margin, 20.0);
    }

    #[test]
    fn masks_long_keys_only_partially() {
        assert_eq!(mask_key("abcdefgh12345678wxyz"), "abcdefgh****wxyz");
        assert_eq!(mask_key("short"), "****");
    }
}
