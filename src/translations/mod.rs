use anyhow::{Context, Result};
use tera::{Context as TeraContext, Tera};

mod parse;

pub use parse::{PageLine, ParsedTranslation, VerticalBand, parse_page_lines, parse_tagged};

const BATCH_PROMPT: &str = include_str!("prompts/batch.tera");
const VISION_REGION_PROMPT: &str = include_str!("prompts/vision_region.tera");
const VISION_OCR_PROMPT: &str = include_str!("prompts/vision_ocr.tera");
const VISION_PAGE_PROMPT: &str = include_str!("prompts/vision_page.tera");

/// Minimal request used to check that the provider is reachable.
pub const CONNECTIVITY_PROMPT: &str = "Hi";

pub fn render_batch_prompt(
    target_lang: &str,
    separator: &str,
    count: usize,
    glossary: Option<&str>,
) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", target_lang);
    context.insert("separator", separator);
    context.insert("count", &count);
    context.insert("glossary", &glossary);
    render(BATCH_PROMPT, &context, "batch")
}

pub fn render_region_prompt(target_lang: &str, glossary: Option<&str>) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", target_lang);
    context.insert("glossary", &glossary);
    render(VISION_REGION_PROMPT, &context, "region")
}

pub fn render_ocr_prompt() -> Result<String> {
    render(VISION_OCR_PROMPT, &TeraContext::new(), "ocr")
}

pub fn render_page_prompt(target_lang: &str, glossary: Option<&str>) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", target_lang);
    context.insert("glossary", &glossary);
    render(VISION_PAGE_PROMPT, &context, "page")
}

fn render(template: &str, context: &TeraContext, name: &str) -> Result<String> {
    Tera::one_off(template, context, false)
        .map(|prompt| prompt.trim_end().to_string())
        .with_context(|| format!("failed to render {} prompt", name))
}
