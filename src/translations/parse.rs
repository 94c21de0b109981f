use serde::{Deserialize, Serialize};

/// Provider output for a single region: either a recognised source/translation pair or raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTranslation {
    Pair { original: String, translated: String },
    Raw(String),
}

impl ParsedTranslation {
    pub fn translated(&self) -> &str {
        match self {
            ParsedTranslation::Pair { translated, .. } => translated,
            ParsedTranslation::Raw(text) => text,
        }
    }

    pub fn original(&self) -> Option<&str> {
        match self {
            ParsedTranslation::Pair { original, .. } if !original.is_empty() => Some(original),
            _ => None,
        }
    }
}

const TAG_PAIRS: &[(&str, &str)] = &[
    ("【原文】", "【译文】"),
    ("原文：", "译文："),
    ("原文:", "译文:"),
    ("原文：", "翻译："),
    ("原文:", "翻译:"),
    ("Original:", "Translation:"),
];

pub fn parse_tagged(content: &str) -> ParsedTranslation {
    for (original_tag, translated_tag) in TAG_PAIRS {
        let Some(t_idx) = content.find(translated_tag) else {
            continue;
        };
        let translated = content[t_idx + translated_tag.len()..].trim();
        if translated.is_empty() {
            continue;
        }
        let head = &content[..t_idx];
        let original = head
            .find(original_tag)
            .map(|o_idx| head[o_idx + original_tag.len()..].trim())
            .unwrap_or("");
        return ParsedTranslation::Pair {
            original: original.to_string(),
            translated: translated.to_string(),
        };
    }
    ParsedTranslation::Raw(content.trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalBand {
    Top,
    Middle,
    Bottom,
}

impl VerticalBand {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "top" | "上" | "上方" | "顶部" => Some(VerticalBand::Top),
            "middle" | "center" | "中" | "中间" => Some(VerticalBand::Middle),
            "bottom" | "下" | "下方" | "底部" => Some(VerticalBand::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLine {
    pub original: String,
    pub translated: String,
    pub band: VerticalBand,
}

/// Parses `Original: … | Translation: … | Position: …` lines. Falls back to one block holding
/// the whole response when no line matches.
pub fn parse_page_lines(content: &str) -> Vec<PageLine> {
    let mut lines = Vec::new();
    for raw in content.lines() {
        let mut original = String::new();
        let mut translated = String::new();
        let mut band = VerticalBand::Middle;
        for field in raw.split('|') {
            let Some((key, value)) = split_field(field) else {
                continue;
            };
            match key {
                FieldKey::Original => original = value.to_string(),
                FieldKey::Translation => translated = value.to_string(),
                FieldKey::Position => band = VerticalBand::parse(value).unwrap_or(band),
            }
        }
        if !translated.is_empty() {
            lines.push(PageLine {
                original,
                translated,
                band,
            });
        }
    }

    if lines.is_empty() && !content.trim().is_empty() {
        lines.push(PageLine {
            original: String::new(),
            translated: content.trim().to_string(),
            band: VerticalBand::Middle,
        });
    }
    lines
}

enum FieldKey {
    Original,
    Translation,
    Position,
}

fn split_field(field: &str) -> Option<(FieldKey, &str)> {
    let field = field.trim();
    let (key, value) = field
        .split_once(':')
        .or_else(|| field.split_once('：'))?;
    let key = match key.trim().to_lowercase().as_str() {
        "original" | "原文" => FieldKey::Original,
        "translation" | "译文" | "翻译" => FieldKey::Translation,
        "position" | "位置" => FieldKey::Position,
        _ => return None,
    };
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_tags_yield_pair() {
        let parsed = parse_tagged("【原文】\nHello world\n【译文】\n你好，世界\n");
        assert_eq!(
            parsed,
            ParsedTranslation::Pair {
                original: "Hello world".to_string(),
                translated: "你好，世界".to_string(),
            }
        );
    }

    #[test]
    fn colon_tags_yield_pair() {
        let parsed = parse_tagged("原文：Latency\n翻译：延迟");
        assert_eq!(parsed.translated(), "延迟");
        assert_eq!(parsed.original(), Some("Latency"));
    }

    #[test]
    fn untagged_output_falls_back_to_raw() {
        let parsed = parse_tagged("  just a translation \n");
        assert_eq!(parsed, ParsedTranslation::Raw("just a translation".to_string()));
        assert_eq!(parsed.original(), None);
    }

    #[test]
    fn empty_translation_tag_is_not_a_pair() {
        let parsed = parse_tagged("【原文】abc【译文】   ");
        assert!(matches!(parsed, ParsedTranslation::Raw(_)));
    }

    #[test]
    fn page_lines_parse_bands() {
        let content = "Original: Title | Translation: 标题 | Position: top\n\
                       noise line\n\
                       原文：Footer | 译文：页脚 | 位置：下";
        let lines = parse_page_lines(content);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].translated, "标题");
        assert_eq!(lines[0].band, VerticalBand::Top);
        assert_eq!(lines[1].original, "Footer");
        assert_eq!(lines[1].band, VerticalBand::Bottom);
    }

    #[test]
    fn unparseable_page_output_becomes_single_block() {
        let lines = parse_page_lines("整页翻译内容");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].band, VerticalBand::Middle);
        assert_eq!(lines[0].translated, "整页翻译内容");
    }
}
