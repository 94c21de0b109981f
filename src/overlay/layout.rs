use crate::geom::{BBox, PageSize, PercentRect};
use crate::settings::OverlaySettings;

/// Source font sizes are shrunk slightly so translations, usually longer, still fit.
const SCALED_FONT_FACTOR: f32 = 0.9;

/// Where a block sits in its own coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    Document { bbox: BBox, page: PageSize },
    Percent(PercentRect),
}

impl Anchor {
    pub fn to_surface(&self, width: f32, height: f32) -> BBox {
        match self {
            Anchor::Document { bbox, page } => {
                bbox.scale(width / page.width.max(1.0), height / page.height.max(1.0))
            }
            Anchor::Percent(rect) => rect.to_surface(width, height),
        }
    }

    fn vertical_scale(&self, height: f32) -> f32 {
        match self {
            Anchor::Document { page, .. } => height / page.height.max(1.0),
            Anchor::Percent(_) => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FontSizing {
    /// Source size times the vertical scale, clamped.
    Scaled { source_size: f32 },
    /// Largest candidate whose wrapped lines fit the box.
    Fit,
    Fixed(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBlock {
    pub text: String,
    pub anchor: Anchor,
    pub sizing: FontSizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutParams {
    pub padding: f32,
    pub line_gap: f32,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub fit_sizes: Vec<f32>,
}

impl From<&OverlaySettings> for LayoutParams {
    fn from(settings: &OverlaySettings) -> Self {
        Self {
            padding: settings.padding,
            line_gap: settings.line_gap,
            min_font_size: settings.min_font_size,
            max_font_size: settings.max_font_size,
            fit_sizes: settings.fit_sizes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: f32,
    pub top: f32,
}

/// A block resolved to surface units and ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedText {
    pub target: BBox,
    pub background: BBox,
    pub font_size: f32,
    pub line_height: f32,
    pub lines: Vec<PlacedLine>,
}

/// Lays `block` out on a `width` x `height` surface. Blank text yields nothing.
pub fn place_block<M>(
    block: &OverlayBlock,
    width: f32,
    height: f32,
    params: &LayoutParams,
    measure: M,
) -> Option<PlacedText>
where
    M: Fn(&str, f32) -> f32,
{
    let text = block.text.trim();
    if text.is_empty() {
        return None;
    }
    let target = block.anchor.to_surface(width, height);
    let inner_w = target.width() - params.padding * 2.0;

    let (font_size, wrapped, text_top) = match block.sizing {
        FontSizing::Scaled { source_size } => {
            let size = (source_size * block.anchor.vertical_scale(height) * SCALED_FONT_FACTOR)
                .clamp(params.min_font_size, params.max_font_size);
            (size, wrap_chars(text, inner_w, size, &measure), target.y0)
        }
        FontSizing::Fit => {
            let (size, lines) =
                choose_fit_size(text, inner_w, target.height(), params, &measure);
            (size, lines, target.y0 + params.padding)
        }
        FontSizing::Fixed(size) => (size, wrap_chars(text, inner_w, size, &measure), target.y0),
    };

    let line_height = font_size + params.line_gap;
    let limit = target.y1 + params.padding;
    let mut lines = Vec::new();
    let mut top = text_top;
    for line in wrapped {
        if top + line_height > limit {
            break;
        }
        lines.push(PlacedLine {
            text: line,
            x: target.x0 + params.padding,
            top,
        });
        top += line_height;
    }

    let background = target.inflate(params.padding);
    let background = BBox::new(
        background.x0.max(0.0),
        background.y0.max(0.0),
        background.x1.min(width),
        background.y1.min(height),
    );
    Some(PlacedText {
        target,
        background,
        font_size,
        line_height,
        lines,
    })
}

/// Character-granular greedy wrap; explicit newlines always break and blank lines are dropped.
pub fn wrap_chars<M>(text: &str, max_width: f32, font_size: f32, measure: &M) -> Vec<String>
where
    M: Fn(&str, f32) -> f32,
{
    let mut lines = Vec::new();
    let mut buf = [0u8; 4];
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0.0;
        for ch in paragraph.chars() {
            let advance = measure(ch.encode_utf8(&mut buf), font_size);
            if current_width + advance > max_width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_width = 0.0;
            }
            current.push(ch);
            current_width += advance;
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

/// Tries the candidates in order; the last one is used when none fits.
pub fn choose_fit_size<M>(
    text: &str,
    box_width: f32,
    box_height: f32,
    params: &LayoutParams,
    measure: &M,
) -> (f32, Vec<String>)
where
    M: Fn(&str, f32) -> f32,
{
    let mut chosen = None;
    for &size in &params.fit_sizes {
        let lines = wrap_chars(text, box_width, size, measure);
        let needed = lines.len() as f32 * (size + params.line_gap) + params.padding * 2.0;
        if needed <= box_height {
            return (size, lines);
        }
        chosen = Some((size, lines));
    }
    chosen.unwrap_or_else(|| {
        let size = params.min_font_size;
        (size, wrap_chars(text, box_width, size, measure))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LayoutParams {
        LayoutParams {
            padding: 2.0,
            line_gap: 2.0,
            min_font_size: 8.0,
            max_font_size: 24.0,
            fit_sizes: vec![12.0, 10.0, 8.0, 6.0],
        }
    }

    fn fixed_width(_: &str, size: f32) -> f32 {
        size * 0.5
    }

    #[test]
    fn fit_picks_largest_size_that_holds_every_line() {
        let (size, lines) = choose_fit_size("a\nb\nc", 96.0, 42.0, &params(), &fixed_width);
        assert_eq!(size, 10.0);
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn fit_falls_back_to_smallest_candidate() {
        let (size, lines) = choose_fit_size("a\nb\nc\nd\ne", 96.0, 10.0, &params(), &fixed_width);
        assert_eq!(size, 6.0);
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn wrap_is_character_granular() {
        let lines = wrap_chars("接口文档说明", 20.0, 10.0, &|_: &str, size: f32| size);
        assert_eq!(lines, vec!["接口", "文档", "说明"]);
        let lines = wrap_chars("ab\n\ncd", 100.0, 10.0, &fixed_width);
        assert_eq!(lines, vec!["ab", "cd"]);
    }

    #[test]
    fn scaled_block_maps_document_space_and_truncates() {
        let block = OverlayBlock {
            text: "first\nsecond".to_string(),
            anchor: Anchor::Document {
                bbox: BBox::new(10.0, 10.0, 110.0, 20.0),
                page: PageSize {
                    width: 200.0,
                    height: 100.0,
                },
            },
            sizing: FontSizing::Scaled { source_size: 10.0 },
        };
        let placed = place_block(&block, 400.0, 200.0, &params(), fixed_width).unwrap();
        assert_eq!(placed.target, BBox::new(20.0, 20.0, 220.0, 40.0));
        assert_eq!(placed.background, BBox::new(18.0, 18.0, 222.0, 42.0));
        assert_eq!(placed.font_size, 18.0);
        assert_eq!(placed.lines.len(), 1);
        assert_eq!(placed.lines[0].x, 22.0);
        assert_eq!(placed.lines[0].top, 20.0);
    }

    #[test]
    fn scaled_size_is_clamped() {
        let block = OverlayBlock {
            text: "tiny".to_string(),
            anchor: Anchor::Percent(PercentRect::new(0.0, 0.0, 50.0, 50.0)),
            sizing: FontSizing::Scaled { source_size: 4.0 },
        };
        let placed = place_block(&block, 100.0, 100.0, &params(), fixed_width).unwrap();
        assert_eq!(placed.font_size, 8.0);
    }

    #[test]
    fn blank_text_is_skipped() {
        let block = OverlayBlock {
            text: "  ".to_string(),
            anchor: Anchor::Percent(PercentRect::new(0.0, 0.0, 50.0, 50.0)),
            sizing: FontSizing::Fit,
        };
        assert!(place_block(&block, 100.0, 100.0, &params(), fixed_width).is_none());
    }
}
