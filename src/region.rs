use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::geom::PercentRect;

const CLIENT_DEFAULT_PAGE: u32 = 1;
const CLIENT_DEFAULT_WIDTH: f32 = 10.0;
const CLIENT_DEFAULT_HEIGHT: f32 = 5.0;

/// Thresholds for replacing and deleting region blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRules {
    /// Fraction of either block's area an overlap must exceed for the older block to go.
    pub overlap_threshold: f32,
    /// Maximum distance, in percentage points, on both axes for a delete to match.
    pub match_tolerance: f32,
}

impl Default for RegionRules {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.3,
            match_tolerance: 0.5,
        }
    }
}

impl RegionRules {
    pub fn overlaps(&self, a: &RegionBlock, b: &RegionBlock) -> bool {
        let overlap = a.rect().overlap_area(&b.rect());
        overlap > a.rect().area() * self.overlap_threshold
            || overlap > b.rect().area() * self.overlap_threshold
    }

    pub fn matches_position(&self, a: &RegionBlock, b: &RegionBlock) -> bool {
        (a.x - b.x).abs() < self.match_tolerance && (a.y - b.y).abs() < self.match_tolerance
    }
}

/// Translation overlay in page percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBlock {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub text: String,
}

impl RegionBlock {
    pub fn new(rect: PercentRect, text: impl Into<String>) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            text: text.into(),
        }
    }

    pub fn rect(&self) -> PercentRect {
        PercentRect::new(self.x, self.y, self.width, self.height)
    }
}

/// Block as posted by a client that already resolved its positions.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientBlock {
    pub page: Option<u32>,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    pub width: Option<f32>,
    pub height: Option<f32>,
    #[serde(default)]
    pub text: String,
}

/// Drops every block overlapping `block` beyond the threshold, then appends it.
pub fn save(blocks: &mut Vec<RegionBlock>, block: RegionBlock, rules: &RegionRules) {
    let before = blocks.len();
    blocks.retain(|existing| !rules.overlaps(existing, &block));
    if blocks.len() != before {
        debug!("replaced {} overlapping region blocks", before - blocks.len());
    }
    blocks.push(block);
}

/// Removes blocks at `probe`'s position regardless of text; returns how many went.
pub fn delete(blocks: &mut Vec<RegionBlock>, probe: &RegionBlock, rules: &RegionRules) -> usize {
    let before = blocks.len();
    blocks.retain(|existing| !rules.matches_position(existing, probe));
    before - blocks.len()
}

/// Groups a client list by page as-is, without overlap filtering.
pub fn reorganize_from_client_blocks(
    blocks: Vec<ClientBlock>,
) -> BTreeMap<u32, Vec<RegionBlock>> {
    let mut pages: BTreeMap<u32, Vec<RegionBlock>> = BTreeMap::new();
    for block in blocks {
        let page = block.page.unwrap_or(CLIENT_DEFAULT_PAGE);
        pages.entry(page).or_default().push(RegionBlock {
            x: block.x,
            y: block.y,
            width: block.width.unwrap_or(CLIENT_DEFAULT_WIDTH),
            height: block.height.unwrap_or(CLIENT_DEFAULT_HEIGHT),
            text: block.text,
        });
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(x: f32, y: f32, width: f32, height: f32, text: &str) -> RegionBlock {
        RegionBlock {
            x,
            y,
            width,
            height,
            text: text.to_string(),
        }
    }

    #[test]
    fn heavy_overlap_replaces_existing_block() {
        let rules = RegionRules::default();
        let mut blocks = vec![block(10.0, 10.0, 20.0, 10.0, "old")];
        save(&mut blocks, block(15.0, 10.0, 20.0, 10.0, "new"), &rules);
        assert_eq!(blocks, vec![block(15.0, 10.0, 20.0, 10.0, "new")]);
    }

    #[test]
    fn light_overlap_coexists() {
        let rules = RegionRules::default();
        let mut blocks = vec![block(10.0, 10.0, 20.0, 10.0, "left")];
        // overlap 5x10 = 50, under 30% of 200
        save(&mut blocks, block(25.0, 10.0, 20.0, 10.0, "right"), &rules);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "left");
        assert_eq!(blocks[1].text, "right");
    }

    #[test]
    fn small_block_inside_large_one_replaces_it() {
        let rules = RegionRules::default();
        let mut blocks = vec![block(0.0, 0.0, 50.0, 50.0, "large")];
        save(&mut blocks, block(10.0, 10.0, 5.0, 5.0, "small"), &rules);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "small");
    }

    #[test]
    fn delete_matches_position_within_tolerance() {
        let rules = RegionRules::default();
        let mut blocks = vec![block(10.0, 10.0, 20.0, 10.0, "keep me?")];

        let removed = delete(&mut blocks, &block(10.6, 10.0, 1.0, 1.0, ""), &rules);
        assert_eq!(removed, 0);
        assert_eq!(blocks.len(), 1);

        let removed = delete(&mut blocks, &block(10.4, 10.0, 99.0, 99.0, "other"), &rules);
        assert_eq!(removed, 1);
        assert!(blocks.is_empty());
    }

    #[test]
    fn tolerance_is_configurable() {
        let rules = RegionRules {
            overlap_threshold: 0.3,
            match_tolerance: 1.0,
        };
        let mut blocks = vec![block(10.0, 10.0, 20.0, 10.0, "")];
        assert_eq!(delete(&mut blocks, &block(10.6, 10.9, 0.0, 0.0, ""), &rules), 1);
    }

    #[test]
    fn client_blocks_are_grouped_without_filtering() {
        let blocks: Vec<ClientBlock> = serde_json::from_str(
            r#"[
                {"page": 2, "x": 10, "y": 10, "width": 20, "height": 10, "text": "a"},
                {"page": 2, "x": 11, "y": 10, "width": 20, "height": 10, "text": "b"},
                {"x": 5, "y": 6, "text": "c"}
            ]"#,
        )
        .unwrap();
        let pages = reorganize_from_client_blocks(blocks);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[&2].len(), 2);
        assert_eq!(pages[&1], vec![block(5.0, 6.0, 10.0, 5.0, "c")]);
    }
}
