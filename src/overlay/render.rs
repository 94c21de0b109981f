use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::layout::PlacedText;

/// Colours and font stack for overlay text.
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub fill_color: String,
    pub text_color: String,
    pub font_family: String,
}

/// SVG with the source image underneath and one opaque box plus text per placed block.
pub fn render_svg(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    placed: &[PlacedText],
    style: &OverlayStyle,
) -> String {
    let data_uri = format!("data:{};base64,{}", image_mime, BASE64.encode(image_bytes));
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for (idx, block) in placed.iter().enumerate() {
        let bg = block.background;
        svg.push_str(&format!(
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}"/>"#,
            x = bg.x0,
            y = bg.y0,
            w = bg.width(),
            h = bg.height(),
            fill = escape_xml(&style.fill_color)
        ));
        if block.lines.is_empty() {
            continue;
        }
        let clip_id = format!("clip-{}", idx);
        svg.push_str(&format!(
            r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}"/></clipPath>"#,
            id = clip_id,
            x = bg.x0,
            y = bg.y0,
            w = bg.width(),
            h = bg.height()
        ));
        svg.push_str(&format!(
            r#"<g clip-path="url(#{clip})" font-size="{size}" fill="{color}" font-family="{family}">"#,
            clip = clip_id,
            size = block.font_size,
            color = escape_xml(&style.text_color),
            family = escape_xml(&style.font_family)
        ));
        for line in &block.lines {
            svg.push_str(&format!(
                r#"<text x="{x}" y="{y}" xml:space="preserve">{text}</text>"#,
                x = line.x,
                y = line.top + block.font_size,
                text = escape_xml(&line.text)
            ));
        }
        svg.push_str("</g>");
    }

    svg.push_str("</svg>");
    svg
}

pub fn rasterize_svg(svg: &str, fontdb: Arc<fontdb::Database>) -> Result<image::RgbaImage> {
    let options = Options {
        fontdb,
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    image::RgbaImage::from_raw(size.width(), size.height(), pixmap.take())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
