use anyhow::{Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::io::Cursor;

use super::{RawBlock, RawLine, RawPage, RawSpan};
use crate::geom::{BBox, PageSize};

/// Parses mupdf structured text (`mutool draw -F stext`).
pub fn parse_stext(xml: &[u8]) -> Result<Vec<RawPage>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    let mut buf = Vec::new();
    let mut pages = Vec::new();
    let mut page: Option<RawPage> = None;
    let mut block: Option<RawBlock> = None;
    let mut line: Option<RawLine> = None;
    let mut span: Option<RawSpan> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"page" => page = Some(start_page(&e, b"width", b"height")?),
                b"block" => {
                    if let Some(bbox) = attr_bbox(&e)? {
                        block = Some(RawBlock {
                            bbox,
                            lines: Vec::new(),
                        });
                    }
                }
                b"line" => line = Some(RawLine::default()),
                b"font" => {
                    span = Some(RawSpan {
                        text: String::new(),
                        size: attr_f32(&e, b"size")?,
                    })
                }
                b"char" => push_char(&e, span.as_mut())?,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"char" {
                    push_char(&e, span.as_mut())?;
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"font" => {
                    if let (Some(done), Some(line)) = (span.take(), line.as_mut()) {
                        line.spans.push(done);
                    }
                }
                b"line" => {
                    if let (Some(done), Some(block)) = (line.take(), block.as_mut()) {
                        block.lines.push(done);
                    }
                }
                b"block" => {
                    if let (Some(done), Some(page)) = (block.take(), page.as_mut()) {
                        if !done.lines.is_empty() {
                            page.blocks.push(done);
                        }
                    }
                }
                b"page" => {
                    if let Some(done) = page.take() {
                        pages.push(done);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(anyhow!("failed to parse stext xml: {}", err)),
        }
        buf.clear();
    }
    Ok(pages)
}

/// Parses poppler's `pdftotext -bbox-layout` output. Spans carry the line height as their size.
pub fn parse_bbox_layout(xml: &[u8]) -> Result<Vec<RawPage>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    reader.check_end_names(false);
    let mut buf = Vec::new();
    let mut pages = Vec::new();
    let mut page: Option<RawPage> = None;
    let mut block: Option<RawBlock> = None;
    let mut line: Option<(f32, Vec<String>)> = None;
    let mut word: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"page" => page = Some(start_page(&e, b"width", b"height")?),
                b"block" => {
                    block = Some(RawBlock {
                        bbox: min_max_bbox(&e)?,
                        lines: Vec::new(),
                    })
                }
                b"line" => {
                    let bbox = min_max_bbox(&e)?;
                    line = Some((bbox.height(), Vec::new()));
                }
                b"word" => word = Some(String::new()),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(word) = word.as_mut() {
                    word.push_str(&e.unescape()?);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"word" => {
                    if let (Some(done), Some((_, words))) = (word.take(), line.as_mut()) {
                        words.push(done);
                    }
                }
                b"line" => {
                    if let (Some((height, words)), Some(block)) = (line.take(), block.as_mut()) {
                        block.lines.push(RawLine {
                            spans: vec![RawSpan {
                                text: words.join(" "),
                                size: (height > 0.0).then_some(height),
                            }],
                        });
                    }
                }
                b"block" => {
                    if let (Some(done), Some(page)) = (block.take(), page.as_mut()) {
                        if !done.lines.is_empty() {
                            page.blocks.push(done);
                        }
                    }
                }
                b"page" => {
                    if let Some(done) = page.take() {
                        pages.push(done);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(anyhow!("failed to parse bbox layout: {}", err)),
        }
        buf.clear();
    }
    Ok(pages)
}

fn start_page(e: &BytesStart<'_>, width: &[u8], height: &[u8]) -> Result<RawPage> {
    let width = attr_f32(e, width)?.ok_or_else(|| anyhow!("page without width"))?;
    let height = attr_f32(e, height)?.ok_or_else(|| anyhow!("page without height"))?;
    Ok(RawPage {
        size: PageSize { width, height },
        blocks: Vec::new(),
    })
}

fn push_char(e: &BytesStart<'_>, span: Option<&mut RawSpan>) -> Result<()> {
    if let (Some(span), Some(c)) = (span, attr_string(e, b"c")?) {
        span.text.push_str(&c);
    }
    Ok(())
}

fn attr_string(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_f32(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<f32>> {
    Ok(attr_string(e, key)?.and_then(|value| value.trim().parse().ok()))
}

fn attr_bbox(e: &BytesStart<'_>) -> Result<Option<BBox>> {
    let Some(value) = attr_string(e, b"bbox")? else {
        return Ok(None);
    };
    let numbers = value
        .split_whitespace()
        .filter_map(|part| part.parse::<f32>().ok())
        .collect::<Vec<_>>();
    match numbers.as_slice() {
        [x0, y0, x1, y1] => Ok(Some(BBox::new(*x0, *y0, *x1, *y1))),
        _ => Err(anyhow!("malformed bbox '{}'", value)),
    }
}

fn min_max_bbox(e: &BytesStart<'_>) -> Result<BBox> {
    let get = |key: &[u8]| -> Result<f32> {
        attr_f32(e, key)?.ok_or_else(|| {
            anyhow!(
                "missing {} attribute",
                String::from_utf8_lossy(key).into_owned()
            )
        })
    };
    Ok(BBox::new(
        get(b"xMin")?,
        get(b"yMin")?,
        get(b"xMax")?,
        get(b"yMax")?,
    ))
}
