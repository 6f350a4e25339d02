//! PPTX extraction: slides in numeric order, each prefixed `Slide {n}:`,
//! separated by blank lines.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::Event;

use crate::{clean_text, ParseError, ParseResult};

const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) fn parse(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ParseError::Ppt(e.to_string()))?;

    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let slide_count = slide_names.len();
    let mut out = String::new();
    for (i, name) in slide_names.iter().enumerate() {
        let mut xml = Vec::new();
        archive
            .by_name(name)
            .map_err(|e| ParseError::Ppt(e.to_string()))?
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|e| ParseError::Ppt(e.to_string()))?;

        let slide_text = extract_slide_text(&xml).map_err(ParseError::Ppt)?;
        if slide_text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("Slide {}:\n{}", i + 1, slide_text));
    }

    let text = clean_text(&out);
    if text.is_empty() {
        return Err(ParseError::Empty("ppt"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "ppt".into());
    metadata.insert("slide_count".into(), slide_count.to_string());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}

/// Walks `a:t` runs; `a:p` paragraph ends become newlines.
fn extract_slide_text(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
