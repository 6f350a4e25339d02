//! DOCX extraction: body text in document order from `word/document.xml`,
//! plus the document title from `docProps/core.xml` when present.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::Event;

use crate::{clean_text, ParseError, ParseResult};

/// Zip-bomb guard for a single XML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) fn parse(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| ParseError::Word(e.to_string()))?;

    let doc_xml = read_entry(&mut archive, "word/document.xml")
        .map_err(|e| ParseError::Word(e))?
        .ok_or_else(|| ParseError::Word("未找到word/document.xml".into()))?;

    let raw = extract_body_text(&doc_xml).map_err(ParseError::Word)?;
    let text = clean_text(&raw);
    if text.is_empty() {
        return Err(ParseError::Empty("word"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "word".into());
    if let Ok(Some(core_xml)) = read_entry(&mut archive, "docProps/core.xml") {
        if let Some(title) = extract_core_title(&core_xml) {
            metadata.insert("title".into(), title);
        }
    }

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    Ok(Some(out))
}

/// Walks `w:t` text runs; `w:p` ends and `w:br` become newlines, `w:tab`
/// becomes a tab.
fn extract_body_text(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
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

/// Pulls `dc:title` out of the core-properties part.
fn extract_core_title(xml: &[u8]) -> Option<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_title = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"title" => in_title = true,
            Ok(Event::Text(t)) if in_title => {
                let title = t.unescape().ok()?.trim().to_string();
                if title.is_empty() {
                    return None;
                }
                return Some(title);
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"title" => in_title = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str, core_xml: Option<&str>) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", opts).unwrap();
        zip.write_all(document_xml.as_bytes()).unwrap();
        if let Some(core) = core_xml {
            zip.start_file("docProps/core.xml", opts).unwrap();
            zip.write_all(core.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_paragraphs_in_order() {
        let data = docx_with(
            r#"<w:document xmlns:w="ns"><w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
            </w:body></w:document>"#,
            None,
        );
        let result = parse(&data).unwrap();
        assert_eq!(result.text, "First paragraph.\nSecond paragraph.");
        assert_eq!(result.metadata.get("type").unwrap(), "word");
    }

    #[test]
    fn extracts_title_from_core_properties() {
        let data = docx_with(
            r#"<w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>Body</w:t></w:r></w:p></w:body></w:document>"#,
            Some(r#"<cp:coreProperties xmlns:dc="dcns" xmlns:cp="cpns"><dc:title>手册</dc:title></cp:coreProperties>"#),
        );
        let result = parse(&data).unwrap();
        assert_eq!(result.metadata.get("title").unwrap(), "手册");
    }

    #[test]
    fn missing_document_part_is_an_error() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<x/>").unwrap();
        let data = zip.finish().unwrap().into_inner();
        let err = parse(&data).unwrap_err();
        assert!(err.to_string().starts_with("word解析错误"));
    }

    #[test]
    fn empty_body_is_an_empty_content_error() {
        let data = docx_with(
            r#"<w:document xmlns:w="ns"><w:body></w:body></w:document>"#,
            None,
        );
        let err = parse(&data).unwrap_err();
        assert_eq!(err.to_string(), "word文件内容为空");
    }
}
