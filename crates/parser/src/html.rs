//! HTML and Markdown extraction. HTML is stripped of non-content tags and
//! converted to text via html2md; Markdown is a cleaned passthrough.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

use crate::{clean_text, ParseError, ParseResult};

/// Tags whose entire content is noise for retrieval.
const STRIP_TAGS: &[&str] = &["script", "style", "meta", "link"];

fn strip_tag_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        STRIP_TAGS
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>|<{tag}[^>]*>")).unwrap()
            })
            .collect()
    })
}

pub(crate) fn parse_html(data: &[u8]) -> Result<ParseResult, ParseError> {
    let raw = std::str::from_utf8(data).map_err(|e| ParseError::Html(e.to_string()))?;

    let mut stripped = raw.to_string();
    for re in strip_tag_res() {
        stripped = re.replace_all(&stripped, "").to_string();
    }

    let markdown = html2md::parse_html(&stripped);
    let text = clean_text(&markdown);
    if text.is_empty() {
        return Err(ParseError::Empty("html"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "html".into());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}

pub(crate) fn parse_markdown(data: &[u8]) -> Result<ParseResult, ParseError> {
    let raw = std::str::from_utf8(data).map_err(|e| ParseError::Html(e.to_string()))?;
    let text = clean_text(raw);
    if text.is_empty() {
        return Err(ParseError::Empty("markdown"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "markdown".into());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}
