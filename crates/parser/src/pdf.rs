//! PDF text extraction: pages in order, joined by blank lines.

use std::collections::HashMap;

use pdf::file::FileOptions;

use crate::{clean_text, ParseError, ParseResult};

pub(crate) fn parse(data: &[u8]) -> Result<ParseResult, ParseError> {
    let file = FileOptions::cached()
        .load(data)
        .map_err(|e| ParseError::Pdf(e.to_string()))?;

    let resolver = file.resolver();
    let page_count = file.num_pages();
    let mut full_text = String::new();

    for page_num in 0..page_count {
        let page = file
            .get_page(page_num)
            .map_err(|e| ParseError::Pdf(format!("第{}页提取失败: {e}", page_num + 1)))?;

        let Some(content) = &page.contents else {
            continue;
        };
        let operations = content
            .operations(&resolver)
            .map_err(|e| ParseError::Pdf(format!("第{}页提取失败: {e}", page_num + 1)))?;

        let mut page_text = String::new();
        for op in operations.iter() {
            match op {
                pdf::content::Op::TextDraw { text } => {
                    page_text.push_str(&text.to_string_lossy());
                }
                pdf::content::Op::TextDrawAdjusted { array } => {
                    for item in array.iter() {
                        if let pdf::content::TextDrawAdjusted::Text(text) = item {
                            page_text.push_str(&text.to_string_lossy());
                        }
                    }
                }
                _ => {}
            }
        }

        if !page_text.trim().is_empty() {
            if !full_text.is_empty() {
                full_text.push_str("\n\n");
            }
            full_text.push_str(&page_text);
        }
    }

    let text = clean_text(&full_text);
    if text.is_empty() {
        return Err(ParseError::Empty("pdf"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "pdf".into());
    metadata.insert("page_count".into(), page_count.to_string());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}
