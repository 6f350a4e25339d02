//! Spreadsheet extraction. Both the modern XLSX path and the legacy BIFF
//! path delegate cell decoding to calamine and emit one line per non-empty
//! cell: `"{sheet}-{row},{col}: {value}"` with 1-based indices.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, Range, Reader, Xls, Xlsx};

use crate::{clean_text, ParseError, ParseResult};

pub(crate) fn parse_xlsx(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(data)).map_err(|e| ParseError::Excel(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut out = String::new();
    for name in &sheet_names {
        if let Ok(range) = workbook.worksheet_range(name) {
            append_cells(&mut out, name, &range);
        }
    }

    let text = clean_text(&out);
    if text.is_empty() {
        return Err(ParseError::Empty("excel"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "excel".into());
    metadata.insert("sheet_count".into(), sheet_names.len().to_string());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}

pub(crate) fn parse_xls(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut workbook: Xls<_> =
        Xls::new(Cursor::new(data)).map_err(|e| ParseError::Xls(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut out = String::new();
    for name in &sheet_names {
        if let Ok(range) = workbook.worksheet_range(name) {
            append_cells(&mut out, name, &range);
        }
    }

    let text = clean_text(&out);
    if text.is_empty() {
        return Err(ParseError::Empty("xls"));
    }

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "excel".into());
    metadata.insert("format".into(), "xls_legacy".into());
    metadata.insert("sheet_count".into(), sheet_names.len().to_string());

    Ok(ParseResult {
        text,
        images: Vec::new(),
        metadata,
    })
}

fn append_cells(out: &mut String, sheet_name: &str, range: &Range<Data>) {
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    for (row, col, cell) in range.used_cells() {
        if matches!(cell, Data::Empty) {
            continue;
        }
        let value = cell.to_string();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        // 1-based absolute coordinates
        let abs_row = start_row as usize + row + 1;
        let abs_col = start_col as usize + col + 1;
        out.push_str(&format!("{sheet_name}-{abs_row},{abs_col}: {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_xlsx_is_an_excel_error() {
        let err = parse_xlsx(b"PK\x03\x04garbage").unwrap_err();
        assert!(err.to_string().starts_with("excel解析错误"));
    }

    #[test]
    fn invalid_xls_is_an_xls_error() {
        let err = parse_xls(b"\xD0\xCF\x11\xE0garbage").unwrap_err();
        assert!(err.to_string().starts_with("xls解析错误"));
    }
}
