//! Legacy `.doc` (OLE2 WordDocument) extraction.
//!
//! The text lives in the `WordDocument` stream; the piece table that maps
//! character positions to byte ranges and encodings lives in the CLX
//! structure of the `0Table`/`1Table` stream (selected by FIB flag bit 9).
//! When the piece table cannot be read, a best-effort printable-sequence
//! scan of the WordDocument stream is used instead.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use tracing::warn;

use super::images::scan_embedded_images;
use crate::{clean_text, ParseError, ParseResult};

/// FIB offset of the flags word carrying `fWhichTblStm` (bit 9).
const FIB_FLAGS_OFFSET: usize = 0x0A;
/// FIB offset of `fcClx` (CLX position in the table stream).
const FIB_FC_CLX_OFFSET: usize = 0x01A2;

/// Word field-code markers; lines containing any of these are dropped.
const FIELD_CODE_PATTERNS: &[&str] = &[
    "HYPERLINK",
    "PAGEREF",
    "MERGEFORMAT",
    "TOC \\o",
    "TOC \\h",
    "\\l \"",
    " \\h",
];

pub(crate) fn parse(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut compound =
        cfb::CompoundFile::open(Cursor::new(data)).map_err(|e| ParseError::Doc(e.to_string()))?;

    let word_doc = read_stream(&mut compound, "WordDocument")
        .ok_or_else(|| ParseError::Doc("未找到WordDocument流".into()))?;
    let table0 = read_stream(&mut compound, "0Table");
    let table1 = read_stream(&mut compound, "1Table");
    let data_stream = read_stream(&mut compound, "Data");

    let table = select_table_stream(&word_doc, table0, table1);

    let mut text = extract_text(&word_doc, table.as_deref());
    text = filter_field_codes(&text);
    let text = clean_text(&text);
    if text.is_empty() {
        return Err(ParseError::Empty("doc"));
    }

    let images = match data_stream {
        Some(stream) if !stream.is_empty() => scan_embedded_images(&stream, "DOC图片"),
        _ => Vec::new(),
    };

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "word".into());
    metadata.insert("format".into(), "doc_legacy".into());
    metadata.insert("image_count".into(), images.len().to_string());

    Ok(ParseResult {
        text,
        images,
        metadata,
    })
}

fn read_stream(compound: &mut cfb::CompoundFile<Cursor<&[u8]>>, name: &str) -> Option<Vec<u8>> {
    let mut stream = compound.open_stream(format!("/{name}")).ok()?;
    let mut out = Vec::new();
    stream.read_to_end(&mut out).ok()?;
    Some(out)
}

/// FIB flag bit 9 chooses between `0Table` and `1Table`; fall back to
/// whichever stream actually exists.
fn select_table_stream(
    word_doc: &[u8],
    table0: Option<Vec<u8>>,
    table1: Option<Vec<u8>>,
) -> Option<Vec<u8>> {
    if word_doc.len() < FIB_FLAGS_OFFSET + 2 {
        return table1.or(table0);
    }
    let flags = u16_le(word_doc, FIB_FLAGS_OFFSET);
    if (flags >> 9) & 1 == 1 {
        table1.or(table0)
    } else {
        table0.or(table1)
    }
}

fn extract_text(word_doc: &[u8], table: Option<&[u8]>) -> String {
    if let Some(table) = table {
        if let Some(text) = extract_from_piece_table(word_doc, table) {
            return text;
        }
        warn!("doc piece table unusable, falling back to direct scan");
    }
    extract_direct_text(word_doc)
}

/// Reads the CLX out of the table stream and walks the piece table,
/// decoding each piece as ANSI or UTF-16LE.
fn extract_from_piece_table(word_doc: &[u8], table: &[u8]) -> Option<String> {
    if word_doc.len() < FIB_FC_CLX_OFFSET + 8 {
        return None;
    }

    let fc_clx = u32_le(word_doc, FIB_FC_CLX_OFFSET) as usize;
    let lcb_clx = u32_le(word_doc, FIB_FC_CLX_OFFSET + 4) as usize;
    if fc_clx == 0 || lcb_clx == 0 || fc_clx.checked_add(lcb_clx)? > table.len() {
        return None;
    }
    let clx = &table[fc_clx..fc_clx + lcb_clx];

    // Skip Prc entries (0x01) until the Pcdt marker (0x02).
    let mut pos = 0usize;
    while pos < clx.len() {
        match clx[pos] {
            0x01 => {
                if pos + 3 > clx.len() {
                    return None;
                }
                let cb_grpprl = u16_le(clx, pos + 1) as usize;
                pos += 3 + cb_grpprl;
            }
            0x02 => {
                pos += 1;
                break;
            }
            _ => return None,
        }
    }
    if pos + 4 > clx.len() {
        return None;
    }

    let lcb = u32_le(clx, pos) as usize;
    pos += 4;
    if lcb < 12 || pos + lcb > clx.len() {
        return None;
    }
    let plc_pcd = &clx[pos..pos + lcb];

    // PlcPcd: n+1 character positions (u32) followed by n PCDs (8 bytes).
    const PCD_SIZE: usize = 8;
    let n = (lcb - 4) / (4 + PCD_SIZE);
    if n == 0 {
        return None;
    }
    let cp_array_size = (n + 1) * 4;
    if cp_array_size + n * PCD_SIZE > lcb {
        return None;
    }

    let mut out = String::new();
    for i in 0..n {
        let cp_start = u32_le(plc_pcd, i * 4);
        let cp_end = u32_le(plc_pcd, (i + 1) * 4);
        let char_count = cp_end.saturating_sub(cp_start);
        if char_count == 0 || char_count > 1_000_000 {
            continue;
        }

        let pcd_offset = cp_array_size + i * PCD_SIZE;
        // PCD: flags(2) + fc(4) + prm(2); the fc's high bit selects ANSI.
        let fc_compressed = u32_le(plc_pcd, pcd_offset + 2);
        let is_unicode = fc_compressed & 0x4000_0000 == 0;
        let fc = (fc_compressed & 0x3FFF_FFFF) as usize;

        if is_unicode {
            let byte_len = char_count as usize * 2;
            let Some(end) = fc.checked_add(byte_len) else {
                continue;
            };
            if end > word_doc.len() {
                continue;
            }
            let piece = &word_doc[fc..end];
            let units: Vec<u16> = piece
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            for r in char::decode_utf16(units.into_iter()) {
                match r {
                    Ok(c) => push_doc_char(&mut out, c),
                    Err(_) => {}
                }
            }
        } else {
            // ANSI pieces store the offset doubled.
            let offset = fc / 2;
            let Some(end) = offset.checked_add(char_count as usize) else {
                continue;
            };
            if end > word_doc.len() {
                continue;
            }
            for &b in &word_doc[offset..end] {
                push_doc_char(&mut out, b as char);
            }
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Word control codes: 0x0D (paragraph) and 0x0B (line break) become `\n`,
/// 0x07 (cell end) becomes `\t`; other codes below 0x20 are dropped.
fn push_doc_char(out: &mut String, c: char) {
    match c {
        '\u{0D}' | '\u{0B}' => out.push('\n'),
        '\u{07}' => out.push('\t'),
        '\u{09}' => out.push('\t'),
        c if (c as u32) >= 0x20 => out.push(c),
        _ => {}
    }
}

/// Best-effort fallback: collect printable ASCII sequences from the raw
/// stream, separating blocks with newlines.
fn extract_direct_text(word_doc: &[u8]) -> String {
    let mut out = String::new();
    let mut in_text = false;
    for &b in word_doc {
        if (0x20..0x7F).contains(&b) || b == 0x0A || b == 0x0D || b == 0x09 {
            if b == 0x0D {
                out.push('\n');
            } else {
                out.push(b as char);
            }
            in_text = true;
        } else {
            if in_text && !out.ends_with('\n') {
                out.push('\n');
            }
            in_text = false;
        }
    }
    out
}

/// Drops lines carrying Word field-code markers (HYPERLINK, PAGEREF, …).
fn filter_field_codes(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed.is_empty()
                || !FIELD_CODE_PATTERNS
                    .iter()
                    .any(|pat| trimmed.contains(pat))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn u16_le(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}
