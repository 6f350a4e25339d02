//! End-to-end decoding of a synthesized legacy `.doc`: an OLE2 container
//! whose piece table mixes ANSI and UTF-16 pieces, carries a field-code
//! line, and whose `Data` stream embeds an image.

use std::io::{Cursor, Write};

use anyhow::Result;
use ragdesk_parser::DocumentParser;

/// Text area offset inside the synthesized WordDocument stream.
const TEXT_BASE: usize = 0x400;

/// Builds a WordDocument stream + 1Table stream describing three pieces:
/// ANSI `"Hello\r"`, UTF-16 `"世界\r"`, ANSI `"HYPERLINK noise\r"`.
fn build_word_streams() -> (Vec<u8>, Vec<u8>) {
    let ansi1 = b"Hello\r";
    let uni: Vec<u8> = "世界\r".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let ansi2 = b"HYPERLINK noise\r";

    let mut word_doc = vec![0u8; 0x600];
    // FIB flags: bit 9 set → table stream is 1Table.
    word_doc[0x0A..0x0C].copy_from_slice(&0x0200u16.to_le_bytes());

    let off1 = TEXT_BASE;
    let off2 = TEXT_BASE + 0x40;
    let off3 = TEXT_BASE + 0x80;
    word_doc[off1..off1 + ansi1.len()].copy_from_slice(ansi1);
    word_doc[off2..off2 + uni.len()].copy_from_slice(&uni);
    word_doc[off3..off3 + ansi2.len()].copy_from_slice(ansi2);

    // Character positions: 6 ANSI chars, 3 UTF-16 chars, 16 ANSI chars.
    let cps: [u32; 4] = [0, 6, 9, 25];
    // PCDs: flags(2) + fc(4) + prm(2). ANSI pieces double the offset and set
    // the fc high bit.
    let pcds: [(u32, bool); 3] = [
        ((off1 * 2) as u32, false),
        (off2 as u32, true),
        ((off3 * 2) as u32, false),
    ];

    let mut plc_pcd = Vec::new();
    for cp in cps {
        plc_pcd.extend_from_slice(&cp.to_le_bytes());
    }
    for (fc, unicode) in pcds {
        plc_pcd.extend_from_slice(&0u16.to_le_bytes());
        let fc_compressed = if unicode { fc } else { fc | 0x4000_0000 };
        plc_pcd.extend_from_slice(&fc_compressed.to_le_bytes());
        plc_pcd.extend_from_slice(&0u16.to_le_bytes());
    }

    // CLX: Pcdt marker, PlcPcd length, PlcPcd.
    let mut table = vec![0x02u8];
    table.extend_from_slice(&(plc_pcd.len() as u32).to_le_bytes());
    table.extend_from_slice(&plc_pcd);

    // FIB: fcClx = 0 (CLX starts the table stream), lcbClx = CLX length.
    word_doc[0x01A2..0x01A6].copy_from_slice(&0u32.to_le_bytes());
    word_doc[0x01A6..0x01AA].copy_from_slice(&(table.len() as u32).to_le_bytes());

    (word_doc, table)
}

fn fake_jpeg() -> Vec<u8> {
    let mut v = vec![0xFF, 0xD8, 0xFF, 0xE0];
    v.extend(std::iter::repeat(0x5A).take(2000));
    v.extend_from_slice(&[0xFF, 0xD9]);
    v
}

fn build_doc(with_data_stream: bool) -> Result<Vec<u8>> {
    let (word_doc, table) = build_word_streams();

    let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;
    compound
        .create_stream("/WordDocument")?
        .write_all(&word_doc)?;
    compound.create_stream("/1Table")?.write_all(&table)?;
    if with_data_stream {
        compound.create_stream("/Data")?.write_all(&fake_jpeg())?;
    }
    Ok(compound.into_inner().into_inner())
}

#[test]
fn piece_table_text_is_decoded_and_filtered() -> Result<()> {
    let data = build_doc(false)?;
    let result = DocumentParser::new().parse(&data, "word")?;

    assert_eq!(result.text, "Hello\n世界");
    assert_eq!(result.metadata.get("format").unwrap(), "doc_legacy");
    assert!(!result.text.contains("HYPERLINK"));
    Ok(())
}

#[test]
fn data_stream_images_are_recovered() -> Result<()> {
    let data = build_doc(true)?;
    let result = DocumentParser::new().parse(&data, "word")?;

    assert_eq!(result.images.len(), 1);
    assert_eq!(result.images[0].alt, "DOC图片1");
    assert!(result.images[0].data.starts_with(&[0xFF, 0xD8, 0xFF]));
    assert_eq!(result.metadata.get("image_count").unwrap(), "1");
    Ok(())
}

#[test]
fn cleanup_invariants_hold() -> Result<()> {
    let data = build_doc(false)?;
    let result = DocumentParser::new().parse(&data, "word")?;

    for line in result.text.lines() {
        assert_eq!(line, line.trim());
        assert!(!line.contains("  "));
    }
    assert!(!result.text.contains("\n\n\n"));
    assert!(result
        .text
        .chars()
        .all(|c| c == '\n' || c == '\t' || !c.is_control()));
    Ok(())
}
