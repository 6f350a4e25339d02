//! Legacy `.ppt` (OLE2) extraction.
//!
//! Text comes from `TextBytesAtom`/`TextCharsAtom` records in the
//! `PowerPoint Document` stream; embedded images come from BLIP records in
//! the `Pictures` stream, including raster recovery from EMF/WMF metafiles.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use tracing::warn;

use super::images::extract_raster_from_metafile;
use crate::{clean_text, ImageRef, ParseError, ParseResult, MIN_IMAGE_SIZE};

/// TextCharsAtom: UTF-16LE text.
const REC_TEXT_CHARS: u16 = 0x0FA0;
/// TextBytesAtom: ANSI text.
const REC_TEXT_BYTES: u16 = 0x0FA8;

/// Master-slide placeholder substrings to drop.
const NOISE_PATTERNS: &[&str] = &[
    "单击此处编辑母版",
    "单击此处编辑母版标题样式",
    "单击此处编辑母版文本样式",
    "单击此处编辑母版副标题样式",
    "Click to edit Master title style",
    "Click to edit Master text styles",
    "Click to edit Master subtitle style",
];

/// Master-slide placeholder exact matches.
const NOISE_EXACT: &[&str] = &[
    "*",
    "二级",
    "三级",
    "四级",
    "五级",
    "Second level",
    "Third level",
    "Fourth level",
    "Fifth level",
];

pub(crate) fn parse(data: &[u8]) -> Result<ParseResult, ParseError> {
    let mut compound =
        cfb::CompoundFile::open(Cursor::new(data)).map_err(|e| ParseError::Ppt(e.to_string()))?;

    let ppt_data = read_stream(&mut compound, "PowerPoint Document")
        .ok_or_else(|| ParseError::Ppt("未找到PowerPoint Document流".into()))?;
    let pictures = read_stream(&mut compound, "Pictures");

    let text = clean_text(&extract_record_text(&ppt_data));
    if text.is_empty() {
        return Err(ParseError::Empty("ppt"));
    }

    let images = match pictures {
        Some(stream) if !stream.is_empty() => extract_pictures(&stream),
        _ => Vec::new(),
    };

    let mut metadata = HashMap::new();
    metadata.insert("type".into(), "ppt".into());
    metadata.insert("format".into(), "ppt_legacy".into());
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

fn is_noise(text: &str) -> bool {
    NOISE_EXACT.contains(&text) || NOISE_PATTERNS.iter().any(|pat| text.contains(pat))
}

/// Walks the 8-byte record headers. Container records (version nibble 0x0F)
/// are descended into by *not* skipping their length, so their sub-records
/// are parsed on the next iteration.
pub(crate) fn extract_record_text(data: &[u8]) -> String {
    let mut out = String::new();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let ver_instance = u16_le(data, pos);
        let rec_type = u16_le(data, pos + 2);
        let rec_len = u32_le(data, pos + 4) as usize;
        let rec_ver = ver_instance & 0x0F;
        pos += 8;

        if rec_len > data.len() - pos {
            break;
        }

        match rec_type {
            REC_TEXT_CHARS => {
                if rec_len >= 2 {
                    let units: Vec<u16> = data[pos..pos + rec_len]
                        .chunks_exact(2)
                        .map(|b| u16::from_le_bytes([b[0], b[1]]))
                        .collect();
                    let text: String = char::decode_utf16(units.into_iter())
                        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect();
                    let text = text.trim();
                    if !text.is_empty() && !is_noise(text) {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                pos += rec_len;
            }
            REC_TEXT_BYTES => {
                if rec_len > 0 {
                    let text = String::from_utf8_lossy(&data[pos..pos + rec_len]);
                    let text = text.trim();
                    if !text.is_empty() && !is_noise(text) {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                pos += rec_len;
            }
            _ => {
                if rec_ver != 0x0F {
                    pos += rec_len;
                }
            }
        }
    }

    out
}

/// Walks BLIP records in the `Pictures` stream. EMF 0xF01A / WMF 0xF01B /
/// JPEG 0xF01D / PNG 0xF01E; instance bit 4 selects single vs dual UID
/// headers; metafile payloads are inflated when the compression byte says
/// so, then mined for an embedded raster.
pub(crate) fn extract_pictures(pictures: &[u8]) -> Vec<ImageRef> {
    let mut images = Vec::new();
    let mut image_index = 1usize;
    let mut pos = 0usize;

    while pos + 8 <= pictures.len() {
        let ver_instance = u16_le(pictures, pos);
        let rec_type = u16_le(pictures, pos + 2);
        let rec_len = u32_le(pictures, pos + 4) as usize;
        let rec_instance = ver_instance >> 4;

        if rec_len > pictures.len() - (pos + 8) {
            break;
        }

        let record_start = pos + 8;
        pos += 8 + rec_len;

        // Instance bit 4 set means the BLIP carries two 16-byte UIDs.
        let dual_uid = rec_instance & 0x10 != 0;
        let uid_size = if dual_uid { 32 } else { 16 };

        let (blip_header_size, is_metafile) = match rec_type {
            // EMF / WMF: UID(s) + 34-byte metafile header
            0xF01A | 0xF01B => (uid_size + 34, true),
            // JPEG / PNG: UID(s) + 1 tag byte
            0xF01D | 0xF01E => (uid_size + 1, false),
            _ => continue,
        };
        if rec_len < blip_header_size {
            continue;
        }

        let mut image_data =
            pictures[record_start + blip_header_size..record_start + rec_len].to_vec();

        if is_metafile {
            // Compression byte sits at offset 32 of the metafile header.
            let meta_header_start = record_start + uid_size;
            if meta_header_start + 34 > record_start + rec_len {
                continue;
            }
            let compression = pictures[meta_header_start + 32];

            let raw_metafile = if compression == 0x00 {
                let mut decoder = ZlibDecoder::new(image_data.as_slice());
                let mut inflated = Vec::new();
                match decoder.read_to_end(&mut inflated) {
                    Ok(_) => inflated,
                    Err(e) => {
                        warn!("ppt metafile zlib decompress failed: {e}");
                        continue;
                    }
                }
            } else {
                image_data
            };

            match extract_raster_from_metafile(&raw_metafile, rec_type) {
                Some(raster) if raster.len() >= MIN_IMAGE_SIZE => image_data = raster,
                _ => {
                    warn!("ppt metafile image {image_index} has no extractable raster, skipping");
                    continue;
                }
            }
        }

        if image_data.len() < MIN_IMAGE_SIZE {
            continue;
        }

        images.push(ImageRef {
            alt: format!("PPT图片{image_index}"),
            data: image_data,
        });
        image_index += 1;
    }

    images
}

fn u16_le(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ver_instance: u16, rec_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&ver_instance.to_le_bytes());
        v.extend_from_slice(&rec_type.to_le_bytes());
        v.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn ansi_and_unicode_atoms_are_decoded() {
        let mut stream = record(0, REC_TEXT_BYTES, b"Hello slides");
        stream.extend(record(0, REC_TEXT_CHARS, &utf16le("你好世界")));
        let text = extract_record_text(&stream);
        assert_eq!(text, "Hello slides\n你好世界");
    }

    #[test]
    fn containers_are_descended_into() {
        let inner = record(0, REC_TEXT_BYTES, b"nested text");
        // Container header (version nibble 0x0F) followed by the inner record.
        let mut stream = Vec::new();
        stream.extend_from_slice(&0x000Fu16.to_le_bytes());
        stream.extend_from_slice(&0x03EEu16.to_le_bytes()); // arbitrary container type
        stream.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        stream.extend(inner);
        let text = extract_record_text(&stream);
        assert_eq!(text, "nested text");
    }

    #[test]
    fn master_slide_noise_is_filtered() {
        let mut stream = record(0, REC_TEXT_BYTES, "单击此处编辑母版标题样式".as_bytes());
        stream.extend(record(0, REC_TEXT_BYTES, b"Real content"));
        stream.extend(record(0, REC_TEXT_BYTES, b"Second level"));
        let text = extract_record_text(&stream);
        assert_eq!(text, "Real content");
    }

    #[test]
    fn png_blip_is_extracted() {
        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend(vec![0x22u8; 2000]);
        png.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
        ]);

        // Single-UID PNG BLIP: instance 0x6E0 (bit 4 clear), 16-byte UID +
        // tag byte.
        let mut payload = vec![0u8; 16];
        payload.push(0xFF);
        payload.extend_from_slice(&png);
        let stream = record(0x6E0 << 4, 0xF01E, &payload);

        let images = extract_pictures(&stream);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].alt, "PPT图片1");
        assert_eq!(images[0].data, png);
    }

    #[test]
    fn dual_uid_jpeg_blip_is_extracted() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend(vec![0x11u8; 2000]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        // Dual-UID JPEG BLIP: instance 0x47B (bit 4 set), 32 bytes of UIDs +
        // tag byte.
        let mut payload = vec![0u8; 32];
        payload.push(0xFF);
        payload.extend_from_slice(&jpeg);
        let stream = record(0x47B << 4, 0xF01D, &payload);

        let images = extract_pictures(&stream);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].data, jpeg);
    }

    #[test]
    fn odd_instance_without_bit_4_is_still_single_uid() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend(vec![0x11u8; 2000]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        // Instance 0x46B has bit 0 set but bit 4 clear: one 16-byte UID.
        let mut payload = vec![0u8; 16];
        payload.push(0xFF);
        payload.extend_from_slice(&jpeg);
        let stream = record(0x46B << 4, 0xF01D, &payload);

        let images = extract_pictures(&stream);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].data, jpeg);
    }

    #[test]
    fn undersized_blips_are_dropped() {
        let mut payload = vec![0u8; 17];
        payload.extend_from_slice(&[0x89, 0x50, 0x4E, 0x47]);
        let stream = record(0x6E0 << 4, 0xF01E, &payload);
        assert!(extract_pictures(&stream).is_empty());
    }

    #[test]
    fn invalid_container_is_a_ppt_error() {
        let err = parse(b"\xD0\xCF\x11\xE0 truncated").unwrap_err();
        assert!(err.to_string().starts_with("ppt解析错误"));
    }
}
