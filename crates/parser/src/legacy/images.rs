//! Raster recovery for the legacy decoders: magic-byte scanning over raw
//! streams, DIB extraction from EMF/WMF metafile records, and DIB → PNG
//! re-encoding.

use std::io::Cursor;

use tracing::warn;

use crate::{ImageRef, MIN_IMAGE_SIZE};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const JPEG_EOI: &[u8] = &[0xFF, 0xD9];
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_IEND: &[u8] = &[0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82];

/// Scans a raw stream (the `.doc` `Data` stream) for embedded JPEG/PNG
/// images by magic bytes. A JPEG runs to its last EOI marker before the next
/// image magic; a PNG runs to its IEND chunk. Images under the minimum size
/// are discarded.
pub(crate) fn scan_embedded_images(stream: &[u8], alt_prefix: &str) -> Vec<ImageRef> {
    let mut images = Vec::new();
    let mut image_index = 1usize;
    let mut pos = 0usize;

    while pos < stream.len() {
        if stream[pos..].starts_with(JPEG_MAGIC) {
            // Bound the search at the next image magic (or end of stream).
            let mut boundary = stream.len();
            let mut scan = pos + 3;
            while scan < stream.len() {
                if stream[scan..].starts_with(JPEG_MAGIC) || stream[scan..].starts_with(PNG_MAGIC) {
                    boundary = scan;
                    break;
                }
                scan += 1;
            }
            if let Some(last_eoi) = rfind(&stream[pos + 3..boundary], JPEG_EOI) {
                let end = pos + 3 + last_eoi + 2;
                let data = &stream[pos..end];
                if data.len() >= MIN_IMAGE_SIZE {
                    images.push(ImageRef {
                        alt: format!("{alt_prefix}{image_index}"),
                        data: data.to_vec(),
                    });
                    image_index += 1;
                }
                pos = end;
                continue;
            }
            pos += 1;
            continue;
        }

        if stream[pos..].starts_with(PNG_MAGIC) {
            if let Some(iend) = find(&stream[pos + 8..], PNG_IEND) {
                let end = pos + 8 + iend + PNG_IEND.len();
                let data = &stream[pos..end];
                if data.len() >= MIN_IMAGE_SIZE {
                    images.push(ImageRef {
                        alt: format!("{alt_prefix}{image_index}"),
                        data: data.to_vec(),
                    });
                    image_index += 1;
                }
                pos = end;
                continue;
            }
            pos += 1;
            continue;
        }

        pos += 1;
    }

    images
}

/// Tries, in order: a magic-byte scan for an embedded raster, then the
/// format-specific DIB records (`EMR_STRETCHDIBITS`/`EMR_SETDIBITSTODEVICE`
/// for EMF, `META_STRETCHDIB`/`META_DIBSTRETCHBLT` for WMF).
pub(crate) fn extract_raster_from_metafile(data: &[u8], rec_type: u16) -> Option<Vec<u8>> {
    if let Some(img) = find_embedded_raster(data) {
        return Some(img);
    }
    match rec_type {
        0xF01A => extract_dib_from_emf(data),
        0xF01B => extract_dib_from_wmf(data),
        _ => None,
    }
}

/// Returns the largest JPEG or PNG found anywhere in `data` by magic bytes.
fn find_embedded_raster(data: &[u8]) -> Option<Vec<u8>> {
    let mut best: &[u8] = &[];

    for i in 0..data.len().saturating_sub(3) {
        if data[i..].starts_with(JPEG_MAGIC) {
            if let Some(len) = jpeg_len(&data[i..]) {
                if len > best.len() {
                    best = &data[i..i + len];
                }
            }
        }
    }

    for i in 0..data.len().saturating_sub(8) {
        if data[i..].starts_with(PNG_MAGIC) {
            if let Some(len) = png_len(&data[i..]) {
                if len > best.len() {
                    best = &data[i..i + len];
                }
            }
        }
    }

    if best.len() >= MIN_IMAGE_SIZE {
        Some(best.to_vec())
    } else {
        None
    }
}

/// Length of a JPEG starting at `data[0]`, found by scanning for the EOI
/// marker.
fn jpeg_len(data: &[u8]) -> Option<usize> {
    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] == 0xFF && data[i + 1] == 0xD9 {
            return Some(i + 2);
        }
        i += 1;
    }
    None
}

/// Length of a PNG starting at `data[0]`, found by scanning for the IEND
/// chunk name and including its CRC.
fn png_len(data: &[u8]) -> Option<usize> {
    let iend = b"IEND";
    let mut i = 8;
    while i + 8 <= data.len() {
        if &data[i..i + 4] == iend {
            let end = i + 4 + 4;
            if end <= data.len() {
                return Some(end);
            }
            return None;
        }
        i += 1;
    }
    None
}

/// Walks EMF records collecting the largest DIB carried by a bitmap record,
/// then re-encodes it as PNG.
fn extract_dib_from_emf(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 8 {
        return None;
    }

    let mut best_dib: Vec<u8> = Vec::new();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let rec_type = u32_le(data, pos);
        let rec_size = u32_le(data, pos + 4) as usize;
        if rec_size < 8 || rec_size > data.len() - pos {
            break;
        }
        let rec = &data[pos..pos + rec_size];

        match rec_type {
            // EMR_STRETCHDIBITS
            0x51 => {
                if let Some(dib) = dib_from_record(rec, 80) {
                    if dib.len() > best_dib.len() {
                        best_dib = dib;
                    }
                }
            }
            // EMR_SETDIBITSTODEVICE
            0x49 => {
                if let Some(dib) = dib_from_record(rec, 76) {
                    if dib.len() > best_dib.len() {
                        best_dib = dib;
                    }
                }
            }
            _ => {}
        }

        pos += rec_size;
    }

    if best_dib.len() < MIN_IMAGE_SIZE {
        return None;
    }
    convert_dib_to_png(&best_dib)
}

/// Both EMF bitmap records share the same offset table for the DIB header
/// and pixel buffer: offBmi(4)+cbBmi(4)+offBits(4)+cbBits(4) at byte 48.
fn dib_from_record(rec: &[u8], min_len: usize) -> Option<Vec<u8>> {
    if rec.len() < min_len {
        return None;
    }
    let off_bmi = u32_le(rec, 48) as usize;
    let cb_bmi = u32_le(rec, 52) as usize;
    let off_bits = u32_le(rec, 56) as usize;
    let cb_bits = u32_le(rec, 60) as usize;

    if cb_bmi == 0 || cb_bits == 0 {
        return None;
    }
    if off_bmi.checked_add(cb_bmi)? > rec.len() || off_bits.checked_add(cb_bits)? > rec.len() {
        return None;
    }

    let mut dib = Vec::with_capacity(cb_bmi + cb_bits);
    dib.extend_from_slice(&rec[off_bmi..off_bmi + cb_bmi]);
    dib.extend_from_slice(&rec[off_bits..off_bits + cb_bits]);
    Some(dib)
}

/// Walks WMF records looking for `META_STRETCHDIB` (0x0F43) and
/// `META_DIBSTRETCHBLT` (0x0B41), whose trailing bytes are a DIB.
fn extract_dib_from_wmf(data: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0usize;
    // Placeable header, if present.
    if data.len() >= 4 && u32_le(data, 0) == 0x9AC6_CDD7 {
        pos = 22;
    }
    if pos + 18 > data.len() {
        return None;
    }
    // Standard header size is in 16-bit words.
    let header_words = u16_le(data, pos + 2) as usize;
    pos += header_words * 2;

    let mut best_dib: Vec<u8> = Vec::new();

    while pos + 6 <= data.len() {
        let rec_words = u32_le(data, pos) as usize;
        let rec_func = u16_le(data, pos + 4);
        let rec_bytes = rec_words.checked_mul(2)?;
        if rec_bytes < 6 || pos + rec_bytes > data.len() {
            break;
        }
        if rec_func == 0x0000 {
            break;
        }

        if rec_func == 0x0F43 || rec_func == 0x0B41 {
            // Record header (6) + raster-op and geometry parameters (22)
            // precede the DIB payload.
            let rec = &data[pos..pos + rec_bytes];
            if rec.len() > 6 + 22 {
                let dib = &rec[6 + 22..];
                if dib.len() > best_dib.len() {
                    best_dib = dib.to_vec();
                }
            }
        }

        pos += rec_bytes;
    }

    if best_dib.len() < MIN_IMAGE_SIZE {
        return None;
    }
    convert_dib_to_png(&best_dib)
}

/// Converts a raw DIB (BITMAPINFOHEADER + pixels) to PNG bytes. Uncompressed
/// 24/32-bit DIBs are unpacked (4-byte aligned rows, bottom-up unless the
/// height is negative); `BI_JPEG`/`BI_PNG` payloads pass through unchanged.
fn convert_dib_to_png(dib: &[u8]) -> Option<Vec<u8>> {
    if dib.len() < 40 {
        return None;
    }

    let bi_size = u32_le(dib, 0) as usize;
    let bi_width = u32_le(dib, 4) as i32;
    let bi_height = u32_le(dib, 8) as i32;
    let bi_bit_count = u16_le(dib, 14);
    let bi_compression = u32_le(dib, 16);

    // BI_JPEG (4) / BI_PNG (5): the pixel buffer is already an encoded image.
    if bi_compression == 4 || bi_compression == 5 {
        if bi_size >= dib.len() {
            return None;
        }
        let payload = &dib[bi_size..];
        if payload.len() >= MIN_IMAGE_SIZE {
            return Some(payload.to_vec());
        }
        return None;
    }

    // Only uncompressed (BI_RGB) 24/32-bit is unpacked.
    if bi_compression != 0 || (bi_bit_count != 24 && bi_bit_count != 32) {
        return None;
    }

    let w = bi_width.unsigned_abs() as usize;
    let top_down = bi_height < 0;
    let h = bi_height.unsigned_abs() as usize;
    if w == 0 || h == 0 || w > 20000 || h > 20000 {
        return None;
    }

    let bytes_per_pixel = bi_bit_count as usize / 8;
    let stride = (w * bytes_per_pixel + 3) & !3;
    if bi_size >= dib.len() {
        return None;
    }
    let pixels = &dib[bi_size..];
    if pixels.len() < stride * h {
        return None;
    }

    let mut img = image::RgbaImage::new(w as u32, h as u32);
    for y in 0..h {
        let src_y = if top_down { y } else { h - 1 - y };
        let row = src_y * stride;
        for x in 0..w {
            let off = row + x * bytes_per_pixel;
            let b = pixels[off];
            let g = pixels[off + 1];
            let r = pixels[off + 2];
            let mut a = 255u8;
            if bytes_per_pixel == 4 {
                a = pixels[off + 3];
                if a == 0 && (r != 0 || g != 0 || b != 0) {
                    // Pre-multiplied alpha with visible color; keep the pixel.
                    a = 255;
                }
            }
            img.put_pixel(x as u32, y as u32, image::Rgba([r, g, b, a]));
        }
    }

    let mut out = Vec::new();
    if let Err(e) = image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
    {
        warn!("DIB转PNG失败: {e}");
        return None;
    }
    Some(out)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|w| w == needle)
}

fn u16_le(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}
