//! # Document Decoders
//!
//! This crate turns uploaded document bytes into cleaned plain text plus any
//! embedded images worth keeping. Dispatch is by the caller's declared type
//! (`pdf`, `word`, `excel`, `ppt`, `markdown`, `html`); the Office types
//! additionally sniff the container magic to route between the modern
//! ZIP-based formats and the legacy OLE2/BIFF ones.
//!
//! Every decoder is a fault barrier: malformed input comes back as a
//! [`ParseError`] naming the format, never as a panic escaping the call.

mod clean;
mod excel;
mod html;
mod pdf;
mod ppt;
mod word;

pub mod legacy;

pub use clean::clean_text;

use std::collections::HashMap;

/// OLE2 compound file magic (`D0 CF 11 E0 A1 B1 1A E1`).
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// ZIP local-file-header magic, shared by every OOXML container.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Minimum byte size for an extracted image. Anything smaller is almost
/// always a bullet glyph or toolbar icon.
pub const MIN_IMAGE_SIZE: usize = 1024;

/// Errors produced by the decoders. Display strings lead with the format
/// name so upstream status records stay self-describing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("不支持的文件格式: {0}")]
    Unsupported(String),
    #[error("pdf解析错误: {0}")]
    Pdf(String),
    #[error("word解析错误: {0}")]
    Word(String),
    #[error("doc解析错误: {0}")]
    Doc(String),
    #[error("excel解析错误: {0}")]
    Excel(String),
    #[error("xls解析错误: {0}")]
    Xls(String),
    #[error("ppt解析错误: {0}")]
    Ppt(String),
    #[error("html解析错误: {0}")]
    Html(String),
    #[error("{0}文件内容为空")]
    Empty(&'static str),
}

/// An image recovered from inside a document.
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Short label, e.g. `DOC图片1`.
    pub alt: String,
    /// Encoded image bytes (JPEG or PNG).
    pub data: Vec<u8>,
}

impl ImageRef {
    /// File extension matching the encoded payload, sniffed from the magic.
    pub fn extension(&self) -> &'static str {
        if self.data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "jpg"
        } else {
            "png"
        }
    }
}

/// The outcome of decoding one document.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Cleaned text (see [`clean_text`]).
    pub text: String,
    /// Embedded images, already size-filtered.
    pub images: Vec<ImageRef>,
    /// Format-specific facts: `type`, `page_count`, `sheet_count`, `title`, …
    pub metadata: HashMap<String, String>,
}

/// Stateless parser front-end. Construct once and share.
#[derive(Debug, Default, Clone)]
pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    /// Decode `data` according to the declared `file_type` (case-insensitive).
    pub fn parse(&self, data: &[u8], file_type: &str) -> Result<ParseResult, ParseError> {
        match file_type.to_lowercase().as_str() {
            "pdf" => pdf::parse(data),
            "word" => {
                if data.starts_with(OLE2_MAGIC) {
                    legacy::doc::parse(data)
                } else if data.starts_with(ZIP_MAGIC) {
                    word::parse(data)
                } else {
                    Err(ParseError::Word("无法识别的文件头".into()))
                }
            }
            "excel" => {
                if data.starts_with(OLE2_MAGIC) {
                    excel::parse_xls(data)
                } else if data.starts_with(ZIP_MAGIC) {
                    excel::parse_xlsx(data)
                } else {
                    Err(ParseError::Excel("无法识别的文件头".into()))
                }
            }
            "ppt" => {
                if data.starts_with(OLE2_MAGIC) {
                    legacy::ppt::parse(data)
                } else if data.starts_with(ZIP_MAGIC) {
                    ppt::parse(data)
                } else {
                    Err(ParseError::Ppt("无法识别的文件头".into()))
                }
            }
            "markdown" => html::parse_markdown(data),
            "html" => html::parse_html(data),
            other => Err(ParseError::Unsupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_types_are_dispatched() {
        let dp = DocumentParser::new();
        for ft in ["pdf", "word", "excel", "ppt"] {
            let err = dp.parse(b"invalid", ft).unwrap_err();
            assert!(
                !err.to_string().contains("不支持的文件格式"),
                "type {ft} should be dispatched, got: {err}"
            );
        }
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let dp = DocumentParser::new();
        for ft in ["PDF", "Pdf", "WORD", "Word", "EXCEL", "Excel", "PPT", "Ppt"] {
            if let Err(err) = dp.parse(b"invalid", ft) {
                assert!(
                    !err.to_string().contains("不支持的文件格式"),
                    "type {ft} should be supported, got: {err}"
                );
            }
        }
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let dp = DocumentParser::new();
        for ft in ["txt", "csv", "jpg", "png", "mp3", "", "unknown"] {
            let err = dp.parse(b"data", ft).unwrap_err();
            assert!(
                err.to_string().contains("不支持的文件格式"),
                "type {ft:?} should be unsupported, got: {err}"
            );
        }
    }

    #[test]
    fn unsupported_error_names_the_type() {
        let dp = DocumentParser::new();
        let err = dp.parse(b"data", "xyz").unwrap_err();
        assert!(err.to_string().contains("xyz"));
    }

    #[test]
    fn office_types_reject_unknown_containers() {
        let dp = DocumentParser::new();
        let err = dp.parse(b"neither zip nor ole2", "word").unwrap_err();
        assert!(err.to_string().starts_with("word解析错误"));
        let err = dp.parse(b"neither zip nor ole2", "ppt").unwrap_err();
        assert!(err.to_string().starts_with("ppt解析错误"));
    }

    #[test]
    fn image_ref_extension_sniffs_magic() {
        let jpeg = ImageRef {
            alt: String::new(),
            data: vec![0xFF, 0xD8, 0xFF, 0xE0],
        };
        assert_eq!(jpeg.extension(), "jpg");
        let png = ImageRef {
            alt: String::new(),
            data: vec![0x89, 0x50, 0x4E, 0x47],
        };
        assert_eq!(png.extension(), "png");
    }
}
