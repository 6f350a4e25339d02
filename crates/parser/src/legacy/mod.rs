//! Legacy binary Office formats: OLE2-contained `.doc` and `.ppt`.
//!
//! The `.xls` (BIFF) path lives in the spreadsheet module since it shares the
//! vendor decoder with XLSX; everything here is hand-parsed from the raw
//! compound-file streams.

pub mod doc;
pub mod ppt;

pub(crate) mod images;
