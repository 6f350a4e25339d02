//! Error types for the core subsystems.

use ragdesk_parser::ParseError;
use thiserror::Error;

/// Failures talking to the external embedding / chat APIs.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("API request failed: {0}")]
    Request(reqwest::Error),
    #[error("Failed to deserialize API response: {0}")]
    Deserialization(reqwest::Error),
    #[error("API returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    #[error("API response is malformed: {0}")]
    InvalidResponse(String),
}

/// Failures in the durable chunk store and in-memory arena.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Failed to {operation} chunk {chunk_id}: {source}")]
    Chunk {
        operation: &'static str,
        chunk_id: String,
        source: turso::Error,
    },
    #[error("Invalid embedding bytes: {0}")]
    Codec(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Failures in the ingest pipeline. Per-document failures are recorded on
/// the document row rather than surfaced to the caller.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("不支持的文件格式")]
    UnsupportedFormat,
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("文档内容为空")]
    EmptyContent,
    #[error("文件大小超过限制")]
    FileTooLarge,
    #[error("URL不能为空")]
    EmptyUrl,
    #[error("URL内容为空")]
    EmptyUrlContent,
    #[error("failed to fetch URL: {0}")]
    Fetch(String),
    #[error("URL returned HTTP {0}")]
    FetchStatus(u16),
    #[error("embedding error: {0}")]
    Embedding(#[from] ProviderError),
    #[error("vector store error: {0}")]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] turso::Error),
    #[error("failed to save image: {0}")]
    ImageWrite(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures in the pending-question lifecycle.
#[derive(Error, Debug)]
pub enum PendingError {
    #[error("pending question not found: {0}")]
    NotFound(String),
    #[error("question already answered: {0}")]
    AlreadyAnswered(String),
    #[error("database error: {0}")]
    Database(#[from] turso::Error),
    #[error("embedding error: {0}")]
    Embedding(#[from] ProviderError),
    #[error("vector store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures in the query pipeline that have no defined fallback.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("failed to embed question: {0}")]
    Embedding(#[from] ProviderError),
    #[error("failed to search vector store: {0}")]
    Search(#[from] StoreError),
    #[error("failed to create pending question: {0}")]
    Pending(#[from] PendingError),
    #[error("database error: {0}")]
    Database(#[from] turso::Error),
}
