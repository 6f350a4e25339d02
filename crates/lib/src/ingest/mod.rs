//! Document lifecycle: validate → parse → chunk → embed → store.
//!
//! Processing failures are captured on the document row (`status=failed`
//! plus the step's error message) instead of failing the upload call, so a
//! bad file still shows up in the document list with its reason.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use turso::{params, Database, Value as TursoValue};

use ragdesk_parser::{DocumentParser, ImageRef};

use crate::chunker::TextChunker;
use crate::db::generate_id;
use crate::errors::IngestError;
use crate::providers::ai::EmbeddingProvider;
use crate::vector::{SqliteVectorStore, VectorChunk};

/// Upload size cap.
const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// URL fetch timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const SUPPORTED_FILE_TYPES: &[&str] = &["pdf", "word", "excel", "ppt"];

/// A document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// File upload request.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFileRequest {
    pub file_name: String,
    pub file_data: Vec<u8>,
    pub file_type: String,
    #[serde(default)]
    pub product_id: String,
}

/// URL upload request.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadUrlRequest {
    pub url: String,
    #[serde(default)]
    pub product_id: String,
}

/// Orchestrates upload, processing, deletion and listing.
pub struct DocumentManager {
    parser: DocumentParser,
    chunker: TextChunker,
    embedding: Box<dyn EmbeddingProvider>,
    store: Arc<SqliteVectorStore>,
    db: Database,
    http: reqwest::Client,
    data_dir: PathBuf,
}

impl DocumentManager {
    pub fn new(
        parser: DocumentParser,
        chunker: TextChunker,
        embedding: Box<dyn EmbeddingProvider>,
        store: Arc<SqliteVectorStore>,
        db: Database,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            parser,
            chunker,
            embedding,
            store,
            db,
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            data_dir: data_dir.into(),
        }
    }

    /// Validates and ingests an uploaded file. The returned record carries
    /// the processing outcome; a parse/embed/store failure is recorded on
    /// the row, not returned as an error.
    pub async fn upload_file(&self, req: UploadFileRequest) -> Result<DocumentInfo, IngestError> {
        let file_type = req.file_type.to_lowercase();
        if !SUPPORTED_FILE_TYPES.contains(&file_type.as_str()) {
            return Err(IngestError::UnsupportedFormat);
        }
        if req.file_data.len() > MAX_FILE_SIZE {
            return Err(IngestError::FileTooLarge);
        }

        let mut doc = DocumentInfo {
            id: generate_id(),
            name: req.file_name.clone(),
            doc_type: file_type.clone(),
            status: "processing".into(),
            error: String::new(),
            created_at: Utc::now(),
        };
        self.insert_document(&doc).await?;

        match self
            .process_file(&doc.id, &req.file_name, req.file_data, &file_type, &req.product_id)
            .await
        {
            Ok(chunk_count) => {
                info!(doc_id = %doc.id, chunks = chunk_count, "document ingested");
                self.update_document_status(&doc.id, "success", "").await;
                doc.status = "success".into();
            }
            Err(e) => {
                error!(doc_id = %doc.id, "document processing failed: {e}");
                self.update_document_status(&doc.id, "failed", &e.to_string())
                    .await;
                doc.status = "failed".into();
                doc.error = e.to_string();
            }
        }
        Ok(doc)
    }

    /// Fetches a URL and ingests the response body as plain text.
    pub async fn upload_url(&self, req: UploadUrlRequest) -> Result<DocumentInfo, IngestError> {
        if req.url.is_empty() {
            return Err(IngestError::EmptyUrl);
        }

        let mut doc = DocumentInfo {
            id: generate_id(),
            name: req.url.clone(),
            doc_type: "url".into(),
            status: "processing".into(),
            error: String::new(),
            created_at: Utc::now(),
        };
        self.insert_document(&doc).await?;

        match self.process_url(&doc.id, &req.url, &req.product_id).await {
            Ok(chunk_count) => {
                info!(doc_id = %doc.id, chunks = chunk_count, "url ingested");
                self.update_document_status(&doc.id, "success", "").await;
                doc.status = "success".into();
            }
            Err(e) => {
                error!(doc_id = %doc.id, "url processing failed: {e}");
                self.update_document_status(&doc.id, "failed", &e.to_string())
                    .await;
                doc.status = "failed".into();
                doc.error = e.to_string();
            }
        }
        Ok(doc)
    }

    /// Removes a document's chunks from the vector store, then the row.
    pub async fn delete_document(&self, doc_id: &str) -> Result<(), IngestError> {
        self.store.delete_by_doc_id(doc_id).await?;
        let conn = self.db.connect()?;
        conn.execute("DELETE FROM documents WHERE id = ?", params![doc_id])
            .await?;
        Ok(())
    }

    /// All documents, newest first.
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>, IngestError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, name, type, status, COALESCE(error, ''), created_at
                 FROM documents ORDER BY created_at DESC",
                (),
            )
            .await?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_at = match row.get_value(5)? {
                TursoValue::Text(s) => parse_timestamp(&s),
                _ => Utc::now(),
            };
            docs.push(DocumentInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                doc_type: row.get(2)?,
                status: row.get(3)?,
                error: row.get(4)?,
                created_at,
            });
        }
        Ok(docs)
    }

    async fn process_file(
        &self,
        doc_id: &str,
        doc_name: &str,
        file_data: Vec<u8>,
        file_type: &str,
        product_id: &str,
    ) -> Result<usize, IngestError> {
        // Binary decoding is CPU-bound; keep it off the async workers.
        let parser = self.parser.clone();
        let file_type_owned = file_type.to_string();
        let result = tokio::task::spawn_blocking(move || {
            parser.parse(&file_data, &file_type_owned)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("parser task failed: {e}")))??;

        if result.text.is_empty() {
            return Err(IngestError::EmptyContent);
        }

        let image_urls = self.save_images(doc_id, &result.images).await?;
        self.chunk_embed_store(doc_id, doc_name, &result.text, &image_urls, product_id)
            .await
    }

    async fn process_url(
        &self,
        doc_id: &str,
        url: &str,
        product_id: &str,
    ) -> Result<usize, IngestError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::FetchStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Fetch(e.to_string()))?;
        let text = body.trim();
        if text.is_empty() {
            return Err(IngestError::EmptyUrlContent);
        }

        self.chunk_embed_store(doc_id, url, text, &[], product_id)
            .await
    }

    /// Writes extracted images under `{data_dir}/images/` and returns
    /// `(alt, relative_url)` pairs for the surviving files.
    async fn save_images(
        &self,
        doc_id: &str,
        images: &[ImageRef],
    ) -> Result<Vec<(String, String)>, IngestError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.data_dir.join("images");
        tokio::fs::create_dir_all(&dir).await?;

        let mut saved = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            let file_name = format!("{doc_id}-{}.{}", i + 1, image.extension());
            tokio::fs::write(dir.join(&file_name), &image.data).await?;
            saved.push((image.alt.clone(), format!("images/{file_name}")));
        }
        Ok(saved)
    }

    /// Splits, batch-embeds and stores. Image entries become trailing
    /// chunks whose text is the image alt and whose `image_url` points at
    /// the stored file.
    async fn chunk_embed_store(
        &self,
        doc_id: &str,
        doc_name: &str,
        text: &str,
        images: &[(String, String)],
        product_id: &str,
    ) -> Result<usize, IngestError> {
        let chunks = self.chunker.split(text, doc_id);
        if chunks.is_empty() {
            return Err(IngestError::EmptyContent);
        }

        let mut texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        texts.extend(images.iter().map(|(alt, _)| alt.clone()));

        let embeddings = self.embedding.embed_batch(&texts).await?;

        let mut vector_chunks = Vec::with_capacity(texts.len());
        for (chunk, vector) in chunks.iter().zip(&embeddings) {
            vector_chunks.push(VectorChunk {
                chunk_text: chunk.text.clone(),
                chunk_index: chunk.index as i64,
                document_id: doc_id.to_string(),
                document_name: doc_name.to_string(),
                vector: vector.clone(),
                image_url: String::new(),
                product_id: product_id.to_string(),
            });
        }
        for (i, (image, vector)) in images
            .iter()
            .zip(embeddings.iter().skip(chunks.len()))
            .enumerate()
        {
            let (alt, url) = image;
            vector_chunks.push(VectorChunk {
                chunk_text: alt.clone(),
                chunk_index: (chunks.len() + i) as i64,
                document_id: doc_id.to_string(),
                document_name: doc_name.to_string(),
                vector: vector.clone(),
                image_url: url.clone(),
                product_id: product_id.to_string(),
            });
        }

        let total = vector_chunks.len();
        self.store.store(doc_id, &vector_chunks).await?;
        Ok(total)
    }

    async fn insert_document(&self, doc: &DocumentInfo) -> Result<(), IngestError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO documents (id, name, type, status, error, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                doc.id.clone(),
                doc.name.clone(),
                doc.doc_type.clone(),
                doc.status.clone(),
                doc.error.clone(),
                doc.created_at.to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_document_status(&self, doc_id: &str, status: &str, error_msg: &str) {
        if let Ok(conn) = self.db.connect() {
            let _ = conn
                .execute(
                    "UPDATE documents SET status = ?, error = ? WHERE id = ?",
                    params![status, error_msg, doc_id],
                )
                .await;
        }
    }
}

/// Parses the timestamps we write (RFC 3339) and the ones SQLite's
/// CURRENT_TIMESTAMP default writes (`YYYY-MM-DD HH:MM:SS`).
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
