//! Pending questions: user queries the pipeline could not answer, awaiting
//! a human operator whose answer is folded back into the knowledge base.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use turso::{params, Database, Value as TursoValue};

use crate::chunker::TextChunker;
use crate::db::generate_id;
use crate::errors::PendingError;
use crate::ingest::parse_timestamp;
use crate::providers::ai::{ChatProvider, EmbeddingProvider};
use crate::vector::{SqliteVectorStore, VectorChunk};

/// A question awaiting (or holding) an operator answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub id: String,
    pub question: String,
    pub user_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_answer: String,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Operator answer submission.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminAnswerRequest {
    pub question_id: String,
    #[serde(default)]
    pub text: String,
}

/// Lifecycle manager for the pending table.
pub struct PendingManager {
    db: Database,
    chunker: TextChunker,
    embedding: Box<dyn EmbeddingProvider>,
    store: Arc<SqliteVectorStore>,
    llm: Box<dyn ChatProvider>,
}

impl PendingManager {
    pub fn new(
        db: Database,
        chunker: TextChunker,
        embedding: Box<dyn EmbeddingProvider>,
        store: Arc<SqliteVectorStore>,
        llm: Box<dyn ChatProvider>,
    ) -> Self {
        Self {
            db,
            chunker,
            embedding,
            store,
            llm,
        }
    }

    /// Inserts a new pending row.
    pub async fn create_pending(
        &self,
        question: &str,
        user_id: &str,
    ) -> Result<PendingQuestion, PendingError> {
        let id = generate_id();
        let now = Utc::now();
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO pending_questions (id, question, user_id, status, created_at) VALUES (?, ?, ?, ?, ?)",
            params![id.clone(), question, user_id, "pending", now.to_rfc3339()],
        )
        .await?;

        Ok(PendingQuestion {
            id,
            question: question.to_string(),
            user_id: user_id.to_string(),
            status: "pending".into(),
            answer: String::new(),
            llm_answer: String::new(),
            created_at: now,
            answered_at: None,
        })
    }

    /// Lists questions, optionally filtered by status, newest first.
    pub async fn list_pending(
        &self,
        status: Option<&str>,
    ) -> Result<Vec<PendingQuestion>, PendingError> {
        let conn = self.db.connect()?;
        let sql_all = "SELECT id, question, user_id, status, COALESCE(answer, ''),
                              COALESCE(llm_answer, ''), created_at, answered_at
                       FROM pending_questions ORDER BY created_at DESC";
        let sql_filtered = "SELECT id, question, user_id, status, COALESCE(answer, ''),
                                   COALESCE(llm_answer, ''), created_at, answered_at
                            FROM pending_questions WHERE status = ? ORDER BY created_at DESC";

        let mut rows = match status {
            Some(s) => conn.query(sql_filtered, params![s]).await?,
            None => conn.query(sql_all, ()).await?,
        };

        let mut questions = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_at = match row.get_value(6)? {
                TursoValue::Text(s) => parse_timestamp(&s),
                _ => Utc::now(),
            };
            let answered_at = match row.get_value(7)? {
                TursoValue::Text(s) => Some(parse_timestamp(&s)),
                _ => None,
            };
            questions.push(PendingQuestion {
                id: row.get(0)?,
                question: row.get(1)?,
                user_id: row.get(2)?,
                status: row.get(3)?,
                answer: row.get(4)?,
                llm_answer: row.get(5)?,
                created_at,
                answered_at,
            });
        }
        Ok(questions)
    }

    /// The most recent open questions, used by the query engine's
    /// duplicate check.
    pub async fn recent_pending_questions(
        &self,
        limit: usize,
    ) -> Result<Vec<String>, PendingError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT question FROM pending_questions WHERE status = 'pending'
                 ORDER BY created_at DESC LIMIT ?",
                params![limit as i64],
            )
            .await?;

        let mut questions = Vec::new();
        while let Some(row) = rows.next().await? {
            questions.push(row.get(0)?);
        }
        Ok(questions)
    }

    /// Processes an operator answer:
    ///
    /// 1. persists the raw answer text,
    /// 2. reinjects it into the knowledge base as a synthetic document
    ///    (`pending-answer-{id}`, type `answer`),
    /// 3. asks the LLM for a summary answer,
    /// 4. flips the row to `answered`.
    pub async fn answer_question(&self, req: AdminAnswerRequest) -> Result<(), PendingError> {
        let conn = self.db.connect()?;

        let mut rows = conn
            .query(
                "SELECT question, status FROM pending_questions WHERE id = ?",
                params![req.question_id.clone()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Err(PendingError::NotFound(req.question_id));
        };
        let question: String = row.get(0)?;
        let status: String = row.get(1)?;
        if status == "answered" {
            return Err(PendingError::AlreadyAnswered(req.question_id));
        }

        conn.execute(
            "UPDATE pending_questions SET answer = ? WHERE id = ?",
            params![req.text.clone(), req.question_id.clone()],
        )
        .await?;

        if !req.text.is_empty() {
            self.inject_answer(&req.question_id, &question, &req.text)
                .await?;
        }

        // The chat client substitutes its fallback string on persistent
        // failure, so the summary never blocks the state transition.
        let llm_answer = self
            .llm
            .generate(
                "请根据管理员提供的回答内容，生成一个简洁、清晰的总结性回答。",
                &[req.text.clone()],
                &question,
            )
            .await?;

        let now = Utc::now();
        conn.execute(
            "UPDATE pending_questions SET llm_answer = ?, status = ?, answered_at = ? WHERE id = ?",
            params![llm_answer, "answered", now.to_rfc3339(), req.question_id],
        )
        .await?;

        Ok(())
    }

    /// Chunks and embeds the operator's text, then stores it under a
    /// synthetic document so the chunk foreign key is satisfied.
    async fn inject_answer(
        &self,
        question_id: &str,
        question: &str,
        answer_text: &str,
    ) -> Result<(), PendingError> {
        let doc_id = format!("pending-answer-{question_id}");
        let doc_name = format!("管理员回答: {}", truncate_chars(question, 50));

        let chunks = self.chunker.split(answer_text, &doc_id);
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedding.embed_batch(&texts).await?;

        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO documents (id, name, type, status, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                doc_id.clone(),
                doc_name.clone(),
                "answer",
                "success",
                Utc::now().to_rfc3339()
            ],
        )
        .await?;

        let vector_chunks: Vec<VectorChunk> = chunks
            .iter()
            .zip(&embeddings)
            .map(|(c, v)| VectorChunk {
                chunk_text: c.text.clone(),
                chunk_index: c.index as i64,
                document_id: doc_id.clone(),
                document_name: doc_name.clone(),
                vector: v.clone(),
                image_url: String::new(),
                product_id: String::new(),
            })
            .collect();

        self.store.store(&doc_id, &vector_chunks).await?;
        info!(doc_id = %doc_id, chunks = vector_chunks.len(), "admin answer injected into knowledge base");
        Ok(())
    }
}

/// Shortens to `max_chars` characters, appending `...` when truncated.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}...")
}
