//! The RAG query pipeline: intent routing, embed, search (text and image
//! modalities), relaxed fallback, pending creation with dedup, answer
//! generation, and source references.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use turso::{params, Database, Value as TursoValue};

use crate::config::{AppConfig, ContentPriority};
use crate::errors::QueryError;
use crate::pending::PendingManager;
use crate::providers::ai::chat::FALLBACK_ANSWER;
use crate::providers::ai::{ChatProvider, EmbeddingProvider};
use crate::vector::codec::cosine_similarity;
use crate::vector::{SearchResult, SqliteVectorStore};

/// Secondary search used to salvage borderline matches before opening a
/// pending ticket.
const RELAXED_TOP_K: usize = 3;
const RELAXED_THRESHOLD: f32 = 0.0;
const RELAXED_ACCEPT_SCORE: f32 = 0.3;

/// Cosine similarity above which a question is considered a duplicate of an
/// existing pending question.
const PENDING_DEDUP_THRESHOLD: f32 = 0.85;

/// How many recent pending questions the dedup check considers.
const PENDING_DEDUP_SCAN: usize = 50;

/// Snippet length (characters) in source references.
const SNIPPET_CHARS: usize = 100;

const TRANSLATE_PROMPT: &str = "你是一个翻译助手。将以下内容翻译为与用户提问相同的语言。\
如果用户用英文提问，翻译为英文；如果用户用中文提问，保持中文。只输出翻译结果，不要添加任何解释。";

const PENDING_CREATED_MSG: &str = "该问题已转交人工处理，请稍后查看回复";
const PENDING_DUPLICATE_MSG: &str = "该问题已在处理中，请耐心等待回复";

/// Phrases that indicate the model could not answer from the references.
const UNABLE_TO_ANSWER_PATTERNS: &[&str] = &[
    // Chinese
    "未提及",
    "未找到",
    "没有相关信息",
    "没有提及",
    "未涉及",
    "没有涉及",
    "无法从参考资料",
    "参考资料中没有",
    "没有找到相关",
    "未包含",
    "没有包含",
    "无相关信息",
    "暂无相关",
    "未能找到",
    // English
    "not mentioned",
    "no relevant information",
    "not found in the reference",
    "no information available",
    "does not contain",
    "do not have information",
    "not covered in the reference",
    "unable to find",
    "not available in the provided",
];

/// A user question submission.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub user_id: String,
    /// Base64 data URL from a clipboard paste, if any.
    #[serde(default)]
    pub image_data: String,
    #[serde(default)]
    pub product_id: String,
}

/// The result of a query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub is_pending: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// A reference to a source chunk backing the answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub document_name: String,
    pub chunk_index: i64,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_url: String,
}

#[derive(Debug)]
struct IntentResult {
    intent: String,
    reason: String,
}

/// Orchestrates the full question → answer (or pending) flow.
pub struct QueryEngine {
    embedding: Box<dyn EmbeddingProvider>,
    store: Arc<SqliteVectorStore>,
    llm: Box<dyn ChatProvider>,
    pending: Arc<PendingManager>,
    db: Database,
    config: AppConfig,
}

impl QueryEngine {
    pub fn new(
        embedding: Box<dyn EmbeddingProvider>,
        store: Arc<SqliteVectorStore>,
        llm: Box<dyn ChatProvider>,
        pending: Arc<PendingManager>,
        db: Database,
        config: AppConfig,
    ) -> Self {
        Self {
            embedding,
            store,
            llm,
            pending,
            db,
            config,
        }
    }

    /// Replaces the AI clients and knobs after a configuration change.
    pub fn update_services(
        &mut self,
        embedding: Box<dyn EmbeddingProvider>,
        llm: Box<dyn ChatProvider>,
        config: AppConfig,
    ) {
        self.embedding = embedding;
        self.llm = llm;
        self.config = config;
    }

    /// Runs the full pipeline for one request.
    pub async fn query(&self, req: QueryRequest) -> Result<QueryResponse, QueryError> {
        // Intent routing is skipped when an image is attached: the image
        // itself may carry the product context.
        if req.image_data.is_empty() {
            let intent = self.classify_intent(&req.question).await;
            match intent.intent.as_str() {
                "greeting" => {
                    let intro = if self.config.product_intro.is_empty() {
                        "您好！欢迎使用我们的产品。".to_string()
                    } else {
                        self.config.product_intro.clone()
                    };
                    return Ok(QueryResponse {
                        answer: self.translate(&intro, &req.question).await,
                        ..Default::default()
                    });
                }
                "irrelevant" => {
                    let msg = if intent.reason.is_empty() {
                        "抱歉，这个问题与我们的产品无关。请问有什么产品方面的问题需要帮助吗？"
                            .to_string()
                    } else {
                        format!("抱歉，{}。请问有什么产品方面的问题需要帮助吗？", intent.reason)
                    };
                    return Ok(QueryResponse {
                        answer: self.translate(&msg, &req.question).await,
                        ..Default::default()
                    });
                }
                _ => {}
            }
        }

        let query_vector = self.embedding.embed(&req.question).await?;
        info!(question = %req.question, dim = query_vector.len(), "question embedded");

        let top_k = self.config.vector.top_k;
        let threshold = self.config.vector.threshold;
        let mut results = self
            .store
            .search(&query_vector, top_k, threshold, &req.product_id)
            .await?;
        info!(top_k, threshold, results = results.len(), "vector search complete");

        // Dual-modality: also search with the image embedding and merge.
        if !req.image_data.is_empty() {
            match self.embedding.embed_image(&req.image_data).await {
                Ok(image_vector) => {
                    let image_results = self
                        .store
                        .search(&image_vector, top_k, threshold, &req.product_id)
                        .await?;
                    if !image_results.is_empty() {
                        info!(results = image_results.len(), "image search merged");
                        results = merge_results(results, image_results, top_k);
                    }
                }
                Err(e) => warn!("image embedding failed: {e}"),
            }
        }

        // One relaxed attempt before giving up.
        if results.is_empty() {
            let relaxed = self
                .store
                .search(
                    &query_vector,
                    RELAXED_TOP_K,
                    RELAXED_THRESHOLD,
                    &req.product_id,
                )
                .await?;
            info!(results = relaxed.len(), "relaxed search complete");
            if let Some(best) = relaxed.into_iter().next() {
                if best.score >= RELAXED_ACCEPT_SCORE {
                    results = vec![best];
                }
            }
        }

        if results.is_empty() {
            return self.park_question(&req, &query_vector).await;
        }

        apply_content_priority(&mut results, self.config.vector.content_priority);

        // Enrich with image chunks from the same documents when the hits
        // themselves carry none.
        let doc_images = self.find_document_images(&results).await;

        let has_images = !doc_images.is_empty() || results.iter().any(|r| !r.image_url.is_empty());
        let context: Vec<String> = results
            .iter()
            .map(|r| {
                if r.image_url.is_empty() {
                    r.chunk_text.clone()
                } else {
                    format!("{} (图片已附带，将自动展示给用户)", r.chunk_text)
                }
            })
            .collect();

        let system_prompt = if has_images {
            image_aware_system_prompt()
        } else {
            String::new()
        };

        let answer = self
            .llm
            .generate(&system_prompt, &context, &req.question)
            .await
            .unwrap_or_else(|e| {
                warn!("chat generation failed: {e}");
                FALLBACK_ANSWER.to_string()
            });

        // A refusal phrased by the model still parks the question.
        let mut is_pending = false;
        if is_unable_to_answer(&answer) {
            info!("answer indicates the references were insufficient, parking question");
            if self.find_similar_pending(&query_vector).await.is_none() {
                if let Err(e) = self.pending.create_pending(&req.question, &req.user_id).await {
                    warn!("failed to create pending question: {e}");
                }
            }
            is_pending = true;
        }

        let mut sources: Vec<SourceRef> = results
            .iter()
            .map(|r| SourceRef {
                document_name: r.document_name.clone(),
                chunk_index: r.chunk_index,
                snippet: r.chunk_text.chars().take(SNIPPET_CHARS).collect(),
                image_url: r.image_url.clone(),
            })
            .collect();
        sources.extend(doc_images);

        Ok(QueryResponse {
            answer,
            sources,
            is_pending,
            message: String::new(),
        })
    }

    /// No usable results: either point at an existing similar pending
    /// question or open a new one.
    async fn park_question(
        &self,
        req: &QueryRequest,
        query_vector: &[f32],
    ) -> Result<QueryResponse, QueryError> {
        if self.find_similar_pending(query_vector).await.is_some() {
            return Ok(QueryResponse {
                is_pending: true,
                message: self.translate(PENDING_DUPLICATE_MSG, &req.question).await,
                ..Default::default()
            });
        }

        self.pending
            .create_pending(&req.question, &req.user_id)
            .await?;
        Ok(QueryResponse {
            is_pending: true,
            message: self.translate(PENDING_CREATED_MSG, &req.question).await,
            ..Default::default()
        })
    }

    /// Classifies the question with a dedicated LLM call expecting a strict
    /// JSON object. Any failure defaults to `product` (allow).
    async fn classify_intent(&self, question: &str) -> IntentResult {
        let mut system_prompt = "你是一个意图分类器。根据用户输入判断意图类别。".to_string();
        if !self.config.product_intro.is_empty() {
            system_prompt.push_str("\n\n产品介绍：");
            system_prompt.push_str(&self.config.product_intro);
        }
        system_prompt.push_str(
            "\n\n请只回复一个JSON对象，格式：{\"intent\":\"类别\"}\
             \n\n意图类别：\
             \n- greeting: 仅限纯粹的打招呼和问候语（如：你好、hi、hello、在吗）\
             \n- product: 任何与产品相关的问题，包括但不限于：功能介绍、下载、安装、使用方法、技术问题、故障排查、价格、版本等\
             \n- irrelevant: 与产品完全无关的问题（如天气、笑话、新闻、个人情感等）\
             \n\n重要规则：如果用户在询问任何具体信息（即使很简短），都应归类为product而非greeting。\
             \n\n示例：\
             \n\"你好\" → {\"intent\":\"greeting\"}\
             \n\"hi\" → {\"intent\":\"greeting\"}\
             \n\"这是什么产品\" → {\"intent\":\"product\"}\
             \n\"下载地址\" → {\"intent\":\"product\"}\
             \n\"怎么安装\" → {\"intent\":\"product\"}\
             \n\"今天天气怎么样\" → {\"intent\":\"irrelevant\",\"reason\":\"天气查询与产品无关\"}",
        );

        let answer = match self.llm.generate(&system_prompt, &[], question).await {
            Ok(a) => a,
            Err(_) => {
                return IntentResult {
                    intent: "product".into(),
                    reason: String::new(),
                }
            }
        };

        parse_intent(&answer).unwrap_or(IntentResult {
            intent: "product".into(),
            reason: String::new(),
        })
    }

    /// Localizes a fixed string to the language of the question. Keeps the
    /// original on any failure (including the chat fallback string).
    async fn translate(&self, text: &str, question: &str) -> String {
        match self.llm.generate(TRANSLATE_PROMPT, &[text.to_string()], question).await {
            Ok(translated) if !translated.is_empty() && translated != FALLBACK_ANSWER => translated,
            _ => text.to_string(),
        }
    }

    /// Batch-embeds the most recent pending questions and returns the first
    /// one whose similarity to the query crosses the dedup threshold.
    async fn find_similar_pending(&self, query_vector: &[f32]) -> Option<String> {
        let questions = self
            .pending
            .recent_pending_questions(PENDING_DEDUP_SCAN)
            .await
            .ok()?;
        if questions.is_empty() {
            return None;
        }

        let vectors = self.embedding.embed_batch(&questions).await.ok()?;
        for (question, vector) in questions.into_iter().zip(vectors) {
            if cosine_similarity(query_vector, &vector) >= PENDING_DEDUP_THRESHOLD {
                return Some(question);
            }
        }
        None
    }

    /// Side query: image chunks from the result documents, used only when
    /// no result already carries an image.
    async fn find_document_images(&self, results: &[SearchResult]) -> Vec<SourceRef> {
        if results.iter().any(|r| !r.image_url.is_empty()) {
            return Vec::new();
        }

        let mut doc_ids: HashMap<&str, &str> = HashMap::new();
        for r in results {
            if !r.document_id.is_empty() {
                doc_ids.insert(&r.document_id, &r.document_name);
            }
        }

        let mut images = Vec::new();
        for (doc_id, doc_name) in doc_ids {
            let Ok(conn) = self.db.connect() else {
                continue;
            };
            let Ok(mut rows) = conn
                .query(
                    "SELECT image_url, chunk_text FROM chunks
                     WHERE document_id = ? AND image_url IS NOT NULL AND image_url != ''",
                    params![doc_id],
                )
                .await
            else {
                continue;
            };
            while let Ok(Some(row)) = rows.next().await {
                let image_url = match row.get_value(0) {
                    Ok(TursoValue::Text(s)) if !s.is_empty() => s,
                    _ => continue,
                };
                let chunk_text = match row.get_value(1) {
                    Ok(TursoValue::Text(s)) => s,
                    _ => String::new(),
                };
                images.push(SourceRef {
                    document_name: doc_name.to_string(),
                    chunk_index: -1,
                    snippet: chunk_text,
                    image_url,
                });
            }
        }
        images
    }
}

fn image_aware_system_prompt() -> String {
    "你是一个专业的软件技术支持助手。请根据提供的参考资料回答用户的问题。\
     如果参考资料中没有相关信息，请如实告知用户。回答应简洁、准确、有条理。\
     \n\n重要规则：你必须使用与用户提问相同的语言来回答。如果用户用英文提问，你必须用英文回答；\
     如果用户用中文提问，你必须用中文回答；其他语言同理。无论参考资料是什么语言，都要翻译成用户提问的语言来回答。\
     \n\n关于图片：参考资料中标记为[图片已附带]的内容，对应的图片会自动展示在你的回答下方。\
     请在回答中自然地引导用户查看图片（例如：如下图所示、请参考下方图片），不要说无法提供图片或无法展示图片。"
        .to_string()
}

/// Extracts the first `{…}` object from the reply and reads its `intent`.
fn parse_intent(answer: &str) -> Option<IntentResult> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end <= start {
        return None;
    }

    #[derive(Deserialize)]
    struct Parsed {
        intent: String,
        #[serde(default)]
        reason: String,
    }

    let parsed: Parsed = serde_json::from_str(&answer[start..=end]).ok()?;
    Some(IntentResult {
        intent: parsed.intent,
        reason: parsed.reason,
    })
}

/// Merges two result sets by `(document_id, chunk_index)`, keeping the
/// higher score, sorted descending and truncated to `top_k`.
fn merge_results(
    a: Vec<SearchResult>,
    b: Vec<SearchResult>,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut seen: HashMap<(String, i64), usize> = HashMap::new();
    let mut merged: Vec<SearchResult> = Vec::with_capacity(a.len() + b.len());

    for r in a.into_iter().chain(b) {
        let key = (r.document_id.clone(), r.chunk_index);
        match seen.get(&key) {
            Some(&idx) => {
                if r.score > merged[idx].score {
                    merged[idx] = r;
                }
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(r);
            }
        }
    }

    merged.sort_by(|x, y| y.score.total_cmp(&x.score));
    merged.truncate(top_k);
    merged
}

/// Stable partition by image presence, preserving score order inside each
/// group.
fn apply_content_priority(results: &mut Vec<SearchResult>, priority: ContentPriority) {
    if results.len() < 2 {
        return;
    }
    let image_first = match priority {
        ContentPriority::None => return,
        ContentPriority::ImageText => true,
        ContentPriority::TextOnly => false,
    };

    let (mut preferred, mut rest): (Vec<SearchResult>, Vec<SearchResult>) = results
        .drain(..)
        .partition(|r| !r.image_url.is_empty() == image_first);
    preferred.append(&mut rest);
    *results = preferred;
}

/// True when the answer matches the bilingual "cannot answer" denylist.
fn is_unable_to_answer(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    UNABLE_TO_ANSWER_PATTERNS
        .iter()
        .any(|p| lower.contains(&p.to_lowercase()))
}
