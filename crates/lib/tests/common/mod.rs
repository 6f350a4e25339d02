//! Shared test utilities: tracing setup, deterministic mock AI providers,
//! and an in-memory `App` assembly.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;

use ragdesk::config::AppConfig;
use ragdesk::errors::ProviderError;
use ragdesk::providers::ai::{ChatProvider, EmbeddingProvider};
use ragdesk::{App, SqliteVectorStore, TextChunker};

static INIT: Once = Once::new();

/// Initializes the tracing subscriber once for the whole test binary.
pub fn setup_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info")
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic embedder: known texts map to fixed vectors, everything
/// else gets the default vector.
#[derive(Clone, Debug)]
pub struct MockEmbedder {
    map: Arc<HashMap<String, Vec<f32>>>,
    default: Vec<f32>,
    fail: bool,
}

impl MockEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            map: Arc::new(HashMap::new()),
            default,
            fail: false,
        }
    }

    pub fn with_map(default: Vec<f32>, map: HashMap<String, Vec<f32>>) -> Self {
        Self {
            map: Arc::new(map),
            default,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            map: Arc::new(HashMap::new()),
            default: Vec::new(),
            fail: true,
        }
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        self.map.get(text).cloned().unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock failure".into()));
        }
        Ok(self.lookup(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock failure".into()));
        }
        Ok(texts.iter().map(|t| self.lookup(t)).collect())
    }

    async fn embed_image(&self, _data_url: &str) -> Result<Vec<f32>, ProviderError> {
        if self.fail {
            return Err(ProviderError::InvalidResponse("mock failure".into()));
        }
        Ok(self.default.clone())
    }
}

/// Scripted chat provider. Pops scripted replies in order; once exhausted,
/// echoes the first context chunk (which makes the translation helper an
/// identity function) or returns the default reply when there is no
/// context. Records every call.
#[derive(Clone, Debug)]
pub struct MockChat {
    scripted: Arc<Mutex<VecDeque<String>>>,
    default_reply: String,
    pub calls: Arc<Mutex<Vec<(String, Vec<String>, String)>>>,
}

impl MockChat {
    pub fn echoing() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: "mock answer".into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(replies: Vec<&str>) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(
                replies.into_iter().map(String::from).collect(),
            )),
            default_reply: "mock answer".into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push((
            system_prompt.to_string(),
            context.to_vec(),
            question.to_string(),
        ));
        if let Some(reply) = self.scripted.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        Ok(context
            .first()
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone()))
    }
}

/// An `App` over an in-memory database with the given mock providers.
pub async fn test_app(
    config: AppConfig,
    embedder: MockEmbedder,
    chat: MockChat,
) -> anyhow::Result<App> {
    setup_tracing();
    let database = ragdesk::db::init_db(":memory:").await?;
    let store = Arc::new(SqliteVectorStore::new(database.clone()));
    let chunker = TextChunker::new(config.vector.chunk_size, config.vector.overlap);
    Ok(App::with_providers(
        database,
        store,
        chunker,
        Box::new(embedder),
        Box::new(chat),
        config,
    ))
}

/// Inserts a document row directly, for tests that store chunks without
/// going through the ingest pipeline.
pub async fn insert_document(db: &turso::Database, id: &str) -> anyhow::Result<()> {
    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO documents (id, name, type, status) VALUES (?, ?, 'pdf', 'success')",
        turso::params![id, id],
    )
    .await?;
    Ok(())
}
