//! # ragdesk
//!
//! Core of a retrieval-augmented helpdesk: documents are parsed, chunked,
//! embedded and stored in SQLite; questions are answered by cosine top-K
//! retrieval plus a chat completion, with unanswerable questions parked for
//! a human operator whose reply is folded back into the knowledge base.
//!
//! The HTTP surface, authentication, mail, and configuration persistence
//! are external collaborators; everything here hangs off a single [`App`]
//! value that callers construct once and share.

pub mod chunker;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod pending;
pub mod providers;
pub mod query;
pub mod vector;

pub use chunker::TextChunker;
pub use config::AppConfig;
pub use errors::{IngestError, PendingError, ProviderError, QueryError, StoreError};
pub use ingest::DocumentManager;
pub use pending::PendingManager;
pub use query::{QueryEngine, QueryRequest, QueryResponse, SourceRef};
pub use vector::{SearchResult, SqliteVectorStore, VectorChunk};

use std::sync::Arc;

use providers::ai::{ApiChatClient, ApiEmbeddingClient, ChatProvider, EmbeddingProvider};
use ragdesk_parser::DocumentParser;

/// Wires the components together. All state is reachable from here; there
/// is no global state in the core.
pub struct App {
    pub db: turso::Database,
    pub store: Arc<SqliteVectorStore>,
    pub documents: DocumentManager,
    pub pending: Arc<PendingManager>,
    pub query: QueryEngine,
}

impl App {
    /// Builds the component graph from a configuration: database, vector
    /// store, API clients, and the three managers.
    pub async fn new(config: AppConfig) -> anyhow::Result<App> {
        let database = db::init_db(&config.vector.db_path).await?;
        let store = Arc::new(SqliteVectorStore::new(database.clone()));
        let chunker = TextChunker::new(config.vector.chunk_size, config.vector.overlap);

        let embedding = ApiEmbeddingClient::new(&config.embedding)?;
        let llm = ApiChatClient::new(&config.llm)?;

        Ok(Self::with_providers(
            database,
            store,
            chunker,
            Box::new(embedding),
            Box::new(llm),
            config,
        ))
    }

    /// Assembles the graph from pre-built providers. Tests use this with
    /// mock clients.
    pub fn with_providers(
        database: turso::Database,
        store: Arc<SqliteVectorStore>,
        chunker: TextChunker,
        embedding: Box<dyn EmbeddingProvider>,
        llm: Box<dyn ChatProvider>,
        config: AppConfig,
    ) -> App {
        let documents = DocumentManager::new(
            DocumentParser::new(),
            chunker,
            dyn_clone::clone_box(&*embedding),
            store.clone(),
            database.clone(),
            config.data_dir.clone(),
        );
        let pending = Arc::new(PendingManager::new(
            database.clone(),
            chunker,
            dyn_clone::clone_box(&*embedding),
            store.clone(),
            dyn_clone::clone_box(&*llm),
        ));
        let query = QueryEngine::new(
            embedding,
            store.clone(),
            llm,
            pending.clone(),
            database.clone(),
            config,
        );

        App {
            db: database,
            store,
            documents,
            pending,
            query,
        }
    }
}
