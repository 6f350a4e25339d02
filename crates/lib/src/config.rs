//! Configuration knobs for the core. The surrounding application owns
//! persistence and secret handling; the core only reads these values, and
//! changes take effect on the next query or ingest.

use serde::{Deserialize, Serialize};

/// Retrieval ordering preference between image-bearing and text-only chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPriority {
    #[default]
    None,
    ImageText,
    TextOnly,
}

/// Chunking and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub db_path: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub top_k: usize,
    pub threshold: f32,
    pub content_priority: ContentPriority,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/ragdesk.db".into(),
            chunk_size: 512,
            overlap: 128,
            top_k: 5,
            threshold: 0.7,
            content_priority: ContentPriority::None,
        }
    }
}

/// Connection settings for the OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model_name: String,
}

/// Connection settings for the OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model_name: String::new(),
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

/// Everything the core reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    /// Shown to users as the greeting response.
    pub product_intro: String,
    /// Root directory for extracted-image storage.
    pub data_dir: String,
}
