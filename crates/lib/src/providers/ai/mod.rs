//! Capability traits for the external AI services and their
//! OpenAI-compatible HTTP implementations.

pub mod chat;
pub mod embedding;

use async_trait::async_trait;
use dyn_clone::DynClone;
use std::fmt::Debug;

use crate::errors::ProviderError;

pub use chat::ApiChatClient;
pub use embedding::ApiEmbeddingClient;

/// Converts text (or an image data URL) into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug + DynClone {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embeds a batch in one call. Returns exactly one vector per input, in
    /// input order. An empty input returns an empty output without calling
    /// the API.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embeds an image given as a data URL.
    async fn embed_image(&self, data_url: &str) -> Result<Vec<f32>, ProviderError>;
}

dyn_clone::clone_trait_object!(EmbeddingProvider);

/// Produces a chat completion from a system prompt, numbered context chunks
/// and the user question.
#[async_trait]
pub trait ChatProvider: Send + Sync + Debug + DynClone {
    /// Never fails outright: transport and API errors are retried once, and
    /// a persistent failure yields the fixed service-unavailable string.
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> Result<String, ProviderError>;
}

dyn_clone::clone_trait_object!(ChatProvider);
