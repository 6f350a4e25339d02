//! OpenAI-compatible embeddings client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::errors::ProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorBody {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Client for `POST {endpoint}/embeddings`.
#[derive(Clone, Debug)]
pub struct ApiEmbeddingClient {
    client: ReqwestClient,
    endpoint: String,
    api_key: String,
    model_name: String,
}

impl ApiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model_name: config.model_name.clone(),
        })
    }

    async fn call_api(&self, input: serde_json::Value) -> Result<Vec<EmbeddingData>, ProviderError> {
        let url = format!("{}/embeddings", self.endpoint);
        let body = EmbeddingRequest {
            model: &self.model_name,
            input,
        };

        debug!(model = %self.model_name, "--> embeddings request");

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(ProviderError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<EmbeddingResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(ProviderError::Deserialization)?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("{} ({})", error.message, error.kind),
            });
        }
        Ok(parsed.data)
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let data = self
            .call_api(serde_json::Value::String(text.to_string()))
            .await?;
        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("no embeddings returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.call_api(serde_json::json!(texts)).await?;
        if data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "returned {} embeddings, expected {}",
                data.len(),
                texts.len()
            )));
        }

        // Responses may arrive out of order; the index field is authoritative.
        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for d in data {
            if d.index >= texts.len() {
                return Err(ProviderError::InvalidResponse(format!(
                    "returned invalid index {}",
                    d.index
                )));
            }
            embeddings[d.index] = Some(d.embedding);
        }
        embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                e.ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("missing embedding for index {i}"))
                })
            })
            .collect()
    }

    async fn embed_image(&self, data_url: &str) -> Result<Vec<f32>, ProviderError> {
        let data = self
            .call_api(serde_json::Value::String(data_url.to_string()))
            .await?;
        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("no embeddings returned".into()))
    }
}
