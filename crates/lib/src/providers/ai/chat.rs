//! OpenAI-compatible chat-completions client with the retry-once /
//! fallback-string failure policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embedding::ApiErrorBody;
use super::ChatProvider;
use crate::config::LlmConfig;
use crate::errors::ProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Returned verbatim when both attempts fail; callers never see the error.
pub const FALLBACK_ANSWER: &str = "服务暂时不可用，请稍后重试";

/// System prompt used when the caller passes an empty one.
const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的软件技术支持助手。请根据提供的参考资料回答用户的问题。\
如果参考资料中没有相关信息，请如实告知用户。回答应简洁、准确、有条理。\
\n\n重要规则：你必须使用与用户提问相同的语言来回答。如果用户用英文提问，你必须用英文回答；\
如果用户用中文提问，你必须用中文回答；其他语言同理。";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatMessage,
}

/// Builds the two-message layout: system prompt (or the default), then one
/// user message holding the numbered context and the question.
pub(crate) fn build_messages(
    system_prompt: &str,
    context: &[String],
    question: &str,
) -> Vec<ChatMessage> {
    let system = if system_prompt.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        system_prompt.to_string()
    };

    let mut user = String::new();
    if !context.is_empty() {
        user.push_str("参考资料：\n");
        for (i, chunk) in context.iter().enumerate() {
            user.push_str(&format!("[{}] {}\n", i + 1, chunk));
        }
        user.push('\n');
    }
    user.push_str(&format!("用户问题：{question}"));

    vec![
        ChatMessage {
            role: "system".into(),
            content: system,
        },
        ChatMessage {
            role: "user".into(),
            content: user,
        },
    ]
}

/// Client for `POST {endpoint}/chat/completions`.
#[derive(Clone, Debug)]
pub struct ApiChatClient {
    client: ReqwestClient,
    endpoint: String,
    api_key: String,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl ApiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model_name: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn call_once(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = ChatRequest {
            model: &self.model_name,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model_name, "--> chat completion request");

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(ProviderError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(ProviderError::Deserialization)?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("{} ({})", error.message, error.kind),
            });
        }

        // An empty choices array counts as a failure for the retry policy.
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("empty choices".into()))
    }
}

#[async_trait]
impl ChatProvider for ApiChatClient {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> Result<String, ProviderError> {
        let messages = build_messages(system_prompt, context, question);

        match self.call_once(&messages).await {
            Ok(answer) => Ok(answer),
            Err(first) => {
                warn!("chat completion failed, retrying once: {first}");
                match self.call_once(&messages).await {
                    Ok(answer) => Ok(answer),
                    Err(second) => {
                        warn!("chat completion retry failed: {second}");
                        Ok(FALLBACK_ANSWER.to_string())
                    }
                }
            }
        }
    }
}
