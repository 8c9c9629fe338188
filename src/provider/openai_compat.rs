// src/provider/openai_compat.rs — OpenAI-compatible chat completions client
//
// Works against any endpoint that speaks `/chat/completions`: OpenAI, Groq,
// Together, OpenRouter, Ollama's compat layer, vLLM and friends.

use async_trait::async_trait;
use std::time::Duration;

use super::{ChatRequest, ChatResponse, InferenceService, Role, TokenUsage};
use crate::infra::config::ProviderConfig;
use crate::infra::errors::EngineError;

pub struct OpenAICompatService {
    id_str: String,
    api_key: String,
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAICompatService {
    pub fn new(
        id: impl Into<String>,
        api_key: String,
        base_url: String,
        default_model: String,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("tuneloop/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            id_str: id.into(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
            client,
        })
    }

    /// Build from config. The API key is read from the environment variable
    /// the config names; a missing variable is allowed for local endpoints.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!(
                env = %cfg.api_key_env,
                "API key variable is unset; sending unauthenticated requests"
            );
        }
        Self::new(
            "openai-compat",
            api_key,
            cfg.base_url.clone(),
            cfg.model.clone(),
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut msgs = Vec::new();
        if let Some(system) = &request.system {
            msgs.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            msgs.push(serde_json::json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            }));
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let mut body = serde_json::json!({
            "model": model,
            "messages": msgs,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(contract) = &request.contract {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": contract.name,
                    "schema": (contract.schema)(),
                    "strict": false,
                }
            });
        }
        body
    }

    fn classify_status(&self, status: reqwest::StatusCode, retry_after: Option<u64>, body: String) -> EngineError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return EngineError::RateLimited {
                provider: self.id_str.clone(),
                retry_after_ms: retry_after.map(|s| s * 1000).unwrap_or(0),
            };
        }
        EngineError::Provider {
            provider: self.id_str.clone(),
            message: format!("HTTP {status}: {body}"),
            retriable: status.is_server_error(),
        }
    }
}

#[async_trait]
impl InferenceService for OpenAICompatService {
    fn id(&self) -> &str {
        &self.id_str
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, EngineError> {
        let body = self.request_body(&request);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(|e| EngineError::Provider {
            provider: self.id_str.clone(),
            message: e.to_string(),
            retriable: e.is_timeout() || e.is_connect(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, retry_after, error_body));
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| EngineError::Provider {
            provider: self.id_str.clone(),
            message: e.to_string(),
            retriable: false,
        })?;

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        tracing::trace!(
            provider = %self.id_str,
            tokens = usage.total(),
            contract = request.contract_name().unwrap_or("-"),
            "chat completion"
        );

        Ok(ChatResponse { content, usage })
    }
}
