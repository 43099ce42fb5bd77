use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{Backend, EmbeddingOutput, GenerateRequest, Generation, Usage};
use crate::config::ReasoningEffort;
use crate::error::{BackendError, ConfigError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-5.2";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Completion budget when the request leaves it open; reasoning models
/// spend part of it before producing visible output.
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;

/// Backend for any OpenAI-compatible `/chat/completions` + `/embeddings` API.
pub struct OpenAIBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    sampling_temperature: bool,
}

/// Reasoning-model families reject any `temperature` other than the default.
pub fn accepts_temperature(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model);
    !["gpt-5", "o1", "o3", "o4"].iter().any(|family| name.starts_with(family))
}

impl OpenAIBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            sampling_temperature: accepts_temperature(&model),
            model,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Overrides the per-model guess of whether `temperature` may be sent.
    pub fn with_sampling_temperature(mut self, enabled: bool) -> Self {
        self.sampling_temperature = enabled;
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Reads `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL` and
    /// `OPENAI_EMBEDDING_MODEL`. Only the key is mandatory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::Load("OPENAI_API_KEY is not set".to_string()))?;
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let embedding_model =
            std::env::var("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        Ok(Self::new(base_url, Some(api_key), model).with_embedding_model(embedding_model))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), message));
        }

        res.json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))
    }
}

pub(crate) fn chat_body(model: &str, request: &GenerateRequest, sampling_temperature: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
        "max_completion_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS),
    });

    match request.temperature {
        Some(t) if sampling_temperature => body["temperature"] = json!(t),
        _ => {}
    }
    match request.reasoning_effort {
        Some(ReasoningEffort::None) | None => {}
        Some(effort) => body["reasoning_effort"] = json!(effort.as_str()),
    }
    if let Some(v) = request.verbosity {
        body["verbosity"] = json!(v.as_str());
    }
    body
}

pub(crate) fn parse_chat_response(json: &Value) -> Result<Generation, BackendError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| BackendError::MalformedResponse("response has no choices".to_string()))?;
    // A null content is an empty answer, left for the strategy to reject.
    let text = choice["message"]["content"].as_str().unwrap_or_default().to_string();

    let usage = json.get("usage").and_then(|u| {
        Some(Usage {
            input_tokens: u["prompt_tokens"].as_u64()?,
            output_tokens: u["completion_tokens"].as_u64()?,
        })
    });

    Ok(Generation { text, usage })
}

pub(crate) fn parse_embeddings(json: &Value) -> Result<Vec<EmbeddingOutput>, BackendError> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| BackendError::MalformedResponse("embedding response has no data".to_string()))?;
    let total_tokens = json["usage"]["total_tokens"].as_u64();
    let per_item = total_tokens.map(|t| t / data.len().max(1) as u64);

    data.iter()
        .map(|item| {
            let embedding = item["embedding"]
                .as_array()
                .ok_or_else(|| BackendError::MalformedResponse("missing embedding vector".to_string()))?
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| BackendError::MalformedResponse("non-numeric embedding value".to_string()))
                })
                .collect::<Result<Vec<f64>, _>>()?;
            Ok(EmbeddingOutput { embedding, tokens: per_item })
        })
        .collect()
}

#[async_trait]
impl Backend for OpenAIBackend {
    fn model(&self) -> &str {
        &self.model
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    async fn generate_text(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let json = self.post("chat/completions", &chat_body(&self.model, request, self.sampling_temperature)).await?;
        parse_chat_response(&json)
    }

    async fn embed_text(&self, text: &str) -> Result<EmbeddingOutput, BackendError> {
        let body = json!({ "model": self.embedding_model, "input": text });
        let json = self.post("embeddings", &body).await?;
        parse_embeddings(&json)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::MalformedResponse("empty embedding response".to_string()))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<EmbeddingOutput>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.embedding_model, "input": texts });
        let json = self.post("embeddings", &body).await?;
        let out = parse_embeddings(&json)?;
        if out.len() != texts.len() {
            return Err(BackendError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                out.len()
            )));
        }
        Ok(out)
    }
}
