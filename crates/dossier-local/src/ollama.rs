use dossier_core::{CompletionBackend, CompletionError, CompletionRequest, CompletionResult};
use serde::{Deserialize, Serialize};

pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Chat-completion client for a local Ollama daemon.
///
/// The model is chosen per request, not per client: the summarizer walks a
/// ladder of models over one shared client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.trim().is_empty() {
            OLLAMA_DEFAULT_BASE_URL.to_string()
        } else {
            base_url.trim().to_string()
        };
        Self { client, base_url }
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn endpoint_tags(&self) -> String {
        format!("{}/api/tags", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Installed model names, for preflight checks.
    pub async fn list_models(&self, timeout_ms: u64) -> CompletionResult<Vec<String>> {
        let resp = self
            .client
            .get(self.endpoint_tags())
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(request_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CompletionError::Backend(format!(
                "ollama tags HTTP {status}"
            )));
        }
        let parsed: TagsResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Backend(e.to_string()))?;
        Ok(parsed
            .models
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect())
    }
}

fn request_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Backend(e.to_string())
    }
}

fn truncate_detail(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= 300 {
        return s.to_string();
    }
    s.chars().take(300).collect()
}

/// Classify an Ollama error body so the caller can decide whether to try
/// the next model in its ladder.
fn classify_failure(model: &str, status: reqwest::StatusCode, body: &str) -> CompletionError {
    let lower = body.to_lowercase();
    if status == reqwest::StatusCode::NOT_FOUND
        || (lower.contains("not found") && lower.contains("model"))
    {
        return CompletionError::ModelNotFound(model.to_string());
    }
    if lower.contains("memory") || lower.contains("system resources") {
        return CompletionError::ResourceExhausted(truncate_detail(body));
    }
    CompletionError::Backend(format!(
        "ollama chat HTTP {status}: {}",
        truncate_detail(body)
    ))
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    models: Option<Vec<TagModel>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait::async_trait]
impl CompletionBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, req: &CompletionRequest) -> CompletionResult<String> {
        let body = ChatRequest {
            model: req.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: req.prompt.clone(),
            }],
            stream: Some(false),
        };

        let resp = self
            .client
            .post(self.endpoint_chat())
            .timeout(std::time::Duration::from_millis(req.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_failure(&req.model, status, &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Backend(e.to_string()))?;
        Ok(parsed.message.content)
    }
}
