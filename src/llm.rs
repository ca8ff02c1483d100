use crate::config::{BackendConfig, Config, HttpConfig, ProviderKind};
use crate::error::BackendError;
use crate::events::Turn;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Events emitted by a completion backend while streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// Text delta from streaming response
    TextDelta(String),
    /// Stream completed cleanly
    StreamComplete,
    /// Stream failed after it started
    Error(BackendError),
}

/// Message in a completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.to_string(),
            content: turn.content.clone(),
        }
    }
}

/// Request to send to the completion backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Hosted chat-completions endpoint.
///
/// `Err` from `stream_chat` means nothing was streamed. Once a receiver is
/// returned, it yields deltas followed by exactly one `StreamComplete` or
/// `Error`. Dropping the receiver abandons the upstream request.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, BackendError>;
}

static HTTP_CLIENT: OnceCell<reqwest::Client> = OnceCell::new();

/// Process-wide HTTP client. Built once on first use; later calls reuse its
/// connection pool and ignore `http`.
pub fn shared_http_client(http: &HttpConfig) -> Result<&'static reqwest::Client, BackendError> {
    HTTP_CLIENT.get_or_try_init(|| {
        debug!(
            timeout_secs = http.timeout_secs,
            pool_max_idle_per_host = http.pool_max_idle_per_host,
            "building shared HTTP client"
        );
        reqwest::Client::builder()
            .timeout(http.timeout())
            .pool_max_idle_per_host(http.pool_max_idle_per_host)
            .pool_idle_timeout(http.pool_idle_timeout())
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("failed to create HTTP client: {e}")))
    })
}

/// LLM client for streaming responses from Azure OpenAI or an
/// OpenAI-compatible endpoint
#[derive(Clone)]
pub struct LlmClient {
    backend: BackendConfig,
    client: reqwest::Client,
    buffer: usize,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let client = shared_http_client(&config.http)?.clone();
        Ok(Self {
            backend: config.backend.clone(),
            client,
            buffer: config.chat.stream_buffer.max(1),
        })
    }

    fn check_configured(&self) -> Result<&str, BackendError> {
        if self.backend.endpoint.trim().is_empty() {
            return Err(BackendError::NotConfigured("no endpoint configured".to_string()));
        }
        if self.backend.provider == ProviderKind::Azure && self.backend.deployment.trim().is_empty() {
            return Err(BackendError::NotConfigured("no Azure deployment configured".to_string()));
        }
        self.backend
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::NotConfigured("no API key configured".to_string()))
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, BackendError> {
        let api_key = self.check_configured()?;
        let url = endpoint_url(&self.backend);
        let payload = request_payload(&self.backend, &request);

        debug!(
            provider = ?self.backend.provider,
            messages = request.messages.len(),
            "sending streaming completion request"
        );

        let builder = self.client.post(&url).header("Content-Type", "application/json");
        let builder = match self.backend.provider {
            ProviderKind::Azure => builder.header("api-key", api_key),
            ProviderKind::OpenAi => builder.header("Authorization", format!("Bearer {}", api_key)),
        };

        let response = builder.json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(process_sse_stream(Box::pin(response.bytes_stream()), tx));
        Ok(rx)
    }
}

/// Completion URL for the configured provider
pub fn endpoint_url(backend: &BackendConfig) -> String {
    let base = backend.endpoint.trim_end_matches('/');
    match backend.provider {
        ProviderKind::Azure => format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            base, backend.deployment, backend.api_version
        ),
        ProviderKind::OpenAi => format!("{}/v1/chat/completions", base),
    }
}

/// JSON body for a streaming chat-completions call
pub fn request_payload(backend: &BackendConfig, request: &CompletionRequest) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "messages": request.messages,
        "stream": true,
        "temperature": request.temperature.unwrap_or(0.7),
        "max_tokens": request.max_tokens.unwrap_or(300)
    });
    if backend.provider == ProviderKind::OpenAi {
        payload["model"] = serde_json::Value::String(backend.model.clone());
    }
    payload
}

/// One meaningful line of a Server-Sent Events body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Delta(String),
    Done,
}

/// Interpret one SSE line. Comments, blank lines, non-data fields and
/// deltas without text yield `None`.
pub fn parse_sse_line(line: &str) -> Result<Option<SseData>, BackendError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(Some(SseData::Done));
    }

    let chunk: serde_json::Value =
        serde_json::from_str(data).map_err(|_| BackendError::MalformedChunk(data.to_string()))?;

    if let Some(error) = chunk.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(BackendError::Upstream(message));
    }

    let content = chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty());

    Ok(content.map(|c| SseData::Delta(c.to_string())))
}

/// Pump an SSE byte stream into `tx` until `[DONE]`, end of body or failure.
///
/// Lines are split on raw bytes so multi-byte characters straddling network
/// chunks survive. Returns early if the receiver is dropped.
pub async fn process_sse_stream<S, B, E>(mut stream: S, tx: mpsc::Sender<LlmEvent>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<BackendError>,
{
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let err = e.into();
                warn!(error = %err, "completion stream failed");
                let _ = tx.send(LlmEvent::Error(err)).await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        // Process complete lines
        while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
            if !forward_line(&line, &tx).await {
                return;
            }
        }
    }

    // Flush any remaining buffer line (without newline)
    if !buffer.is_empty() && !forward_line(&buffer, &tx).await {
        return;
    }

    let _ = tx.send(LlmEvent::StreamComplete).await;
}

/// Forward one line; `false` means the stream is finished or abandoned.
async fn forward_line(line: &[u8], tx: &mpsc::Sender<LlmEvent>) -> bool {
    let parsed = match std::str::from_utf8(line) {
        Ok(line) => parse_sse_line(line),
        Err(_) => Err(BackendError::MalformedChunk(
            String::from_utf8_lossy(line).trim().to_string(),
        )),
    };
    match parsed {
        Ok(None) => true,
        Ok(Some(SseData::Delta(text))) => tx.send(LlmEvent::TextDelta(text)).await.is_ok(),
        Ok(Some(SseData::Done)) => {
            let _ = tx.send(LlmEvent::StreamComplete).await;
            false
        }
        Err(err) => {
            warn!(error = %err, "rejecting completion stream");
            let _ = tx.send(LlmEvent::Error(err)).await;
            false
        }
    }
}
