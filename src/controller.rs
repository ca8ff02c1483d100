//! One request/response cycle against the completion backend.
//!
//! `stream_turn` validates the request and hands back a bounded event
//! receiver; a spawned producer then owns the turn. The producer holds the
//! session's turn lock for the whole cycle, so turns on one session key run
//! one after another while different sessions proceed concurrently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ChatSettings, Config};
use crate::error::{BackendError, ChatError};
use crate::events::{AskRequest, AskResponse, ChatEvent, Domain, ErrorBody, ResetResponse, Turn};
use crate::knowledge::KnowledgeBaseCache;
use crate::llm::{ChatMessage, CompletionBackend, CompletionRequest, LlmClient, LlmEvent};
use crate::prompts::{PromptAssembler, persona_prompt};
use crate::session::{SessionKey, SessionStore};
use crate::streaming::{StreamAccumulator, TurnPhase};

/// Orchestrates session history, prompt assembly and backend streaming
#[derive(Clone)]
pub struct StreamingCompletionController {
    sessions: Arc<SessionStore>,
    knowledge: Arc<KnowledgeBaseCache>,
    backend: Arc<dyn CompletionBackend>,
    settings: ChatSettings,
}

impl StreamingCompletionController {
    pub fn new(
        sessions: Arc<SessionStore>,
        knowledge: Arc<KnowledgeBaseCache>,
        backend: Arc<dyn CompletionBackend>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            sessions,
            knowledge,
            backend,
            settings,
        }
    }

    /// Wire the controller to the configured HTTP backend.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let backend = LlmClient::new(config)?;
        Ok(Self::new(
            Arc::new(SessionStore::new(config.chat.history_limit)),
            Arc::new(KnowledgeBaseCache::new(config.knowledge_sources())),
            Arc::new(backend),
            config.chat.clone(),
        ))
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBaseCache> {
        &self.knowledge
    }

    /// Start a streamed turn.
    ///
    /// Empty text is rejected here with no backend call. Otherwise the
    /// receiver yields chunks in backend order and then exactly one `Done`
    /// or `Error`. Dropping the receiver cancels the turn without touching
    /// history beyond the user turn.
    pub async fn stream_turn(
        &self,
        key: &SessionKey,
        request: AskRequest,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        let text = request.text.trim().to_string();
        if text.is_empty() {
            debug!(session = %key, "rejecting empty turn");
            return Err(ChatError::empty_text());
        }

        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let controller = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let turn_lock = controller.sessions.turn_lock(&key);
            let _turn = turn_lock.lock_owned().await;
            let phase = controller.run_turn(&key, &text, request.domain.as_deref(), tx).await;
            debug!(session = %key, %phase, "turn finished");
        });

        Ok(rx)
    }

    /// Non-streaming mode: run a turn and return the whole reply.
    pub async fn ask(&self, key: &SessionKey, request: AskRequest) -> Result<String, ChatError> {
        let mut events = self.stream_turn(key, request).await?;
        let mut reply = String::new();
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Chunk(chunk) => reply.push_str(&chunk),
                ChatEvent::Done => return Ok(reply),
                ChatEvent::Error(message) => return Err(ChatError::Failed(message)),
            }
        }
        Err(BackendError::StreamClosed.into())
    }

    /// `ask` shaped as the non-streaming wire bodies.
    pub async fn respond(
        &self,
        key: &SessionKey,
        request: AskRequest,
    ) -> Result<AskResponse, ErrorBody> {
        match self.ask(key, request).await {
            Ok(reply) => Ok(AskResponse { reply }),
            Err(err) => Err(ErrorBody::from(&err)),
        }
    }

    /// Clear the session history; the domain selection is kept.
    ///
    /// Waits for an in-flight turn on the same key, so a reply is never
    /// committed onto a history that was cleared under it.
    pub async fn reset(&self, key: &SessionKey) -> ResetResponse {
        let _turn = self.sessions.turn_lock(key).lock_owned().await;
        self.sessions.reset(key);
        info!(session = %key, "context reset");
        ResetResponse::context_reset()
    }

    /// Sticky domain selection; unknown selectors keep the current one.
    pub fn select_domain(&self, key: &SessionKey, selector: &str) -> Domain {
        self.sessions.set_domain(key, selector)
    }

    pub fn history(&self, key: &SessionKey) -> Vec<Turn> {
        self.sessions.snapshot(key)
    }

    /// System prompt plus history, sampled cooler when grounded.
    pub fn build_request(&self, domain: Domain, history: &[Turn]) -> CompletionRequest {
        let knowledge = &self.knowledge;
        let system = PromptAssembler::build(domain, persona_prompt(self.settings.persona), |d| {
            knowledge.load(d).to_string()
        });

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(history.iter().map(ChatMessage::from));

        let temperature = if domain.is_grounded() {
            self.settings.grounded_temperature
        } else {
            self.settings.persona_temperature
        };

        CompletionRequest::new(messages)
            .with_temperature(temperature)
            .with_max_tokens(self.settings.max_tokens)
    }

    async fn run_turn(
        &self,
        key: &SessionKey,
        text: &str,
        selector: Option<&str>,
        tx: mpsc::Sender<ChatEvent>,
    ) -> TurnPhase {
        let mut turn = StreamAccumulator::new();

        // caller gave up while queued behind another turn
        if tx.is_closed() {
            info!(session = %key, "caller disconnected before turn started");
            turn.fail();
            return turn.phase();
        }

        if let Some(selector) = selector {
            self.sessions.set_domain(key, selector);
        }
        let domain = self.sessions.selected_domain(key);

        if let Err(err) = self.sessions.append_user(key, text) {
            turn.fail();
            let _ = tx.send(ChatEvent::Error(err.to_string())).await;
            return turn.phase();
        }
        turn.advance(TurnPhase::Requested);

        let history = self.sessions.snapshot(key);
        let request = self.build_request(domain, &history);
        info!(session = %key, %domain, turns = history.len(), "turn requested");

        let mut upstream = match self.backend.stream_chat(request).await {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(session = %key, error = %err, "backend refused turn");
                turn.fail();
                let _ = tx.send(ChatEvent::Error(err.to_string())).await;
                return turn.phase();
            }
        };
        turn.advance(TurnPhase::Streaming);

        loop {
            let event = tokio::select! {
                event = upstream.recv() => event,
                _ = tx.closed() => {
                    info!(session = %key, chunks = turn.chunk_count(), "caller disconnected, abandoning stream");
                    turn.fail();
                    return turn.phase();
                }
            };

            match event {
                Some(LlmEvent::TextDelta(delta)) => {
                    turn.push_delta(&delta);
                    if tx.send(ChatEvent::Chunk(delta)).await.is_err() {
                        info!(session = %key, chunks = turn.chunk_count(), "caller disconnected, abandoning stream");
                        turn.fail();
                        return turn.phase();
                    }
                }
                Some(LlmEvent::StreamComplete) => {
                    let chunks = turn.chunk_count();
                    match turn.complete() {
                        Some(reply) => self.sessions.append_assistant(key, &reply),
                        None => warn!(session = %key, "backend completed with empty reply"),
                    }
                    info!(session = %key, chunks, "turn completed");
                    let _ = tx.send(ChatEvent::Done).await;
                    return turn.phase();
                }
                Some(LlmEvent::Error(err)) => {
                    warn!(session = %key, chunks = turn.chunk_count(), error = %err, "turn failed mid-stream");
                    turn.fail();
                    let _ = tx.send(ChatEvent::Error(err.to_string())).await;
                    return turn.phase();
                }
                None => {
                    let err = BackendError::StreamClosed;
                    warn!(session = %key, error = %err, "backend dropped stream");
                    turn.fail();
                    let _ = tx.send(ChatEvent::Error(err.to_string())).await;
                    return turn.phase();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct Unreachable;

    #[async_trait]
    impl CompletionBackend for Unreachable {
        async fn stream_chat(
            &self,
            _request: CompletionRequest,
        ) -> Result<mpsc::Receiver<LlmEvent>, BackendError> {
            Err(BackendError::Connection("connection refused".to_string()))
        }
    }

    fn controller(sources: BTreeMap<Domain, PathBuf>) -> StreamingCompletionController {
        StreamingCompletionController::new(
            Arc::new(SessionStore::new(6)),
            Arc::new(KnowledgeBaseCache::new(sources)),
            Arc::new(Unreachable),
            ChatSettings::default(),
        )
    }

    #[test]
    fn normal_request_uses_persona_and_warm_temperature() {
        let controller = controller(BTreeMap::new());
        let history = vec![Turn::user("hi")];
        let request = controller.build_request(Domain::Normal, &history);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(
            request.messages[0].content,
            persona_prompt(ChatSettings::default().persona)
        );
        assert_eq!(request.messages[1], ChatMessage::from(&history[0]));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(300));
        assert!(controller.knowledge().cached_domains().is_empty());
    }

    #[test]
    fn grounded_request_injects_knowledge_and_cools_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.txt");
        std::fs::write(&path, "OPD opens at 9am").unwrap();
        let controller = controller(BTreeMap::from([(Domain::Healthcare, path)]));

        let request = controller.build_request(Domain::Healthcare, &[Turn::user("when?")]);
        assert!(request.messages[0].content.contains("OPD opens at 9am"));
        assert!(request.messages[0].content.contains("healthcare knowledge base"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(controller.knowledge().cached_domains(), vec![Domain::Healthcare]);
    }

    #[tokio::test]
    async fn refused_connection_yields_single_error_event() {
        let controller = controller(BTreeMap::new());
        let key = SessionKey::from("s");
        let mut events = controller.stream_turn(&key, AskRequest::new("hello")).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first, ChatEvent::Error("connection error: connection refused".to_string()));
        assert!(events.recv().await.is_none());
        assert_eq!(controller.history(&key), vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_up_front() {
        let controller = controller(BTreeMap::new());
        let key = SessionKey::from("s");
        let err = controller
            .stream_turn(&key, AskRequest::new("  ").with_domain("finance"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(controller.history(&key).is_empty());
        assert_eq!(controller.sessions().selected_domain(&key), Domain::Normal);
    }

    #[tokio::test]
    async fn ask_surfaces_backend_failure() {
        let controller = controller(BTreeMap::new());
        let err = controller
            .ask(&SessionKey::from("s"), AskRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Failed(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn respond_maps_errors_to_wire_body() {
        let controller = controller(BTreeMap::new());
        let key = SessionKey::from("s");

        let err = controller.respond(&key, AskRequest::new(" ")).await.unwrap_err();
        assert_eq!(err, ErrorBody { error: "Empty text.".to_string() });

        let err = controller.respond(&key, AskRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.error, "connection error: connection refused");
    }

    #[tokio::test]
    async fn reset_reports_status() {
        let controller = controller(BTreeMap::new());
        let key = SessionKey::from("s");
        controller.select_domain(&key, "finance");
        assert_eq!(controller.reset(&key).await.status, "context reset");
        assert_eq!(controller.sessions().selected_domain(&key), Domain::Finance);
    }
}
