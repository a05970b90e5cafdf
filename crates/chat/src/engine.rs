//! The response orchestrator.
//!
//! One call turns one user utterance into one assistant reply:
//!
//! 1. **Read** the session's trimmed history
//! 2. **Build** system prompt → history → optional context → user message
//! 3. **Complete** through the provider (timeouts and retries live there)
//! 4. **Record** the exchange, only when the provider succeeded
//!
//! Failures never escape as `Err`: they come back as [`ChatOutcome::Failed`]
//! carrying the error text and a fixed apology.

use chrono::{DateTime, Utc};
use pulsechat_config::AppConfig;
use pulsechat_core::error::ValidationError;
use pulsechat_core::history::{ConversationStore, DEFAULT_SESSION_ID};
use pulsechat_core::message::Message;
use pulsechat_core::provider::{Provider, ProviderRequest, SamplingConfig};
use pulsechat_core::Snapshot;
use pulsechat_memory::InMemoryConversationStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{render_snapshot, CONTEXT_PREAMBLE};
use crate::prompt::SYSTEM_PROMPT;

/// User-facing text returned with every failed outcome.
pub const APOLOGY: &str =
    "I'm sorry, I encountered an error processing your request. Please try again.";

/// Input checks that reject a request before any work is done.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// One conversational turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    pub snapshot: Option<Snapshot>,
    pub include_context: bool,
}

impl ChatRequest {
    /// Validate and build a request. A missing session id becomes `"default"`.
    pub fn new(
        message: impl Into<String>,
        session_id: Option<String>,
        snapshot: Option<Snapshot>,
        include_context: bool,
    ) -> Result<Self, ChatError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(snapshot) = &snapshot {
            snapshot.validate()?;
        }
        Ok(Self {
            message,
            session_id: session_id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string()),
            snapshot,
            include_context,
        })
    }
}

/// A successful turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tokens_used: u32,
    pub model: String,
}

/// A failed turn. History was not touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFailure {
    pub error: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Replied(ChatReply),
    Failed(ChatFailure),
}

impl ChatOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Replied(_))
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Replied(reply) => &reply.session_id,
            Self::Failed(failure) => &failure.session_id,
        }
    }

    /// The text shown to the user: the reply, or the apology.
    pub fn response(&self) -> &str {
        match self {
            Self::Replied(reply) => &reply.response,
            Self::Failed(failure) => &failure.response,
        }
    }
}

/// Orchestrates history, context and the provider for each turn.
pub struct ChatEngine {
    provider: Arc<dyn Provider>,
    history: Arc<dyn ConversationStore>,
    model: String,
    sampling: SamplingConfig,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        history: Arc<dyn ConversationStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            history,
            model: model.into(),
            sampling: SamplingConfig::default(),
        }
    }

    /// Build the engine described by `config`.
    ///
    /// Fails when the configuration is invalid or carries no API key.
    pub fn from_config(config: &AppConfig) -> Result<Self, ChatError> {
        config
            .validate()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        let provider = pulsechat_providers::build_from_config(config)
            .map_err(|e| ChatError::Config(e.to_string()))?;
        let history = Arc::new(InMemoryConversationStore::new(config.history.max_messages));

        Ok(Self::new(provider, history, &config.provider.model).with_sampling(config.sampling.clone()))
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history_store(&self) -> &Arc<dyn ConversationStore> {
        &self.history
    }

    /// Assemble the outgoing message list.
    fn build_messages(
        &self,
        history: Vec<Message>,
        context: Option<String>,
        user_message: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend(history);
        if let Some(context) = context {
            messages.push(Message::system(format!("{CONTEXT_PREAMBLE}{context}")));
        }
        messages.push(Message::user(user_message));
        messages
    }

    fn failure(session_id: String, error: String) -> ChatOutcome {
        ChatOutcome::Failed(ChatFailure {
            error,
            response: APOLOGY.to_string(),
            timestamp: Utc::now(),
            session_id,
        })
    }

    /// Run one conversational turn.
    pub async fn chat(&self, request: ChatRequest) -> ChatOutcome {
        let ChatRequest {
            message,
            session_id,
            snapshot,
            include_context,
        } = request;

        let context = match (include_context, snapshot.as_ref()) {
            (true, Some(snapshot)) => {
                let rendered = match snapshot.validate() {
                    Ok(()) => render_snapshot(snapshot).map_err(|e| e.to_string()),
                    Err(e) => Err(ChatError::from(e).to_string()),
                };
                match rendered {
                    Ok(block) => Some(block),
                    Err(error) => {
                        warn!(session_id = %session_id, error = %error, "Snapshot could not be rendered");
                        return Self::failure(session_id, error);
                    }
                }
            }
            _ => None,
        };

        let history = self.history.get(&session_id).await;
        debug!(
            session_id = %session_id,
            history = history.len(),
            with_context = context.is_some(),
            "Building completion request"
        );
        let messages = self.build_messages(history, context, &message);

        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            sampling: self.sampling.clone(),
        };

        match self.provider.complete(request).await {
            Ok(response) => {
                let reply = response.message.content;
                self.history
                    .append_exchange(&session_id, &message, &reply)
                    .await;
                let tokens_used = response.usage.map(|u| u.total_tokens).unwrap_or(0);
                info!(
                    session_id = %session_id,
                    provider = %self.provider.name(),
                    model = %response.model,
                    tokens = tokens_used,
                    "Reply generated"
                );
                ChatOutcome::Replied(ChatReply {
                    response: reply,
                    timestamp: Utc::now(),
                    session_id,
                    tokens_used,
                    model: response.model,
                })
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    provider = %self.provider.name(),
                    error = %e,
                    "Completion failed; history left unchanged"
                );
                Self::failure(session_id, e.to_string())
            }
        }
    }

    /// The stored history of a conversational session, oldest first.
    pub async fn history(&self, session_id: &str) -> Vec<Message> {
        self.history.get(session_id).await
    }

    /// Reset a conversational session. Unknown ids are a no-op.
    pub async fn clear_history(&self, session_id: &str) {
        self.history.clear(session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{complete_snapshot, make_text_response, SequentialMockProvider};
    use pulsechat_core::error::ProviderError;
    use pulsechat_core::message::Role;

    fn engine(provider: Arc<SequentialMockProvider>) -> ChatEngine {
        ChatEngine::new(
            provider,
            Arc::new(InMemoryConversationStore::default()),
            "gpt-4o-mini",
        )
    }

    fn request(message: &str, session: &str) -> ChatRequest {
        ChatRequest::new(message, Some(session.into()), None, true).unwrap()
    }

    #[test]
    fn empty_message_rejected() {
        assert!(matches!(
            ChatRequest::new("   ", None, None, true),
            Err(ChatError::EmptyMessage)
        ));
    }

    #[test]
    fn out_of_range_snapshot_rejected() {
        let mut snapshot = complete_snapshot();
        snapshot.raw_signals.spo2 = 250.0;
        assert!(matches!(
            ChatRequest::new("how am I?", None, Some(snapshot), true),
            Err(ChatError::InvalidSnapshot(ValidationError::OutOfRange { field: "spo2", .. }))
        ));

        let mut snapshot = complete_snapshot();
        if let Some(insight) = snapshot.insight.as_mut() {
            insight.confidence = 5.0;
        }
        assert!(matches!(
            ChatRequest::new("how am I?", None, Some(snapshot), false),
            Err(ChatError::InvalidSnapshot(ValidationError::OutOfRange {
                field: "confidence",
                ..
            }))
        ));

        assert!(ChatRequest::new("how am I?", None, Some(complete_snapshot()), true).is_ok());
    }

    #[test]
    fn session_defaults() {
        let request = ChatRequest::new("hi", None, None, true).unwrap();
        assert_eq!(request.session_id, "default");
    }

    #[tokio::test]
    async fn grounded_turn_records_exchange() {
        let provider = Arc::new(SequentialMockProvider::new(vec![Ok(make_text_response(
            "Your heart rate is 72.3 BPM, which is normal.",
        ))]));
        let engine = engine(provider.clone());

        let outcome = engine
            .chat(
                ChatRequest::new(
                    "What's my heart rate?",
                    Some("s1".into()),
                    Some(complete_snapshot()),
                    true,
                )
                .unwrap(),
            )
            .await;

        let ChatOutcome::Replied(reply) = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.tokens_used, 15);
        assert_eq!(reply.model, "mock-model");

        let sent = provider.last_request();
        let context = &sent.messages[sent.messages.len() - 2];
        assert_eq!(context.role, Role::System);
        assert!(context.content.starts_with(CONTEXT_PREAMBLE));
        let raw = context.content.split("Signal Quality:").next().unwrap();
        assert!(raw.contains("Raw Signals:"));
        assert!(raw.contains("72.3"));

        let history = engine.history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "What's my heart rate?");
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn message_order_is_system_history_context_user() {
        let provider = Arc::new(SequentialMockProvider::repeating("ok", 2));
        let engine = engine(provider.clone());

        engine.chat(request("first", "s")).await;
        engine
            .chat(
                ChatRequest::new("second", Some("s".into()), Some(complete_snapshot()), true)
                    .unwrap(),
            )
            .await;

        let sent = provider.last_request();
        let roles: Vec<Role> = sent.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::System, Role::User]
        );
        assert_eq!(sent.messages[0].content, SYSTEM_PROMPT);
        assert_eq!(sent.messages[1].content, "first");
        assert_eq!(sent.messages[4].content, "second");
        assert_eq!(sent.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn context_omitted_when_disabled_or_absent() {
        let provider = Arc::new(SequentialMockProvider::repeating("ok", 2));
        let engine = engine(provider.clone());

        engine
            .chat(ChatRequest::new("a", Some("s".into()), Some(complete_snapshot()), false).unwrap())
            .await;
        assert_eq!(provider.last_request().messages.len(), 2);

        engine
            .chat(ChatRequest::new("b", Some("t".into()), None, true).unwrap())
            .await;
        let sent = provider.last_request();
        assert_eq!(sent.messages.len(), 2);
        assert!(sent
            .messages
            .iter()
            .all(|m| !m.content.starts_with(CONTEXT_PREAMBLE)));
    }

    #[tokio::test]
    async fn window_holds_twenty_after_many_turns() {
        let provider = Arc::new(SequentialMockProvider::repeating("ok", 25));
        let engine = engine(provider.clone());

        for i in 0..25 {
            let outcome = engine.chat(request(&format!("q{i}"), "s2")).await;
            assert!(outcome.is_success());
        }

        let history = engine.history("s2").await;
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].content, "q15");
        // The request for turn 25 carried the system prompt, 20 history messages and the user turn.
        assert_eq!(provider.last_request().messages.len(), 22);
    }

    #[tokio::test]
    async fn upstream_failure_leaves_history_unchanged() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_text_response("hello")),
            Err(ProviderError::Timeout("upstream took too long".into())),
        ]));
        let engine = engine(provider.clone());

        engine.chat(request("hi", "s3")).await;
        let before = engine.history("s3").await;

        let outcome = engine.chat(request("are you there?", "s3")).await;
        let ChatOutcome::Failed(failure) = outcome else {
            panic!("expected a failure, got {outcome:?}");
        };
        assert!(!failure.error.is_empty());
        assert!(failure.error.contains("timed out"));
        assert_eq!(failure.response, APOLOGY);
        assert_eq!(failure.session_id, "s3");

        assert_eq!(engine.history("s3").await, before);
    }

    #[tokio::test]
    async fn incomplete_snapshot_fails_without_calling_provider() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let engine = engine(provider.clone());

        let mut snapshot = complete_snapshot();
        snapshot.frequency_layer = None;
        let outcome = engine
            .chat(ChatRequest::new("how am I?", Some("s".into()), Some(snapshot), true).unwrap())
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.response(), APOLOGY);
        assert_eq!(provider.call_count(), 0);
        assert!(engine.history("s").await.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_snapshot_never_reaches_provider() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let engine = engine(provider.clone());

        let mut snapshot = complete_snapshot();
        if let Some(insight) = snapshot.insight.as_mut() {
            insight.confidence = 5.0;
        }
        // Built directly, bypassing the checks in `ChatRequest::new`.
        let request = ChatRequest {
            message: "how am I?".into(),
            session_id: "s".into(),
            snapshot: Some(snapshot),
            include_context: true,
        };
        let outcome = engine.chat(request).await;

        let ChatOutcome::Failed(failure) = outcome else {
            panic!("expected a failure, got {outcome:?}");
        };
        assert!(failure.error.contains("confidence"));
        assert_eq!(provider.call_count(), 0);
        assert!(engine.history("s").await.is_empty());
    }

    #[tokio::test]
    async fn missing_usage_counts_zero_tokens() {
        let mut response = make_text_response("fine");
        response.usage = None;
        let provider = Arc::new(SequentialMockProvider::new(vec![Ok(response)]));
        let engine = engine(provider);

        match engine.chat(request("hi", "s")).await {
            ChatOutcome::Replied(reply) => assert_eq!(reply.tokens_used, 0),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sessions_do_not_share_history() {
        let provider = Arc::new(SequentialMockProvider::repeating("ok", 2));
        let engine = engine(provider.clone());

        engine.chat(request("alice here", "alice")).await;
        engine.chat(request("bob here", "bob")).await;

        let sent = provider.last_request();
        assert!(sent.messages.iter().all(|m| m.content != "alice here"));

        engine.clear_history("alice").await;
        assert!(engine.history("alice").await.is_empty());
        assert_eq!(engine.history("bob").await.len(), 2);
    }

    #[tokio::test]
    async fn sampling_policy_is_forwarded() {
        let provider = Arc::new(SequentialMockProvider::repeating("ok", 1));
        let sampling = SamplingConfig {
            temperature: 0.2,
            ..SamplingConfig::default()
        };
        let engine = engine(provider.clone()).with_sampling(sampling.clone());

        engine.chat(request("hi", "s")).await;
        assert_eq!(provider.last_request().sampling, sampling);
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            ChatEngine::from_config(&config),
            Err(ChatError::Config(_))
        ));

        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let engine = ChatEngine::from_config(&config).unwrap();
        assert_eq!(engine.model(), "gpt-4o-mini");
        assert_eq!(engine.history_store().cap(), 20);
    }
}
