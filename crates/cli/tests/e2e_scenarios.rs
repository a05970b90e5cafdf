//! End-to-end scenarios across the engine, the history store, the provider
//! retry wrapper and the SQLite entity store.
//!
//! The language-model service is replaced by scripted providers; everything
//! else is the production wiring.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pulsechat_chat::{ChatEngine, ChatOutcome, ChatRequest, APOLOGY, CONTEXT_PREAMBLE};
use pulsechat_core::error::{ProviderError, StorageError};
use pulsechat_core::message::{Message, Role};
use pulsechat_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use pulsechat_core::schema::*;
use pulsechat_core::{EntityStore, Snapshot};
use pulsechat_memory::InMemoryConversationStore;
use pulsechat_providers::RetryProvider;
use pulsechat_storage::SqliteStore;

// ── Scripted language-model services ──────────────────────────────────────

/// Echoes a fixed reply and records every request it sees.
struct RecordingProvider {
    reply: String,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl RecordingProvider {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(ProviderResponse {
            message: Message::assistant(self.reply.clone()),
            usage: Some(Usage {
                prompt_tokens: 120,
                completion_tokens: 30,
                total_tokens: 150,
            }),
            model: "gpt-4o-mini-2024-07-18".into(),
        })
    }
}

/// Never answers; every call runs into the caller's timeout.
struct HangingProvider {
    calls: Mutex<u32>,
}

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        std::future::pending().await
    }
}

/// Replays a script of outcomes in order.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<&'static str, ProviderError>>>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let next = self.script.lock().unwrap().pop_front().expect("script exhausted");
        next.map(|text| ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model: "mock-model".into(),
        })
    }
}

fn engine_with(provider: Arc<dyn Provider>) -> ChatEngine {
    ChatEngine::new(
        provider,
        Arc::new(InMemoryConversationStore::default()),
        "gpt-4o-mini",
    )
}

// ── Fixtures ──────────────────────────────────────────────────────────────

fn layers(heart_rate_condition: &str) -> AnalysisLayers {
    AnalysisLayers {
        clarity: Some(ClarityLayer {
            quality_score: 0.9,
            signal_to_noise_ratio: 22.0,
            noise_reduced: true,
            quality_assessment: SignalQuality::Good,
            artifacts_detected: vec![],
        }),
        frequency: Some(FrequencyLayer {
            dominant_frequency: 1.2,
            rhythm_classification: RhythmClassification::NormalSinus,
            respiratory_rate: 15.0,
            hrv_features: HrvFeatures {
                rmssd: 40.0,
                sdnn: 50.0,
                pnn50: 15.0,
                hrv_score: 68.0,
            },
            frequency_bands: FrequencyBands {
                vlf: 0.1,
                lf: 0.35,
                hf: 0.3,
                lf_hf_ratio: 1.17,
            },
        }),
        temporal: Some(TemporalLayer {
            pattern_type: PatternType::Stable,
            circadian_phase: CircadianPhase::Morning,
            temporal_consistency: 0.8,
            rhythm_score: 75.0,
            circadian_alignment: CircadianAlignment {
                alignment_score: 0.85,
                expected_phase: None,
            },
            pattern_recognition: None,
        }),
        insight: Some(Insight {
            condition: heart_rate_condition.into(),
            confidence: 0.8,
            wellness_score: 74.0,
            wellness_assessment: WellnessBreakdown {
                cardiovascular_health: 76.0,
                respiratory_health: 80.0,
                activity_level: 55.0,
                stress_level: 30.0,
                overall_wellness: 74.0,
            },
            recommendation: "Stay hydrated.".into(),
            risk_factors: vec![],
            positive_indicators: vec![],
            probabilities: BTreeMap::new(),
        }),
    }
}

fn signals(heart_rate: f64) -> RawSignals {
    RawSignals {
        heart_rate,
        spo2: 98.0,
        temperature: 36.6,
        activity: 8.0,
    }
}

/// A device and an active monitoring session holding one reading and one analysis.
async fn monitored_store(heart_rate: f64) -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .register_device(NewDevice::new("band-1", DeviceType::Bracelet))
        .await
        .unwrap();
    store
        .start_session(NewSession::new("mon-1", "band-1", SessionType::Monitoring))
        .await
        .unwrap();
    store
        .append_reading("mon-1", NewReading::new(signals(heart_rate)))
        .await
        .unwrap();
    store
        .append_analysis(
            "mon-1",
            NewAnalysis {
                timestamp: None,
                layers: layers("relaxed"),
            },
        )
        .await
        .unwrap();
    store
}

fn context_message(request: &ProviderRequest) -> Option<&Message> {
    request
        .messages
        .iter()
        .find(|m| m.role == Role::System && m.content.starts_with(CONTEXT_PREAMBLE))
}

// ── Scenario 1: grounded first turn ───────────────────────────────────────

#[tokio::test]
async fn grounded_turn_on_stored_snapshot() {
    let store = monitored_store(72.3).await;
    let snapshot: Snapshot = store.latest_snapshot("mon-1").await.unwrap().unwrap();

    let provider = RecordingProvider::new("Your heart rate is 72.3 BPM, which is in a normal range.");
    let engine = engine_with(provider.clone());

    let outcome = engine
        .chat(ChatRequest::new("What's my heart rate?", Some("s1".into()), Some(snapshot), true).unwrap())
        .await;

    let ChatOutcome::Replied(reply) = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(reply.session_id, "s1");
    assert_eq!(reply.tokens_used, 150);
    assert_eq!(reply.model, "gpt-4o-mini-2024-07-18");

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let context = context_message(&requests[0]).expect("context message present");
    let raw_section = context
        .content
        .split("Raw Signals:")
        .nth(1)
        .and_then(|rest| rest.split("\n\n").next())
        .unwrap();
    assert!(raw_section.contains("72.3"));
    assert_eq!(requests[0].messages.last().unwrap().content, "What's my heart rate?");

    let history = engine.history("s1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
}

// ── Scenario 2: history window ────────────────────────────────────────────

#[tokio::test]
async fn twenty_five_exchanges_keep_last_twenty_messages() {
    let provider = RecordingProvider::new("noted");
    let engine = engine_with(provider.clone());

    for i in 0..25 {
        let outcome = engine
            .chat(ChatRequest::new(format!("question {i}"), Some("s2".into()), None, true).unwrap())
            .await;
        assert!(outcome.is_success());
    }

    let history = engine.history("s2").await;
    assert_eq!(history.len(), 20);
    assert_eq!(history[0].content, "question 15");
    assert_eq!(history[18].content, "question 24");

    // The last request carried the window as it stood before that turn.
    let last = provider.requests().pop().unwrap();
    assert_eq!(last.messages.len(), 1 + 20 + 1);
    assert!(context_message(&last).is_none());
}

// ── Scenario 3: upstream timeout ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn upstream_timeout_leaves_history_untouched() {
    let hanging = Arc::new(HangingProvider {
        calls: Mutex::new(0),
    });
    let retrying = RetryProvider::new(hanging.clone(), Duration::from_secs(30), 2)
        .with_backoff(Duration::from_millis(10));
    let engine = ChatEngine::new(
        Arc::new(retrying),
        Arc::new(InMemoryConversationStore::default()),
        "gpt-4o-mini",
    );

    // One good exchange first so "unchanged" is not trivially empty.
    engine
        .history_store()
        .append_exchange("s3", "earlier question", "earlier answer")
        .await;
    let before = engine.history("s3").await;

    let outcome = engine
        .chat(ChatRequest::new("Am I stressed?", Some("s3".into()), None, true).unwrap())
        .await;

    let ChatOutcome::Failed(failure) = outcome else {
        panic!("expected a failure");
    };
    assert!(!failure.error.is_empty());
    assert_eq!(failure.response, APOLOGY);
    assert_eq!(failure.session_id, "s3");
    assert_eq!(*hanging.calls.lock().unwrap(), 3);
    assert_eq!(engine.history("s3").await, before);
}

#[tokio::test]
async fn retry_after_failure_does_not_duplicate_entries() {
    let provider = Arc::new(ScriptedProvider {
        script: Mutex::new(
            vec![
                Err(ProviderError::AuthenticationFailed("invalid key".into())),
                Ok("Here you go."),
            ]
            .into(),
        ),
    });
    let engine = engine_with(provider);

    let first = engine
        .chat(ChatRequest::new("hello", Some("s3b".into()), None, true).unwrap())
        .await;
    assert!(!first.is_success());
    assert!(engine.history("s3b").await.is_empty());

    let second = engine
        .chat(ChatRequest::new("hello", Some("s3b".into()), None, true).unwrap())
        .await;
    assert!(second.is_success());
    let history = engine.history("s3b").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
}

// ── Scenario 4: orphan reading ────────────────────────────────────────────

#[tokio::test]
async fn reading_for_missing_session_is_not_persisted() {
    let store = monitored_store(70.0).await;
    let before = store.table_counts().await.unwrap();

    let err = store
        .append_reading("no-such-session", NewReading::new(signals(80.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingParent { .. }));

    let after = store.table_counts().await.unwrap();
    assert_eq!(after.biosignal_readings, before.biosignal_readings);
    assert_eq!(store.readings_for_session("mon-1").await.unwrap().len(), 1);
}

// ── Scenario 5: terminal session status ───────────────────────────────────

#[tokio::test]
async fn completed_session_cannot_be_reactivated() {
    let store = monitored_store(70.0).await;

    let completed = store
        .transition_session("mon-1", SessionStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert!(completed.end_time.is_some());

    let err = store
        .transition_session("mon-1", SessionStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));

    let session = store.get_session("mon-1").await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // A finished session accepts no further readings.
    let err = store
        .append_reading("mon-1", NewReading::new(signals(75.0)))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SessionClosed { .. }));
}

// ── Cross-session isolation under concurrency ─────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_stay_isolated() {
    let engine = Arc::new(engine_with(RecordingProvider::new("ok")));

    let mut handles = Vec::new();
    for s in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let session = format!("user-{s}");
            for i in 0..5 {
                let request =
                    ChatRequest::new(format!("{session} message {i}"), Some(session.clone()), None, false)
                        .unwrap();
                assert!(engine.chat(request).await.is_success());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for s in 0..8 {
        let session = format!("user-{s}");
        let history = engine.history(&session).await;
        assert_eq!(history.len(), 10);
        assert!(
            history
                .iter()
                .filter(|m| m.role == Role::User)
                .all(|m| m.content.starts_with(&format!("{session} ")))
        );
    }
}
