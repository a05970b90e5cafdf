//! Shared test helpers for engine and context tests.

use chrono::{TimeZone, Utc};
use pulsechat_core::error::ProviderError;
use pulsechat_core::message::Message;
use pulsechat_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use pulsechat_core::schema::*;
use pulsechat_core::Snapshot;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// A mock provider that replays a script of replies and failures.
///
/// Every request it receives is recorded so tests can inspect the exact
/// message list the engine built. Panics if the script runs out.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every one of `n` calls with `text`.
    pub fn repeating(text: &str, n: usize) -> Self {
        Self::new((0..n).map(|_| Ok(make_text_response(text))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(next) => next,
            None => panic!("SequentialMockProvider: script exhausted"),
        }
    }
}

/// A text reply with fixed usage counters (15 tokens in total).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A snapshot with every layer populated, heart rate 72.3.
pub fn complete_snapshot() -> Snapshot {
    Snapshot {
        timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap(),
        raw_signals: RawSignals {
            heart_rate: 72.3,
            spo2: 97.5,
            temperature: 36.7,
            activity: 12.0,
        },
        clarity_layer: Some(ClarityLayer {
            quality_score: 0.92,
            signal_to_noise_ratio: 24.5,
            noise_reduced: true,
            quality_assessment: SignalQuality::Excellent,
            artifacts_detected: vec!["motion".into()],
        }),
        frequency_layer: Some(FrequencyLayer {
            dominant_frequency: 1.2,
            rhythm_classification: RhythmClassification::NormalSinus,
            respiratory_rate: 14.2,
            hrv_features: HrvFeatures {
                rmssd: 42.0,
                sdnn: 55.3,
                pnn50: 18.4,
                hrv_score: 71.0,
            },
            frequency_bands: FrequencyBands {
                vlf: 0.12,
                lf: 0.4,
                hf: 0.3,
                lf_hf_ratio: 1.33,
            },
        }),
        temporal_layer: Some(TemporalLayer {
            pattern_type: PatternType::Stable,
            circadian_phase: CircadianPhase::Afternoon,
            temporal_consistency: 0.88,
            rhythm_score: 80.0,
            circadian_alignment: CircadianAlignment {
                alignment_score: 0.9,
                expected_phase: Some(CircadianPhase::Afternoon),
            },
            pattern_recognition: None,
        }),
        insight: Some(Insight {
            condition: "relaxed".into(),
            confidence: 0.85,
            wellness_score: 78.0,
            wellness_assessment: WellnessBreakdown {
                cardiovascular_health: 80.0,
                respiratory_health: 82.0,
                activity_level: 60.0,
                stress_level: 25.0,
                overall_wellness: 78.0,
            },
            recommendation: "Keep up the light activity.".into(),
            risk_factors: vec![],
            positive_indicators: vec!["Good HRV".into()],
            probabilities: BTreeMap::new(),
        }),
    }
}
