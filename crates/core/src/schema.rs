//! Entity schema: the persistent shapes shared by storage, snapshots and
//! the API.
//!
//! Every classification field is a closed enumeration: parsing an unknown
//! value fails instead of passing a loose string through. Numeric
//! invariants are checked by the `validate()` methods before anything is
//! written.
//!
//! | Entity | Table |
//! |--------|-------|
//! | [`User`] | `users` |
//! | [`Device`] | `devices` |
//! | [`Session`] | `sessions` |
//! | [`BiosignalReading`] | `biosignal_readings` |
//! | [`AnalysisResult`] | `analysis_results` |
//! | [`ProcessingLog`] | `processing_logs` |
//! | [`SystemMetric`] | `system_metrics` |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Caller-defined key/value bag. Its schema is intentionally open.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ── Enumerations ──────────────────────────────────────────────────────────

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stored / wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(ValidationError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

closed_enum! {
    /// Form factor of a wearable.
    DeviceType as "device type" {
        Bracelet => "bracelet",
        Ring => "ring",
        Patch => "patch",
        Watch => "watch",
        ChestStrap => "chest_strap",
    }
}

closed_enum! {
    /// What the wearer was doing during a monitoring session.
    SessionType as "session type" {
        Workout => "workout",
        Sleep => "sleep",
        Rest => "rest",
        Monitoring => "monitoring",
        Meditation => "meditation",
    }
}

closed_enum! {
    /// Lifecycle of a monitoring session. Terminal once it leaves `Active`.
    SessionStatus as "session status" {
        Active => "active",
        Completed => "completed",
        Aborted => "aborted",
    }
}

closed_enum! {
    /// Trustworthiness bucket of a raw signal.
    SignalQuality as "signal quality" {
        Excellent => "excellent",
        Good => "good",
        Fair => "fair",
        Poor => "poor",
    }
}

closed_enum! {
    /// Heart rhythm class from the frequency/HRV layer.
    RhythmClassification as "rhythm classification" {
        NormalSinus => "normal_sinus",
        Bradycardia => "bradycardia",
        Tachycardia => "tachycardia",
        Irregular => "irregular",
    }
}

closed_enum! {
    /// Activity pattern class from the temporal layer.
    PatternType as "pattern type" {
        Stable => "stable",
        Increasing => "increasing",
        Decreasing => "decreasing",
        Cyclic => "cyclic",
        Irregular => "irregular",
    }
}

closed_enum! {
    /// Position in the expected daily rhythm.
    CircadianPhase as "circadian phase" {
        EarlyMorning => "early_morning",
        Morning => "morning",
        Afternoon => "afternoon",
        Evening => "evening",
        Night => "night",
    }
}

closed_enum! {
    /// Severity of a processing log line.
    LogLevel as "log level" {
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

impl SessionStatus {
    /// Only `Active` may move, and only to a terminal state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Active, SessionStatus::Completed)
                | (SessionStatus::Active, SessionStatus::Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Active
    }
}

// ── Validation helpers ────────────────────────────────────────────────────

pub(crate) fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive { field, value })
    }
}

fn check_not_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty { field })
    } else {
        Ok(())
    }
}

// ── Users ─────────────────────────────────────────────────────────────────

/// A registered person. Never hard-deleted; `is_active` carries the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("user_id", &self.user_id)?;
        if let Some(email) = &self.email {
            check_not_empty("email", email)?;
        }
        Ok(())
    }
}

/// Partial profile change; `None` fields are left as they are.
///
/// An email can be replaced but not removed once set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfileUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub metadata: Option<Metadata>,
}

// ── Devices ───────────────────────────────────────────────────────────────

/// A wearable. Battery level is a percentage in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub user_id: Option<i64>,
    pub device_type: DeviceType,
    pub firmware_version: String,
    pub battery_level: f64,
    /// Received signal strength in dBm.
    pub signal_strength: i32,
    pub is_connected: bool,
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub device_id: String,
    /// External id of the owning user, if any.
    #[serde(default)]
    pub owner: Option<String>,
    pub device_type: DeviceType,
    #[serde(default = "default_firmware")]
    pub firmware_version: String,
    #[serde(default = "default_battery")]
    pub battery_level: f64,
    #[serde(default = "default_signal_strength")]
    pub signal_strength: i32,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_firmware() -> String {
    "1.0.0".into()
}
fn default_battery() -> f64 {
    100.0
}
fn default_signal_strength() -> i32 {
    -50
}

impl NewDevice {
    pub fn new(device_id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            owner: None,
            device_type,
            firmware_version: default_firmware(),
            battery_level: default_battery(),
            signal_strength: default_signal_strength(),
            metadata: Metadata::new(),
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.owner = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("device_id", &self.device_id)?;
        check_range("battery_level", self.battery_level, 0.0, 100.0)
    }
}

/// Reconnection / telemetry update for a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatusUpdate {
    pub battery_level: Option<f64>,
    pub signal_strength: Option<i32>,
    pub is_connected: Option<bool>,
    pub firmware_version: Option<String>,
}

impl DeviceStatusUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(battery) = self.battery_level {
            check_range("battery_level", battery, 0.0, 100.0)?;
        }
        Ok(())
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────

/// One monitoring run of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub session_id: String,
    pub user_id: Option<i64>,
    pub device_id: i64,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub data_points_collected: i64,
    /// Last-known wellness score as supplied by the caller.
    pub average_wellness_score: Option<f64>,
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub session_id: String,
    /// External id of the recording device.
    pub device: String,
    /// External id of the wearer, if known.
    #[serde(default)]
    pub user: Option<String>,
    pub session_type: SessionType,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewSession {
    pub fn new(
        session_id: impl Into<String>,
        device: impl Into<String>,
        session_type: SessionType,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            device: device.into(),
            user: None,
            session_type,
            start_time: None,
            metadata: Metadata::new(),
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("session_id", &self.session_id)?;
        check_not_empty("device", &self.device)
    }
}

/// Ensure an end stamp does not precede the start stamp.
pub fn validate_session_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if end < start {
        Err(ValidationError::EndBeforeStart)
    } else {
        Ok(())
    }
}

// ── Readings ──────────────────────────────────────────────────────────────

/// Raw values sampled from the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    /// Beats per minute
    pub heart_rate: f64,
    /// Blood oxygen saturation, percent
    pub spo2: f64,
    /// Skin temperature, °C
    pub temperature: f64,
    /// Activity level, steps per minute
    pub activity: f64,
}

impl RawSignals {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_positive("heart_rate", self.heart_rate)?;
        check_range("spo2", self.spo2, 0.0, 100.0)
    }
}

/// An immutable raw sample belonging to one session and one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiosignalReading {
    pub id: i64,
    pub session_id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub signals: RawSignals,
    pub signal_quality: Option<SignalQuality>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReading {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub signals: RawSignals,
    #[serde(default)]
    pub signal_quality: Option<SignalQuality>,
    #[serde(default)]
    pub quality_score: Option<f64>,
}

impl NewReading {
    pub fn new(signals: RawSignals) -> Self {
        Self {
            timestamp: None,
            signals,
            signal_quality: None,
            quality_score: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.signals.validate()?;
        if let Some(score) = self.quality_score {
            check_range("quality_score", score, 0.0, 1.0)?;
        }
        Ok(())
    }
}

// ── Analysis layers ───────────────────────────────────────────────────────

/// Signal-quality layer: noise and artifact assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarityLayer {
    pub quality_score: f64,
    /// Decibels
    pub signal_to_noise_ratio: f64,
    #[serde(default)]
    pub noise_reduced: bool,
    pub quality_assessment: SignalQuality,
    #[serde(default)]
    pub artifacts_detected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvFeatures {
    /// Milliseconds
    pub rmssd: f64,
    /// Milliseconds
    pub sdnn: f64,
    /// Percent
    pub pnn50: f64,
    /// 0..100
    pub hrv_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    pub lf_hf_ratio: f64,
}

/// Frequency/HRV layer: spectral decomposition and respiratory rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyLayer {
    /// Hertz
    pub dominant_frequency: f64,
    pub rhythm_classification: RhythmClassification,
    /// Breaths per minute
    pub respiratory_rate: f64,
    pub hrv_features: HrvFeatures,
    pub frequency_bands: FrequencyBands,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircadianAlignment {
    pub alignment_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_phase: Option<CircadianPhase>,
}

/// Temporal/circadian layer: activity pattern and daily-rhythm alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalLayer {
    pub pattern_type: PatternType,
    pub circadian_phase: CircadianPhase,
    pub temporal_consistency: f64,
    pub rhythm_score: f64,
    pub circadian_alignment: CircadianAlignment,
    /// Opaque output of the pattern recogniser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_recognition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WellnessBreakdown {
    pub cardiovascular_health: f64,
    pub respiratory_health: f64,
    pub activity_level: f64,
    pub stress_level: f64,
    pub overall_wellness: f64,
}

/// Synthesized insight derived from the three layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub condition: String,
    /// In [0, 1]
    pub confidence: f64,
    /// In [0, 100]
    pub wellness_score: f64,
    pub wellness_assessment: WellnessBreakdown,
    pub recommendation: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub positive_indicators: Vec<String>,
    /// Per-condition probabilities.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub probabilities: BTreeMap<String, f64>,
}

impl Insight {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("confidence", self.confidence, 0.0, 1.0)?;
        check_range("wellness_score", self.wellness_score, 0.0, 100.0)
    }
}

/// The four sub-records of an analysis. Each is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisLayers {
    #[serde(default)]
    pub clarity: Option<ClarityLayer>,
    #[serde(default)]
    pub frequency: Option<FrequencyLayer>,
    #[serde(default)]
    pub temporal: Option<TemporalLayer>,
    #[serde(default)]
    pub insight: Option<Insight>,
}

impl AnalysisLayers {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(clarity) = &self.clarity {
            check_range("clarity.quality_score", clarity.quality_score, 0.0, 1.0)?;
        }
        if let Some(insight) = &self.insight {
            insight.validate()?;
        }
        Ok(())
    }
}

/// An immutable analysis fact belonging to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub session_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub layers: AnalysisLayers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAnalysis {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub layers: AnalysisLayers,
}

// ── Telemetry ─────────────────────────────────────────────────────────────

/// Append-only processing event, optionally tied to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub layer: String,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub session_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessingLog {
    pub layer: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// External id of the related session.
    #[serde(default)]
    pub session: Option<String>,
}

impl NewProcessingLog {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("layer", &self.layer)?;
        check_not_empty("message", &self.message)
    }
}

/// Append-only, unscoped measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetric {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub metric_value: f64,
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSystemMetric {
    pub metric_name: String,
    pub metric_value: f64,
    #[serde(default)]
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewSystemMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: name.into(),
            metric_value: value,
            metric_unit: None,
            metadata: Metadata::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_not_empty("metric_name", &self.metric_name)?;
        if self.metric_value.is_finite() {
            Ok(())
        } else {
            Err(ValidationError::OutOfRange {
                field: "metric_value",
                min: f64::MIN,
                max: f64::MAX,
                value: self.metric_value,
            })
        }
    }
}
