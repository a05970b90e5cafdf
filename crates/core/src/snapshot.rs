//! Point-in-time bundle used to ground a single conversational turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schema::{
    check_range, AnalysisResult, BiosignalReading, ClarityLayer, FrequencyLayer, Insight,
    RawSignals, TemporalLayer,
};

/// Raw signal values plus every analysis layer's output at one instant.
///
/// Layers are optional so a partially analysed session can still be
/// carried around; rendering requires all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub raw_signals: RawSignals,
    #[serde(default)]
    pub clarity_layer: Option<ClarityLayer>,
    #[serde(default)]
    pub frequency_layer: Option<FrequencyLayer>,
    #[serde(default)]
    pub temporal_layer: Option<TemporalLayer>,
    #[serde(default)]
    pub insight: Option<Insight>,
}

impl Snapshot {
    /// Join a stored reading with a stored analysis.
    ///
    /// The snapshot takes the later of the two timestamps.
    pub fn from_records(reading: &BiosignalReading, analysis: Option<&AnalysisResult>) -> Self {
        let mut snapshot = Self {
            timestamp: reading.timestamp,
            raw_signals: reading.signals,
            clarity_layer: None,
            frequency_layer: None,
            temporal_layer: None,
            insight: None,
        };
        if let Some(analysis) = analysis {
            snapshot.timestamp = snapshot.timestamp.max(analysis.timestamp);
            snapshot.clarity_layer = analysis.layers.clarity.clone();
            snapshot.frequency_layer = analysis.layers.frequency.clone();
            snapshot.temporal_layer = analysis.layers.temporal.clone();
            snapshot.insight = analysis.layers.insight.clone();
        }
        snapshot
    }

    /// Whether every layer needed for rendering is present.
    pub fn is_complete(&self) -> bool {
        self.clarity_layer.is_some()
            && self.frequency_layer.is_some()
            && self.temporal_layer.is_some()
            && self.insight.is_some()
    }

    /// Check the value ranges of the raw signals and of every present layer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.raw_signals.validate()?;
        if let Some(clarity) = &self.clarity_layer {
            check_range("clarity.quality_score", clarity.quality_score, 0.0, 1.0)?;
        }
        if let Some(insight) = &self.insight {
            insight.validate()?;
        }
        Ok(())
    }
}
