//! Snapshot rendering: the grounding block injected before the user turn.
//!
//! Sections always appear in the same order: raw signals, signal quality,
//! frequency analysis, temporal analysis, insights. Each number has a fixed
//! precision and unit, and empty lists render a sentinel word instead of
//! nothing. The same snapshot always renders to the same bytes.

use pulsechat_core::Snapshot;

/// Prefix of the auxiliary system message carrying the rendered block.
pub const CONTEXT_PREAMBLE: &str = "Here is the user's current real-time biosignal data:\n";

/// Rendering fails only when a required layer is absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Snapshot is missing the {0} layer")]
    MissingLayer(&'static str),
}

fn join_or(items: &[String], sentinel: &str) -> String {
    if items.is_empty() {
        sentinel.to_string()
    } else {
        items.join(", ")
    }
}

/// Render a complete snapshot as a plain-text block.
pub fn render_snapshot(snapshot: &Snapshot) -> Result<String, ContextError> {
    let clarity = snapshot
        .clarity_layer
        .as_ref()
        .ok_or(ContextError::MissingLayer("signal quality"))?;
    let frequency = snapshot
        .frequency_layer
        .as_ref()
        .ok_or(ContextError::MissingLayer("frequency"))?;
    let temporal = snapshot
        .temporal_layer
        .as_ref()
        .ok_or(ContextError::MissingLayer("temporal"))?;
    let insight = snapshot
        .insight
        .as_ref()
        .ok_or(ContextError::MissingLayer("insight"))?;

    let raw = &snapshot.raw_signals;
    let hrv = &frequency.hrv_features;
    let wellness = &insight.wellness_assessment;

    let lines = [
        format!(
            "CURRENT BIOSIGNAL DATA (as of {}):",
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
        "Raw Signals:".to_string(),
        format!("- Heart Rate: {:.1} BPM", raw.heart_rate),
        format!("- Blood Oxygen (SpO2): {:.1}%", raw.spo2),
        format!("- Body Temperature: {:.1}°C", raw.temperature),
        format!("- Activity Level: {:.1} steps/min", raw.activity),
        String::new(),
        "Signal Quality:".to_string(),
        format!("- Overall Quality Score: {:.2}/1.0", clarity.quality_score),
        format!(
            "- Signal-to-Noise Ratio: {:.1} dB",
            clarity.signal_to_noise_ratio
        ),
        format!("- Quality Assessment: {}", clarity.quality_assessment),
        format!(
            "- Artifacts Detected: {}",
            join_or(&clarity.artifacts_detected, "None")
        ),
        String::new(),
        "Frequency Analysis (HRV):".to_string(),
        format!(
            "- Dominant Frequency: {:.2} Hz",
            frequency.dominant_frequency
        ),
        format!(
            "- Rhythm Classification: {}",
            frequency.rhythm_classification
        ),
        format!("- HRV Score: {:.1}/100", hrv.hrv_score),
        "- HRV Metrics:".to_string(),
        format!("  * RMSSD: {:.1} ms", hrv.rmssd),
        format!("  * SDNN: {:.1} ms", hrv.sdnn),
        format!("  * pNN50: {:.1}%", hrv.pnn50),
        format!(
            "- LF/HF Ratio: {:.2}",
            frequency.frequency_bands.lf_hf_ratio
        ),
        format!(
            "- Respiratory Rate: {:.1} breaths/min",
            frequency.respiratory_rate
        ),
        String::new(),
        "Temporal Analysis:".to_string(),
        format!("- Pattern Type: {}", temporal.pattern_type),
        format!("- Circadian Phase: {}", temporal.circadian_phase),
        format!(
            "- Temporal Consistency: {:.2}/1.0",
            temporal.temporal_consistency
        ),
        format!("- Rhythm Score: {:.1}/100", temporal.rhythm_score),
        format!(
            "- Circadian Alignment Score: {:.2}/1.0",
            temporal.circadian_alignment.alignment_score
        ),
        String::new(),
        "Health Insights:".to_string(),
        format!("- Detected Condition: {}", insight.condition),
        format!("- Confidence: {:.1}%", insight.confidence * 100.0),
        format!("- Overall Wellness Score: {:.1}/100", insight.wellness_score),
        "- Wellness Breakdown:".to_string(),
        format!(
            "  * Cardiovascular Health: {:.1}/100",
            wellness.cardiovascular_health
        ),
        format!(
            "  * Respiratory Health: {:.1}/100",
            wellness.respiratory_health
        ),
        format!("  * Activity Level: {:.1}/100", wellness.activity_level),
        format!("  * Stress Level: {:.1}/100", wellness.stress_level),
        format!(
            "- Risk Factors: {}",
            join_or(&insight.risk_factors, "None identified")
        ),
        format!(
            "- Positive Indicators: {}",
            join_or(&insight.positive_indicators, "None")
        ),
        format!("- Recommendation: {}", insight.recommendation),
    ];

    let mut block = lines.join("\n");
    block.push('\n');
    Ok(block)
}
