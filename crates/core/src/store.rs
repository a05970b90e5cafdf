//! EntityStore trait: persistence of the entity schema.
//!
//! Writes are create/append plus the few mutations the lifecycle allows:
//! profile and connection updates, session status transitions, and the
//! session's derived counters. Every child insert is checked against its
//! parent and fails without writing when the parent is missing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{
    AnalysisResult, BiosignalReading, Device, DeviceStatusUpdate, NewAnalysis, NewDevice,
    NewProcessingLog, NewReading, NewSession, NewSystemMetric, NewUser, ProcessingLog, Session,
    SessionStatus, SystemMetric, User, UserProfileUpdate,
};
use crate::snapshot::Snapshot;

type StoreResult<T> = std::result::Result<T, StorageError>;

/// Row count per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub users: u64,
    pub devices: u64,
    pub sessions: u64,
    pub biosignal_readings: u64,
    pub analysis_results: u64,
    pub processing_logs: u64,
    pub system_metrics: u64,
}

/// The persistence layer for users, devices, sessions and their facts.
///
/// All lookups take the external (caller-assigned) identifier.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    // --- Users ---

    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;
    async fn update_user_profile(&self, user_id: &str, update: UserProfileUpdate)
    -> StoreResult<User>;
    async fn set_user_active(&self, user_id: &str, active: bool) -> StoreResult<User>;

    // --- Devices ---

    async fn register_device(&self, device: NewDevice) -> StoreResult<Device>;
    async fn get_device(&self, device_id: &str) -> StoreResult<Option<Device>>;
    async fn update_device_status(
        &self,
        device_id: &str,
        update: DeviceStatusUpdate,
    ) -> StoreResult<Device>;
    async fn devices_for_user(&self, user_id: &str) -> StoreResult<Vec<Device>>;

    // --- Sessions ---

    async fn start_session(&self, session: NewSession) -> StoreResult<Session>;
    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>>;
    /// Move an active session to a terminal status and stamp its end time.
    async fn transition_session(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<Session>;
    async fn set_session_summary(&self, session_id: &str, summary: &str) -> StoreResult<Session>;
    /// Record the caller's latest wellness score for the session.
    async fn set_wellness_score(&self, session_id: &str, score: f64) -> StoreResult<Session>;
    async fn sessions_for_device(&self, device_id: &str) -> StoreResult<Vec<Session>>;
    async fn sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>>;

    // --- Readings & analyses ---

    async fn append_reading(
        &self,
        session_id: &str,
        reading: NewReading,
    ) -> StoreResult<BiosignalReading>;
    async fn append_analysis(
        &self,
        session_id: &str,
        analysis: NewAnalysis,
    ) -> StoreResult<AnalysisResult>;
    /// Readings of a session ordered by timestamp.
    async fn readings_for_session(&self, session_id: &str) -> StoreResult<Vec<BiosignalReading>>;
    /// Analyses of a session ordered by timestamp.
    async fn analyses_for_session(&self, session_id: &str) -> StoreResult<Vec<AnalysisResult>>;
    async fn latest_reading(&self, session_id: &str) -> StoreResult<Option<BiosignalReading>>;
    async fn latest_analysis(&self, session_id: &str) -> StoreResult<Option<AnalysisResult>>;

    /// The newest reading joined with the newest analysis, if any reading exists.
    async fn latest_snapshot(&self, session_id: &str) -> StoreResult<Option<Snapshot>> {
        let Some(reading) = self.latest_reading(session_id).await? else {
            return Ok(None);
        };
        let analysis = self.latest_analysis(session_id).await?;
        Ok(Some(Snapshot::from_records(&reading, analysis.as_ref())))
    }

    // --- Telemetry ---

    async fn append_log(&self, log: NewProcessingLog) -> StoreResult<ProcessingLog>;
    async fn logs_for_session(&self, session_id: &str) -> StoreResult<Vec<ProcessingLog>>;
    async fn record_metric(&self, metric: NewSystemMetric) -> StoreResult<SystemMetric>;
    async fn metrics_named(&self, metric_name: &str) -> StoreResult<Vec<SystemMetric>>;

    /// Row counts for every table.
    async fn table_counts(&self) -> StoreResult<TableCounts>;
}
