//! SQLite entity store.
//!
//! One database holds the seven entity tables. Internal integer ids are the
//! foreign keys; every lookup from the outside goes through the unique
//! external id. Foreign keys are enforced by SQLite (`PRAGMA foreign_keys`)
//! and checked up front so a missing parent surfaces as
//! [`StorageError::MissingParent`] instead of a raw constraint failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsechat_core::error::{StorageError, ValidationError};
use pulsechat_core::schema::{
    AnalysisLayers, AnalysisResult, BiosignalReading, Device, DeviceStatusUpdate, Metadata,
    NewAnalysis, NewDevice, NewProcessingLog, NewReading, NewSession, NewSystemMetric, NewUser,
    ProcessingLog, RawSignals, Session, SessionStatus, SystemMetric, User, UserProfileUpdate,
    validate_session_window,
};
use pulsechat_core::store::{EntityStore, TableCounts};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

type StoreResult<T> = std::result::Result<T, StorageError>;

const USER_COLUMNS: &str =
    "id, user_id, email, full_name, is_active, metadata, created_at, updated_at";
const DEVICE_COLUMNS: &str = "id, device_id, user_id, device_type, firmware_version, \
     battery_level, signal_strength, is_connected, last_connected, metadata, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, session_id, user_id, device_id, session_type, start_time, \
     end_time, status, data_points_collected, average_wellness_score, summary, metadata";
const READING_COLUMNS: &str = "id, session_id, device_id, timestamp, heart_rate, spo2, \
     temperature, activity, signal_quality, quality_score";
const ANALYSIS_COLUMNS: &str =
    "id, session_id, timestamp, clarity_layer, frequency_layer, temporal_layer, insight";
const LOG_COLUMNS: &str = "id, timestamp, layer, level, message, data, session_id";
const METRIC_COLUMNS: &str = "id, timestamp, metric_name, metric_value, metric_unit, metadata";

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT UNIQUE NOT NULL,
            email       TEXT UNIQUE,
            full_name   TEXT,
            is_active   INTEGER NOT NULL DEFAULT 1,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL,
            updated_at  TEXT
        )
        "#,
    ),
    (
        "devices table",
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id        TEXT UNIQUE NOT NULL,
            user_id          INTEGER REFERENCES users(id),
            device_type      TEXT NOT NULL,
            firmware_version TEXT NOT NULL,
            battery_level    REAL NOT NULL,
            signal_strength  INTEGER NOT NULL,
            is_connected     INTEGER NOT NULL DEFAULT 0,
            last_connected   TEXT,
            metadata         TEXT NOT NULL DEFAULT '{}',
            created_at       TEXT NOT NULL,
            updated_at       TEXT
        )
        "#,
    ),
    (
        "sessions table",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id             TEXT UNIQUE NOT NULL,
            user_id                INTEGER REFERENCES users(id),
            device_id              INTEGER NOT NULL REFERENCES devices(id),
            session_type           TEXT NOT NULL,
            start_time             TEXT NOT NULL,
            end_time               TEXT,
            status                 TEXT NOT NULL DEFAULT 'active',
            data_points_collected  INTEGER NOT NULL DEFAULT 0,
            average_wellness_score REAL,
            summary                TEXT,
            metadata               TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "biosignal_readings table",
        r#"
        CREATE TABLE IF NOT EXISTS biosignal_readings (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id     INTEGER NOT NULL REFERENCES sessions(id),
            device_id      INTEGER NOT NULL REFERENCES devices(id),
            timestamp      TEXT NOT NULL,
            heart_rate     REAL NOT NULL,
            spo2           REAL NOT NULL,
            temperature    REAL NOT NULL,
            activity       REAL NOT NULL,
            signal_quality TEXT,
            quality_score  REAL
        )
        "#,
    ),
    (
        "analysis_results table",
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      INTEGER NOT NULL REFERENCES sessions(id),
            timestamp       TEXT NOT NULL,
            clarity_layer   TEXT,
            frequency_layer TEXT,
            temporal_layer  TEXT,
            insight         TEXT,
            condition       TEXT,
            confidence      REAL,
            wellness_score  REAL
        )
        "#,
    ),
    (
        "processing_logs table",
        r#"
        CREATE TABLE IF NOT EXISTS processing_logs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp  TEXT NOT NULL,
            layer      TEXT NOT NULL,
            level      TEXT NOT NULL,
            message    TEXT NOT NULL,
            data       TEXT,
            session_id INTEGER REFERENCES sessions(id)
        )
        "#,
    ),
    (
        "system_metrics table",
        r#"
        CREATE TABLE IF NOT EXISTS system_metrics (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp    TEXT NOT NULL,
            metric_name  TEXT NOT NULL,
            metric_value REAL NOT NULL,
            metric_unit  TEXT,
            metadata     TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "readings index",
        "CREATE INDEX IF NOT EXISTS idx_readings_session_ts ON biosignal_readings(session_id, timestamp)",
    ),
    (
        "analyses index",
        "CREATE INDEX IF NOT EXISTS idx_analyses_session_ts ON analysis_results(session_id, timestamp)",
    ),
    (
        "logs index",
        "CREATE INDEX IF NOT EXISTS idx_logs_session ON processing_logs(session_id, timestamp)",
    ),
    (
        "metrics index",
        "CREATE INDEX IF NOT EXISTS idx_metrics_name_ts ON system_metrics(metric_name, timestamp)",
    ),
];

/// The SQLite-backed [`EntityStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// Accepts `sqlite://path.db`, a bare path, or `sqlite::memory:`. An
    /// in-memory database is pinned to a single connection so every query
    /// sees the same data.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(url, "SQLite entity store initialized");
        Ok(store)
    }

    /// An ephemeral store (useful for tests).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    /// Create every table and index. Idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        for (what, ddl) in MIGRATIONS {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(format!("{what}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // --- internal lookups ---

    async fn internal_id(
        &self,
        table: &'static str,
        key_column: &'static str,
        key: &str,
    ) -> StoreResult<Option<i64>> {
        let sql = format!("SELECT id FROM {table} WHERE {key_column} = ?");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed(table, e))?;
        row.map(|r| column::<i64>(&r, "id")).transpose()
    }

    async fn require_id(
        &self,
        entity: &'static str,
        table: &'static str,
        key_column: &'static str,
        key: &str,
    ) -> StoreResult<i64> {
        self.internal_id(table, key_column, key)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity,
                id: key.to_string(),
            })
    }

    async fn fetch_user(&self, user_id: &str) -> StoreResult<User> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })
    }

    async fn fetch_device(&self, device_id: &str) -> StoreResult<Device> {
        self.get_device(device_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "device",
                id: device_id.to_string(),
            })
    }

    async fn fetch_session(&self, session_id: &str) -> StoreResult<Session> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })
    }

    async fn count(&self, table: &'static str) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {table}");
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed(table, e))?;
        let n: i64 = column(&row, "n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

// --- row helpers ---

fn query_failed(what: &str, e: sqlx::Error) -> StorageError {
    StorageError::QueryFailed(format!("{what}: {e}"))
}

fn insert_failed(entity: &'static str, id: &str, e: sqlx::Error) -> StorageError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StorageError::Duplicate {
            entity,
            id: id.to_string(),
        },
        _ => StorageError::QueryFailed(format!("insert {entity}: {e}")),
    }
}

/// A unique violation on `users.email`, reported against the email.
fn duplicate_email(e: &sqlx::Error, email: Option<&str>) -> Option<StorageError> {
    let db = e.as_database_error()?;
    let email = email?;
    (db.is_unique_violation() && db.message().contains("users.email")).then(|| {
        StorageError::Duplicate {
            entity: "user email",
            id: email.to_string(),
        }
    })
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StorageError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_enum<T>(table: &'static str, raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = ValidationError>,
{
    raw.parse().map_err(|e: ValidationError| StorageError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Storage(format!("encode JSON: {e}")))
}

fn to_json_opt<T: Serialize>(value: Option<&T>) -> StoreResult<Option<String>> {
    value.map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(table: &'static str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        table,
        reason: format!("invalid JSON: {e}"),
    })
}

fn from_json_opt<T: DeserializeOwned>(
    table: &'static str,
    raw: Option<String>,
) -> StoreResult<Option<T>> {
    raw.map(|s| from_json(table, &s)).transpose()
}

fn metadata(table: &'static str, row: &SqliteRow) -> StoreResult<Metadata> {
    let raw: String = column(row, "metadata")?;
    from_json(table, &raw)
}

fn row_to_user(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        email: column(row, "email")?,
        full_name: column(row, "full_name")?,
        is_active: column(row, "is_active")?,
        metadata: metadata("users", row)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn row_to_device(row: &SqliteRow) -> StoreResult<Device> {
    let device_type: String = column(row, "device_type")?;
    Ok(Device {
        id: column(row, "id")?,
        device_id: column(row, "device_id")?,
        user_id: column(row, "user_id")?,
        device_type: parse_enum("devices", &device_type)?,
        firmware_version: column(row, "firmware_version")?,
        battery_level: column(row, "battery_level")?,
        signal_strength: column(row, "signal_strength")?,
        is_connected: column(row, "is_connected")?,
        last_connected: column(row, "last_connected")?,
        metadata: metadata("devices", row)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn row_to_session(row: &SqliteRow) -> StoreResult<Session> {
    let session_type: String = column(row, "session_type")?;
    let status: String = column(row, "status")?;
    Ok(Session {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        user_id: column(row, "user_id")?,
        device_id: column(row, "device_id")?,
        session_type: parse_enum("sessions", &session_type)?,
        start_time: column(row, "start_time")?,
        end_time: column(row, "end_time")?,
        status: parse_enum("sessions", &status)?,
        data_points_collected: column(row, "data_points_collected")?,
        average_wellness_score: column(row, "average_wellness_score")?,
        summary: column(row, "summary")?,
        metadata: metadata("sessions", row)?,
    })
}

fn row_to_reading(row: &SqliteRow) -> StoreResult<BiosignalReading> {
    let quality: Option<String> = column(row, "signal_quality")?;
    Ok(BiosignalReading {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        device_id: column(row, "device_id")?,
        timestamp: column(row, "timestamp")?,
        signals: RawSignals {
            heart_rate: column(row, "heart_rate")?,
            spo2: column(row, "spo2")?,
            temperature: column(row, "temperature")?,
            activity: column(row, "activity")?,
        },
        signal_quality: quality
            .map(|q| parse_enum("biosignal_readings", &q))
            .transpose()?,
        quality_score: column(row, "quality_score")?,
    })
}

fn row_to_analysis(row: &SqliteRow) -> StoreResult<AnalysisResult> {
    const TABLE: &str = "analysis_results";
    Ok(AnalysisResult {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        timestamp: column(row, "timestamp")?,
        layers: AnalysisLayers {
            clarity: from_json_opt(TABLE, column(row, "clarity_layer")?)?,
            frequency: from_json_opt(TABLE, column(row, "frequency_layer")?)?,
            temporal: from_json_opt(TABLE, column(row, "temporal_layer")?)?,
            insight: from_json_opt(TABLE, column(row, "insight")?)?,
        },
    })
}

fn row_to_log(row: &SqliteRow) -> StoreResult<ProcessingLog> {
    let level: String = column(row, "level")?;
    Ok(ProcessingLog {
        id: column(row, "id")?,
        timestamp: column(row, "timestamp")?,
        layer: column(row, "layer")?,
        level: parse_enum("processing_logs", &level)?,
        message: column(row, "message")?,
        data: from_json_opt("processing_logs", column(row, "data")?)?,
        session_id: column(row, "session_id")?,
    })
}

fn row_to_metric(row: &SqliteRow) -> StoreResult<SystemMetric> {
    Ok(SystemMetric {
        id: column(row, "id")?,
        timestamp: column(row, "timestamp")?,
        metric_name: column(row, "metric_name")?,
        metric_value: column(row, "metric_value")?,
        metric_unit: column(row, "metric_unit")?,
        metadata: metadata("system_metrics", row)?,
    })
}

fn collect<T>(rows: Vec<SqliteRow>, f: fn(&SqliteRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(f).collect()
}

#[async_trait]
impl EntityStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    // --- Users ---

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        user.validate()?;
        sqlx::query(
            "INSERT INTO users (user_id, email, full_name, is_active, metadata, created_at) \
             VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(to_json(&user.metadata)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            duplicate_email(&e, user.email.as_deref())
                .unwrap_or_else(|| insert_failed("user", &user.user_id, e))
        })?;

        debug!(user_id = %user.user_id, "User created");
        self.fetch_user(&user.user_id).await
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("users", e))?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn update_user_profile(
        &self,
        user_id: &str,
        update: UserProfileUpdate,
    ) -> StoreResult<User> {
        let current = self.fetch_user(user_id).await?;
        let email = update.email.or(current.email);
        let full_name = update.full_name.or(current.full_name);
        let metadata = update.metadata.unwrap_or(current.metadata);

        sqlx::query(
            "UPDATE users SET email = ?, full_name = ?, metadata = ?, updated_at = ? \
             WHERE user_id = ?",
        )
        .bind(&email)
        .bind(&full_name)
        .bind(to_json(&metadata)?)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            duplicate_email(&e, email.as_deref()).unwrap_or_else(|| query_failed("users", e))
        })?;

        self.fetch_user(user_id).await
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> StoreResult<User> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE user_id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("users", e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        self.fetch_user(user_id).await
    }

    // --- Devices ---

    async fn register_device(&self, device: NewDevice) -> StoreResult<Device> {
        device.validate()?;
        let owner = match &device.owner {
            Some(user_id) => Some(
                self.internal_id("users", "user_id", user_id)
                    .await?
                    .ok_or_else(|| StorageError::MissingParent {
                        child: "device",
                        parent: "user",
                        id: user_id.clone(),
                    })?,
            ),
            None => None,
        };

        sqlx::query(
            "INSERT INTO devices (device_id, user_id, device_type, firmware_version, \
             battery_level, signal_strength, is_connected, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&device.device_id)
        .bind(owner)
        .bind(device.device_type.as_str())
        .bind(&device.firmware_version)
        .bind(device.battery_level)
        .bind(device.signal_strength)
        .bind(to_json(&device.metadata)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed("device", &device.device_id, e))?;

        debug!(device_id = %device.device_id, device_type = %device.device_type, "Device registered");
        self.fetch_device(&device.device_id).await
    }

    async fn get_device(&self, device_id: &str) -> StoreResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?");
        let row = sqlx::query(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("devices", e))?;
        row.as_ref().map(row_to_device).transpose()
    }

    async fn update_device_status(
        &self,
        device_id: &str,
        update: DeviceStatusUpdate,
    ) -> StoreResult<Device> {
        update.validate()?;
        let current = self.fetch_device(device_id).await?;
        let now = Utc::now();

        let is_connected = update.is_connected.unwrap_or(current.is_connected);
        let last_connected = if update.is_connected == Some(true) {
            Some(now)
        } else {
            current.last_connected
        };

        sqlx::query(
            "UPDATE devices SET battery_level = ?, signal_strength = ?, is_connected = ?, \
             last_connected = ?, firmware_version = ?, updated_at = ? WHERE device_id = ?",
        )
        .bind(update.battery_level.unwrap_or(current.battery_level))
        .bind(update.signal_strength.unwrap_or(current.signal_strength))
        .bind(is_connected)
        .bind(last_connected)
        .bind(update.firmware_version.unwrap_or(current.firmware_version))
        .bind(now)
        .bind(device_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("devices", e))?;

        self.fetch_device(device_id).await
    }

    async fn devices_for_user(&self, user_id: &str) -> StoreResult<Vec<Device>> {
        let owner = self.require_id("user", "users", "user_id", user_id).await?;
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("devices", e))?;
        collect(rows, row_to_device)
    }

    // --- Sessions ---

    async fn start_session(&self, session: NewSession) -> StoreResult<Session> {
        session.validate()?;
        let device = self
            .internal_id("devices", "device_id", &session.device)
            .await?
            .ok_or_else(|| StorageError::MissingParent {
                child: "session",
                parent: "device",
                id: session.device.clone(),
            })?;
        let user = match &session.user {
            Some(user_id) => Some(
                self.internal_id("users", "user_id", user_id)
                    .await?
                    .ok_or_else(|| StorageError::MissingParent {
                        child: "session",
                        parent: "user",
                        id: user_id.clone(),
                    })?,
            ),
            None => None,
        };

        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, device_id, session_type, start_time, \
             status, data_points_collected, metadata) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&session.session_id)
        .bind(user)
        .bind(device)
        .bind(session.session_type.as_str())
        .bind(session.start_time.unwrap_or_else(Utc::now))
        .bind(SessionStatus::Active.as_str())
        .bind(to_json(&session.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed("session", &session.session_id, e))?;

        info!(
            session_id = %session.session_id,
            device_id = %session.device,
            session_type = %session.session_type,
            "Monitoring session started"
        );
        self.fetch_session(&session.session_id).await
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("sessions", e))?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn transition_session(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<Session> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Storage(format!("begin transaction: {e}")))?;

        let row = sqlx::query("SELECT status, start_time FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| query_failed("sessions", e))?
            .ok_or_else(|| StorageError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;

        let raw_status: String = column(&row, "status")?;
        let current: SessionStatus = parse_enum("sessions", &raw_status)?;
        if !current.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                session_id: session_id.to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }

        let start_time: DateTime<Utc> = column(&row, "start_time")?;
        let end_time = Utc::now().max(start_time);
        validate_session_window(start_time, end_time)?;

        sqlx::query("UPDATE sessions SET status = ?, end_time = ? WHERE session_id = ?")
            .bind(status.as_str())
            .bind(end_time)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("sessions", e))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Storage(format!("commit: {e}")))?;

        info!(session_id, from = %current, to = %status, "Session status changed");
        self.fetch_session(session_id).await
    }

    async fn set_session_summary(&self, session_id: &str, summary: &str) -> StoreResult<Session> {
        let result = sqlx::query("UPDATE sessions SET summary = ? WHERE session_id = ?")
            .bind(summary)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("sessions", e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        self.fetch_session(session_id).await
    }

    async fn set_wellness_score(&self, session_id: &str, score: f64) -> StoreResult<Session> {
        if !(0.0..=100.0).contains(&score) {
            return Err(ValidationError::OutOfRange {
                field: "average_wellness_score",
                min: 0.0,
                max: 100.0,
                value: score,
            }
            .into());
        }
        let result =
            sqlx::query("UPDATE sessions SET average_wellness_score = ? WHERE session_id = ?")
                .bind(score)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("sessions", e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            });
        }
        self.fetch_session(session_id).await
    }

    async fn sessions_for_device(&self, device_id: &str) -> StoreResult<Vec<Session>> {
        let device = self
            .require_id("device", "devices", "device_id", device_id)
            .await?;
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE device_id = ? ORDER BY start_time, id"
        );
        let rows = sqlx::query(&sql)
            .bind(device)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("sessions", e))?;
        collect(rows, row_to_session)
    }

    async fn sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let user = self.require_id("user", "users", "user_id", user_id).await?;
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ? ORDER BY start_time, id"
        );
        let rows = sqlx::query(&sql)
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("sessions", e))?;
        collect(rows, row_to_session)
    }

    // --- Readings & analyses ---

    async fn append_reading(
        &self,
        session_id: &str,
        reading: NewReading,
    ) -> StoreResult<BiosignalReading> {
        reading.validate()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Storage(format!("begin transaction: {e}")))?;

        let row = sqlx::query("SELECT id, device_id, status FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| query_failed("sessions", e))?
            .ok_or_else(|| StorageError::MissingParent {
                child: "biosignal reading",
                parent: "session",
                id: session_id.to_string(),
            })?;

        let session_pk: i64 = column(&row, "id")?;
        let device_pk: i64 = column(&row, "device_id")?;
        let raw_status: String = column(&row, "status")?;
        let status: SessionStatus = parse_enum("sessions", &raw_status)?;
        if status.is_terminal() {
            return Err(StorageError::SessionClosed {
                session_id: session_id.to_string(),
                status: status.to_string(),
            });
        }

        let timestamp = reading.timestamp.unwrap_or_else(Utc::now);
        let signals = reading.signals;
        let inserted = sqlx::query(
            "INSERT INTO biosignal_readings (session_id, device_id, timestamp, heart_rate, spo2, \
             temperature, activity, signal_quality, quality_score) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_pk)
        .bind(device_pk)
        .bind(timestamp)
        .bind(signals.heart_rate)
        .bind(signals.spo2)
        .bind(signals.temperature)
        .bind(signals.activity)
        .bind(reading.signal_quality.map(|q| q.as_str()))
        .bind(reading.quality_score)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("biosignal_readings", e))?;

        sqlx::query(
            "UPDATE sessions SET data_points_collected = data_points_collected + 1 WHERE id = ?",
        )
        .bind(session_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("sessions", e))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Storage(format!("commit: {e}")))?;

        Ok(BiosignalReading {
            id: inserted.last_insert_rowid(),
            session_id: session_pk,
            device_id: device_pk,
            timestamp,
            signals,
            signal_quality: reading.signal_quality,
            quality_score: reading.quality_score,
        })
    }

    async fn append_analysis(
        &self,
        session_id: &str,
        analysis: NewAnalysis,
    ) -> StoreResult<AnalysisResult> {
        analysis.layers.validate()?;
        let session_pk = self
            .internal_id("sessions", "session_id", session_id)
            .await?
            .ok_or_else(|| StorageError::MissingParent {
                child: "analysis result",
                parent: "session",
                id: session_id.to_string(),
            })?;

        let timestamp = analysis.timestamp.unwrap_or_else(Utc::now);
        let layers = analysis.layers;
        let insight = layers.insight.as_ref();
        let inserted = sqlx::query(
            "INSERT INTO analysis_results (session_id, timestamp, clarity_layer, frequency_layer, \
             temporal_layer, insight, condition, confidence, wellness_score) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_pk)
        .bind(timestamp)
        .bind(to_json_opt(layers.clarity.as_ref())?)
        .bind(to_json_opt(layers.frequency.as_ref())?)
        .bind(to_json_opt(layers.temporal.as_ref())?)
        .bind(to_json_opt(insight)?)
        .bind(insight.map(|i| i.condition.clone()))
        .bind(insight.map(|i| i.confidence))
        .bind(insight.map(|i| i.wellness_score))
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("analysis_results", e))?;

        Ok(AnalysisResult {
            id: inserted.last_insert_rowid(),
            session_id: session_pk,
            timestamp,
            layers,
        })
    }

    async fn readings_for_session(&self, session_id: &str) -> StoreResult<Vec<BiosignalReading>> {
        let session = self
            .require_id("session", "sessions", "session_id", session_id)
            .await?;
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM biosignal_readings WHERE session_id = ? \
             ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(session)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("biosignal_readings", e))?;
        collect(rows, row_to_reading)
    }

    async fn analyses_for_session(&self, session_id: &str) -> StoreResult<Vec<AnalysisResult>> {
        let session = self
            .require_id("session", "sessions", "session_id", session_id)
            .await?;
        let sql = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM analysis_results WHERE session_id = ? \
             ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(session)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("analysis_results", e))?;
        collect(rows, row_to_analysis)
    }

    async fn latest_reading(&self, session_id: &str) -> StoreResult<Option<BiosignalReading>> {
        let session = self
            .require_id("session", "sessions", "session_id", session_id)
            .await?;
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM biosignal_readings WHERE session_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(session)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("biosignal_readings", e))?;
        row.as_ref().map(row_to_reading).transpose()
    }

    async fn latest_analysis(&self, session_id: &str) -> StoreResult<Option<AnalysisResult>> {
        let session = self
            .require_id("session", "sessions", "session_id", session_id)
            .await?;
        let sql = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM analysis_results WHERE session_id = ? \
             ORDER BY timestamp DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(session)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("analysis_results", e))?;
        row.as_ref().map(row_to_analysis).transpose()
    }

    // --- Telemetry ---

    async fn append_log(&self, log: NewProcessingLog) -> StoreResult<ProcessingLog> {
        log.validate()?;
        let session_pk = match &log.session {
            Some(session_id) => Some(
                self.internal_id("sessions", "session_id", session_id)
                    .await?
                    .ok_or_else(|| StorageError::MissingParent {
                        child: "processing log",
                        parent: "session",
                        id: session_id.clone(),
                    })?,
            ),
            None => None,
        };

        let timestamp = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO processing_logs (timestamp, layer, level, message, data, session_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(timestamp)
        .bind(&log.layer)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(to_json_opt(log.data.as_ref())?)
        .bind(session_pk)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("processing_logs", e))?;

        Ok(ProcessingLog {
            id: inserted.last_insert_rowid(),
            timestamp,
            layer: log.layer,
            level: log.level,
            message: log.message,
            data: log.data,
            session_id: session_pk,
        })
    }

    async fn logs_for_session(&self, session_id: &str) -> StoreResult<Vec<ProcessingLog>> {
        let session = self
            .require_id("session", "sessions", "session_id", session_id)
            .await?;
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM processing_logs WHERE session_id = ? ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(session)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("processing_logs", e))?;
        collect(rows, row_to_log)
    }

    async fn record_metric(&self, metric: NewSystemMetric) -> StoreResult<SystemMetric> {
        metric.validate()?;
        let timestamp = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO system_metrics (timestamp, metric_name, metric_value, metric_unit, metadata) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(timestamp)
        .bind(&metric.metric_name)
        .bind(metric.metric_value)
        .bind(&metric.metric_unit)
        .bind(to_json(&metric.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("system_metrics", e))?;

        Ok(SystemMetric {
            id: inserted.last_insert_rowid(),
            timestamp,
            metric_name: metric.metric_name,
            metric_value: metric.metric_value,
            metric_unit: metric.metric_unit,
            metadata: metric.metadata,
        })
    }

    async fn metrics_named(&self, metric_name: &str) -> StoreResult<Vec<SystemMetric>> {
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM system_metrics WHERE metric_name = ? ORDER BY timestamp, id"
        );
        let rows = sqlx::query(&sql)
            .bind(metric_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("system_metrics", e))?;
        collect(rows, row_to_metric)
    }

    async fn table_counts(&self) -> StoreResult<TableCounts> {
        Ok(TableCounts {
            users: self.count("users").await?,
            devices: self.count("devices").await?,
            sessions: self.count("sessions").await?,
            biosignal_readings: self.count("biosignal_readings").await?,
            analysis_results: self.count("analysis_results").await?,
            processing_logs: self.count("processing_logs").await?,
            system_metrics: self.count("system_metrics").await?,
        })
    }
}
