//! SQLite-based session storage and statistics.
//!
//! Persists work sessions, posture events, lock records and user feedback,
//! and answers the daily/weekly summary queries behind the stats surface.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{data_dir, EventStore};
use crate::classifier::MetricKind;
use crate::debounce::RecoveryReason;
use crate::error::StorageError;
use crate::escalation::AlertLevel;
use crate::session::{
    FeedbackRecord, FeedbackResponse, LockDirection, LockRecord, PostureEvent, SessionSummary,
    TransitionKind, WorkSession,
};

/// Aggregate posture statistics for one day.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub session_count: u64,
    pub monitored_sec: f64,
    pub good_sec: f64,
    pub bad_event_count: u64,
    pub alert_count: u64,
    /// 0-100, share of monitored time spent in good posture.
    pub posture_score: f64,
}

/// SQLite store for sessions, events, locks and feedback.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the database at `~/.config/deskwarden/deskwarden.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, StorageError> {
        let path = data_dir()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .join("deskwarden.db");
        let conn = Connection::open(&path).map_err(|source| StorageError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &std::path::Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS work_sessions (
                id              TEXT PRIMARY KEY,
                started_at      TEXT NOT NULL,
                ended_at        TEXT,
                good_ratio      REAL NOT NULL DEFAULT 0,
                monitored_sec   REAL NOT NULL DEFAULT 0,
                good_sec        REAL NOT NULL DEFAULT 0,
                bad_event_count INTEGER NOT NULL DEFAULT 0,
                alert_count     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS posture_events (
                id              TEXT PRIMARY KEY,
                session_id      TEXT NOT NULL REFERENCES work_sessions(id),
                ts              TEXT NOT NULL,
                transition      TEXT NOT NULL,
                duration_sec    REAL NOT NULL,
                alert_level     TEXT NOT NULL,
                dominant_metric TEXT,
                reason          TEXT
            );

            CREATE TABLE IF NOT EXISTS lock_records (
                session_id TEXT NOT NULL,
                ts         TEXT NOT NULL,
                direction  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_feedback (
                ts       TEXT NOT NULL,
                event_id TEXT NOT NULL,
                response TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON work_sessions(started_at);
            CREATE INDEX IF NOT EXISTS idx_events_session_id ON posture_events(session_id);",
        )?;
        Ok(())
    }

    /// Aggregate statistics for one local day.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, StorageError> {
        let start = Utc
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let end = start + Duration::days(1);

        let row = self
            .conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(monitored_sec), 0),
                        COALESCE(SUM(good_sec), 0),
                        COALESCE(SUM(bad_event_count), 0),
                        COALESCE(SUM(alert_count), 0)
                 FROM work_sessions
                 WHERE started_at >= ?1 AND started_at < ?2 AND ended_at IS NOT NULL",
                params![start.to_rfc3339(), end.to_rfc3339()],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, u64>(4)?,
                    ))
                },
            )
            .optional()?;

        let (session_count, monitored_sec, good_sec, bad_event_count, alert_count) =
            row.unwrap_or((0, 0.0, 0.0, 0, 0));
        let posture_score = if monitored_sec > 0.0 {
            (good_sec / monitored_sec * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };
        Ok(DailySummary {
            date,
            session_count,
            monitored_sec,
            good_sec,
            bad_event_count,
            alert_count,
            posture_score,
        })
    }

    /// Daily summaries for the last seven days, oldest first.
    pub fn weekly_trend(&self, today: NaiveDate) -> Result<Vec<DailySummary>, StorageError> {
        let mut out = Vec::with_capacity(7);
        for back in (0..7).rev() {
            out.push(self.daily_summary(today - Duration::days(back))?);
        }
        Ok(out)
    }
}

impl EventStore for SqliteStore {
    fn open_session(&mut self, session: &WorkSession) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO work_sessions (id, started_at) VALUES (?1, ?2)",
            params![session.id.to_string(), session.started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn close_session(&mut self, summary: &SessionSummary) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE work_sessions
             SET ended_at = ?2, good_ratio = ?3, monitored_sec = ?4, good_sec = ?5,
                 bad_event_count = ?6, alert_count = ?7
             WHERE id = ?1",
            params![
                summary.id.to_string(),
                summary.ended_at.to_rfc3339(),
                summary.good_ratio,
                summary.monitored_sec,
                summary.good_sec,
                summary.bad_event_count,
                summary.alert_count,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NoOpenSession);
        }
        Ok(())
    }

    fn append_event(&mut self, event: &PostureEvent) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO posture_events
             (id, session_id, ts, transition, duration_sec, alert_level, dominant_metric, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                event.ts.to_rfc3339(),
                transition_str(event.transition),
                event.duration_sec,
                level_str(event.alert_level_reached),
                event.dominant_metric.map(|m| m.to_string()),
                event.reason.map(reason_str),
            ],
        )?;
        Ok(())
    }

    fn append_lock(&mut self, record: &LockRecord) -> Result<(), StorageError> {
        let direction = match record.direction {
            LockDirection::Locked => "locked",
            LockDirection::Unlocked => "unlocked",
        };
        self.conn.execute(
            "INSERT INTO lock_records (session_id, ts, direction) VALUES (?1, ?2, ?3)",
            params![
                record.session_id.to_string(),
                record.ts.to_rfc3339(),
                direction
            ],
        )?;
        Ok(())
    }

    fn append_feedback(&mut self, record: &FeedbackRecord) -> Result<(), StorageError> {
        let response = match record.response {
            FeedbackResponse::Useful => "useful",
            FeedbackResponse::NotUseful => "not_useful",
            FeedbackResponse::Dismissed => "dismissed",
        };
        self.conn.execute(
            "INSERT INTO user_feedback (ts, event_id, response) VALUES (?1, ?2, ?3)",
            params![
                record.ts.to_rfc3339(),
                record.event_id.to_string(),
                response
            ],
        )?;
        Ok(())
    }

    fn sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkSession>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, ended_at, good_ratio, bad_event_count, alert_count
             FROM work_sessions
             WHERE started_at >= ?1
             ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, started_at, ended_at, good_ratio, bad_event_count, alert_count) = row?;
            sessions.push(WorkSession {
                id: parse_uuid(&id)?,
                started_at: parse_ts(&started_at)?,
                ended_at: ended_at.as_deref().map(parse_ts).transpose()?,
                good_ratio,
                bad_event_count,
                alert_count,
            });
        }
        Ok(sessions)
    }

    fn events_for(&self, session_id: Uuid) -> Result<Vec<PostureEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ts, transition, duration_sec, alert_level, dominant_metric, reason
             FROM posture_events
             WHERE session_id = ?1
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, ts, transition, duration_sec, alert_level, dominant_metric, reason) = row?;
            events.push(PostureEvent {
                id: parse_uuid(&id)?,
                session_id,
                ts: parse_ts(&ts)?,
                transition: parse_transition(&transition)?,
                duration_sec,
                alert_level_reached: parse_level(&alert_level),
                dominant_metric: dominant_metric.as_deref().map(parse_metric).transpose()?,
                reason: reason.as_deref().map(parse_reason).transpose()?,
            });
        }
        Ok(events)
    }
}

fn transition_str(t: TransitionKind) -> &'static str {
    match t {
        TransitionKind::GoodToBad => "good_to_bad",
        TransitionKind::BadToGood => "bad_to_good",
    }
}

fn parse_transition(s: &str) -> Result<TransitionKind, StorageError> {
    match s {
        "good_to_bad" => Ok(TransitionKind::GoodToBad),
        "bad_to_good" => Ok(TransitionKind::BadToGood),
        other => Err(StorageError::QueryFailed(format!(
            "unknown transition: {other}"
        ))),
    }
}

fn level_str(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::None => "none",
        AlertLevel::Gentle => "gentle",
        AlertLevel::Direct => "direct",
        AlertLevel::Strong => "strong",
    }
}

fn parse_level(s: &str) -> AlertLevel {
    match s {
        "gentle" => AlertLevel::Gentle,
        "direct" => AlertLevel::Direct,
        "strong" => AlertLevel::Strong,
        _ => AlertLevel::None,
    }
}

fn parse_metric(s: &str) -> Result<MetricKind, StorageError> {
    match s {
        "neck_tilt" => Ok(MetricKind::NeckTilt),
        "head_pitch" => Ok(MetricKind::HeadPitch),
        "torso_lean" => Ok(MetricKind::TorsoLean),
        "shoulder_asymmetry" => Ok(MetricKind::ShoulderAsymmetry),
        other => Err(StorageError::QueryFailed(format!("unknown metric: {other}"))),
    }
}

fn reason_str(r: RecoveryReason) -> &'static str {
    match r {
        RecoveryReason::Recovered => "recovered",
        RecoveryReason::SubjectLost => "subject_lost",
        RecoveryReason::Suspended => "suspended",
    }
}

fn parse_reason(s: &str) -> Result<RecoveryReason, StorageError> {
    match s {
        "recovered" => Ok(RecoveryReason::Recovered),
        "subject_lost" => Ok(RecoveryReason::SubjectLost),
        "suspended" => Ok(RecoveryReason::Suspended),
        other => Err(StorageError::QueryFailed(format!("unknown reason: {other}"))),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|e| StorageError::QueryFailed(e.to_string()))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::QueryFailed(e.to_string()))
}
