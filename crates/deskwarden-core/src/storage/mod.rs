//! Persistence boundary.
//!
//! Storage technology is an external collaborator: the decision core only
//! talks to the [`EventStore`] trait. [`SqliteStore`] is the on-disk
//! implementation; [`MemoryStore`] backs tests and headless runs.

mod config;
pub mod database;

pub use config::{MonitorConfig, WorkHours};
pub use database::{DailySummary, SqliteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::StorageError;
use crate::session::{FeedbackRecord, LockRecord, PostureEvent, SessionSummary, WorkSession};

/// Returns `~/.config/deskwarden[-dev]/` based on DESKWARDEN_ENV.
///
/// Set DESKWARDEN_ENV=dev to use a development data directory.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("DESKWARDEN_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("deskwarden-dev")
    } else {
        base_dir.join("deskwarden")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Append-only store for sessions and their records.
///
/// Implementations must be cheap to call from the evaluation cycle; any
/// latency they do have is absorbed by the recorder's retry queue, never by
/// the state machines.
pub trait EventStore {
    fn open_session(&mut self, session: &WorkSession) -> Result<(), StorageError>;
    fn close_session(&mut self, summary: &SessionSummary) -> Result<(), StorageError>;
    fn append_event(&mut self, event: &PostureEvent) -> Result<(), StorageError>;
    fn append_lock(&mut self, record: &LockRecord) -> Result<(), StorageError>;
    fn append_feedback(&mut self, record: &FeedbackRecord) -> Result<(), StorageError>;

    fn sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkSession>, StorageError>;
    fn events_for(&self, session_id: Uuid) -> Result<Vec<PostureEvent>, StorageError>;
}

/// One session with its nested events, as exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: WorkSession,
    pub events: Vec<PostureEvent>,
}

/// Plain structured document for external analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub days_included: i64,
    pub sessions: Vec<SessionExport>,
}

/// Export the last `days` of sessions with their events.
pub fn export(
    store: &dyn EventStore,
    days: i64,
    now: DateTime<Utc>,
) -> Result<ExportDocument, StorageError> {
    let since = now - chrono::Duration::days(days);
    let sessions = store.sessions_since(since)?;
    let mut out = Vec::with_capacity(sessions.len());
    for session in sessions {
        let events = store.events_for(session.id)?;
        out.push(SessionExport { session, events });
    }
    Ok(ExportDocument {
        exported_at: now,
        days_included: days,
        sessions: out,
    })
}

/// In-memory store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub sessions: Vec<WorkSession>,
    pub events: Vec<PostureEvent>,
    pub locks: Vec<LockRecord>,
    pub feedback: Vec<FeedbackRecord>,
    /// When set, every write fails; used to exercise the recorder's retry
    /// queue.
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.fail_writes {
            Err(StorageError::QueryFailed("simulated write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl EventStore for MemoryStore {
    fn open_session(&mut self, session: &WorkSession) -> Result<(), StorageError> {
        self.check()?;
        self.sessions.push(session.clone());
        Ok(())
    }

    fn close_session(&mut self, summary: &SessionSummary) -> Result<(), StorageError> {
        self.check()?;
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == summary.id)
            .ok_or(StorageError::NoOpenSession)?;
        session.ended_at = Some(summary.ended_at);
        session.good_ratio = summary.good_ratio;
        session.bad_event_count = summary.bad_event_count;
        session.alert_count = summary.alert_count;
        Ok(())
    }

    fn append_event(&mut self, event: &PostureEvent) -> Result<(), StorageError> {
        self.check()?;
        self.events.push(event.clone());
        Ok(())
    }

    fn append_lock(&mut self, record: &LockRecord) -> Result<(), StorageError> {
        self.check()?;
        self.locks.push(record.clone());
        Ok(())
    }

    fn append_feedback(&mut self, record: &FeedbackRecord) -> Result<(), StorageError> {
        self.check()?;
        self.feedback.push(record.clone());
        Ok(())
    }

    fn sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<WorkSession>, StorageError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.started_at >= since)
            .cloned()
            .collect())
    }

    fn events_for(&self, session_id: Uuid) -> Result<Vec<PostureEvent>, StorageError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TransitionKind;
    use chrono::Duration;

    #[test]
    fn export_nests_events_under_sessions() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        let session = WorkSession::open(now - Duration::hours(1));
        store.open_session(&session).unwrap();

        let event = PostureEvent {
            id: Uuid::new_v4(),
            session_id: session.id,
            ts: now - Duration::minutes(30),
            transition: TransitionKind::GoodToBad,
            duration_sec: 60.0,
            alert_level_reached: crate::escalation::AlertLevel::None,
            dominant_metric: None,
            reason: None,
        };
        store.append_event(&event).unwrap();

        // A session from last month falls outside the window.
        let old = WorkSession::open(now - Duration::days(40));
        store.open_session(&old).unwrap();

        let doc = export(&store, 7, now).unwrap();
        assert_eq!(doc.sessions.len(), 1);
        assert_eq!(doc.sessions[0].session.id, session.id);
        assert_eq!(doc.sessions[0].events.len(), 1);
    }
}
