//! Session/event recording.
//!
//! The recorder owns the open [`WorkSession`], accumulates its aggregates
//! and appends records through the [`EventStore`] boundary. It is a pure
//! sink: nothing here feeds back into classification or scheduling.
//!
//! Writes are fire-and-forget from the pipeline's point of view. A failed
//! write is logged, parked in a retry queue and reattempted on later
//! cycles; it never blocks or corrupts the live state machines. An event
//! that fails to persist is lost only from the historical record, not from
//! the live escalation decision.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::{
    FeedbackRecord, LockRecord, PostureEvent, SessionSummary, TransitionKind, WorkSession,
};
use crate::storage::EventStore;

/// Retry queue cap; beyond this the oldest queued write is dropped with a
/// warning rather than growing without bound.
const MAX_PENDING_WRITES: usize = 1024;

#[derive(Debug, Clone)]
enum PendingWrite {
    OpenSession(WorkSession),
    CloseSession(SessionSummary),
    Event(PostureEvent),
    Lock(LockRecord),
    Feedback(FeedbackRecord),
}

#[derive(Debug)]
struct LiveSession {
    session: WorkSession,
    good_sec: f64,
    monitored_sec: f64,
}

/// Append-only recorder for sessions, posture events, locks and feedback.
pub struct SessionRecorder {
    store: Box<dyn EventStore + Send>,
    open: Option<LiveSession>,
    pending: VecDeque<PendingWrite>,
}

impl SessionRecorder {
    pub fn new(store: Box<dyn EventStore + Send>) -> Self {
        Self {
            store,
            open: None,
            pending: VecDeque::new(),
        }
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.open.as_ref().map(|live| live.session.id)
    }

    /// Start a new session; closes any session still open first so exactly
    /// one is ever open.
    pub fn start_session(&mut self, now: DateTime<Utc>) -> Uuid {
        if self.open.is_some() {
            self.close_session(now);
        }
        let session = WorkSession::open(now);
        let id = session.id;
        info!(session_id = %id, "work session started");
        self.submit(PendingWrite::OpenSession(session.clone()));
        self.open = Some(LiveSession {
            session,
            good_sec: 0.0,
            monitored_sec: 0.0,
        });
        id
    }

    /// Accumulate one evaluation step into the session aggregates.
    pub fn observe(&mut self, good: bool, dt_sec: f64) {
        if let Some(ref mut live) = self.open {
            live.monitored_sec += dt_sec;
            if good {
                live.good_sec += dt_sec;
            }
        }
    }

    /// Append a confirmed posture transition to the open session.
    pub fn record_transition(&mut self, event: PostureEvent) {
        if let Some(ref mut live) = self.open {
            if event.transition == TransitionKind::GoodToBad {
                live.session.bad_event_count += 1;
            }
        }
        self.submit(PendingWrite::Event(event));
    }

    /// Count one alert emission toward the session aggregates.
    pub fn note_alert(&mut self) {
        if let Some(ref mut live) = self.open {
            live.session.alert_count += 1;
        }
    }

    pub fn record_lock(&mut self, record: LockRecord) {
        self.submit(PendingWrite::Lock(record));
    }

    pub fn record_feedback(&mut self, record: FeedbackRecord) {
        self.submit(PendingWrite::Feedback(record));
    }

    /// Close the open session, freezing its aggregate statistics.
    pub fn close_session(&mut self, now: DateTime<Utc>) -> Option<SessionSummary> {
        let live = self.open.take()?;
        let good_ratio = if live.monitored_sec > 0.0 {
            (live.good_sec / live.monitored_sec).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let summary = SessionSummary {
            id: live.session.id,
            started_at: live.session.started_at,
            ended_at: now,
            monitored_sec: live.monitored_sec,
            good_sec: live.good_sec,
            good_ratio,
            bad_event_count: live.session.bad_event_count,
            alert_count: live.session.alert_count,
        };
        info!(
            session_id = %summary.id,
            good_ratio = summary.good_ratio,
            bad_events = summary.bad_event_count,
            "work session closed"
        );
        self.submit(PendingWrite::CloseSession(summary.clone()));
        Some(summary)
    }

    /// Retry parked writes, in order, stopping at the first failure.
    pub fn flush_pending(&mut self) {
        while let Some(write) = self.pending.pop_front() {
            if let Err(e) = self.apply(&write) {
                warn!(error = %e, "persistence retry failed, will try again");
                self.pending.push_front(write);
                return;
            }
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn submit(&mut self, write: PendingWrite) {
        // Drain earlier failures first so writes land in order.
        self.flush_pending();
        if !self.pending.is_empty() {
            self.park(write);
            return;
        }
        if let Err(e) = self.apply(&write) {
            warn!(error = %e, "persistence write failed, queued for retry");
            self.park(write);
        }
    }

    fn park(&mut self, write: PendingWrite) {
        if self.pending.len() >= MAX_PENDING_WRITES {
            warn!("persistence retry queue full, dropping oldest write");
            self.pending.pop_front();
        }
        self.pending.push_back(write);
    }

    fn apply(&mut self, write: &PendingWrite) -> Result<(), crate::error::StorageError> {
        match write {
            PendingWrite::OpenSession(session) => self.store.open_session(session),
            PendingWrite::CloseSession(summary) => self.store.close_session(summary),
            PendingWrite::Event(event) => self.store.append_event(event),
            PendingWrite::Lock(record) => self.store.append_lock(record),
            PendingWrite::Feedback(record) => self.store.append_feedback(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MetricKind;
    use crate::escalation::AlertLevel;
    use crate::storage::MemoryStore;
    use chrono::Duration;

    fn event(session_id: Uuid, transition: TransitionKind) -> PostureEvent {
        PostureEvent {
            id: Uuid::new_v4(),
            session_id,
            ts: Utc::now(),
            transition,
            duration_sec: 10.0,
            alert_level_reached: AlertLevel::None,
            dominant_metric: Some(MetricKind::TorsoLean),
            reason: None,
        }
    }

    #[test]
    fn close_computes_good_ratio() {
        let now = Utc::now();
        let mut recorder = SessionRecorder::new(Box::new(MemoryStore::new()));
        recorder.start_session(now);
        // 60s monitored, 45s of it good.
        for _ in 0..45 {
            recorder.observe(true, 1.0);
        }
        for _ in 0..15 {
            recorder.observe(false, 1.0);
        }
        let summary = recorder
            .close_session(now + Duration::seconds(60))
            .unwrap();
        assert!((summary.good_ratio - 0.75).abs() < 1e-9);
        assert_eq!(summary.monitored_sec, 60.0);
    }

    #[test]
    fn starting_twice_closes_the_first_session() {
        let now = Utc::now();
        let mut recorder = SessionRecorder::new(Box::new(MemoryStore::new()));
        let first = recorder.start_session(now);
        let second = recorder.start_session(now + Duration::minutes(1));
        assert_ne!(first, second);
        assert_eq!(recorder.session_id(), Some(second));
    }

    #[test]
    fn good_to_bad_transitions_count_bad_events() {
        let now = Utc::now();
        let mut recorder = SessionRecorder::new(Box::new(MemoryStore::new()));
        let id = recorder.start_session(now);
        recorder.record_transition(event(id, TransitionKind::GoodToBad));
        recorder.record_transition(event(id, TransitionKind::BadToGood));
        recorder.record_transition(event(id, TransitionKind::GoodToBad));
        let summary = recorder.close_session(now + Duration::minutes(5)).unwrap();
        assert_eq!(summary.bad_event_count, 2);
    }

    #[test]
    fn failed_writes_are_queued_and_retried() {
        let now = Utc::now();
        let mut store = MemoryStore::new();
        store.fail_writes = true;
        let mut recorder = SessionRecorder::new(Box::new(store));
        let id = recorder.start_session(now);
        recorder.record_transition(event(id, TransitionKind::GoodToBad));
        assert_eq!(recorder.pending_writes(), 2);

        // The live aggregates are unaffected by the storage failure.
        recorder.observe(false, 1.0);

        // Flushing while the store still fails changes nothing.
        recorder.flush_pending();
        assert_eq!(recorder.pending_writes(), 2);
    }

    /// Store that fails its first `failures` writes, then behaves.
    struct FlakyStore {
        inner: MemoryStore,
        failures: usize,
    }

    impl EventStore for FlakyStore {
        fn open_session(&mut self, s: &WorkSession) -> Result<(), crate::error::StorageError> {
            self.gate()?;
            self.inner.open_session(s)
        }
        fn close_session(&mut self, s: &SessionSummary) -> Result<(), crate::error::StorageError> {
            self.gate()?;
            self.inner.close_session(s)
        }
        fn append_event(&mut self, e: &PostureEvent) -> Result<(), crate::error::StorageError> {
            self.gate()?;
            self.inner.append_event(e)
        }
        fn append_lock(&mut self, r: &LockRecord) -> Result<(), crate::error::StorageError> {
            self.gate()?;
            self.inner.append_lock(r)
        }
        fn append_feedback(
            &mut self,
            r: &FeedbackRecord,
        ) -> Result<(), crate::error::StorageError> {
            self.gate()?;
            self.inner.append_feedback(r)
        }
        fn sessions_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<WorkSession>, crate::error::StorageError> {
            self.inner.sessions_since(since)
        }
        fn events_for(
            &self,
            session_id: Uuid,
        ) -> Result<Vec<PostureEvent>, crate::error::StorageError> {
            self.inner.events_for(session_id)
        }
    }

    impl FlakyStore {
        fn gate(&mut self) -> Result<(), crate::error::StorageError> {
            if self.failures > 0 {
                self.failures -= 1;
                Err(crate::error::StorageError::QueryFailed("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn pending_writes_drain_in_order_once_store_recovers() {
        let now = Utc::now();
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failures: 2,
        };
        let mut recorder = SessionRecorder::new(Box::new(store));
        let id = recorder.start_session(now);
        recorder.record_transition(event(id, TransitionKind::GoodToBad));
        assert!(recorder.pending_writes() > 0);

        // Once the store recovers, a flush drains everything in order.
        recorder.flush_pending();
        assert_eq!(recorder.pending_writes(), 0);
    }
}
