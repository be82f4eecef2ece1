//! Work sessions and the records appended to them.
//!
//! These are the persisted shapes; storage technology lives behind
//! [`crate::storage::EventStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::MetricKind;
use crate::debounce::RecoveryReason;
use crate::escalation::AlertLevel;

/// Direction of a confirmed posture transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    GoodToBad,
    BadToGood,
}

/// One continuous interval of active monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// `None` while the session is open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Good-posture time / monitored time, filled at close.
    pub good_ratio: f64,
    pub bad_event_count: u32,
    pub alert_count: u32,
}

impl WorkSession {
    pub fn open(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            ended_at: None,
            good_ratio: 0.0,
            bad_event_count: 0,
            alert_count: 0,
        }
    }
}

/// Closing summary of a work session, handed to the downstream layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub monitored_sec: f64,
    pub good_sec: f64,
    pub good_ratio: f64,
    pub bad_event_count: u32,
    pub alert_count: u32,
}

/// A confirmed posture transition, appended to exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ts: DateTime<Utc>,
    pub transition: TransitionKind,
    /// Duration of the state that just ended.
    pub duration_sec: f64,
    /// Highest alert level reached during the episode (for `BadToGood`).
    pub alert_level_reached: AlertLevel,
    pub dominant_metric: Option<MetricKind>,
    /// Why a `BadToGood` transition happened, when it was not a posture
    /// recovery.
    pub reason: Option<RecoveryReason>,
}

/// A lock/unlock decision, appended on every transition into or out of the
/// locked presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockDirection {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub session_id: Uuid,
    pub ts: DateTime<Utc>,
    pub direction: LockDirection,
}

/// How the user judged an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackResponse {
    Useful,
    NotUseful,
    Dismissed,
}

/// User feedback on an alert; feeds the adaptation hook, never mutates
/// historical events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub ts: DateTime<Utc>,
    pub event_id: Uuid,
    pub response: FeedbackResponse,
}
