use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::MetricKind;
use crate::escalation::AlertLevel;
use crate::presence::PresenceState;
use crate::session::{PostureEvent, SessionSummary};

/// Why monitoring was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    OutOfWorkHours,
    OnBattery,
    Disabled,
}

/// Every externally visible state change in the pipeline produces an Event.
/// The GUI/notification layer consumes these; the replay tool prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    SessionClosed {
        summary: SessionSummary,
        at: DateTime<Utc>,
    },
    /// A confirmed posture transition was recorded.
    PostureTransition {
        event: PostureEvent,
    },
    /// An escalation boundary was crossed.
    AlertRaised {
        level: AlertLevel,
        message: String,
        dominant: MetricKind,
        at: DateTime<Utc>,
    },
    PresenceChanged {
        state: PresenceState,
        at: DateTime<Utc>,
    },
    LockRequested {
        at: DateTime<Utc>,
    },
    WakeRequested {
        at: DateTime<Utc>,
    },
    MonitoringSuspended {
        reason: SuspendReason,
        at: DateTime<Utc>,
    },
    MonitoringResumed {
        at: DateTime<Utc>,
    },
}
