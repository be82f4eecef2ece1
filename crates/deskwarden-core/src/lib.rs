//! # Deskwarden Core Library
//!
//! Decision core for Deskwarden, a webcam posture and presence monitor.
//! An external pose estimator supplies one keypoint frame per acquisition
//! tick; this library turns that stream into a classified posture state,
//! escalating alerts while posture stays bad, and an auto-lock presence
//! machine, all behind a CLI-first core with the GUI as a thin layer on
//! top.
//!
//! ## Architecture
//!
//! - **Classifier**: pure geometry over one frame; confidence-gated metrics
//! - **Debounce Filter**: a wall-clock state machine that requires
//!   sustained bad posture before confirming an episode
//! - **Escalation Scheduler**: one alert per boundary crossed, monotonic
//!   within an episode
//! - **Presence Monitor**: absence detection, grace-period prompt and the
//!   lock/wake decisions
//! - **Recorder/Storage**: append-only session history behind the
//!   [`EventStore`] trait (SQLite on disk, in-memory for tests)
//! - **Pipeline/Runner**: the fixed-order per-frame evaluation cycle and
//!   the tokio task that serializes frames, ticks and control inputs
//!
//! The system is a heuristic aid, not a safety system: whenever input is
//! ambiguous or missing it fails toward doing nothing disruptive.
//!
//! ## Key Components
//!
//! - [`Monitor`]: the evaluation pipeline
//! - [`MonitorConfig`]: hot-reloadable configuration snapshot
//! - [`EffectSink`]: downstream side-effect interface for the GUI/OS layer
//! - [`runner::spawn`]: async driver

pub mod adapt;
pub mod classifier;
pub mod debounce;
pub mod error;
pub mod escalation;
pub mod events;
pub mod keypoint;
pub mod pipeline;
pub mod presence;
pub mod recorder;
pub mod runner;
pub mod session;
pub mod storage;

pub use classifier::{MetricKind, MetricValue, PostureMetrics, PostureThresholds, PostureVerdict};
pub use debounce::{DebounceFilter, PostureState, RecoveryReason};
pub use error::{ConfigError, CoreError, Result, StorageError};
pub use escalation::{Alert, AlertLevel, EscalationSchedule, Escalator};
pub use events::{Event, SuspendReason};
pub use keypoint::{Keypoint, KeypointFrame, Landmark};
pub use pipeline::{EffectSink, Monitor, NullSink};
pub use presence::{PresenceMonitor, PresenceState, PresenceTiming};
pub use recorder::SessionRecorder;
pub use runner::{Command, MonitorHandle};
pub use session::{
    FeedbackRecord, FeedbackResponse, LockDirection, LockRecord, PostureEvent, SessionSummary,
    TransitionKind, WorkSession,
};
pub use storage::{EventStore, ExportDocument, MemoryStore, MonitorConfig, SqliteStore, WorkHours};
