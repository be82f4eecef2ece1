//! Posture state debouncing.
//!
//! Turns the noisy per-frame verdict stream into stable state transitions.
//! The filter is a wall-clock state machine in the caller-ticked style: it
//! holds no timers of its own and is advanced by `update(verdict, now)`.
//!
//! ```text
//! Unknown -> Good | BadPending
//! Good -> BadPending
//! BadPending -> Good (single good frame cancels) | BadConfirmed
//! BadConfirmed -> Good
//! ```
//!
//! Unusable frames pause the pending timer without resetting it and never
//! cancel a confirmed episode on their own; a streak of them longer than
//! the configured grace window forces the state back to `Unknown`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{PostureThresholds, PostureVerdict};

/// Gaps between consecutive bad verdicts longer than this are treated as
/// unobserved time and excluded from the pending accumulator, so a system
/// sleep cannot confirm an episode the camera never saw.
const MAX_FRAME_GAP_SEC: f64 = 1.0;

/// Debounced posture state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PostureState {
    Unknown,
    Good,
    BadPending { since: DateTime<Utc> },
    BadConfirmed { since: DateTime<Utc> },
}

impl PostureState {
    pub fn is_bad_confirmed(&self) -> bool {
        matches!(self, PostureState::BadConfirmed { .. })
    }
}

/// Why a bad episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    /// Posture returned to good.
    Recovered,
    /// The subject left frame (or stayed unusable past the grace window).
    SubjectLost,
    /// Monitoring was suspended or the workstation locked.
    Suspended,
}

/// Outcome of one filter update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateChange {
    None,
    /// A bad episode was confirmed; `prior_good_sec` is how long the
    /// preceding good period lasted.
    ConfirmedBad {
        at: DateTime<Utc>,
        prior_good_sec: f64,
    },
    /// A confirmed episode ended after `duration_sec`.
    RecoveredGood {
        at: DateTime<Utc>,
        duration_sec: f64,
        reason: RecoveryReason,
    },
}

/// Debounce filter over per-frame verdicts.
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    state: PostureState,
    /// Accumulated continuous-bad seconds while pending.
    bad_accum_sec: f64,
    /// Last bad-verdict instant in the current pending/confirmed streak;
    /// cleared by unusable frames so pauses do not accumulate.
    last_bad_at: Option<DateTime<Utc>>,
    /// Start of the current unusable-frame streak.
    unknown_since: Option<DateTime<Utc>>,
    /// When the current good period started (for event durations).
    good_since: Option<DateTime<Utc>>,
}

impl Default for DebounceFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceFilter {
    pub fn new() -> Self {
        Self {
            state: PostureState::Unknown,
            bad_accum_sec: 0.0,
            last_bad_at: None,
            unknown_since: None,
            good_since: None,
        }
    }

    pub fn state(&self) -> PostureState {
        self.state
    }

    /// Advance the machine with one frame verdict.
    pub fn update(
        &mut self,
        verdict: &PostureVerdict,
        now: DateTime<Utc>,
        thresholds: &PostureThresholds,
    ) -> StateChange {
        match verdict {
            PostureVerdict::Unknown => self.on_unknown(now, thresholds),
            PostureVerdict::Good => self.on_good(now),
            PostureVerdict::Bad { .. } => self.on_bad(now, thresholds),
        }
    }

    /// Force the machine back to `Unknown`, closing a confirmed episode if
    /// one is active. Used when the workstation locks or monitoring
    /// suspends; the closing event carries the given reason.
    pub fn force_reset(&mut self, now: DateTime<Utc>, reason: RecoveryReason) -> StateChange {
        let change = match self.state {
            PostureState::BadConfirmed { since } => StateChange::RecoveredGood {
                at: now,
                duration_sec: elapsed_sec(since, now),
                reason,
            },
            _ => StateChange::None,
        };
        *self = Self::new();
        change
    }

    fn on_good(&mut self, now: DateTime<Utc>) -> StateChange {
        self.unknown_since = None;
        self.last_bad_at = None;
        self.bad_accum_sec = 0.0;
        match self.state {
            PostureState::Good => StateChange::None,
            PostureState::Unknown | PostureState::BadPending { .. } => {
                // A single good frame cancels a pending streak outright.
                self.state = PostureState::Good;
                self.good_since = Some(now);
                StateChange::None
            }
            PostureState::BadConfirmed { since } => {
                self.state = PostureState::Good;
                self.good_since = Some(now);
                StateChange::RecoveredGood {
                    at: now,
                    duration_sec: elapsed_sec(since, now),
                    reason: RecoveryReason::Recovered,
                }
            }
        }
    }

    fn on_bad(&mut self, now: DateTime<Utc>, thresholds: &PostureThresholds) -> StateChange {
        self.unknown_since = None;
        match self.state {
            PostureState::Unknown | PostureState::Good => {
                self.state = PostureState::BadPending { since: now };
                self.bad_accum_sec = 0.0;
                self.last_bad_at = Some(now);
                StateChange::None
            }
            PostureState::BadPending { since } => {
                if let Some(prev) = self.last_bad_at {
                    self.bad_accum_sec += elapsed_sec(prev, now).min(MAX_FRAME_GAP_SEC);
                }
                self.last_bad_at = Some(now);
                if self.bad_accum_sec >= thresholds.bad_duration_confirm_sec {
                    let prior_good_sec = self
                        .good_since
                        .map(|g| elapsed_sec(g, since))
                        .unwrap_or(0.0);
                    self.state = PostureState::BadConfirmed { since: now };
                    self.good_since = None;
                    tracing::info!(accum_sec = self.bad_accum_sec, "bad posture confirmed");
                    StateChange::ConfirmedBad {
                        at: now,
                        prior_good_sec,
                    }
                } else {
                    StateChange::None
                }
            }
            PostureState::BadConfirmed { .. } => {
                self.last_bad_at = Some(now);
                StateChange::None
            }
        }
    }

    fn on_unknown(&mut self, now: DateTime<Utc>, thresholds: &PostureThresholds) -> StateChange {
        // Pause the pending accumulator rather than resetting it.
        self.last_bad_at = None;
        let since = *self.unknown_since.get_or_insert(now);
        if elapsed_sec(since, now) < thresholds.unknown_grace_sec {
            return StateChange::None;
        }
        // Grace window exhausted: the subject is really gone.
        match self.state {
            PostureState::Unknown => StateChange::None,
            PostureState::Good | PostureState::BadPending { .. } => {
                self.state = PostureState::Unknown;
                self.good_since = None;
                self.bad_accum_sec = 0.0;
                StateChange::None
            }
            PostureState::BadConfirmed { since: bad_since } => {
                self.state = PostureState::Unknown;
                self.bad_accum_sec = 0.0;
                StateChange::RecoveredGood {
                    at: now,
                    duration_sec: elapsed_sec(bad_since, now),
                    reason: RecoveryReason::SubjectLost,
                }
            }
        }
    }
}

/// Non-negative elapsed seconds; a clock running backwards reads as zero.
fn elapsed_sec(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn bad() -> PostureVerdict {
        PostureVerdict::Bad {
            violations: vec![crate::classifier::MetricKind::TorsoLean],
            dominant: crate::classifier::MetricKind::TorsoLean,
        }
    }

    fn thresholds() -> PostureThresholds {
        PostureThresholds::default()
    }

    #[test]
    fn bad_streak_confirms_after_three_seconds() {
        let th = thresholds();
        let mut filter = DebounceFilter::new();
        filter.update(&PostureVerdict::Good, at(0), &th);

        let mut confirmed_at = None;
        for i in 0..40 {
            let now = at(100 + i * 100);
            if let StateChange::ConfirmedBad { at: when, .. } = filter.update(&bad(), now, &th) {
                confirmed_at = Some(when);
                break;
            }
        }
        let when = confirmed_at.expect("episode never confirmed");
        let elapsed = (when - at(100)).num_milliseconds();
        assert!((2900..=3200).contains(&elapsed), "confirmed at {elapsed}ms");
        assert!(filter.state().is_bad_confirmed());
    }

    #[test]
    fn single_good_frame_cancels_pending() {
        let th = thresholds();
        let mut filter = DebounceFilter::new();
        // 2.9s of bad, then one good frame just before the threshold.
        for i in 0..30 {
            assert_eq!(filter.update(&bad(), at(i * 100), &th), StateChange::None);
        }
        filter.update(&PostureVerdict::Good, at(2950), &th);
        assert_eq!(filter.state(), PostureState::Good);

        // A fresh bad streak starts from zero.
        for i in 0..20 {
            assert_eq!(
                filter.update(&bad(), at(3000 + i * 100), &th),
                StateChange::None
            );
        }
        assert!(matches!(
            filter.state(),
            PostureState::BadPending { .. }
        ));
    }

    #[test]
    fn unknown_pauses_pending_timer_without_reset() {
        let th = thresholds();
        let mut filter = DebounceFilter::new();
        // 2s of bad.
        for i in 0..21 {
            filter.update(&bad(), at(i * 100), &th);
        }
        // 1.5s of unusable frames: timer paused, not reset.
        for i in 0..15 {
            filter.update(&PostureVerdict::Unknown, at(2100 + i * 100), &th);
        }
        assert!(matches!(filter.state(), PostureState::BadPending { .. }));
        // 1.2s more of bad pushes the accumulator past 3s.
        let mut confirmed = false;
        for i in 0..13 {
            if let StateChange::ConfirmedBad { .. } =
                filter.update(&bad(), at(3600 + i * 100), &th)
            {
                confirmed = true;
            }
        }
        assert!(confirmed);
    }

    #[test]
    fn unknown_does_not_cancel_confirmed_episode_within_grace() {
        let th = thresholds();
        let mut filter = confirmed_filter(&th);
        // 1s of unusable frames: under the 2s grace window.
        for i in 0..10 {
            assert_eq!(
                filter.update(&PostureVerdict::Unknown, at(10_000 + i * 100), &th),
                StateChange::None
            );
        }
        assert!(filter.state().is_bad_confirmed());
    }

    #[test]
    fn unknown_streak_past_grace_closes_episode_as_subject_lost() {
        let th = thresholds();
        let mut filter = confirmed_filter(&th);
        let mut closed = None;
        for i in 0..25 {
            if let StateChange::RecoveredGood { reason, .. } =
                filter.update(&PostureVerdict::Unknown, at(10_000 + i * 100), &th)
            {
                closed = Some(reason);
            }
        }
        assert_eq!(closed, Some(RecoveryReason::SubjectLost));
        assert_eq!(filter.state(), PostureState::Unknown);
    }

    #[test]
    fn good_after_confirmed_reports_duration() {
        let th = thresholds();
        let mut filter = confirmed_filter(&th);
        match filter.update(&PostureVerdict::Good, at(10_000), &th) {
            StateChange::RecoveredGood {
                duration_sec,
                reason,
                ..
            } => {
                assert_eq!(reason, RecoveryReason::Recovered);
                assert!(duration_sec > 6.0, "duration was {duration_sec}");
            }
            other => panic!("expected RecoveredGood, got {other:?}"),
        }
        assert_eq!(filter.state(), PostureState::Good);
    }

    #[test]
    fn sleep_gap_between_bad_frames_does_not_instantly_confirm() {
        let th = thresholds();
        let mut filter = DebounceFilter::new();
        filter.update(&bad(), at(0), &th);
        // One bad frame, then the machine sleeps for an hour. The gap
        // contributes at most MAX_FRAME_GAP_SEC to the accumulator.
        let change = filter.update(&bad(), at(3_600_000), &th);
        assert_eq!(change, StateChange::None);
        assert!(matches!(filter.state(), PostureState::BadPending { .. }));
    }

    #[test]
    fn force_reset_closes_episode_with_given_reason() {
        let th = thresholds();
        let mut filter = confirmed_filter(&th);
        match filter.force_reset(at(12_000), RecoveryReason::Suspended) {
            StateChange::RecoveredGood { reason, .. } => {
                assert_eq!(reason, RecoveryReason::Suspended);
            }
            other => panic!("expected RecoveredGood, got {other:?}"),
        }
        assert_eq!(filter.state(), PostureState::Unknown);
    }

    /// A filter driven into BadConfirmed by 3.1s of bad frames ending
    /// around t=3100ms.
    fn confirmed_filter(th: &PostureThresholds) -> DebounceFilter {
        let mut filter = DebounceFilter::new();
        for i in 0..32 {
            filter.update(&bad(), at(i * 100), th);
        }
        assert!(filter.state().is_bad_confirmed());
        filter
    }
}
