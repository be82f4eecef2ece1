//! Desk presence tracking and auto-lock state machine.
//!
//! Independent of posture quality: this machine only consumes the
//! frame-validity signal (is a subject in frame at all), the user's
//! response to the presence prompt, and the clock.
//!
//! ```text
//! Present -> AwayPending -> AwayConfirming -> Locked
//!    ^-----------+--------------+--------------+
//! ```
//!
//! Races between the confirmation deadline, a user response and a subject
//! reappearing are resolved with a fixed priority: user response first,
//! then reappearance, then deadline expiry. Locking is the costliest action
//! and must never fire when evidence of presence arrived in the same cycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Presence timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceTiming {
    /// Continuous absence before the confirmation prompt (default: 10s)
    #[serde(default = "default_absence_detect_sec")]
    pub absence_detect_sec: f64,
    /// Window for the user to acknowledge before locking (default: 30s)
    #[serde(default = "default_response_window_sec")]
    pub response_window_sec: f64,
}

fn default_absence_detect_sec() -> f64 {
    10.0
}
fn default_response_window_sec() -> f64 {
    30.0
}

impl Default for PresenceTiming {
    fn default() -> Self {
        Self {
            absence_detect_sec: default_absence_detect_sec(),
            response_window_sec: default_response_window_sec(),
        }
    }
}

/// Presence state. `AwayConfirming` carries its response deadline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PresenceState {
    Present,
    AwayPending {
        since: DateTime<Utc>,
    },
    AwayConfirming {
        deadline: DateTime<Utc>,
        responded: bool,
    },
    Locked,
}

impl PresenceState {
    pub fn is_locked(&self) -> bool {
        matches!(self, PresenceState::Locked)
    }
}

/// Side effect requested by a presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEffect {
    /// Show the "Are you still there?" prompt.
    PromptPresence,
    /// Lock the workstation.
    LockWorkstation,
    /// Wake the display; the OS credential prompt stays in charge of the
    /// actual unlock.
    WakeDisplay,
}

/// Result of one presence evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceOutcome {
    /// The new state, if this evaluation transitioned.
    pub changed: Option<PresenceState>,
    pub effect: Option<PresenceEffect>,
}

impl PresenceOutcome {
    fn unchanged() -> Self {
        Self {
            changed: None,
            effect: None,
        }
    }
}

/// The presence state machine.
#[derive(Debug, Clone)]
pub struct PresenceMonitor {
    state: PresenceState,
    /// Latched user acknowledgement from the prompt side channel; consumed
    /// by the next evaluation.
    response_latch: bool,
}

impl Default for PresenceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceMonitor {
    pub fn new() -> Self {
        Self {
            state: PresenceState::Present,
            response_latch: false,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Latch an affirmative user response. Takes effect at the next
    /// evaluation, where it outranks every other signal.
    pub fn respond_present(&mut self) {
        self.response_latch = true;
    }

    /// Reset to the initial state (used on suspend/resume).
    pub fn reset(&mut self) {
        self.state = PresenceState::Present;
        self.response_latch = false;
    }

    /// Evaluate with a frame's validity signal.
    pub fn observe_frame(
        &mut self,
        visible: bool,
        now: DateTime<Utc>,
        timing: &PresenceTiming,
    ) -> PresenceOutcome {
        self.step(Some(visible), now, timing)
    }

    /// Evaluate on a timer tick, with no new frame. Absence detection only
    /// starts from an actual subject-free frame; a stalled camera alone
    /// never begins the countdown, but countdowns already under way keep
    /// running.
    pub fn tick(&mut self, now: DateTime<Utc>, timing: &PresenceTiming) -> PresenceOutcome {
        self.step(None, now, timing)
    }

    fn step(
        &mut self,
        visible: Option<bool>,
        now: DateTime<Utc>,
        timing: &PresenceTiming,
    ) -> PresenceOutcome {
        let responded = std::mem::take(&mut self.response_latch);
        let seen = visible == Some(true);

        match self.state {
            PresenceState::Present => {
                if visible == Some(false) {
                    self.transition(PresenceState::AwayPending { since: now }, None)
                } else {
                    PresenceOutcome::unchanged()
                }
            }
            PresenceState::AwayPending { since } => {
                if responded || seen {
                    self.transition(PresenceState::Present, None)
                } else if elapsed_sec(since, now) >= timing.absence_detect_sec {
                    let deadline =
                        now + Duration::milliseconds((timing.response_window_sec * 1000.0) as i64);
                    tracing::info!(?deadline, "subject absent, prompting for presence");
                    self.transition(
                        PresenceState::AwayConfirming {
                            deadline,
                            responded: false,
                        },
                        Some(PresenceEffect::PromptPresence),
                    )
                } else {
                    PresenceOutcome::unchanged()
                }
            }
            PresenceState::AwayConfirming { deadline, .. } => {
                // Priority: response, then reappearance, then the deadline.
                if responded {
                    self.transition(PresenceState::Present, None)
                } else if seen {
                    self.transition(PresenceState::Present, None)
                } else if now >= deadline {
                    tracing::info!("presence prompt unanswered, locking workstation");
                    self.transition(
                        PresenceState::Locked,
                        Some(PresenceEffect::LockWorkstation),
                    )
                } else {
                    PresenceOutcome::unchanged()
                }
            }
            PresenceState::Locked => {
                // A stale prompt response cannot unlock; only a subject in
                // frame brings the machine back.
                if seen {
                    tracing::info!("subject returned, waking display");
                    self.transition(PresenceState::Present, Some(PresenceEffect::WakeDisplay))
                } else {
                    PresenceOutcome::unchanged()
                }
            }
        }
    }

    fn transition(
        &mut self,
        next: PresenceState,
        effect: Option<PresenceEffect>,
    ) -> PresenceOutcome {
        self.state = next;
        PresenceOutcome {
            changed: Some(next),
            effect,
        }
    }
}

fn elapsed_sec(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    fn at(sec: f64) -> DateTime<Utc> {
        t0() + Duration::milliseconds((sec * 1000.0) as i64)
    }

    fn timing() -> PresenceTiming {
        PresenceTiming::default()
    }

    #[test]
    fn short_absence_returns_present_without_prompt() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        monitor.observe_frame(true, at(0.0), &tm);

        let out = monitor.observe_frame(false, at(1.0), &tm);
        assert!(matches!(
            out.changed,
            Some(PresenceState::AwayPending { .. })
        ));

        // Absent 8s in total, then the subject reappears.
        for i in 2..9 {
            let out = monitor.observe_frame(false, at(i as f64), &tm);
            assert_eq!(out.effect, None);
        }
        let out = monitor.observe_frame(true, at(9.0), &tm);
        assert_eq!(out.changed, Some(PresenceState::Present));
        assert_eq!(out.effect, None);
    }

    #[test]
    fn sustained_absence_prompts_then_locks() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        monitor.observe_frame(false, at(0.0), &tm);

        // 10s after the first absent frame, the prompt fires.
        let mut prompted = None;
        for i in 1..=11 {
            let out = monitor.observe_frame(false, at(i as f64), &tm);
            if out.effect == Some(PresenceEffect::PromptPresence) {
                prompted = Some(i);
                break;
            }
        }
        assert_eq!(prompted, Some(10));

        // No response, no reappearance: lock exactly once at the deadline.
        let mut locks = 0;
        for i in 11..=45 {
            let out = monitor.observe_frame(false, at(i as f64), &tm);
            if out.effect == Some(PresenceEffect::LockWorkstation) {
                locks += 1;
            }
        }
        assert_eq!(locks, 1);
        assert!(monitor.is_locked());
    }

    #[test]
    fn user_response_cancels_confirmation() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        for i in 0..=10 {
            monitor.observe_frame(false, at(i as f64), &tm);
        }
        assert!(matches!(
            monitor.state(),
            PresenceState::AwayConfirming { .. }
        ));

        monitor.respond_present();
        let out = monitor.tick(at(12.0), &tm);
        assert_eq!(out.changed, Some(PresenceState::Present));
        assert_eq!(out.effect, None);
    }

    #[test]
    fn response_outranks_deadline_in_same_cycle() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        for i in 0..=10 {
            monitor.observe_frame(false, at(i as f64), &tm);
        }

        // The deadline has long elapsed by the time the next evaluation
        // runs, but the latched response still wins.
        monitor.respond_present();
        let out = monitor.observe_frame(false, at(300.0), &tm);
        assert_eq!(out.changed, Some(PresenceState::Present));
        assert_eq!(out.effect, None);
    }

    #[test]
    fn reappearance_outranks_deadline_in_same_cycle() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        for i in 0..=10 {
            monitor.observe_frame(false, at(i as f64), &tm);
        }

        let out = monitor.observe_frame(true, at(300.0), &tm);
        assert_eq!(out.changed, Some(PresenceState::Present));
        assert_eq!(out.effect, None);
    }

    #[test]
    fn reappearance_after_lock_wakes_but_does_not_unlock() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        for i in 0..=10 {
            monitor.observe_frame(false, at(i as f64), &tm);
        }
        monitor.observe_frame(false, at(41.0), &tm);
        assert!(monitor.is_locked());

        // A stale response alone does not unlock.
        monitor.respond_present();
        let out = monitor.tick(at(42.0), &tm);
        assert_eq!(out.changed, None);
        assert!(monitor.is_locked());

        let out = monitor.observe_frame(true, at(60.0), &tm);
        assert_eq!(out.changed, Some(PresenceState::Present));
        assert_eq!(out.effect, Some(PresenceEffect::WakeDisplay));
    }

    #[test]
    fn camera_stall_does_not_start_absence_countdown() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        monitor.observe_frame(true, at(0.0), &tm);

        // Ticks without frames for a long time: still Present.
        for i in 1..60 {
            let out = monitor.tick(at(i as f64), &tm);
            assert_eq!(out.changed, None);
        }
        assert_eq!(monitor.state(), PresenceState::Present);
    }

    #[test]
    fn countdown_progresses_on_ticks_once_started() {
        let tm = timing();
        let mut monitor = PresenceMonitor::new();
        monitor.observe_frame(false, at(0.0), &tm);

        // The camera stalls after the absent frame; ticks keep the
        // countdown moving.
        let mut prompted = false;
        for i in 1..=12 {
            let out = monitor.tick(at(i as f64), &tm);
            if out.effect == Some(PresenceEffect::PromptPresence) {
                prompted = true;
            }
        }
        assert!(prompted);
    }
}
