//! The per-frame evaluation pipeline.
//!
//! One [`Monitor`] owns every component and drives them in a fixed order
//! per incoming frame: classifier, debounce filter, escalation scheduler,
//! presence monitor, recorder. Both the debounce filter and the presence
//! monitor see the same frame's validity signal, so the ordering is part of
//! the contract.
//!
//! The monitor is caller-ticked and single-threaded by construction; the
//! async runner serializes frames, timer ticks and control inputs onto it.
//! Configuration is snapshotted at the start of every cycle, so a
//! concurrent settings update can never produce a half-old/half-new
//! evaluation.
//!
//! Monitoring is gated on the operating window: within work hours, on AC
//! power, not manually disabled. Any of these turning false suspends the
//! pipeline before the next cycle, closes the open session with its
//! statistics frozen, and resets the state machines so they resume fresh.

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapt::{AdaptationStrategy, NoAdaptation};
use crate::classifier::{self, PostureMetrics, PostureVerdict};
use crate::debounce::{DebounceFilter, PostureState, RecoveryReason, StateChange};
use crate::error::ConfigError;
use crate::escalation::{Alert, AlertLevel, Escalator};
use crate::events::{Event, SuspendReason};
use crate::keypoint::KeypointFrame;
use crate::presence::{PresenceEffect, PresenceMonitor, PresenceOutcome, PresenceState};
use crate::recorder::SessionRecorder;
use crate::session::{
    FeedbackRecord, FeedbackResponse, LockDirection, LockRecord, PostureEvent, TransitionKind,
};
use crate::storage::{EventStore, MonitorConfig};

/// Cap on the time credited to one evaluation step when integrating
/// session aggregates; larger gaps mean the pipeline was not running.
const MAX_STEP_SEC: f64 = 2.0;

/// Downstream side-effect interface, consumed by the GUI/OS layer.
///
/// Implementations must not block: these are fire-and-forget dispatches
/// from inside the evaluation cycle. The "are you still there?" prompt is
/// signalled by `on_presence_change` entering
/// [`PresenceState::AwayConfirming`].
pub trait EffectSink: Send {
    fn on_alert(&mut self, _alert: &Alert, _metrics: Option<&PostureMetrics>) {}
    fn on_presence_change(&mut self, _state: &PresenceState) {}
    fn on_lock_requested(&mut self) {}
    fn on_wake_requested(&mut self) {}
    fn on_session_closed(&mut self, _summary: &crate::session::SessionSummary) {}
}

/// Sink that ignores everything; useful for replay and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl EffectSink for NullSink {}

/// The decision core: one instance per monitored workstation.
pub struct Monitor {
    config: MonitorConfig,
    debounce: DebounceFilter,
    escalator: Escalator,
    presence: PresenceMonitor,
    recorder: SessionRecorder,
    adaptation: Box<dyn AdaptationStrategy>,
    sink: Box<dyn EffectSink>,
    /// Power-source signal fed by the platform layer; defaults to AC.
    on_ac_power: bool,
    /// Timed manual disable ("snooze monitoring for N minutes").
    disabled_until: Option<DateTime<Utc>>,
    suspended: Option<SuspendReason>,
    last_frame_at: Option<DateTime<Utc>>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_metrics: Option<PostureMetrics>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        store: Box<dyn EventStore + Send>,
        sink: Box<dyn EffectSink>,
    ) -> Self {
        Self {
            config,
            debounce: DebounceFilter::new(),
            escalator: Escalator::new(),
            presence: PresenceMonitor::new(),
            recorder: SessionRecorder::new(store),
            adaptation: Box::new(NoAdaptation),
            sink,
            on_ac_power: true,
            disabled_until: None,
            suspended: None,
            last_frame_at: None,
            last_cycle_at: None,
            last_metrics: None,
        }
    }

    pub fn with_adaptation(mut self, strategy: Box<dyn AdaptationStrategy>) -> Self {
        self.adaptation = strategy;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn posture_state(&self) -> PostureState {
        self.debounce.state()
    }

    pub fn presence_state(&self) -> PresenceState {
        self.presence.state()
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.escalator.level()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.recorder.session_id()
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    // ── Control inputs ───────────────────────────────────────────────

    /// Replace the configuration. Validated as a whole; an invalid config
    /// is rejected and the previous one stays in force. The new snapshot
    /// applies from the next evaluation cycle.
    pub fn update_config(&mut self, config: MonitorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        if enabled {
            self.disabled_until = None;
        }
    }

    /// Disable monitoring for a bounded time.
    pub fn disable_for_minutes(&mut self, minutes: u32, now: DateTime<Utc>) {
        self.disabled_until = Some(now + Duration::minutes(minutes as i64));
        info!(minutes, "monitoring disabled temporarily");
    }

    pub fn set_on_ac_power(&mut self, on_ac_power: bool) {
        self.on_ac_power = on_ac_power;
    }

    /// The user answered the presence prompt affirmatively. Latched and
    /// resolved immediately; a response always outranks a lock deadline
    /// observed in the same cycle.
    pub fn respond_present(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        self.presence.respond_present();
        self.tick(now)
    }

    /// Record the user's judgement of an alert and run the adaptation
    /// hook. Historical records are never mutated; at most the escalation
    /// schedule for future episodes changes.
    pub fn record_feedback(
        &mut self,
        event_id: Uuid,
        response: FeedbackResponse,
        now: DateTime<Utc>,
    ) {
        let record = FeedbackRecord {
            ts: now,
            event_id,
            response,
        };
        self.recorder.record_feedback(record.clone());
        if let Some(schedule) = self.adaptation.on_feedback(&record) {
            info!("adaptation hook adjusted the escalation schedule");
            self.config.escalation = schedule;
        }
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// Run one full evaluation cycle for an incoming frame.
    pub fn process_frame(&mut self, frame: &KeypointFrame) -> Vec<Event> {
        let now = frame.captured_at;
        if let Some(last) = self.last_frame_at {
            if now < last {
                warn!(?now, ?last, "frame timestamp not monotonic, dropping frame");
                return Vec::new();
            }
        }
        self.last_frame_at = Some(now);

        let cfg = self.config.clone();
        let mut events = Vec::new();
        if !self.gate(&cfg, now, &mut events) {
            return events;
        }

        let metrics = classifier::compute_metrics(frame, &cfg.thresholds);
        let verdict = classifier::classify(&metrics, &cfg.thresholds);
        let visible = classifier::subject_visible(frame, &cfg.thresholds);
        debug!(?verdict, visible, "frame evaluated");
        self.last_metrics = Some(metrics);

        // Locked means no posture evaluation until presence returns.
        if !self.presence.is_locked() {
            let change = self.debounce.update(&verdict, now, &cfg.thresholds);
            self.apply_state_change(change, &verdict, &mut events);
            if let PostureVerdict::Bad { dominant, .. } = &verdict {
                self.escalator.note_dominant(*dominant);
            }
            self.run_escalation(now, &cfg, &mut events);
        }

        let outcome = self.presence.observe_frame(visible, now, &cfg.presence);
        self.apply_presence(outcome, now, &mut events);

        self.finish_cycle(now);
        events
    }

    /// Advance time-based logic when no frame has arrived: escalation
    /// boundaries and presence deadlines still progress.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let cfg = self.config.clone();
        let mut events = Vec::new();
        if !self.gate(&cfg, now, &mut events) {
            return events;
        }

        if !self.presence.is_locked() {
            self.run_escalation(now, &cfg, &mut events);
        }
        let outcome = self.presence.tick(now, &cfg.presence);
        self.apply_presence(outcome, now, &mut events);

        self.finish_cycle(now);
        events
    }

    /// Stop monitoring, closing the open session with its statistics.
    pub fn shutdown(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        self.close_active_episode(now, RecoveryReason::Suspended, &mut events);
        if let Some(summary) = self.recorder.close_session(now) {
            self.sink.on_session_closed(&summary);
            events.push(Event::SessionClosed { summary, at: now });
        }
        self.reset_machines();
        events
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Operating-window gate. Returns `true` when the cycle may run.
    fn gate(&mut self, cfg: &MonitorConfig, now: DateTime<Utc>, events: &mut Vec<Event>) -> bool {
        let reason = self.gate_reason(cfg, now);
        match (self.suspended, reason) {
            (None, None) => {
                self.ensure_session(now, events);
                true
            }
            (None, Some(reason)) => {
                self.suspend(reason, now, events);
                false
            }
            (Some(_), Some(_)) => false,
            (Some(_), None) => {
                self.suspended = None;
                info!("monitoring resumed");
                events.push(Event::MonitoringResumed { at: now });
                self.ensure_session(now, events);
                true
            }
        }
    }

    fn gate_reason(&mut self, cfg: &MonitorConfig, now: DateTime<Utc>) -> Option<SuspendReason> {
        if !cfg.enabled {
            return Some(SuspendReason::Disabled);
        }
        if let Some(until) = self.disabled_until {
            if now < until {
                return Some(SuspendReason::Disabled);
            }
            self.disabled_until = None;
        }
        if cfg.require_ac_power && !self.on_ac_power {
            return Some(SuspendReason::OnBattery);
        }
        let hour = now.with_timezone(&chrono::Local).hour();
        if !cfg.work_hours.contains(hour) {
            return Some(SuspendReason::OutOfWorkHours);
        }
        None
    }

    fn suspend(&mut self, reason: SuspendReason, now: DateTime<Utc>, events: &mut Vec<Event>) {
        info!(?reason, "monitoring suspended");
        self.close_active_episode(now, RecoveryReason::Suspended, events);
        if let Some(summary) = self.recorder.close_session(now) {
            self.sink.on_session_closed(&summary);
            events.push(Event::SessionClosed { summary, at: now });
        }
        self.reset_machines();
        self.suspended = Some(reason);
        events.push(Event::MonitoringSuspended { reason, at: now });
    }

    fn reset_machines(&mut self) {
        self.debounce = DebounceFilter::new();
        self.escalator = Escalator::new();
        self.presence.reset();
        self.last_cycle_at = None;
        self.last_metrics = None;
    }

    fn ensure_session(&mut self, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if !self.recorder.is_open() {
            let session_id = self.recorder.start_session(now);
            events.push(Event::SessionStarted {
                session_id,
                at: now,
            });
        }
    }

    fn apply_state_change(
        &mut self,
        change: StateChange,
        verdict: &PostureVerdict,
        events: &mut Vec<Event>,
    ) {
        match change {
            StateChange::None => {}
            StateChange::ConfirmedBad { at, prior_good_sec } => {
                if let PostureVerdict::Bad { dominant, .. } = verdict {
                    self.escalator.begin_episode(at, *dominant);
                    self.push_transition(
                        at,
                        TransitionKind::GoodToBad,
                        prior_good_sec,
                        AlertLevel::None,
                        Some(*dominant),
                        None,
                        events,
                    );
                }
            }
            StateChange::RecoveredGood {
                at,
                duration_sec,
                reason,
            } => {
                let dominant = self.escalator.dominant();
                let final_level = self.escalator.end_episode();
                let recorded_reason = match reason {
                    RecoveryReason::Recovered => None,
                    other => Some(other),
                };
                self.push_transition(
                    at,
                    TransitionKind::BadToGood,
                    duration_sec,
                    final_level,
                    dominant,
                    recorded_reason,
                    events,
                );
            }
        }
    }

    fn run_escalation(&mut self, now: DateTime<Utc>, cfg: &MonitorConfig, events: &mut Vec<Event>) {
        if !self.debounce.state().is_bad_confirmed() {
            return;
        }
        if let Some(alert) = self.escalator.tick(now, &cfg.escalation) {
            info!(level = ?alert.level, "posture alert raised");
            self.recorder.note_alert();
            self.sink.on_alert(&alert, self.last_metrics.as_ref());
            events.push(Event::AlertRaised {
                level: alert.level,
                message: alert.message,
                dominant: alert.dominant,
                at: now,
            });
        }
    }

    fn apply_presence(
        &mut self,
        outcome: PresenceOutcome,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        if let Some(state) = outcome.changed {
            self.sink.on_presence_change(&state);
            events.push(Event::PresenceChanged { state, at: now });
        }
        match outcome.effect {
            // The prompt rides on the AwayConfirming state change.
            Some(PresenceEffect::PromptPresence) | None => {}
            Some(PresenceEffect::LockWorkstation) => {
                // Close an active bad episode without a spurious alert;
                // internal state locks regardless of whether the OS call
                // downstream succeeds.
                self.close_active_episode(now, RecoveryReason::SubjectLost, events);
                self.sink.on_lock_requested();
                events.push(Event::LockRequested { at: now });
                self.push_lock(now, LockDirection::Locked);
            }
            Some(PresenceEffect::WakeDisplay) => {
                self.sink.on_wake_requested();
                events.push(Event::WakeRequested { at: now });
                self.push_lock(now, LockDirection::Unlocked);
            }
        }
    }

    fn close_active_episode(
        &mut self,
        now: DateTime<Utc>,
        reason: RecoveryReason,
        events: &mut Vec<Event>,
    ) {
        let change = self.debounce.force_reset(now, reason);
        if let StateChange::RecoveredGood {
            at,
            duration_sec,
            reason,
        } = change
        {
            let dominant = self.escalator.dominant();
            let final_level = self.escalator.end_episode();
            self.push_transition(
                at,
                TransitionKind::BadToGood,
                duration_sec,
                final_level,
                dominant,
                Some(reason),
                events,
            );
        }
    }

    fn push_transition(
        &mut self,
        ts: DateTime<Utc>,
        transition: TransitionKind,
        duration_sec: f64,
        alert_level_reached: AlertLevel,
        dominant_metric: Option<crate::classifier::MetricKind>,
        reason: Option<RecoveryReason>,
        events: &mut Vec<Event>,
    ) {
        let Some(session_id) = self.recorder.session_id() else {
            return;
        };
        let event = PostureEvent {
            id: Uuid::new_v4(),
            session_id,
            ts,
            transition,
            duration_sec,
            alert_level_reached,
            dominant_metric,
            reason,
        };
        self.recorder.record_transition(event.clone());
        events.push(Event::PostureTransition { event });
    }

    fn push_lock(&mut self, ts: DateTime<Utc>, direction: LockDirection) {
        if let Some(session_id) = self.recorder.session_id() {
            self.recorder.record_lock(LockRecord {
                session_id,
                ts,
                direction,
            });
        }
    }

    fn finish_cycle(&mut self, now: DateTime<Utc>) {
        let dt_sec = self
            .last_cycle_at
            .map(|last| ((now - last).num_milliseconds().max(0) as f64 / 1000.0).min(MAX_STEP_SEC))
            .unwrap_or(0.0);
        let good = matches!(self.debounce.state(), PostureState::Good);
        self.recorder.observe(good, dt_sec);
        self.recorder.flush_pending();
        self.last_cycle_at = Some(now);
    }
}
