//! Alert escalation while a bad-posture episode persists.
//!
//! The escalator is active only during a confirmed bad episode and measures
//! elapsed wall-clock time since the episode was confirmed. Crossing a
//! schedule boundary emits exactly one alert; the level never goes down
//! mid-episode and resets hard to `None` when the episode ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::MetricKind;

/// Alert severity, ordered. `None` outside a confirmed episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    None,
    Gentle,
    Direct,
    Strong,
}

impl AlertLevel {
    /// Get numeric level value (0-3)
    pub fn as_u8(self) -> u8 {
        match self {
            AlertLevel::None => 0,
            AlertLevel::Gentle => 1,
            AlertLevel::Direct => 2,
            AlertLevel::Strong => 3,
        }
    }

    /// Convert from numeric level value
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertLevel::None,
            1 => AlertLevel::Gentle,
            2 => AlertLevel::Direct,
            _ => AlertLevel::Strong,
        }
    }
}

/// Elapsed-time boundaries for each alert level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSchedule {
    /// Seconds into the episode before a gentle alert (default: 15s)
    #[serde(default = "default_gentle_after_sec")]
    pub gentle_after_sec: f64,
    /// Seconds before a direct alert (default: 45s)
    #[serde(default = "default_direct_after_sec")]
    pub direct_after_sec: f64,
    /// Seconds before a strong alert (default: 120s)
    #[serde(default = "default_strong_after_sec")]
    pub strong_after_sec: f64,
}

fn default_gentle_after_sec() -> f64 {
    15.0
}
fn default_direct_after_sec() -> f64 {
    45.0
}
fn default_strong_after_sec() -> f64 {
    120.0
}

impl Default for EscalationSchedule {
    fn default() -> Self {
        Self {
            gentle_after_sec: default_gentle_after_sec(),
            direct_after_sec: default_direct_after_sec(),
            strong_after_sec: default_strong_after_sec(),
        }
    }
}

impl EscalationSchedule {
    pub fn level_for(&self, elapsed_sec: f64) -> AlertLevel {
        if elapsed_sec >= self.strong_after_sec {
            AlertLevel::Strong
        } else if elapsed_sec >= self.direct_after_sec {
            AlertLevel::Direct
        } else if elapsed_sec >= self.gentle_after_sec {
            AlertLevel::Gentle
        } else {
            AlertLevel::None
        }
    }
}

/// One alert emission: a boundary was crossed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub dominant: MetricKind,
    pub elapsed_sec: f64,
}

#[derive(Debug, Clone)]
struct Episode {
    started_at: DateTime<Utc>,
    level: AlertLevel,
    dominant: MetricKind,
}

/// Escalation state for the current bad episode, if any.
#[derive(Debug, Clone, Default)]
pub struct Escalator {
    episode: Option<Episode>,
}

impl Escalator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a confirmed episode.
    pub fn begin_episode(&mut self, started_at: DateTime<Utc>, dominant: MetricKind) {
        self.episode = Some(Episode {
            started_at,
            level: AlertLevel::None,
            dominant,
        });
    }

    /// Update the dominant metric as later bad frames come in; alert
    /// messages reflect the most recent culprit.
    pub fn note_dominant(&mut self, dominant: MetricKind) {
        if let Some(ref mut ep) = self.episode {
            ep.dominant = dominant;
        }
    }

    /// End the episode, returning the final level reached.
    pub fn end_episode(&mut self) -> AlertLevel {
        self.episode.take().map(|ep| ep.level).unwrap_or(AlertLevel::None)
    }

    pub fn level(&self) -> AlertLevel {
        self.episode
            .as_ref()
            .map(|ep| ep.level)
            .unwrap_or(AlertLevel::None)
    }

    pub fn dominant(&self) -> Option<MetricKind> {
        self.episode.as_ref().map(|ep| ep.dominant)
    }

    /// Check the schedule against elapsed episode time. Emits at most one
    /// alert per call; if several boundaries were crossed at once (clock
    /// jump, missed ticks), only the highest level fires.
    pub fn tick(&mut self, now: DateTime<Utc>, schedule: &EscalationSchedule) -> Option<Alert> {
        let ep = self.episode.as_mut()?;
        let elapsed_sec = (now - ep.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let target = schedule.level_for(elapsed_sec);
        if target <= ep.level {
            return None;
        }
        ep.level = target;
        Some(Alert {
            level: target,
            message: message_for(target, ep.dominant, elapsed_sec),
            dominant: ep.dominant,
            elapsed_sec,
        })
    }
}

fn message_for(level: AlertLevel, dominant: MetricKind, elapsed_sec: f64) -> String {
    let secs = elapsed_sec.round() as i64;
    let metric = dominant.label();
    match level {
        AlertLevel::None => String::new(),
        AlertLevel::Gentle => format!(
            "Posture check: your {metric} has been off for {secs}s. Consider adjusting your position."
        ),
        AlertLevel::Direct => format!(
            "Posture reminder: {secs}s of poor posture. Time for a quick posture reset! Focus on: {metric}."
        ),
        AlertLevel::Strong => format!(
            "Break time: you have been slouching for {secs}s. Stand up, stretch, and reset your workspace."
        ),
    }
}
