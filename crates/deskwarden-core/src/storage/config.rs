//! TOML-based monitor configuration.
//!
//! Aggregates every tunable surface: posture thresholds, presence timing,
//! the escalation schedule, the work-hours window and the power/enable
//! flags. Stored at `~/.config/deskwarden/config.toml`.
//!
//! Updates are all-or-nothing: a value outside sane bounds is rejected at
//! this boundary and the previous configuration stays in force. The
//! evaluation pipeline snapshots the whole config at the start of each
//! cycle, so a concurrent update can never produce a half-old/half-new
//! decision.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::classifier::PostureThresholds;
use crate::error::ConfigError;
use crate::escalation::EscalationSchedule;
use crate::presence::PresenceTiming;

/// Daily operating window in local hours, `[start_hour, end_hour)`.
///
/// `start_hour > end_hour` wraps overnight; `start_hour == end_hour` keeps
/// the window open around the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkHours {
    #[serde(default = "default_start_hour")]
    pub start_hour: u8,
    #[serde(default = "default_end_hour")]
    pub end_hour: u8,
}

fn default_start_hour() -> u8 {
    9
}
fn default_end_hour() -> u8 {
    23
}

impl Default for WorkHours {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

impl WorkHours {
    pub fn contains(&self, hour: u32) -> bool {
        let start = self.start_hour as u32;
        let end = self.end_hour as u32;
        if start == end {
            return true;
        }
        // Overnight window (e.g. 22:00 - 07:00)
        if start > end {
            return hour >= start || hour < end;
        }
        hour >= start && hour < end
    }
}

/// Monitor configuration.
///
/// Serialized to/from TOML at `~/.config/deskwarden/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub thresholds: PostureThresholds,
    #[serde(default)]
    pub presence: PresenceTiming,
    #[serde(default)]
    pub escalation: EscalationSchedule,
    #[serde(default)]
    pub work_hours: WorkHours,
    /// Monitoring requires the device to be on its primary power source.
    #[serde(default = "default_true")]
    pub require_ac_power: bool,
    /// Manual master switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: PostureThresholds::default(),
            presence: PresenceTiming::default(),
            escalation: EscalationSchedule::default(),
            work_hours: WorkHours::default(),
            require_ac_power: true,
            enabled: true,
        }
    }
}

impl MonitorConfig {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/deskwarden"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or return (and persist) the default.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: MonitorConfig =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Load from disk, returning the default on any error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Reject configurations with out-of-bounds values. Called before any
    /// update is applied, so a bad value never partially lands.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be a positive number, got {value}"),
                })
            }
        }

        let t = &self.thresholds;
        positive("thresholds.neck_tilt_deg", t.neck_tilt_deg)?;
        positive("thresholds.head_pitch_deg", t.head_pitch_deg)?;
        positive("thresholds.torso_lean_deg", t.torso_lean_deg)?;
        positive("thresholds.shoulder_asymmetry", t.shoulder_asymmetry)?;
        positive(
            "thresholds.bad_duration_confirm_sec",
            t.bad_duration_confirm_sec,
        )?;
        positive("thresholds.unknown_grace_sec", t.unknown_grace_sec)?;
        if !(0.0..=1.0).contains(&t.min_landmark_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "thresholds.min_landmark_confidence".to_string(),
                message: format!("must be within 0..=1, got {}", t.min_landmark_confidence),
            });
        }

        if self.presence.absence_detect_sec < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "presence.absence_detect_sec".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if self.presence.response_window_sec < 5.0 {
            return Err(ConfigError::InvalidValue {
                key: "presence.response_window_sec".to_string(),
                message: "must be at least 5 seconds".to_string(),
            });
        }

        let e = &self.escalation;
        positive("escalation.gentle_after_sec", e.gentle_after_sec)?;
        if !(e.gentle_after_sec < e.direct_after_sec && e.direct_after_sec < e.strong_after_sec) {
            return Err(ConfigError::InvalidValue {
                key: "escalation".to_string(),
                message: "schedule boundaries must be strictly increasing".to_string(),
            });
        }

        if self.work_hours.start_hour > 23 || self.work_hours.end_hour > 23 {
            return Err(ConfigError::InvalidValue {
                key: "work_hours".to_string(),
                message: "hours must be within 0..=23".to_string(),
            });
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key, validate the result and persist it.
    /// The previous configuration is retained on any error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        set_json_value_by_path(&mut json, key, value)?;
        let candidate: MonitorConfig =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        candidate.validate()?;
        *self = candidate;
        self.save()
    }
}

fn get_json_value_by_path<'a>(
    root: &'a serde_json::Value,
    key: &str,
) -> Option<&'a serde_json::Value> {
    if key.is_empty() {
        return None;
    }
    let mut current = root;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn set_json_value_by_path(
    root: &mut serde_json::Value,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };

    let mut parts = key.split('.').peekable();
    if parts.peek().is_none() {
        return Err(invalid("config key is empty".into()));
    }

    let mut current = root;
    while let Some(part) = parts.next() {
        let is_leaf = parts.peek().is_none();
        if is_leaf {
            let obj = current
                .as_object_mut()
                .ok_or_else(|| invalid("unknown config key".into()))?;
            let existing = obj
                .get(part)
                .ok_or_else(|| invalid("unknown config key".into()))?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    if let Ok(n) = value.parse::<u64>() {
                        serde_json::Value::Number(n.into())
                    } else if let Ok(n) = value.parse::<f64>() {
                        serde_json::Number::from_f64(n)
                            .map(serde_json::Value::Number)
                            .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as number")));
                    }
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        current = current
            .get_mut(part)
            .ok_or_else(|| invalid("unknown config key".into()))?;
    }

    Err(invalid("unknown config key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let cfg = MonitorConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MonitorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn empty_toml_uses_all_defaults() {
        let parsed: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(parsed, MonitorConfig::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.get("thresholds.neck_tilt_deg").as_deref(), Some("20.0"));
        assert_eq!(cfg.get("work_hours.start_hour").as_deref(), Some("9"));
        assert_eq!(cfg.get("require_ac_power").as_deref(), Some("true"));
        assert!(cfg.get("thresholds.missing_key").is_none());
    }

    #[test]
    fn validate_rejects_negative_threshold() {
        let mut cfg = MonitorConfig::default();
        cfg.thresholds.torso_lean_deg = -5.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn validate_rejects_unordered_escalation() {
        let mut cfg = MonitorConfig::default();
        cfg.escalation.direct_after_sec = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut cfg = MonitorConfig::default();
        cfg.thresholds.min_landmark_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn set_json_path_rejects_unknown_key() {
        let mut json = serde_json::to_value(MonitorConfig::default()).unwrap();
        assert!(set_json_value_by_path(&mut json, "thresholds.nonexistent", "1").is_err());
    }

    #[test]
    fn set_json_path_updates_nested_number() {
        let mut json = serde_json::to_value(MonitorConfig::default()).unwrap();
        set_json_value_by_path(&mut json, "presence.absence_detect_sec", "20").unwrap();
        assert_eq!(
            get_json_value_by_path(&json, "presence.absence_detect_sec").unwrap(),
            &serde_json::Value::Number(20.into())
        );
    }

    #[test]
    fn work_hours_daytime_window() {
        let wh = WorkHours {
            start_hour: 9,
            end_hour: 23,
        };
        assert!(wh.contains(9));
        assert!(wh.contains(22));
        assert!(!wh.contains(23));
        assert!(!wh.contains(3));
    }

    #[test]
    fn work_hours_overnight_window() {
        let wh = WorkHours {
            start_hour: 22,
            end_hour: 7,
        };
        assert!(wh.contains(23));
        assert!(wh.contains(3));
        assert!(!wh.contains(10));
    }

    #[test]
    fn work_hours_equal_bounds_cover_whole_day() {
        let wh = WorkHours {
            start_hour: 0,
            end_hour: 0,
        };
        for h in 0..24 {
            assert!(wh.contains(h));
        }
    }
}
