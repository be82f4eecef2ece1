//! Geometric posture classification.
//!
//! Pure functions of one [`KeypointFrame`] plus a [`PostureThresholds`]
//! snapshot. No hidden state: identical input yields identical output.
//!
//! Every metric is gated on landmark confidence. A landmark below
//! `min_landmark_confidence` makes the dependent metric
//! [`MetricValue::Unavailable`] instead of feeding noise downstream, and a
//! frame where nothing is measurable yields [`PostureVerdict::Unknown`],
//! never a silent `Good`.

use serde::{Deserialize, Serialize};

use crate::keypoint::{Keypoint, KeypointFrame, Landmark};

/// The four posture metrics the classifier derives from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    NeckTilt,
    HeadPitch,
    TorsoLean,
    ShoulderAsymmetry,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::NeckTilt,
        MetricKind::HeadPitch,
        MetricKind::TorsoLean,
        MetricKind::ShoulderAsymmetry,
    ];

    /// Human-readable label used in alert messages.
    pub fn label(self) -> &'static str {
        match self {
            MetricKind::NeckTilt => "neck tilt",
            MetricKind::HeadPitch => "head pitch",
            MetricKind::TorsoLean => "torso lean",
            MetricKind::ShoulderAsymmetry => "shoulder asymmetry",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = match self {
            MetricKind::NeckTilt => "neck_tilt",
            MetricKind::HeadPitch => "head_pitch",
            MetricKind::TorsoLean => "torso_lean",
            MetricKind::ShoulderAsymmetry => "shoulder_asymmetry",
        };
        write!(f, "{key}")
    }
}

/// A metric is either measured or unavailable for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Available(f64),
    Unavailable,
}

impl MetricValue {
    pub fn value(self) -> Option<f64> {
        match self {
            MetricValue::Available(v) => Some(v),
            MetricValue::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, MetricValue::Available(_))
    }
}

/// Thresholds for the geometric classifier and the debounce filter.
///
/// Angles in degrees. Shoulder asymmetry is normalized by frame height
/// (pixel delta / height), the representation used consistently across the
/// system; the default corresponds to 8 px on a 480 px-high frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureThresholds {
    #[serde(default = "default_neck_tilt_deg")]
    pub neck_tilt_deg: f64,
    #[serde(default = "default_head_pitch_deg")]
    pub head_pitch_deg: f64,
    #[serde(default = "default_torso_lean_deg")]
    pub torso_lean_deg: f64,
    #[serde(default = "default_shoulder_asymmetry")]
    pub shoulder_asymmetry: f64,
    /// Continuous bad posture required before a bad episode is confirmed.
    #[serde(default = "default_bad_duration_confirm_sec")]
    pub bad_duration_confirm_sec: f64,
    /// Minimum landmark confidence for a metric to be computed.
    #[serde(default = "default_min_landmark_confidence")]
    pub min_landmark_confidence: f64,
    /// Unusable-frame streak tolerated before the posture state is forced
    /// back to unknown.
    #[serde(default = "default_unknown_grace_sec")]
    pub unknown_grace_sec: f64,
}

fn default_neck_tilt_deg() -> f64 {
    20.0
}
fn default_head_pitch_deg() -> f64 {
    30.0
}
fn default_torso_lean_deg() -> f64 {
    15.0
}
fn default_shoulder_asymmetry() -> f64 {
    8.0 / 480.0
}
fn default_bad_duration_confirm_sec() -> f64 {
    3.0
}
fn default_min_landmark_confidence() -> f64 {
    0.5
}
fn default_unknown_grace_sec() -> f64 {
    2.0
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            neck_tilt_deg: default_neck_tilt_deg(),
            head_pitch_deg: default_head_pitch_deg(),
            torso_lean_deg: default_torso_lean_deg(),
            shoulder_asymmetry: default_shoulder_asymmetry(),
            bad_duration_confirm_sec: default_bad_duration_confirm_sec(),
            min_landmark_confidence: default_min_landmark_confidence(),
            unknown_grace_sec: default_unknown_grace_sec(),
        }
    }
}

impl PostureThresholds {
    pub fn for_metric(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::NeckTilt => self.neck_tilt_deg,
            MetricKind::HeadPitch => self.head_pitch_deg,
            MetricKind::TorsoLean => self.torso_lean_deg,
            MetricKind::ShoulderAsymmetry => self.shoulder_asymmetry,
        }
    }
}

/// Scalar posture metrics derived from one frame. Value type, no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureMetrics {
    pub neck_tilt_deg: MetricValue,
    pub head_pitch_deg: MetricValue,
    pub torso_lean_deg: MetricValue,
    /// Shoulder height delta normalized by frame height.
    pub shoulder_asymmetry: MetricValue,
    /// Raw pixel delta behind `shoulder_asymmetry`, kept for analysis.
    pub shoulder_asymmetry_px: Option<f64>,
    pub frame_height: u32,
}

impl PostureMetrics {
    pub fn get(&self, kind: MetricKind) -> MetricValue {
        match kind {
            MetricKind::NeckTilt => self.neck_tilt_deg,
            MetricKind::HeadPitch => self.head_pitch_deg,
            MetricKind::TorsoLean => self.torso_lean_deg,
            MetricKind::ShoulderAsymmetry => self.shoulder_asymmetry,
        }
    }

    pub fn any_available(&self) -> bool {
        MetricKind::ALL.iter().any(|k| self.get(*k).is_available())
    }
}

/// Per-frame verdict. `Bad` carries the violating metrics and the dominant
/// one (largest relative excess over its threshold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PostureVerdict {
    Good,
    Bad {
        violations: Vec<MetricKind>,
        dominant: MetricKind,
    },
    Unknown,
}

fn midpoint(a: Keypoint, b: Keypoint) -> (f64, f64) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Angle in degrees between a vector and image "up" (0, -1), in [0, 180].
/// A zero-length vector measures as perfectly vertical.
fn angle_from_vertical(dx: f64, dy: f64) -> f64 {
    let norm = (dx * dx + dy * dy).sqrt();
    if norm == 0.0 {
        return 0.0;
    }
    let cos = (-dy / norm).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

fn neck_tilt(frame: &KeypointFrame, min_conf: f64) -> MetricValue {
    let (Some(le), Some(re), Some(ls), Some(rs)) = (
        frame.usable(Landmark::LeftEar, min_conf),
        frame.usable(Landmark::RightEar, min_conf),
        frame.usable(Landmark::LeftShoulder, min_conf),
        frame.usable(Landmark::RightShoulder, min_conf),
    ) else {
        return MetricValue::Unavailable;
    };
    let ear = midpoint(le, re);
    let shoulder = midpoint(ls, rs);
    MetricValue::Available(angle_from_vertical(ear.0 - shoulder.0, ear.1 - shoulder.1))
}

fn head_pitch(frame: &KeypointFrame, min_conf: f64) -> MetricValue {
    let (Some(nose), Some(le), Some(re)) = (
        frame.usable(Landmark::Nose, min_conf),
        frame.usable(Landmark::LeftEar, min_conf),
        frame.usable(Landmark::RightEar, min_conf),
    ) else {
        return MetricValue::Unavailable;
    };
    let ear = midpoint(le, re);
    let dx = nose.x - ear.0;
    let dy = nose.y - ear.1;
    // Nose below ear level means the head is pitched down; measure the
    // angle from horizontal. Nose above ears reads as upright.
    if dy > 0.0 {
        MetricValue::Available(dy.abs().atan2(dx.abs()).to_degrees())
    } else {
        MetricValue::Available(0.0)
    }
}

fn torso_lean(frame: &KeypointFrame, min_conf: f64) -> MetricValue {
    let (Some(ls), Some(rs), Some(lh), Some(rh)) = (
        frame.usable(Landmark::LeftShoulder, min_conf),
        frame.usable(Landmark::RightShoulder, min_conf),
        frame.usable(Landmark::LeftHip, min_conf),
        frame.usable(Landmark::RightHip, min_conf),
    ) else {
        return MetricValue::Unavailable;
    };
    let shoulder = midpoint(ls, rs);
    let hip = midpoint(lh, rh);
    MetricValue::Available(angle_from_vertical(shoulder.0 - hip.0, shoulder.1 - hip.1))
}

/// Derive all metrics from one frame. Metrics with any required landmark
/// below the confidence floor come back `Unavailable`.
pub fn compute_metrics(frame: &KeypointFrame, thresholds: &PostureThresholds) -> PostureMetrics {
    let min_conf = thresholds.min_landmark_confidence;

    let (asym, asym_px) = match (
        frame.usable(Landmark::LeftShoulder, min_conf),
        frame.usable(Landmark::RightShoulder, min_conf),
    ) {
        (Some(ls), Some(rs)) if frame.height > 0 => {
            let px = (ls.y - rs.y).abs();
            (MetricValue::Available(px / frame.height as f64), Some(px))
        }
        _ => (MetricValue::Unavailable, None),
    };

    PostureMetrics {
        neck_tilt_deg: neck_tilt(frame, min_conf),
        head_pitch_deg: head_pitch(frame, min_conf),
        torso_lean_deg: torso_lean(frame, min_conf),
        shoulder_asymmetry: asym,
        shoulder_asymmetry_px: asym_px,
        frame_height: frame.height,
    }
}

/// Classify a metric set against the thresholds snapshot.
///
/// `Bad` requires at least one available metric over its threshold;
/// `Unknown` means nothing was measurable (subject out of frame or all
/// landmarks low-confidence).
pub fn classify(metrics: &PostureMetrics, thresholds: &PostureThresholds) -> PostureVerdict {
    if !metrics.any_available() {
        return PostureVerdict::Unknown;
    }

    let mut violations = Vec::new();
    let mut dominant: Option<(MetricKind, f64)> = None;
    for kind in MetricKind::ALL {
        let Some(value) = metrics.get(kind).value() else {
            continue;
        };
        let threshold = thresholds.for_metric(kind);
        if value > threshold {
            violations.push(kind);
            let excess = if threshold > 0.0 {
                (value - threshold) / threshold
            } else {
                value
            };
            if dominant.map_or(true, |(_, best)| excess > best) {
                dominant = Some((kind, excess));
            }
        }
    }

    match dominant {
        Some((kind, _)) => PostureVerdict::Bad {
            violations,
            dominant: kind,
        },
        None => PostureVerdict::Good,
    }
}

/// Frame-validity signal for the presence monitor: is a subject in frame at
/// all, regardless of posture quality?
pub fn subject_visible(frame: &KeypointFrame, thresholds: &PostureThresholds) -> bool {
    let min_conf = thresholds.min_landmark_confidence;
    frame.usable(Landmark::Nose, min_conf).is_some()
        || (frame.usable(Landmark::LeftShoulder, min_conf).is_some()
            && frame.usable(Landmark::RightShoulder, min_conf).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn kp(x: f64, y: f64) -> Keypoint {
        Keypoint {
            x,
            y,
            confidence: 0.95,
        }
    }

    /// An upright subject centered in a 640x480 frame.
    fn upright_frame() -> KeypointFrame {
        KeypointFrame::new(Utc::now(), 640, 480)
            .with_point(Landmark::Nose, kp(320.0, 100.0))
            .with_point(Landmark::LeftEar, kp(290.0, 120.0))
            .with_point(Landmark::RightEar, kp(350.0, 120.0))
            .with_point(Landmark::LeftShoulder, kp(250.0, 200.0))
            .with_point(Landmark::RightShoulder, kp(390.0, 200.0))
            .with_point(Landmark::LeftHip, kp(270.0, 360.0))
            .with_point(Landmark::RightHip, kp(370.0, 360.0))
    }

    #[test]
    fn upright_subject_is_good() {
        let thresholds = PostureThresholds::default();
        let frame = upright_frame();
        let metrics = compute_metrics(&frame, &thresholds);
        assert!(metrics.any_available());
        assert_eq!(classify(&metrics, &thresholds), PostureVerdict::Good);
    }

    #[test]
    fn empty_frame_is_unknown() {
        let thresholds = PostureThresholds::default();
        let frame = KeypointFrame::new(Utc::now(), 640, 480);
        let metrics = compute_metrics(&frame, &thresholds);
        assert_eq!(classify(&metrics, &thresholds), PostureVerdict::Unknown);
        assert!(!subject_visible(&frame, &thresholds));
    }

    #[test]
    fn low_confidence_landmarks_do_not_degrade_to_good() {
        let thresholds = PostureThresholds::default();
        let mut frame = KeypointFrame::new(Utc::now(), 640, 480);
        for (lm, p) in [
            (Landmark::Nose, kp(320.0, 100.0)),
            (Landmark::LeftEar, kp(290.0, 120.0)),
            (Landmark::RightEar, kp(350.0, 120.0)),
            (Landmark::LeftShoulder, kp(250.0, 200.0)),
            (Landmark::RightShoulder, kp(390.0, 200.0)),
        ] {
            frame.insert(
                lm,
                Keypoint {
                    confidence: 0.1,
                    ..p
                },
            );
        }
        let metrics = compute_metrics(&frame, &thresholds);
        assert!(!metrics.any_available());
        assert_eq!(classify(&metrics, &thresholds), PostureVerdict::Unknown);
    }

    #[test]
    fn leaning_torso_violates_torso_lean() {
        let thresholds = PostureThresholds::default();
        // Shoulder midpoint displaced sideways from the hip midpoint by
        // tan(20 deg) of the torso length: a 20 degree lean.
        let torso_len = 160.0_f64;
        let offset = torso_len * 20.0_f64.to_radians().tan();
        let frame = KeypointFrame::new(Utc::now(), 640, 480)
            .with_point(Landmark::LeftShoulder, kp(250.0 + offset, 200.0))
            .with_point(Landmark::RightShoulder, kp(390.0 + offset, 200.0))
            .with_point(Landmark::LeftHip, kp(270.0, 360.0))
            .with_point(Landmark::RightHip, kp(370.0, 360.0));
        let metrics = compute_metrics(&frame, &thresholds);
        let lean = metrics.torso_lean_deg.value().unwrap();
        assert!((lean - 20.0).abs() < 0.5, "lean was {lean}");
        match classify(&metrics, &thresholds) {
            PostureVerdict::Bad {
                violations,
                dominant,
            } => {
                assert!(violations.contains(&MetricKind::TorsoLean));
                assert_eq!(dominant, MetricKind::TorsoLean);
            }
            other => panic!("expected Bad, got {other:?}"),
        }
    }

    #[test]
    fn uneven_shoulders_violate_asymmetry() {
        let thresholds = PostureThresholds::default();
        let frame = KeypointFrame::new(Utc::now(), 640, 480)
            .with_point(Landmark::LeftShoulder, kp(250.0, 200.0))
            .with_point(Landmark::RightShoulder, kp(390.0, 220.0));
        let metrics = compute_metrics(&frame, &thresholds);
        assert_eq!(metrics.shoulder_asymmetry_px, Some(20.0));
        assert_eq!(
            metrics.shoulder_asymmetry,
            MetricValue::Available(20.0 / 480.0)
        );
        match classify(&metrics, &thresholds) {
            PostureVerdict::Bad { dominant, .. } => {
                assert_eq!(dominant, MetricKind::ShoulderAsymmetry);
            }
            other => panic!("expected Bad, got {other:?}"),
        }
    }

    #[test]
    fn subject_visible_from_shoulders_alone() {
        let thresholds = PostureThresholds::default();
        let frame = KeypointFrame::new(Utc::now(), 640, 480)
            .with_point(Landmark::LeftShoulder, kp(250.0, 200.0))
            .with_point(Landmark::RightShoulder, kp(390.0, 200.0));
        assert!(subject_visible(&frame, &thresholds));
    }

    proptest! {
        /// Identical frames always produce identical metrics and verdict.
        #[test]
        fn classifier_is_deterministic(
            nose_x in 0.0..640.0f64,
            nose_y in 0.0..480.0f64,
            shoulder_y in 0.0..480.0f64,
            hip_y in 0.0..480.0f64,
        ) {
            let thresholds = PostureThresholds::default();
            let frame = KeypointFrame::new(Utc::now(), 640, 480)
                .with_point(Landmark::Nose, kp(nose_x, nose_y))
                .with_point(Landmark::LeftEar, kp(nose_x - 30.0, nose_y + 20.0))
                .with_point(Landmark::RightEar, kp(nose_x + 30.0, nose_y + 20.0))
                .with_point(Landmark::LeftShoulder, kp(250.0, shoulder_y))
                .with_point(Landmark::RightShoulder, kp(390.0, shoulder_y))
                .with_point(Landmark::LeftHip, kp(270.0, hip_y))
                .with_point(Landmark::RightHip, kp(370.0, hip_y));

            let a = compute_metrics(&frame, &thresholds);
            let b = compute_metrics(&frame, &thresholds);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(classify(&a, &thresholds), classify(&b, &thresholds));
        }

        /// Angles are always normalized to [0, 180].
        #[test]
        fn angles_stay_in_range(
            sx in -500.0..500.0f64,
            sy in -500.0..500.0f64,
        ) {
            let angle = angle_from_vertical(sx, sy);
            prop_assert!((0.0..=180.0).contains(&angle));
        }
    }
}
