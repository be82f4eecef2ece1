//! Keypoint frames supplied by the upstream pose estimator.
//!
//! One [`KeypointFrame`] arrives per acquisition tick. The frame is immutable
//! once produced; the classifier borrows it for a single evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Named anatomical landmark, mirroring the upstream model's index set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Landmark {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
}

impl Landmark {
    /// Index of this landmark in the upstream pose model's output array.
    pub fn model_index(self) -> usize {
        match self {
            Landmark::Nose => 0,
            Landmark::LeftEye => 2,
            Landmark::RightEye => 5,
            Landmark::LeftEar => 7,
            Landmark::RightEar => 8,
            Landmark::MouthLeft => 9,
            Landmark::MouthRight => 10,
            Landmark::LeftShoulder => 11,
            Landmark::RightShoulder => 12,
            Landmark::LeftElbow => 13,
            Landmark::RightElbow => 14,
            Landmark::LeftWrist => 15,
            Landmark::RightWrist => 16,
            Landmark::LeftHip => 23,
            Landmark::RightHip => 24,
        }
    }

    /// Reverse of [`Landmark::model_index`]. Unmapped indices (inner eye
    /// points, fingers, legs) return `None`.
    pub fn from_model_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => Landmark::Nose,
            2 => Landmark::LeftEye,
            5 => Landmark::RightEye,
            7 => Landmark::LeftEar,
            8 => Landmark::RightEar,
            9 => Landmark::MouthLeft,
            10 => Landmark::MouthRight,
            11 => Landmark::LeftShoulder,
            12 => Landmark::RightShoulder,
            13 => Landmark::LeftElbow,
            14 => Landmark::RightElbow,
            15 => Landmark::LeftWrist,
            16 => Landmark::RightWrist,
            23 => Landmark::LeftHip,
            24 => Landmark::RightHip,
            _ => return None,
        })
    }
}

/// One estimated landmark position with its confidence score.
///
/// Coordinates are in image pixels, origin top-left, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// Estimator confidence in 0.0..=1.0.
    pub confidence: f64,
}

/// A single pose estimate: landmark positions, capture timestamp and the
/// frame dimensions the pixel coordinates refer to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypointFrame {
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    points: HashMap<Landmark, Keypoint>,
}

impl KeypointFrame {
    pub fn new(captured_at: DateTime<Utc>, width: u32, height: u32) -> Self {
        Self {
            captured_at,
            width,
            height,
            points: HashMap::new(),
        }
    }

    /// Builder-style insertion, mainly for constructing frames in tests
    /// and adapters.
    pub fn with_point(mut self, landmark: Landmark, point: Keypoint) -> Self {
        self.points.insert(landmark, point);
        self
    }

    pub fn insert(&mut self, landmark: Landmark, point: Keypoint) {
        self.points.insert(landmark, point);
    }

    pub fn get(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.points.get(&landmark)
    }

    /// The landmark position, but only if its confidence clears
    /// `min_confidence`. Low-confidence landmarks are treated as absent so
    /// noisy estimates never feed a metric.
    pub fn usable(&self, landmark: Landmark, min_confidence: f64) -> Option<Keypoint> {
        self.points
            .get(&landmark)
            .filter(|p| p.confidence >= min_confidence)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
