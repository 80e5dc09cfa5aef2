//! Absolute poses from the visual localization engine.
//!
//! The engine reports a pose as seven floats `[x, y, z, qx, qy, qz, qw]`
//! together with its frame timestamp and a tracking-state code. Poses are
//! only trusted while the engine reports [`TrackingState::Ok`].

use crate::estimator::Estimator;
use crate::types::{Quaternion, Vector3};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Length of a raw pose: position followed by an `xyzw` quaternion.
pub const RAW_POSE_LEN: usize = 7;

/// Qualitative status of the localization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    NoImagesYet,
    NotInitialized,
    Ok,
    Lost,
    Unknown(i32),
}

impl TrackingState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => TrackingState::NoImagesYet,
            1 => TrackingState::NotInitialized,
            2 => TrackingState::Ok,
            3 => TrackingState::Lost,
            other => TrackingState::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TrackingState::NoImagesYet => "NO_IMAGES_YET",
            TrackingState::NotInitialized => "NOT_INITIALIZED",
            TrackingState::Ok => "OK",
            TrackingState::Lost => "LOST",
            TrackingState::Unknown(_) => "UNKNOWN",
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self, TrackingState::Ok)
    }
}

/// Externally supplied pose. A pose without position is malformed and is
/// ignored by the fusion corrector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsolutePose {
    pub position: Option<Vector3>,
    pub orientation: Option<Quaternion>,
    pub timestamp_s: f64,
}

impl AbsolutePose {
    pub fn new(position: Vector3, orientation: Quaternion, timestamp_s: f64) -> Self {
        Self {
            position: Some(position),
            orientation: Some(orientation),
            timestamp_s,
        }
    }

    /// Decode the engine's `[x, y, z, qx, qy, qz, qw]` output.
    ///
    /// Wrong length or non-finite values leave the pose without position.
    pub fn from_raw(raw: &[f32], timestamp_s: f64) -> Self {
        if raw.len() != RAW_POSE_LEN || raw.iter().any(|v| !v.is_finite()) {
            tracing::warn!(len = raw.len(), "Invalid pose data from localization engine");
            return Self {
                position: None,
                orientation: None,
                timestamp_s,
            };
        }
        let f = |i: usize| raw[i] as f64;
        Self::new(
            Vector3::new(f(0), f(1), f(2)),
            Quaternion::from_xyzw(f(3), f(4), f(5), f(6)),
            timestamp_s,
        )
    }

    /// The position, if present and finite.
    pub fn valid_position(&self) -> Option<Vector3> {
        self.position.filter(|p| p.is_finite())
    }
}

/// One output of the localization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationFrame {
    /// Raw pose, `None` when the engine produced nothing for this frame.
    pub pose: Option<Vec<f32>>,
    pub timestamp_s: f64,
    pub tracking_code: i32,
}

/// Forwards tracked poses from the localization engine into an estimator.
pub struct LocalizationFeed {
    estimator: Arc<Estimator>,
    tracking: TrackingState,
    forwarded: u64,
}

impl LocalizationFeed {
    pub fn new(estimator: Arc<Estimator>) -> Self {
        Self {
            estimator,
            tracking: TrackingState::default(),
            forwarded: 0,
        }
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.tracking
    }

    /// Number of poses handed to the estimator.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Handle one engine output. Returns `true` if a correction was applied.
    pub fn on_frame(&mut self, frame: &LocalizationFrame) -> bool {
        let state = TrackingState::from_code(frame.tracking_code);
        if state != self.tracking {
            tracing::info!(
                from = self.tracking.name(),
                to = state.name(),
                "Localization tracking state changed"
            );
            self.tracking = state;
        }

        if !state.is_tracking() {
            return false;
        }
        let Some(raw) = frame.pose.as_deref() else {
            tracing::debug!(timestamp = frame.timestamp_s, "Tracking frame without pose");
            return false;
        };

        self.forwarded += 1;
        self.estimator
            .fuse_correction(&AbsolutePose::from_raw(raw, frame.timestamp_s))
    }

    /// Consume frames until the channel closes.
    pub fn spawn(
        mut self,
        mut frames: mpsc::Receiver<LocalizationFrame>,
    ) -> tokio::task::JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                self.on_frame(&frame);
            }
            tracing::info!(forwarded = self.forwarded, "Localization feed closed");
            self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_codes_map_to_states() {
        assert_eq!(TrackingState::from_code(0), TrackingState::NoImagesYet);
        assert_eq!(TrackingState::from_code(1), TrackingState::NotInitialized);
        assert_eq!(TrackingState::from_code(2), TrackingState::Ok);
        assert_eq!(TrackingState::from_code(3), TrackingState::Lost);
        assert_eq!(TrackingState::from_code(9), TrackingState::Unknown(9));
        assert_eq!(TrackingState::from_code(9).name(), "UNKNOWN");
        assert!(TrackingState::Ok.is_tracking());
        assert!(!TrackingState::Lost.is_tracking());
    }

    #[test]
    fn decodes_raw_pose() {
        let pose = AbsolutePose::from_raw(&[5.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0], 3.5);
        assert_eq!(pose.valid_position(), Some(Vector3::new(5.0, 2.0, 0.0)));
        assert_eq!(pose.orientation, Some(Quaternion::IDENTITY));
        assert_eq!(pose.timestamp_s, 3.5);
    }

    #[test]
    fn short_or_corrupt_pose_has_no_position() {
        assert_eq!(AbsolutePose::from_raw(&[1.0, 2.0, 3.0], 0.0).position, None);
        assert_eq!(
            AbsolutePose::from_raw(&[f32::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], 0.0).position,
            None
        );
        let pose = AbsolutePose {
            position: Some(Vector3::new(f64::INFINITY, 0.0, 0.0)),
            orientation: None,
            timestamp_s: 0.0,
        };
        assert_eq!(pose.valid_position(), None);
    }
}
