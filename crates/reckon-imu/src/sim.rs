//! Synthetic sensor and localization sources for development without hardware.

use crate::localization::{LocalizationFrame, RAW_POSE_LEN};
use crate::sensor::SensorHub;
use crate::types::{Axis, SensorKind, SensorSample, Vector3, NOMINAL_GRAVITY};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Motion and error model of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedImu {
    pub rate_hz: f64,
    pub gravity: f64,
    pub gravity_axis: Axis,
    /// True linear acceleration of the device, applied after `motion_start_s`.
    pub acceleration: Vector3,
    /// True angular rate of the device, applied after `motion_start_s`.
    pub angular_rate: Vector3,
    pub motion_start_s: f64,
    pub accel_bias: Vector3,
    pub gyro_bias: Vector3,
}

impl Default for SimulatedImu {
    fn default() -> Self {
        Self {
            rate_hz: 100.0,
            gravity: NOMINAL_GRAVITY,
            gravity_axis: Axis::Z,
            acceleration: Vector3::ZERO,
            angular_rate: Vector3::ZERO,
            motion_start_s: 0.0,
            accel_bias: Vector3::ZERO,
            gyro_bias: Vector3::ZERO,
        }
    }
}

impl SimulatedImu {
    fn moving(&self, t: f64) -> bool {
        t >= self.motion_start_s
    }

    /// Accelerometer and gyroscope readings at sensor time `t`.
    pub fn sample_at(&self, t: f64) -> (SensorSample, SensorSample) {
        let mut accel = self.accel_bias + self.gravity * self.gravity_axis.unit();
        let mut gyro = self.gyro_bias;
        if self.moving(t) {
            accel += self.acceleration;
            gyro += self.angular_rate;
        }
        (
            SensorSample {
                value: accel,
                timestamp_s: t,
            },
            SensorSample {
                value: gyro,
                timestamp_s: t,
            },
        )
    }

    /// True position at `t`, starting from rest at the origin.
    pub fn true_position(&self, t: f64) -> Vector3 {
        let moving_for = (t - self.motion_start_s).max(0.0);
        0.5 * self.acceleration * moving_for * moving_for
    }

    /// Publish both streams into `hub` at `rate_hz` until aborted.
    pub fn spawn(self, hub: SensorHub) -> JoinHandle<()> {
        let period = Duration::from_secs_f64(1.0 / self.rate_hz);
        tracing::info!(rate_hz = self.rate_hz, "Simulated IMU running");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                let t = tick as f64 / self.rate_hz;
                let (accel, gyro) = self.sample_at(t);
                hub.publish_sample(SensorKind::Accelerometer, accel);
                hub.publish_sample(SensorKind::Gyroscope, gyro);
                tick += 1;
            }
        })
    }
}

/// Periodic localization output following a [`SimulatedImu`] trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedLocalization {
    pub period: Duration,
    /// Frames reported as `NOT_INITIALIZED` before tracking starts.
    pub warmup_frames: u64,
    /// Every `dropout_every`-th frame reports `LOST` with no pose. Zero disables.
    pub dropout_every: u64,
}

impl Default for SimulatedLocalization {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            warmup_frames: 2,
            dropout_every: 0,
        }
    }
}

impl SimulatedLocalization {
    /// Engine output for frame `index` at time `t`.
    pub fn frame_at(&self, imu: &SimulatedImu, index: u64, t: f64) -> LocalizationFrame {
        if index < self.warmup_frames {
            return LocalizationFrame {
                pose: None,
                timestamp_s: t,
                tracking_code: 1,
            };
        }
        if self.dropout_every > 0 && index % self.dropout_every == 0 {
            return LocalizationFrame {
                pose: None,
                timestamp_s: t,
                tracking_code: 3,
            };
        }
        let p = imu.true_position(t);
        let mut pose = Vec::with_capacity(RAW_POSE_LEN);
        pose.extend([p.x as f32, p.y as f32, p.z as f32, 0.0, 0.0, 0.0, 1.0]);
        LocalizationFrame {
            pose: Some(pose),
            timestamp_s: t,
            tracking_code: 2,
        }
    }

    /// Send frames into `tx` until the receiver goes away.
    pub fn spawn(self, imu: SimulatedImu, tx: mpsc::Sender<LocalizationFrame>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(self.period);
            let mut index: u64 = 0;
            loop {
                ticker.tick().await;
                let t = start.elapsed().as_secs_f64();
                if tx.send(self.frame_at(&imu, index, t)).await.is_err() {
                    tracing::debug!("Localization consumer gone, stopping simulation");
                    break;
                }
                index += 1;
            }
        })
    }
}
