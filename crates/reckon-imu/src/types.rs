use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Three-axis quantity: acceleration (m/s^2), angular rate (rad/s),
/// velocity (m/s), position (m) or accumulated Euler angles (rad).
pub type Vector3 = DVec3;

/// Orientation quaternion as delivered by the localization engine.
pub type Quaternion = DQuat;

/// Nominal gravity magnitude (m/s^2).
pub const NOMINAL_GRAVITY: f64 = 9.81;

/// Default sensor delivery rate.
pub const DEFAULT_RATE_HZ: f64 = 100.0;

/// Sensor axis, used to name the axis aligned with gravity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    #[default]
    Z,
}

impl Axis {
    /// Component index (x = 0).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Unit vector along this axis.
    pub fn unit(self) -> Vector3 {
        match self {
            Axis::X => Vector3::X,
            Axis::Y => Vector3::Y,
            Axis::Z => Vector3::Z,
        }
    }
}

/// The two inertial streams consumed by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Accelerometer => f.write_str("accelerometer"),
            SensorKind::Gyroscope => f.write_str("gyroscope"),
        }
    }
}

/// Raw timestamped reading from one sensor stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Three-axis reading in the caller's unit convention.
    pub value: Vector3,
    /// Sensor clock time in seconds. Both streams share the same time base.
    pub timestamp_s: f64,
}

impl SensorSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_s: f64) -> Self {
        Self {
            value: Vector3::new(x, y, z),
            timestamp_s,
        }
    }

    /// A sample is usable when every component and the timestamp are finite.
    pub fn is_well_formed(&self) -> bool {
        self.value.is_finite() && self.timestamp_s.is_finite()
    }
}

/// Stationary offsets of both sensors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bias {
    pub accel: Vector3,
    pub gyro: Vector3,
}

impl Bias {
    pub const ZERO: Self = Self {
        accel: Vector3::ZERO,
        gyro: Vector3::ZERO,
    };
}

/// Mutable fusion state owned by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimatorState {
    pub position: Vector3,
    pub velocity: Vector3,
    /// Accumulated Euler integral of angular rate. Not a rotation group element.
    pub orientation: Vector3,
    /// Most recent raw accelerometer reading (diagnostic).
    pub acceleration: Vector3,
    /// Most recent raw gyroscope reading (diagnostic).
    pub angular_velocity: Vector3,
    pub is_calibrated: bool,
}

impl EstimatorState {
    /// Zero position, velocity and orientation. Diagnostics and calibration stay.
    pub fn zero_kinematics(&mut self) {
        self.position = Vector3::ZERO;
        self.velocity = Vector3::ZERO;
        self.orientation = Vector3::ZERO;
    }
}

/// Immutable copy of the estimator state handed to observers.
pub type StateSnapshot = EstimatorState;
