use anyhow::{bail, Result};
use reckon_imu::{Axis, Vector3, DEFAULT_RATE_HZ, NOMINAL_GRAVITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Estimator configuration.
    pub estimator: EstimatorConfig,
    /// Simulated device used when no sensor hardware is attached.
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let e = &self.estimator;
        if !(e.sample_rate_hz.is_finite() && e.sample_rate_hz > 0.0) {
            bail!("estimator.sample_rate_hz must be positive, got {}", e.sample_rate_hz);
        }
        if e.calibration_ms == 0 {
            bail!("estimator.calibration_ms must be greater than zero");
        }
        if !(e.gravity.is_finite() && e.gravity > 0.0) {
            bail!("estimator.gravity must be positive, got {}", e.gravity);
        }
        if self.simulation.pose_period_ms == 0 {
            bail!("simulation.pose_period_ms must be greater than zero");
        }
        if let Some(secs) = self.simulation.run_seconds {
            if !(secs.is_finite() && secs >= 0.0) {
                bail!("simulation.run_seconds must be a non-negative number, got {secs}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Nominal sensor delivery rate.
    pub sample_rate_hz: f64,
    /// Length of the stationary calibration window.
    pub calibration_ms: u64,
    /// Gravity magnitude removed from the vertical axis (m/s^2).
    pub gravity: f64,
    /// Sensor axis assumed aligned with gravity.
    pub gravity_axis: Axis,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_RATE_HZ,
            calibration_ms: 2000,
            gravity: NOMINAL_GRAVITY,
            gravity_axis: Axis::Z,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Accelerometer offset of the simulated device (m/s^2).
    #[serde(with = "vec3_serde")]
    pub accel_bias: Vector3,
    /// Gyroscope offset of the simulated device (rad/s).
    #[serde(with = "vec3_serde")]
    pub gyro_bias: Vector3,
    /// Constant linear acceleration once motion starts (m/s^2).
    #[serde(with = "vec3_serde")]
    pub acceleration: Vector3,
    /// Seconds of sensor time before the device starts moving.
    pub motion_start_s: f64,
    /// Interval between localization fixes.
    pub pose_period_ms: u64,
    /// Every n-th localization frame reports tracking lost. 0 disables.
    pub dropout_every: u64,
    /// Stop after this many seconds. `None` runs until Ctrl-C.
    pub run_seconds: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            accel_bias: Vector3::new(0.04, -0.02, 0.03),
            gyro_bias: Vector3::new(0.002, -0.001, 0.003),
            acceleration: Vector3::new(0.2, 0.0, 0.0),
            motion_start_s: 5.0,
            pose_period_ms: 1000,
            dropout_every: 7,
            run_seconds: None,
        }
    }
}

// Vectors are written as plain `[x, y, z]` arrays in TOML.
mod vec3_serde {
    use reckon_imu::Vector3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Vector3, s: S) -> Result<S::Ok, S::Error> {
        [v.x, v.y, v.z].serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vector3, D::Error> {
        let [x, y, z] = <[f64; 3]>::deserialize(d)?;
        Ok(Vector3::new(x, y, z))
    }
}
