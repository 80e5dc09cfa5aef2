use crate::types::{Axis, Bias, EstimatorState, SensorSample, StateSnapshot, Vector3};

/// Result of feeding one sample to the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// State advanced; observers should see a new snapshot.
    Integrated,
    /// First sample of the stream since (re)start: only the baseline was recorded.
    Seeded,
    /// Gyroscope sample arrived before the accelerometer baseline existed.
    AwaitingBaseline,
    /// Timestamp went backwards; the sample was dropped.
    NonMonotonic,
    /// Sample had non-finite components.
    Malformed,
}

/// Running counters, useful for diagnosing a degraded estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegratorStats {
    pub accel_steps: u64,
    pub gyro_steps: u64,
    pub non_monotonic: u64,
    pub malformed: u64,
    pub corrections: u64,
}

/// Dead-reckoning integrator.
///
/// Converts bias-corrected inertial samples into position, velocity and an
/// accumulated Euler orientation. Acceleration is integrated with a zero-order
/// hold: the reading taken at the start of an interval is applied over it.
/// Gravity is removed from a fixed sensor axis with no tilt compensation.
///
/// Not synchronized; the estimator wraps it in a single lock.
#[derive(Debug, Clone)]
pub struct Integrator {
    state: EstimatorState,
    bias: Bias,
    gravity: f64,
    gravity_axis: Axis,
    last_accel_timestamp: Option<f64>,
    last_gyro_timestamp: Option<f64>,
    /// Gravity-cancelled acceleration of the previous accelerometer sample.
    held_acceleration: Vector3,
    stats: IntegratorStats,
}

impl Integrator {
    pub fn new(gravity: f64, gravity_axis: Axis) -> Self {
        Self {
            state: EstimatorState::default(),
            bias: Bias::ZERO,
            gravity,
            gravity_axis,
            last_accel_timestamp: None,
            last_gyro_timestamp: None,
            held_acceleration: Vector3::ZERO,
            stats: IntegratorStats::default(),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    pub fn stats(&self) -> IntegratorStats {
        self.stats
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    pub fn gravity_axis(&self) -> Axis {
        self.gravity_axis
    }

    /// Timestamp of the last accepted accelerometer sample.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_accel_timestamp
    }

    /// Install a new bias and switch to bias-corrected mode.
    ///
    /// The next sample on each stream re-seeds its baseline.
    pub fn set_calibration(&mut self, bias: Bias) {
        self.bias = bias;
        self.state.is_calibrated = true;
        self.clear_baselines();
    }

    fn clear_baselines(&mut self) {
        self.last_accel_timestamp = None;
        self.last_gyro_timestamp = None;
        self.held_acceleration = Vector3::ZERO;
    }

    /// Zero position, velocity and orientation and forget both baselines.
    /// Bias and the calibration flag are kept.
    pub fn reset(&mut self) {
        self.state.zero_kinematics();
        self.clear_baselines();
    }

    /// Accelerometer path.
    pub fn on_accel(&mut self, sample: SensorSample) -> StepOutcome {
        if !sample.is_well_formed() {
            self.stats.malformed += 1;
            tracing::warn!(?sample, "Dropping malformed accelerometer sample");
            return StepOutcome::Malformed;
        }

        self.state.acceleration = sample.value;
        let mut linear = if self.state.is_calibrated {
            sample.value - self.bias.accel
        } else {
            sample.value
        };
        linear[self.gravity_axis.index()] -= self.gravity;

        let Some(last) = self.last_accel_timestamp else {
            self.last_accel_timestamp = Some(sample.timestamp_s);
            self.held_acceleration = linear;
            return StepOutcome::Seeded;
        };

        let dt = sample.timestamp_s - last;
        if dt < 0.0 {
            self.stats.non_monotonic += 1;
            tracing::debug!(dt, "Accelerometer timestamp went backwards, skipping step");
            return StepOutcome::NonMonotonic;
        }

        self.state.velocity += self.held_acceleration * dt;
        self.state.position += self.state.velocity * dt;
        self.held_acceleration = linear;
        self.last_accel_timestamp = Some(sample.timestamp_s);
        self.stats.accel_steps += 1;
        StepOutcome::Integrated
    }

    /// Gyroscope path. Linear small-angle accumulation, no renormalization.
    pub fn on_gyro(&mut self, sample: SensorSample) -> StepOutcome {
        if !sample.is_well_formed() {
            self.stats.malformed += 1;
            tracing::warn!(?sample, "Dropping malformed gyroscope sample");
            return StepOutcome::Malformed;
        }

        self.state.angular_velocity = sample.value;
        if self.last_accel_timestamp.is_none() {
            return StepOutcome::AwaitingBaseline;
        }

        let rate = if self.state.is_calibrated {
            sample.value - self.bias.gyro
        } else {
            sample.value
        };

        let Some(last) = self.last_gyro_timestamp else {
            self.last_gyro_timestamp = Some(sample.timestamp_s);
            return StepOutcome::Seeded;
        };

        let dt = sample.timestamp_s - last;
        if dt < 0.0 {
            self.stats.non_monotonic += 1;
            tracing::debug!(dt, "Gyroscope timestamp went backwards, skipping step");
            return StepOutcome::NonMonotonic;
        }

        self.state.orientation += rate * dt;
        self.last_gyro_timestamp = Some(sample.timestamp_s);
        self.stats.gyro_steps += 1;
        StepOutcome::Integrated
    }

    /// Hard reset of position to an external fix. Velocity is zeroed;
    /// orientation, baselines and calibration are left alone.
    pub fn apply_correction(&mut self, position: Vector3) {
        self.state.position = position;
        self.state.velocity = Vector3::ZERO;
        self.stats.corrections += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NOMINAL_GRAVITY;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn integrator() -> Integrator {
        Integrator::new(NOMINAL_GRAVITY, Axis::Z)
    }

    fn accel(x: f64, y: f64, z: f64, t: f64) -> SensorSample {
        SensorSample::new(x, y, z, t)
    }

    #[test]
    fn first_sample_only_seeds() {
        let mut integ = integrator();
        assert_eq!(integ.on_accel(accel(5.0, 0.0, 9.81, 0.0)), StepOutcome::Seeded);
        let s = integ.snapshot();
        assert_eq!(s.velocity, Vector3::ZERO);
        assert_eq!(s.position, Vector3::ZERO);
        assert_eq!(integ.last_timestamp(), Some(0.0));
    }

    #[test]
    fn gravity_is_cancelled_on_vertical_axis() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        integ.on_accel(accel(0.0, 0.0, 9.81, 1.0));
        integ.on_accel(accel(0.0, 0.0, 9.81, 2.0));
        let s = integ.snapshot();
        assert_abs_diff_eq!(s.velocity.length(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.position.length(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn step_acceleration_scenario() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        integ.on_accel(accel(1.0, 0.0, 9.81, 1.0));
        integ.on_accel(accel(1.0, 0.0, 9.81, 2.0));
        let s = integ.snapshot();
        assert_abs_diff_eq!(s.velocity.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.velocity.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.velocity.z, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.position.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.position.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_acceleration_matches_kinematics() {
        let mut integ = integrator();
        let a = Vector3::new(0.5, -0.25, 0.1);
        let dt = 0.01;
        let n = 1000;
        for i in 0..=n {
            integ.on_accel(accel(a.x, a.y, a.z + NOMINAL_GRAVITY, i as f64 * dt));
        }
        let s = integ.snapshot();
        let elapsed = n as f64 * dt;
        // Semi-implicit Euler: a * dt^2 * n(n+1)/2.
        let stepped = a * dt * dt * (n * (n + 1)) as f64 / 2.0;
        let closed_form = a * elapsed * elapsed / 2.0;
        for i in 0..3 {
            assert_relative_eq!(s.velocity[i], a[i] * elapsed, max_relative = 1e-9);
            assert_relative_eq!(s.position[i], stepped[i], max_relative = 1e-9);
            assert_relative_eq!(s.position[i], closed_form[i], max_relative = 2e-3);
        }
    }

    #[test]
    fn zero_corrected_acceleration_keeps_state() {
        let mut integ = integrator();
        for i in 0..50 {
            integ.on_accel(accel(0.0, 0.0, NOMINAL_GRAVITY, 0.02 * i as f64));
        }
        assert_eq!(integ.snapshot().velocity, Vector3::ZERO);
        assert_eq!(integ.snapshot().position, Vector3::ZERO);
        assert_eq!(integ.stats().accel_steps, 49);
    }

    #[test]
    fn backwards_timestamp_is_dropped_without_rewind() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 1.0));
        assert_eq!(
            integ.on_accel(accel(3.0, 0.0, 9.81, 0.5)),
            StepOutcome::NonMonotonic
        );
        assert_eq!(integ.last_timestamp(), Some(1.0));
        assert_eq!(integ.snapshot().velocity, Vector3::ZERO);
        assert_eq!(integ.stats().non_monotonic, 1);

        assert_eq!(
            integ.on_accel(accel(0.0, 0.0, 9.81, 1.5)),
            StepOutcome::Integrated
        );
    }

    #[test]
    fn malformed_sample_is_skipped() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        assert_eq!(
            integ.on_accel(accel(f64::NAN, 0.0, 9.81, 1.0)),
            StepOutcome::Malformed
        );
        assert_eq!(integ.last_timestamp(), Some(0.0));
        assert_eq!(integ.stats().malformed, 1);
    }

    #[test]
    fn bias_is_subtracted_only_when_calibrated() {
        let mut integ = integrator();
        integ.on_accel(accel(0.2, 0.0, 9.81, 0.0));
        integ.on_accel(accel(0.2, 0.0, 9.81, 1.0));
        assert_abs_diff_eq!(integ.snapshot().velocity.x, 0.2, epsilon = 1e-12);

        integ.reset();
        integ.set_calibration(Bias {
            accel: Vector3::new(0.2, 0.0, 0.0),
            gyro: Vector3::ZERO,
        });
        integ.on_accel(accel(0.2, 0.0, 9.81, 2.0));
        integ.on_accel(accel(0.2, 0.0, 9.81, 3.0));
        assert_abs_diff_eq!(integ.snapshot().velocity.x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gyro_waits_for_accelerometer_baseline() {
        let mut integ = integrator();
        assert_eq!(
            integ.on_gyro(accel(1.0, 0.0, 0.0, 0.0)),
            StepOutcome::AwaitingBaseline
        );
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        assert_eq!(integ.on_gyro(accel(1.0, 0.0, 0.0, 0.1)), StepOutcome::Seeded);
        assert_eq!(
            integ.on_gyro(accel(1.0, 0.0, 0.0, 0.6)),
            StepOutcome::Integrated
        );
        let s = integ.snapshot();
        assert_abs_diff_eq!(s.orientation.x, 0.5, epsilon = 1e-12);
        assert_eq!(s.angular_velocity, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn gyro_bias_is_removed() {
        let mut integ = integrator();
        integ.set_calibration(Bias {
            accel: Vector3::ZERO,
            gyro: Vector3::new(0.0, 0.0, 0.1),
        });
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        integ.on_gyro(accel(0.0, 0.0, 0.1, 0.0));
        integ.on_gyro(accel(0.0, 0.0, 0.1, 1.0));
        assert_abs_diff_eq!(integ.snapshot().orientation.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn backwards_gyro_timestamp_is_dropped_without_rewind() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        integ.on_gyro(accel(0.0, 0.0, 1.0, 1.0));
        integ.on_gyro(accel(0.0, 0.0, 1.0, 2.0));
        assert_eq!(
            integ.on_gyro(accel(0.0, 0.0, 1.0, 1.5)),
            StepOutcome::NonMonotonic
        );
        assert_abs_diff_eq!(integ.snapshot().orientation.z, 1.0, epsilon = 1e-12);
        assert_eq!(integ.stats().non_monotonic, 1);

        // Baseline stays at 2.0, so the next step spans one second.
        integ.on_gyro(accel(0.0, 0.0, 1.0, 3.0));
        assert_abs_diff_eq!(integ.snapshot().orientation.z, 2.0, epsilon = 1e-12);
        assert_eq!(integ.stats().gyro_steps, 2);
    }

    #[test]
    fn calibration_reseeds_both_streams() {
        let mut integ = integrator();
        integ.on_accel(accel(1.0, 0.0, 9.81, 0.0));
        integ.on_gyro(accel(0.0, 0.0, 0.2, 0.0));
        integ.on_accel(accel(1.0, 0.0, 9.81, 1.0));
        let before = integ.snapshot();

        integ.set_calibration(Bias::ZERO);
        assert_eq!(integ.on_accel(accel(1.0, 0.0, 9.81, 2.0)), StepOutcome::Seeded);
        assert_eq!(integ.on_gyro(accel(0.0, 0.0, 0.2, 2.0)), StepOutcome::Seeded);
        let after = integ.snapshot();
        assert_eq!(after.velocity, before.velocity);
        assert_eq!(after.position, before.position);
        assert_eq!(after.orientation, before.orientation);
    }

    #[test]
    fn correction_zeroes_velocity_and_keeps_orientation() {
        let mut integ = integrator();
        integ.on_accel(accel(0.0, 0.0, 9.81, 0.0));
        integ.on_gyro(accel(0.0, 0.3, 0.0, 0.0));
        integ.on_gyro(accel(0.0, 0.3, 0.0, 1.0));
        integ.on_accel(accel(2.0, 0.0, 9.81, 1.0));
        integ.on_accel(accel(2.0, 0.0, 9.81, 2.0));
        let before = integ.snapshot();
        assert!(before.velocity.x > 0.0);

        integ.apply_correction(Vector3::new(5.0, 2.0, 0.0));
        let after = integ.snapshot();
        assert_eq!(after.position, Vector3::new(5.0, 2.0, 0.0));
        assert_eq!(after.velocity, Vector3::ZERO);
        assert_eq!(after.orientation, before.orientation);
        assert_eq!(integ.last_timestamp(), Some(2.0));
    }

    #[test]
    fn reset_keeps_bias_and_calibration() {
        let mut integ = integrator();
        let bias = Bias {
            accel: Vector3::new(0.1, 0.1, 0.1),
            gyro: Vector3::new(0.01, 0.0, 0.0),
        };
        integ.set_calibration(bias);
        integ.on_accel(accel(1.0, 0.0, 9.81, 0.0));
        integ.on_accel(accel(1.0, 0.0, 9.81, 1.0));
        integ.reset();

        let s = integ.snapshot();
        assert_eq!(s.position, Vector3::ZERO);
        assert_eq!(s.velocity, Vector3::ZERO);
        assert_eq!(s.orientation, Vector3::ZERO);
        assert!(s.is_calibrated);
        assert_eq!(integ.bias(), bias);
        assert_eq!(integ.last_timestamp(), None);
    }

    #[test]
    fn gravity_axis_is_configurable() {
        let mut integ = Integrator::new(NOMINAL_GRAVITY, Axis::Y);
        integ.on_accel(accel(0.0, 9.81, 0.0, 0.0));
        integ.on_accel(accel(0.0, 9.81, 0.0, 1.0));
        assert_abs_diff_eq!(integ.snapshot().velocity.length(), 0.0, epsilon = 1e-12);
    }
}
