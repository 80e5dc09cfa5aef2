use crate::sensor::{SensorError, SensorEvent, SensorSource, Subscription};
use crate::types::{Axis, Bias, SensorKind, Vector3};
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of one calibration cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub bias: Bias,
    pub accel_samples: usize,
    pub gyro_samples: usize,
    /// Streams that delivered nothing during the window. Their bias was kept.
    pub degraded: Vec<SensorKind>,
}

impl CalibrationReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Estimates the stationary offset of both sensors.
#[derive(Debug, Clone, Copy)]
pub struct BiasCalibrator {
    gravity: f64,
    gravity_axis: Axis,
}

impl BiasCalibrator {
    pub fn new(gravity: f64, gravity_axis: Axis) -> Self {
        Self {
            gravity,
            gravity_axis,
        }
    }

    /// Subscribe to both streams and start buffering samples.
    ///
    /// The returned window owns the temporary subscriptions; they are released
    /// by [`CalibrationWindow::close`] or when the window is dropped.
    pub fn open(
        &self,
        source: &dyn SensorSource,
        rate_hz: f64,
    ) -> Result<CalibrationWindow, SensorError> {
        let accel = Arc::new(Mutex::new(Vec::new()));
        let gyro = Arc::new(Mutex::new(Vec::new()));

        let mut subscriptions = Vec::with_capacity(2);
        for (kind, buffer) in [
            (SensorKind::Accelerometer, &accel),
            (SensorKind::Gyroscope, &gyro),
        ] {
            let buffer = buffer.clone();
            subscriptions.push(source.subscribe(
                kind,
                rate_hz,
                Arc::new(move |event: SensorEvent| match event {
                    SensorEvent::Sample(sample) if sample.is_well_formed() => {
                        buffer.lock().push(sample.value);
                    }
                    SensorEvent::Sample(sample) => {
                        tracing::warn!(%kind, ?sample, "Ignoring malformed calibration sample");
                    }
                    SensorEvent::Fault(reason) => {
                        tracing::warn!(%kind, %reason, "Sensor fault during calibration");
                    }
                }),
            )?);
        }

        Ok(CalibrationWindow {
            calibrator: *self,
            accel,
            gyro,
            subscriptions,
        })
    }

    /// Per-axis mean of each buffer. The gravity axis of the accelerometer is
    /// offset by the nominal gravity magnitude. An empty buffer keeps the
    /// previous bias for that sensor.
    pub fn compute(
        &self,
        accel: &[Vector3],
        gyro: &[Vector3],
        previous: Bias,
    ) -> CalibrationReport {
        let mut degraded = Vec::new();

        let accel_bias = match mean(accel) {
            Some(mut m) => {
                m[self.gravity_axis.index()] -= self.gravity;
                m
            }
            None => {
                degraded.push(SensorKind::Accelerometer);
                previous.accel
            }
        };
        let gyro_bias = mean(gyro).unwrap_or_else(|| {
            degraded.push(SensorKind::Gyroscope);
            previous.gyro
        });

        CalibrationReport {
            bias: Bias {
                accel: accel_bias,
                gyro: gyro_bias,
            },
            accel_samples: accel.len(),
            gyro_samples: gyro.len(),
            degraded,
        }
    }
}

fn mean(samples: &[Vector3]) -> Option<Vector3> {
    if samples.is_empty() {
        return None;
    }
    let sum: Vector3 = samples.iter().copied().sum();
    Some(sum / samples.len() as f64)
}

/// Open calibration window holding the sample buffers and temporary subscriptions.
pub struct CalibrationWindow {
    calibrator: BiasCalibrator,
    accel: Arc<Mutex<Vec<Vector3>>>,
    gyro: Arc<Mutex<Vec<Vector3>>>,
    subscriptions: Vec<Subscription>,
}

impl CalibrationWindow {
    /// Samples buffered so far as `(accelerometer, gyroscope)`.
    pub fn sample_counts(&self) -> (usize, usize) {
        (self.accel.lock().len(), self.gyro.lock().len())
    }

    /// Release both subscriptions without computing anything.
    pub fn release(&mut self) {
        for sub in &mut self.subscriptions {
            sub.unsubscribe();
        }
    }

    /// Release both subscriptions and compute the bias from what was collected.
    pub fn close(mut self, previous: Bias) -> CalibrationReport {
        self.release();
        let accel = std::mem::take(&mut *self.accel.lock());
        let gyro = std::mem::take(&mut *self.gyro.lock());
        self.calibrator.compute(&accel, &gyro, previous)
    }
}
