use crate::calibration::{BiasCalibrator, CalibrationReport};
use crate::fusion::{FusionCorrector, FusionStats};
use crate::integrator::{Integrator, IntegratorStats, StepOutcome};
use crate::localization::AbsolutePose;
use crate::observer::{ObserverId, ObserverRegistry};
use crate::sensor::{SensorError, SensorEvent, SensorSource, Subscription};
use crate::types::{Axis, Bias, SensorKind, StateSnapshot, DEFAULT_RATE_HZ, NOMINAL_GRAVITY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Integration steps between debug heartbeats.
const HEARTBEAT_STEPS: u64 = 1000;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("Calibration duration must be greater than zero")]
    InvalidDuration,
    #[error("Invalid sample rate {0} Hz")]
    InvalidRate(f64),
    #[error("Calibration cancelled because the estimator was stopped")]
    CalibrationCancelled,
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// Gravity magnitude removed from the vertical axis (m/s^2).
    pub gravity: f64,
    /// Sensor axis assumed aligned with gravity.
    pub gravity_axis: Axis,
    /// Rate requested for calibration windows opened while stopped.
    pub sample_rate_hz: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            gravity: NOMINAL_GRAVITY,
            gravity_axis: Axis::Z,
            sample_rate_hz: DEFAULT_RATE_HZ,
        }
    }
}

/// Combined diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimatorStats {
    pub integrator: IntegratorStats,
    pub fusion: FusionStats,
    pub stream_faults: u64,
}

/// Everything guarded by the estimator lock.
struct Core {
    integrator: Integrator,
    corrector: FusionCorrector,
    /// Run whose sinks may still feed the integrator. `None` while stopped.
    run: Option<u64>,
    runs: u64,
}

struct Shared {
    core: Mutex<Core>,
    observers: ObserverRegistry,
    snapshot_tx: watch::Sender<StateSnapshot>,
    steps: AtomicU64,
    stream_faults: AtomicU64,
}

impl Shared {
    /// Push the current state to the watch channel. Must be called with the
    /// core lock held so the channel never goes back to an older snapshot.
    fn commit(&self, core: &Core) -> StateSnapshot {
        let snapshot = core.integrator.snapshot();
        self.snapshot_tx.send_replace(snapshot);
        snapshot
    }

    /// Observers run outside the core lock.
    fn notify(&self, snapshot: &StateSnapshot) {
        self.observers.notify(snapshot);
    }

    fn on_event(&self, run: u64, kind: SensorKind, event: SensorEvent) {
        let sample = match event {
            SensorEvent::Sample(sample) => sample,
            SensorEvent::Fault(reason) => {
                if self.core.lock().run != Some(run) {
                    return;
                }
                self.stream_faults.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%kind, %reason, "Sensor stream fault, keeping last state");
                return;
            }
        };

        let (outcome, snapshot) = {
            let mut core = self.core.lock();
            // Delivery that raced with stop() or belongs to an earlier run.
            if core.run != Some(run) {
                drop(core);
                tracing::trace!(%kind, run, "Dropping sample from released stream");
                return;
            }
            let outcome = match kind {
                SensorKind::Accelerometer => core.integrator.on_accel(sample),
                SensorKind::Gyroscope => core.integrator.on_gyro(sample),
            };
            (outcome, self.commit(&core))
        };
        tracing::trace!(%kind, ?outcome, timestamp = sample.timestamp_s, "Sensor sample");

        if outcome == StepOutcome::Integrated {
            let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
            if steps % HEARTBEAT_STEPS == 0 {
                tracing::debug!(
                    steps,
                    x = snapshot.position.x,
                    y = snapshot.position.y,
                    z = snapshot.position.z,
                    "Integration heartbeat"
                );
            }
            self.notify(&snapshot);
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    subscriptions: Vec<Subscription>,
    rate_hz: Option<f64>,
}

/// Dead-reckoning estimator fusing inertial streams with absolute poses.
///
/// All state mutations (both sensor paths, corrections, reset) take one lock
/// and release it before observers run. Observers may therefore call back
/// into the estimator.
pub struct Estimator {
    shared: Arc<Shared>,
    source: Arc<dyn SensorSource>,
    settings: EstimatorSettings,
    lifecycle: Mutex<Lifecycle>,
    /// Bumped by `stop`; calibration windows opened under an older
    /// generation are discarded at expiry.
    generation: AtomicU64,
}

impl Estimator {
    pub fn new(source: Arc<dyn SensorSource>, settings: EstimatorSettings) -> Self {
        let integrator = Integrator::new(settings.gravity, settings.gravity_axis);
        let (snapshot_tx, _) = watch::channel(integrator.snapshot());
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    integrator,
                    corrector: FusionCorrector::new(),
                    run: None,
                    runs: 0,
                }),
                observers: ObserverRegistry::new(),
                snapshot_tx,
                steps: AtomicU64::new(0),
                stream_faults: AtomicU64::new(0),
            }),
            source,
            settings,
            lifecycle: Mutex::new(Lifecycle::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Subscribe both streams at `rate_hz` and start integrating from a zeroed
    /// state. Bias and calibration survive. Starting twice is a no-op.
    pub fn start(&self, rate_hz: f64) -> Result<(), EstimatorError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(EstimatorError::InvalidRate(rate_hz));
        }

        let snapshot = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.subscriptions.is_empty() {
                tracing::info!(rate_hz = ?lifecycle.rate_hz, "Estimator already running");
                return Ok(());
            }

            let (run, snapshot) = {
                let mut core = self.shared.core.lock();
                core.integrator.reset();
                core.runs += 1;
                let run = core.runs;
                core.run = Some(run);
                (run, self.shared.commit(&core))
            };

            let mut subscriptions = Vec::with_capacity(2);
            for kind in [SensorKind::Accelerometer, SensorKind::Gyroscope] {
                let shared = self.shared.clone();
                let sink = Arc::new(move |event: SensorEvent| shared.on_event(run, kind, event));
                match self.source.subscribe(kind, rate_hz, sink) {
                    Ok(sub) => subscriptions.push(sub),
                    Err(e) => {
                        self.shared.core.lock().run = None;
                        return Err(e.into());
                    }
                }
            }
            lifecycle.subscriptions = subscriptions;
            lifecycle.rate_hz = Some(rate_hz);
            snapshot
        };

        tracing::info!(rate_hz, "Estimator started");
        self.shared.notify(&snapshot);
        Ok(())
    }

    /// Release both streams and cancel any open calibration window.
    /// Idempotent. No sample is integrated once this returns, including
    /// deliveries already in flight on other threads.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = {
            let mut lifecycle = self.lifecycle.lock();
            self.shared.core.lock().run = None;
            lifecycle.rate_hz = None;
            std::mem::take(&mut lifecycle.subscriptions)
        };
        if subscriptions.is_empty() {
            tracing::debug!("Estimator already stopped");
            return;
        }
        for sub in &mut subscriptions {
            sub.unsubscribe();
        }
        tracing::info!("Estimator stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.lifecycle.lock().subscriptions.is_empty()
    }

    /// Collect stationary samples for `duration` and install the mean as bias.
    ///
    /// Suspends the caller for the full window; sensor callbacks keep being
    /// serviced meanwhile. A stream that delivers nothing keeps its previous
    /// bias and is listed in [`CalibrationReport::degraded`].
    pub async fn calibrate(
        &self,
        duration: Duration,
    ) -> Result<CalibrationReport, EstimatorError> {
        if duration.is_zero() {
            return Err(EstimatorError::InvalidDuration);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let rate_hz = self
            .lifecycle
            .lock()
            .rate_hz
            .unwrap_or(self.settings.sample_rate_hz);
        let calibrator = BiasCalibrator::new(self.settings.gravity, self.settings.gravity_axis);
        let window = calibrator.open(self.source.as_ref(), rate_hz)?;
        tracing::info!(?duration, rate_hz, "Calibration started");

        tokio::time::sleep(duration).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            drop(window);
            tracing::warn!("Calibration window discarded, estimator was stopped");
            return Err(EstimatorError::CalibrationCancelled);
        }

        let previous = self.shared.core.lock().integrator.bias();
        let report = window.close(previous);
        let snapshot = {
            let mut core = self.shared.core.lock();
            core.integrator.set_calibration(report.bias);
            self.shared.commit(&core)
        };

        for kind in &report.degraded {
            tracing::warn!(%kind, "No samples during calibration, keeping previous bias");
        }
        tracing::info!(
            accel_samples = report.accel_samples,
            gyro_samples = report.gyro_samples,
            accel_bias_x = report.bias.accel.x,
            accel_bias_y = report.bias.accel.y,
            accel_bias_z = report.bias.accel.z,
            gyro_bias_x = report.bias.gyro.x,
            gyro_bias_y = report.bias.gyro.y,
            gyro_bias_z = report.bias.gyro.z,
            "Calibration complete"
        );

        self.shared.notify(&snapshot);
        Ok(report)
    }

    /// Hard-reset position to an absolute fix. Returns `false` if the pose
    /// was malformed and ignored.
    pub fn fuse_correction(&self, pose: &AbsolutePose) -> bool {
        let snapshot = {
            let mut core = self.shared.core.lock();
            let Core {
                integrator,
                corrector,
                ..
            } = &mut *core;
            if !corrector.correct(integrator, pose) {
                return false;
            }
            self.shared.commit(&core)
        };
        self.shared.notify(&snapshot);
        true
    }

    /// Zero position, velocity, orientation and both baselines.
    pub fn reset(&self) {
        let snapshot = {
            let mut core = self.shared.core.lock();
            core.integrator.reset();
            self.shared.commit(&core)
        };
        tracing::info!("Estimator state reset");
        self.shared.notify(&snapshot);
    }

    pub fn state(&self) -> StateSnapshot {
        self.shared.core.lock().integrator.snapshot()
    }

    pub fn bias(&self) -> Bias {
        self.shared.core.lock().integrator.bias()
    }

    pub fn stats(&self) -> EstimatorStats {
        let core = self.shared.core.lock();
        EstimatorStats {
            integrator: core.integrator.stats(),
            fusion: core.corrector.stats(),
            stream_faults: self.shared.stream_faults.load(Ordering::Relaxed),
        }
    }

    /// Receive the latest snapshot without registering a callback.
    pub fn watch(&self) -> watch::Receiver<StateSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn register_observer(
        &self,
        observer: impl Fn(&StateSnapshot) + Send + Sync + 'static,
    ) -> ObserverId {
        self.shared.observers.register(Arc::new(observer))
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.unregister(id)
    }
}

impl Drop for Estimator {
    fn drop(&mut self) {
        self.stop();
    }
}
