//! Inertial dead reckoning with absolute pose corrections.
//!
//! Accelerometer and gyroscope streams are bias-corrected and integrated into
//! position, velocity and an accumulated Euler orientation. Poses from an
//! external visual localization engine periodically hard-reset the position.

pub mod calibration;
pub mod estimator;
pub mod fusion;
pub mod integrator;
pub mod localization;
pub mod observer;
pub mod sensor;
pub mod sim;
pub mod types;

pub use calibration::{BiasCalibrator, CalibrationReport};
pub use estimator::{Estimator, EstimatorError, EstimatorSettings, EstimatorStats};
pub use fusion::FusionCorrector;
pub use integrator::{Integrator, StepOutcome};
pub use localization::{AbsolutePose, LocalizationFeed, LocalizationFrame, TrackingState};
pub use observer::ObserverId;
pub use sensor::{SensorError, SensorEvent, SensorHub, SensorSource, Subscription};
pub use types::*;
