use anyhow::Result;
use reckon_config::AppConfig;
use reckon_imu::sim::{SimulatedImu, SimulatedLocalization};
use reckon_imu::{Estimator, EstimatorSettings, LocalizationFeed, SensorHub, StateSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Snapshots between position log lines.
const LOG_EVERY: u64 = 200;

fn estimator_settings(config: &AppConfig) -> EstimatorSettings {
    EstimatorSettings {
        gravity: config.estimator.gravity,
        gravity_axis: config.estimator.gravity_axis,
        sample_rate_hz: config.estimator.sample_rate_hz,
    }
}

fn simulated_device(config: &AppConfig) -> SimulatedImu {
    let sim = &config.simulation;
    SimulatedImu {
        rate_hz: config.estimator.sample_rate_hz,
        gravity: config.estimator.gravity,
        gravity_axis: config.estimator.gravity_axis,
        acceleration: sim.acceleration,
        motion_start_s: sim.motion_start_s,
        accel_bias: sim.accel_bias,
        gyro_bias: sim.gyro_bias,
        ..Default::default()
    }
}

async fn wait_for_shutdown(run_seconds: Option<f64>) {
    match run_seconds {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {
                    info!(secs, "Run time elapsed");
                }
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(?e, "Failed to listen for Ctrl-C");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reckon_app=info,reckon_imu=info".into()),
        )
        .init();

    info!("Inertial dead-reckoning estimator starting");

    // Load config.
    let config = reckon_config::load_config().unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    info!(
        rate_hz = config.estimator.sample_rate_hz,
        calibration_ms = config.estimator.calibration_ms,
        "Config loaded"
    );

    // No sensor driver is wired in; drive the estimator from the simulator.
    let hub = SensorHub::new();
    let device = simulated_device(&config);
    let imu_task = device.spawn(hub.clone());

    let estimator = Arc::new(Estimator::new(
        Arc::new(hub.clone()),
        estimator_settings(&config),
    ));

    let report = estimator
        .calibrate(Duration::from_millis(config.estimator.calibration_ms))
        .await?;
    if report.is_degraded() {
        warn!(degraded = ?report.degraded, "Calibration incomplete, continuing with previous bias");
    }

    let snapshots = Arc::new(AtomicU64::new(0));
    let counter = snapshots.clone();
    estimator.register_observer(move |s: &StateSnapshot| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % LOG_EVERY == 0 {
            info!(
                x = s.position.x,
                y = s.position.y,
                z = s.position.z,
                vx = s.velocity.x,
                vy = s.velocity.y,
                vz = s.velocity.z,
                "Pose estimate"
            );
        }
    });

    estimator.start(config.estimator.sample_rate_hz)?;

    let (pose_tx, pose_rx) = mpsc::channel(16);
    let localization = SimulatedLocalization {
        period: Duration::from_millis(config.simulation.pose_period_ms),
        dropout_every: config.simulation.dropout_every,
        ..Default::default()
    };
    let localization_task = localization.spawn(device, pose_tx);
    let feed_task = LocalizationFeed::new(estimator.clone()).spawn(pose_rx);

    wait_for_shutdown(config.simulation.run_seconds).await;

    estimator.stop();
    localization_task.abort();
    imu_task.abort();
    match feed_task.await {
        Ok(feed) => info!(forwarded = feed.forwarded(), "Localization feed finished"),
        Err(e) => warn!(?e, "Localization feed task failed"),
    }

    let stats = estimator.stats();
    info!(
        snapshots = snapshots.load(Ordering::Relaxed),
        accel_steps = stats.integrator.accel_steps,
        gyro_steps = stats.integrator.gyro_steps,
        corrections = stats.fusion.applied,
        rejected = stats.fusion.rejected,
        "Estimator shut down"
    );

    Ok(())
}
