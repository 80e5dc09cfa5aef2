//! Sensor stream contract.
//!
//! A [`SensorSource`] hands out [`Subscription`]s. Each subscription pushes
//! [`SensorEvent`]s into a sink callback until it is released, either with an
//! explicit [`Subscription::unsubscribe`] or when the handle is dropped.

use crate::types::{SensorKind, SensorSample};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Event delivered on a sensor stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Sample(SensorSample),
    /// The stream reported an error or disconnected.
    Fault(String),
}

/// Callback receiving events of one stream.
pub type SampleSink = Arc<dyn Fn(SensorEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{0} stream is not available")]
    Unavailable(SensorKind),
    #[error("Invalid sample rate {0} Hz")]
    InvalidRate(f64),
}

/// Producer of raw inertial streams.
pub trait SensorSource: Send + Sync {
    /// Start delivering `kind` events to `sink` at roughly `rate_hz`.
    fn subscribe(
        &self,
        kind: SensorKind,
        rate_hz: f64,
        sink: SampleSink,
    ) -> Result<Subscription, SensorError>;
}

/// Handle for an active stream subscription.
///
/// Release is idempotent and also runs on drop, so every exit path gives
/// the stream back.
pub struct Subscription {
    kind: SensorKind,
    active: Arc<AtomicBool>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(kind: SensorKind, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            active: Arc::new(AtomicBool::new(true)),
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the stream. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            self.active.store(false, Ordering::SeqCst);
            release();
            tracing::debug!(kind = %self.kind, "Sensor stream released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

struct HubEntry {
    id: u64,
    kind: SensorKind,
    rate_hz: f64,
    sink: SampleSink,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    entries: Vec<HubEntry>,
}

/// In-process fan-out source.
///
/// Producers (a driver thread, a simulator, a test) call [`SensorHub::publish`];
/// every subscriber of that stream receives the event in publish order.
#[derive(Clone, Default)]
pub struct SensorHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to all current subscribers of `kind`.
    ///
    /// Sinks run outside the hub lock so they may subscribe or unsubscribe.
    pub fn publish(&self, kind: SensorKind, event: SensorEvent) {
        let sinks: Vec<SampleSink> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| e.sink.clone())
                .collect()
        };
        for sink in sinks {
            sink(event.clone());
        }
    }

    /// Shorthand for publishing a sample.
    pub fn publish_sample(&self, kind: SensorKind, sample: SensorSample) {
        self.publish(kind, SensorEvent::Sample(sample));
    }

    pub fn subscriber_count(&self, kind: SensorKind) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Highest rate requested by any subscriber of `kind`.
    pub fn requested_rate(&self, kind: SensorKind) -> Option<f64> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.rate_hz)
            .reduce(f64::max)
    }
}

impl SensorSource for SensorHub {
    fn subscribe(
        &self,
        kind: SensorKind,
        rate_hz: f64,
        sink: SampleSink,
    ) -> Result<Subscription, SensorError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(SensorError::InvalidRate(rate_hz));
        }

        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(HubEntry {
                id,
                kind,
                rate_hz,
                sink,
            });
            id
        };
        tracing::debug!(%kind, rate_hz, id, "Sensor stream subscribed");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(kind, move || {
            if let Some(inner) = inner.upgrade() {
                inner.lock().entries.retain(|e| e.id != id);
            }
        }))
    }
}
