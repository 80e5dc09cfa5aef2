use crate::integrator::Integrator;
use crate::localization::AbsolutePose;

/// Counters kept by the corrector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FusionStats {
    pub applied: u64,
    pub rejected: u64,
    /// Timestamp of the last pose that was applied.
    pub last_fix_s: Option<f64>,
}

/// Reconciles inertial drift against an authoritative external pose.
///
/// Hard reset, not a blend: position is overwritten and velocity zeroed.
/// The pose orientation is accepted but not applied.
#[derive(Debug, Clone, Default)]
pub struct FusionCorrector {
    stats: FusionStats,
}

impl FusionCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    /// Apply `pose` to `integrator`. Returns `false` for a malformed pose,
    /// which leaves the integrator untouched.
    pub fn correct(&mut self, integrator: &mut Integrator, pose: &AbsolutePose) -> bool {
        let Some(position) = pose.valid_position() else {
            self.stats.rejected += 1;
            tracing::warn!(timestamp = pose.timestamp_s, "Ignoring absolute pose without position");
            return false;
        };
        if pose.orientation.is_some_and(|q| !q.is_finite()) {
            tracing::debug!(
                timestamp = pose.timestamp_s,
                "Absolute pose orientation is not finite"
            );
        }

        let drift = (integrator.snapshot().position - position).length();
        integrator.apply_correction(position);
        self.stats.applied += 1;
        self.stats.last_fix_s = Some(pose.timestamp_s);
        tracing::debug!(
            x = position.x,
            y = position.y,
            z = position.z,
            drift,
            "Absolute pose correction applied"
        );
        true
    }
}
