//! Integration helpers for wiring `PipelineMetrics` into the supervisor's
//! health reporting with minimal call-site noise.

use crate::pipeline_metrics::{MetricsSnapshot, PipelineMetrics};

/// Thresholds past which [`TelemetryManager::check_alerts`] raises a
/// [`PerformanceAlert`].
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_osc_send_errors: u64,
    pub max_supervisor_restarts: u64,
    pub max_frames_dropped: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_osc_send_errors: 50,
            max_supervisor_restarts: 10,
            max_frames_dropped: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceAlert {
    OscErrorsExceeded,
    SupervisorRestartsExceeded,
    FramesDroppedExceeded,
}

/// Builder for a [`TelemetryManager`] with sensible defaults, mirroring the
/// presets used to configure STT performance metrics in the upstream crate.
pub struct TelemetryBuilder {
    thresholds: AlertThresholds,
    enable_alerts: bool,
}

impl TelemetryBuilder {
    pub fn new() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            enable_alerts: true,
        }
    }

    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_alerts(mut self, enable: bool) -> Self {
        self.enable_alerts = enable;
        self
    }

    pub fn build(self) -> TelemetryManager {
        TelemetryManager {
            metrics: PipelineMetrics::default(),
            thresholds: self.thresholds,
            enable_alerts: self.enable_alerts,
        }
    }

    /// Relaxed thresholds for local development / integration tests.
    pub fn testing() -> Self {
        Self::new().with_alerts(false)
    }
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TelemetryManager {
    metrics: PipelineMetrics,
    thresholds: AlertThresholds,
    enable_alerts: bool,
}

impl TelemetryManager {
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn check_alerts(&self) -> Vec<PerformanceAlert> {
        if !self.enable_alerts {
            return Vec::new();
        }

        let snap = self.metrics.snapshot();
        let mut alerts = Vec::new();
        if snap.osc_send_errors >= self.thresholds.max_osc_send_errors {
            alerts.push(PerformanceAlert::OscErrorsExceeded);
        }
        if snap.supervisor_restarts >= self.thresholds.max_supervisor_restarts {
            alerts.push(PerformanceAlert::SupervisorRestartsExceeded);
        }
        if snap.frames_dropped >= self.thresholds.max_frames_dropped {
            alerts.push(PerformanceAlert::FramesDroppedExceeded);
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_fire_past_threshold() {
        let manager = TelemetryBuilder::new()
            .with_thresholds(AlertThresholds {
                max_osc_send_errors: 2,
                max_supervisor_restarts: 100,
                max_frames_dropped: 100,
            })
            .build();

        manager.metrics().record_osc_error();
        manager.metrics().record_osc_error();

        let alerts = manager.check_alerts();
        assert!(alerts.contains(&PerformanceAlert::OscErrorsExceeded));
    }

    #[test]
    fn testing_preset_disables_alerts() {
        let manager = TelemetryBuilder::testing().build();
        manager.metrics().record_osc_error();
        manager.metrics().record_osc_error();
        assert!(manager.check_alerts().is_empty());
    }
}
