use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared counters for cross-thread pipeline monitoring. Every field is an
/// `Arc` so each stage holds its own clone and updates it without touching a
/// shared lock.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Audio capture stage
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub agc_gain_applied_milli: Arc<AtomicU64>, // current AGC gain * 1000
    pub gate_closed: Arc<AtomicBool>,

    // STT stage
    pub tokens_emitted: Arc<AtomicU64>,
    pub tokens_filtered: Arc<AtomicU64>,
    pub stt_restarts: Arc<AtomicU64>,
    pub fast_lane_drops: Arc<AtomicU64>,

    // Fast Brain
    pub fast_brain_flushes: Arc<AtomicU64>,
    pub fast_brain_llm_errors: Arc<AtomicU64>,
    pub fast_brain_last_latency_ms: Arc<AtomicU64>,

    // Slow Brain
    pub slow_brain_summaries: Arc<AtomicU64>,
    pub slow_brain_visuals: Arc<AtomicU64>,
    pub slow_brain_llm_errors: Arc<AtomicU64>,

    // OSC broadcaster
    pub osc_messages_sent: Arc<AtomicU64>,
    pub osc_send_errors: Arc<AtomicU64>,

    // Supervisor
    pub supervisor_restarts: Arc<AtomicU64>,
    pub last_restart_reason: Arc<RwLock<Option<String>>>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            agc_gain_applied_milli: Arc::new(AtomicU64::new(1000)),
            gate_closed: Arc::new(AtomicBool::new(true)),

            tokens_emitted: Arc::new(AtomicU64::new(0)),
            tokens_filtered: Arc::new(AtomicU64::new(0)),
            stt_restarts: Arc::new(AtomicU64::new(0)),
            fast_lane_drops: Arc::new(AtomicU64::new(0)),

            fast_brain_flushes: Arc::new(AtomicU64::new(0)),
            fast_brain_llm_errors: Arc::new(AtomicU64::new(0)),
            fast_brain_last_latency_ms: Arc::new(AtomicU64::new(0)),

            slow_brain_summaries: Arc::new(AtomicU64::new(0)),
            slow_brain_visuals: Arc::new(AtomicU64::new(0)),
            slow_brain_llm_errors: Arc::new(AtomicU64::new(0)),

            osc_messages_sent: Arc::new(AtomicU64::new(0)),
            osc_send_errors: Arc::new(AtomicU64::new(0)),

            supervisor_restarts: Arc::new(AtomicU64::new(0)),
            last_restart_reason: Arc::new(RwLock::new(None)),
        }
    }
}

impl PipelineMetrics {
    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frames_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_gate_closed(&self, closed: bool) {
        self.gate_closed.store(closed, Ordering::Relaxed);
    }

    pub fn set_agc_gain(&self, gain: f32) {
        self.agc_gain_applied_milli
            .store((gain * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_token_emitted(&self) {
        self.tokens_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_filtered(&self) {
        self.tokens_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stt_restart(&self) {
        self.stt_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// A token was dropped on the STT->Fast Brain lane because it was full
    /// (§5: bounded, drop-oldest-on-full, distinct from PCM ring drops).
    pub fn record_fast_lane_drop(&self) {
        self.fast_lane_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fast_brain_flush(&self, latency: Duration) {
        self.fast_brain_flushes.fetch_add(1, Ordering::Relaxed);
        self.fast_brain_last_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_fast_brain_llm_error(&self) {
        self.fast_brain_llm_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_brain_summary(&self) {
        self.slow_brain_summaries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_brain_visual(&self) {
        self.slow_brain_visuals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_brain_llm_error(&self) {
        self.slow_brain_llm_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_osc_sent(&self) {
        self.osc_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_osc_error(&self) {
        self.osc_send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_supervisor_restart(&self, reason: impl Into<String>) {
        self.supervisor_restarts.fetch_add(1, Ordering::Relaxed);
        *self.last_restart_reason.write() = Some(reason.into());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            fast_lane_drops: self.fast_lane_drops.load(Ordering::Relaxed),
            tokens_emitted: self.tokens_emitted.load(Ordering::Relaxed),
            fast_brain_flushes: self.fast_brain_flushes.load(Ordering::Relaxed),
            slow_brain_summaries: self.slow_brain_summaries.load(Ordering::Relaxed),
            slow_brain_visuals: self.slow_brain_visuals.load(Ordering::Relaxed),
            osc_messages_sent: self.osc_messages_sent.load(Ordering::Relaxed),
            osc_send_errors: self.osc_send_errors.load(Ordering::Relaxed),
            supervisor_restarts: self.supervisor_restarts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub fast_lane_drops: u64,
    pub tokens_emitted: u64,
    pub fast_brain_flushes: u64,
    pub slow_brain_summaries: u64,
    pub slow_brain_visuals: u64,
    pub osc_messages_sent: u64,
    pub osc_send_errors: u64,
    pub supervisor_restarts: u64,
}

/// Tracks frames/events-per-second over rolling one-second windows.
#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let metrics = PipelineMetrics::default();
        metrics.record_frame_captured();
        metrics.record_frames_dropped(3);
        metrics.record_token_emitted();
        metrics.record_supervisor_restart("watchdog timeout");

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_captured, 1);
        assert_eq!(snap.frames_dropped, 3);
        assert_eq!(snap.tokens_emitted, 1);
        assert_eq!(snap.supervisor_restarts, 1);
        assert_eq!(
            metrics.last_restart_reason.read().as_deref(),
            Some("watchdog timeout")
        );
    }

    #[test]
    fn fps_tracker_returns_none_before_one_second() {
        let mut tracker = FpsTracker::new();
        assert_eq!(tracker.tick(), None);
    }
}
