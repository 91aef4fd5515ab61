use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::RwLock;

use crate::backend::SttBackend;
use crate::token_channel::DropOldestSender;
use crate::types::{decode_piece, TextToken};
use voxjockey_audio::ring_buffer::PcmConsumer;
use voxjockey_foundation::error::{PipelineError, RecoveryStrategy, SttError};
use voxjockey_foundation::state::SttState;
use voxjockey_telemetry::PipelineMetrics;

/// Drives a backend one frame at a time on a dedicated OS thread, applying
/// the configured special-token filter and the common surface decode before
/// fanning decoded text out to Fast Brain (drop-oldest) and Slow Brain
/// (unbounded, never drops).
pub struct SttWorker<B: SttBackend> {
    backend: B,
    consumer: PcmConsumer,
    token_filter_set: HashSet<u32>,
    fast_tx: DropOldestSender<TextToken>,
    slow_tx: Sender<TextToken>,
    metrics: PipelineMetrics,
}

pub struct SttWorkerHandle {
    pub handle: JoinHandle<()>,
    pub stop: Arc<AtomicBool>,
    state: Arc<RwLock<SttState>>,
    terminal_recovery: Arc<RwLock<Option<RecoveryStrategy>>>,
}

impl SttWorkerHandle {
    pub fn stop_and_join(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }

    /// Whether the worker thread has exited, whether cleanly or by a hidden
    /// state loss (§4.B). Used by the Supervisor's liveness watch (§4.E).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// The worker's current place in the `Loading -> ... -> Stopped`
    /// lifecycle (§4.B), for observers (UI/CLI status) outside the thread.
    pub fn state(&self) -> SttState {
        *self.state.read()
    }

    /// The `recovery_strategy()` classification of whatever error ended the
    /// thread, if it ended on an error. `None` while the thread is still
    /// running, or if it exited cleanly via `stop_and_join`. The Supervisor's
    /// liveness watch (§7) consults this before restarting a dead stage.
    pub fn terminal_recovery(&self) -> Option<RecoveryStrategy> {
        self.terminal_recovery.read().clone()
    }
}

impl<B: SttBackend + 'static> SttWorker<B> {
    pub fn new(
        backend: B,
        consumer: PcmConsumer,
        token_filter_set: HashSet<u32>,
        fast_tx: DropOldestSender<TextToken>,
        slow_tx: Sender<TextToken>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            backend,
            consumer,
            token_filter_set,
            fast_tx,
            slow_tx,
            metrics,
        }
    }

    /// Spawn the worker's dedicated thread. Refuses to emit any tokens
    /// (the thread exits immediately, transitioning straight to `Stopped`)
    /// if `token_filter_set` is empty — the model configuration must supply
    /// it explicitly (§3 Config invariant).
    pub fn spawn(mut self) -> Result<SttWorkerHandle, SttError> {
        if self.token_filter_set.is_empty() {
            return Err(SttError::TokenFilterUnset);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let state = Arc::new(RwLock::new(SttState::Loading));
        let state_for_thread = Arc::clone(&state);
        let terminal_recovery = Arc::new(RwLock::new(None));
        let terminal_recovery_for_thread = Arc::clone(&terminal_recovery);

        let handle = thread::Builder::new()
            .name("stt-worker".to_string())
            .spawn(move || self.run(stop_for_thread, state_for_thread, terminal_recovery_for_thread))
            .map_err(|e| SttError::FrameInference(format!("failed to spawn stt thread: {e}")))?;

        Ok(SttWorkerHandle { handle, stop, state, terminal_recovery })
    }

    fn run(
        &mut self,
        stop: Arc<AtomicBool>,
        state: Arc<RwLock<SttState>>,
        terminal_recovery: Arc<RwLock<Option<RecoveryStrategy>>>,
    ) {
        if let Err(e) = self.backend.init() {
            tracing::error!("stt backend '{}' failed to load: {}", self.backend.name(), e);
            *terminal_recovery.write() = Some(PipelineError::from(e).recovery_strategy());
            *state.write() = SttState::Stopped;
            return;
        }
        *state.write() = SttState::Ready;
        tracing::info!("stt worker ready (backend: {})", self.backend.name());

        *state.write() = SttState::Streaming;

        while !stop.load(Ordering::Relaxed) {
            let Some(frame) = self.consumer.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };

            match self.backend.step(&frame) {
                Ok(Some(raw)) => {
                    if self.token_filter_set.contains(&raw.id) {
                        self.metrics.record_token_filtered();
                        continue;
                    }
                    let Some(text) = decode_piece(&raw.piece) else {
                        continue;
                    };
                    let token = TextToken {
                        text,
                        emitted_at: Instant::now(),
                    };
                    self.metrics.record_token_emitted();
                    if self.fast_tx.send(token.clone()) {
                        self.metrics.record_fast_lane_drop();
                    }
                    let _ = self.slow_tx.send(token);
                }
                Ok(None) => {}
                Err(SttError::HiddenStateLost) => {
                    tracing::error!("stt hidden state lost, worker must restart from Loading");
                    self.metrics.record_stt_restart();
                    *terminal_recovery.write() =
                        Some(PipelineError::from(SttError::HiddenStateLost).recovery_strategy());
                    *state.write() = SttState::Stopped;
                    return;
                }
                Err(e) => {
                    tracing::warn!("stt frame inference error, skipping frame: {}", e);
                }
            }
        }

        *state.write() = SttState::Stopping;
        tracing::info!("stt worker stopping");
        *state.write() = SttState::Stopped;
    }
}
