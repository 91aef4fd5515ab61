use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use voxjockey_audio::capture::{AudioCaptureConfig, AudioCaptureThread};
use voxjockey_audio::ring_buffer::{pcm_ring, PcmConsumer, PcmProducer};
use voxjockey_brain::fast_brain::PromptCallback;
use voxjockey_brain::llm_client::LlmClient;
use voxjockey_brain::slow_brain::SummaryCallback;
use voxjockey_brain::{FastBrain, FastBrainHandle, FastBrainState, SlowBrain, SlowBrainHandle, SlowBrainState};
use voxjockey_foundation::config::{Config, ConfigCell};
use voxjockey_foundation::error::{PipelineError, RecoveryStrategy, SupervisorError};
use voxjockey_foundation::state::{AppState, StateManager};
use voxjockey_osc::OscBroadcaster;
use voxjockey_stt::token_channel::{fast_token_channel, DropOldestSender};
use voxjockey_stt::types::TextToken;
use voxjockey_stt::{SttBackend, SttWorker, SttWorkerHandle};
use voxjockey_telemetry::PipelineMetrics;

use crate::stage::Stage;

/// Builds a fresh, never-yet-run backend instance. Called once per
/// (re)start of the STT worker; the Supervisor never reuses a backend that
/// has already run, matching "a crashed worker restarts from `Loading`"
/// (§4.B). `dyn SttBackend` inherits `Send` from its `SttBackend: Send`
/// supertrait, so the boxed trait object needs no extra bound here.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn SttBackend> + Send + Sync>;

#[derive(Default)]
struct PipelineHandles {
    audio: Option<AudioCaptureThread>,
    stt: Option<SttWorkerHandle>,
    fast: Option<FastBrainHandle>,
    slow: Option<SlowBrainHandle>,
}

/// Lifecycle orchestration and fault tolerance for the four-stage pipeline
/// (§4.E). Channels and the PCM ring are created once in [`Supervisor::new`]
/// and reused across every start/restart, since their `Sender`/`Receiver`
/// handles are cheap to clone and only one active consumer reads at a time.
///
/// `handles` is a `tokio::sync::Mutex` rather than `parking_lot`'s: the
/// liveness watch and the lifecycle methods both need to hold it across
/// `.await` points (joining a stage, asking it for its state), which a
/// `parking_lot::MutexGuard` cannot do in a task that must stay `Send`.
pub struct Supervisor {
    config: Arc<ConfigCell>,
    metrics: PipelineMetrics,
    osc: Arc<OscBroadcaster>,
    state_mgr: StateManager,
    backend_factory: BackendFactory,

    pcm_producer: PcmProducer,
    pcm_consumer: PcmConsumer,
    fast_tx: DropOldestSender<TextToken>,
    fast_rx: crossbeam_channel::Receiver<TextToken>,
    slow_tx: crossbeam_channel::Sender<TextToken>,
    slow_rx: crossbeam_channel::Receiver<TextToken>,

    handles: AsyncMutex<PipelineHandles>,
    saved_fast_state: SyncMutex<Option<FastBrainState>>,
    saved_slow_state: SyncMutex<Option<SlowBrainState>>,
    permanently_failed: SyncMutex<HashSet<Stage>>,

    fast_callback: Option<PromptCallback>,
    slow_callback: Option<SummaryCallback>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        backend_factory: BackendFactory,
        fast_callback: Option<PromptCallback>,
        slow_callback: Option<SummaryCallback>,
    ) -> Result<Arc<Self>, PipelineError> {
        config.validate()?;
        let metrics = PipelineMetrics::default();
        let osc = Arc::new(OscBroadcaster::new(&config.osc_ip, config.osc_port, metrics.clone())?);

        let (pcm_producer, pcm_consumer) = pcm_ring();
        let (fast_tx, fast_rx) = fast_token_channel::<TextToken>(64);
        let (slow_tx, slow_rx) = crossbeam_channel::unbounded();

        Ok(Arc::new(Self {
            config: Arc::new(ConfigCell::new(config)),
            metrics,
            osc,
            state_mgr: StateManager::new(),
            backend_factory,
            pcm_producer,
            pcm_consumer,
            fast_tx,
            fast_rx,
            slow_tx,
            slow_rx,
            handles: AsyncMutex::new(PipelineHandles::default()),
            saved_fast_state: SyncMutex::new(None),
            saved_slow_state: SyncMutex::new(None),
            permanently_failed: SyncMutex::new(HashSet::new()),
            fast_callback,
            slow_callback,
        }))
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    pub fn current_state(&self) -> AppState {
        self.state_mgr.current()
    }

    pub fn config_handle(&self) -> Arc<ConfigCell> {
        Arc::clone(&self.config)
    }

    /// `start` (§4.E): launches B, C, D against a fresh Config snapshot,
    /// restoring any previously-saved `StageState`, connects A, and begins
    /// the liveness watch.
    pub async fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.launch_stages().await?;
        self.osc.connect()?;
        self.state_mgr.transition(AppState::Running)?;
        self.spawn_watch_loop();
        Ok(())
    }

    async fn launch_stages(self: &Arc<Self>) -> Result<(), PipelineError> {
        for stage in [Stage::AudioCapture, Stage::Stt, Stage::FastBrain, Stage::SlowBrain] {
            if !self.permanently_failed.lock().contains(&stage) {
                if let Err(e) = self.launch_one_stage(stage).await {
                    self.permanently_failed.lock().insert(stage);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// `pause` (§4.E): save brain state, stop D/C/B/A in reverse order.
    /// Saved state remains cached in the Supervisor for a future `start`.
    pub async fn pause(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.teardown_stages(true).await;
        self.osc.disconnect();
        self.state_mgr.transition(AppState::Paused)?;
        Ok(())
    }

    /// `stop` (§4.E): identical teardown to `pause` but discards saved state.
    pub async fn stop(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.teardown_stages(false).await;
        self.osc.disconnect();
        self.state_mgr.transition(AppState::Stopping)?;
        self.state_mgr.transition(AppState::Stopped)?;
        Ok(())
    }

    async fn teardown_stages(&self, save_state: bool) {
        let (audio, stt, fast, slow) = {
            let mut handles = self.handles.lock().await;
            (
                handles.audio.take(),
                handles.stt.take(),
                handles.fast.take(),
                handles.slow.take(),
            )
        };

        // Reverse start order (§4.E): D, C, B, A.
        if let Some(slow) = slow {
            if save_state {
                if let Some(state) = slow.get_state().await {
                    *self.saved_slow_state.lock() = Some(state);
                }
            }
            slow.stop_and_join().await;
        }
        if let Some(fast) = fast {
            if save_state {
                if let Some(state) = fast.get_state().await {
                    *self.saved_fast_state.lock() = Some(state);
                }
            }
            fast.stop_and_join().await;
        }
        if let Some(stt) = stt {
            stt.stop_and_join();
        }
        if let Some(audio) = audio {
            audio.stop();
        }
    }

    /// `reset_memory` (§4.E, §4.D): empties the Slow Brain's transcript log
    /// and drops any cached `StageState` so a future restart doesn't
    /// resurrect pre-reset context.
    pub async fn reset_memory(&self) {
        *self.saved_fast_state.lock() = None;
        *self.saved_slow_state.lock() = None;

        let handles = self.handles.lock().await;
        if let Some(slow) = handles.slow.as_ref() {
            slow.reset_memory().await;
        }
    }

    /// `update_config` (§4.E): single-writer config replacement. If the OSC
    /// target changed, atomically reconnects the broadcaster so a
    /// mid-stream retarget never requires restarting any stage.
    pub fn update_config(&self, new_config: Config) -> Result<(), PipelineError> {
        new_config.validate()?;
        let previous = self.config.snapshot();
        let osc_changed = new_config.osc_ip != previous.osc_ip || new_config.osc_port != previous.osc_port;
        let ip = new_config.osc_ip.clone();
        let port = new_config.osc_port;
        self.config.update(new_config);
        if osc_changed {
            self.osc.update_target(&ip, port)?;
        }
        Ok(())
    }

    /// Spawn the liveness-watch task (§4.E): every 2 s, check each stage's
    /// alive signal; a dead stage while `Running` is logged, reconstructed
    /// with its last config/state, and resumed.
    fn spawn_watch_loop(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                if !matches!(supervisor.current_state(), AppState::Running) {
                    continue;
                }
                supervisor.check_liveness_once().await;
            }
        });
    }

    /// One liveness-check pass, exposed separately so tests can drive it
    /// deterministically instead of waiting on the real 2 s tick.
    pub async fn check_liveness_once(self: &Arc<Self>) {
        let (dead, fatal) = {
            let handles = self.handles.lock().await;
            let mut dead = Vec::new();
            let mut fatal = HashSet::new();

            if handles.audio.as_ref().is_some_and(|h| h.is_finished()) {
                dead.push(Stage::AudioCapture);
            }
            if let Some(h) = handles.stt.as_ref() {
                if h.is_finished() {
                    dead.push(Stage::Stt);
                    if matches!(h.terminal_recovery(), Some(RecoveryStrategy::Fatal)) {
                        fatal.insert(Stage::Stt);
                    }
                }
            }
            if handles.fast.as_ref().is_some_and(|h| h.is_finished()) {
                dead.push(Stage::FastBrain);
            }
            if handles.slow.as_ref().is_some_and(|h| h.is_finished()) {
                dead.push(Stage::SlowBrain);
            }
            (dead, fatal)
        };

        for stage in dead {
            if fatal.contains(&stage) {
                tracing::error!(
                    "stage '{}' failed with recovery_strategy = Fatal, retiring without restart",
                    stage
                );
                self.retire_stage(stage).await;
                continue;
            }

            tracing::error!("stage '{}' is not alive, restarting", stage);
            self.metrics.record_supervisor_restart(stage.to_string());
            if let Err(e) = self.restart_stage(stage).await {
                tracing::error!("failed to restart stage '{}': {}", stage, e);
                self.permanently_failed.lock().insert(stage);
            }
        }
    }

    /// Drop a stage's dead handle without attempting reconstruction and mark
    /// it permanently failed. Used when `recovery_strategy()` classifies the
    /// error that ended it as `Fatal` (e.g. `SttError::ModelLoadFailed`,
    /// §7.2): restarting would just spawn a thread that fails the same way.
    async fn retire_stage(&self, stage: Stage) {
        let mut handles = self.handles.lock().await;
        match stage {
            Stage::Stt => handles.stt = None,
            Stage::AudioCapture => handles.audio = None,
            Stage::FastBrain => handles.fast = None,
            Stage::SlowBrain => handles.slow = None,
        }
        drop(handles);
        self.permanently_failed.lock().insert(stage);
    }

    async fn restart_stage(self: &Arc<Self>, stage: Stage) -> Result<(), PipelineError> {
        if self.permanently_failed.lock().contains(&stage) {
            return Err(PipelineError::Supervisor(SupervisorError::PermanentlyFailed {
                stage: stage.to_string(),
            }));
        }

        // Capture whatever state the now-dead stage left behind before
        // dropping its handle, so the reconstruction resumes from it.
        let mut handles = self.handles.lock().await;
        match stage {
            Stage::FastBrain => {
                if let Some(handle) = handles.fast.take() {
                    if let Some(state) = handle.get_state().await {
                        *self.saved_fast_state.lock() = Some(state);
                    }
                }
            }
            Stage::SlowBrain => {
                if let Some(handle) = handles.slow.take() {
                    if let Some(state) = handle.get_state().await {
                        *self.saved_slow_state.lock() = Some(state);
                    }
                }
            }
            Stage::Stt => {
                handles.stt = None;
            }
            Stage::AudioCapture => {
                handles.audio = None;
            }
        }
        drop(handles);

        self.launch_one_stage(stage).await
    }

    async fn launch_one_stage(self: &Arc<Self>, stage: Stage) -> Result<(), PipelineError> {
        let snapshot = self.config.snapshot();

        match stage {
            Stage::AudioCapture => {
                let (thread, _cfg) = AudioCaptureThread::spawn(
                    AudioCaptureConfig {
                        sample_rate: snapshot.sample_rate,
                        block_size: snapshot.block_size,
                        gate_threshold: snapshot.gate_threshold,
                        agc_target: snapshot.agc_target,
                        agc_max_gain: snapshot.agc_max_gain,
                    },
                    self.pcm_producer.clone(),
                    snapshot.audio_device_id.clone(),
                    self.metrics.clone(),
                )
                .map_err(PipelineError::Audio)?;
                self.handles.lock().await.audio = Some(thread);
            }
            Stage::Stt => {
                let backend = (self.backend_factory)();
                let worker = SttWorker::new(
                    backend,
                    self.pcm_consumer.clone(),
                    snapshot.token_filter_set.clone(),
                    self.fast_tx.clone(),
                    self.slow_tx.clone(),
                    self.metrics.clone(),
                );
                let handle = worker.spawn().map_err(PipelineError::Stt)?;
                self.handles.lock().await.stt = Some(handle);
            }
            Stage::FastBrain => {
                let llm = LlmClient::new(snapshot.llm_endpoint.clone(), snapshot.llm_model.clone());
                let initial_state = self.saved_fast_state.lock().take();
                let brain = FastBrain::new(
                    self.fast_rx.clone(),
                    Arc::clone(&self.config),
                    llm,
                    Arc::clone(&self.osc),
                    self.metrics.clone(),
                    self.fast_callback.clone(),
                    initial_state,
                );
                self.handles.lock().await.fast = Some(brain.spawn());
            }
            Stage::SlowBrain => {
                let llm = LlmClient::new(snapshot.llm_endpoint.clone(), snapshot.llm_model.clone());
                let initial_state = self.saved_slow_state.lock().take();
                let brain = SlowBrain::new(
                    self.slow_rx.clone(),
                    Arc::clone(&self.config),
                    llm,
                    Arc::clone(&self.osc),
                    self.metrics.clone(),
                    self.slow_callback.clone(),
                    initial_state,
                );
                self.handles.lock().await.slow = Some(brain.spawn());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxjockey_stt::backend::{MockBackend, MoshiBackend};

    fn factory() -> BackendFactory {
        Arc::new(|| Box::new(MockBackend::new(vec![])) as Box<dyn SttBackend>)
    }

    fn always_fails_to_load_factory() -> BackendFactory {
        Arc::new(|| Box::new(MoshiBackend::new("test/repo")) as Box<dyn SttBackend>)
    }

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.token_filter_set.insert(0);
        cfg.token_filter_set.insert(3);
        cfg.osc_port = 19_998;
        cfg
    }

    #[tokio::test]
    async fn new_supervisor_starts_in_initializing_state() {
        let supervisor = Supervisor::new(test_config(), factory(), None, None).unwrap();
        assert_eq!(supervisor.current_state(), AppState::Initializing);
    }

    #[tokio::test]
    async fn update_config_rejects_invalid_rate_history() {
        let supervisor = Supervisor::new(test_config(), factory(), None, None).unwrap();
        let mut bad = test_config();
        bad.fast_rate_s = 999.0;
        bad.history_s = 1.0;
        assert!(supervisor.update_config(bad).is_err());
    }

    #[tokio::test]
    async fn reset_memory_clears_cached_stage_state_with_no_stages_running() {
        let supervisor = Supervisor::new(test_config(), factory(), None, None).unwrap();
        *supervisor.saved_fast_state.lock() = Some(FastBrainState::default());
        *supervisor.saved_slow_state.lock() = Some(SlowBrainState::default());
        supervisor.reset_memory().await;
        assert!(supervisor.saved_fast_state.lock().is_none());
        assert!(supervisor.saved_slow_state.lock().is_none());
    }

    #[tokio::test]
    async fn fatal_stt_failure_is_retired_instead_of_restarted() {
        let mut cfg = test_config();
        cfg.osc_port = 19_999;
        let supervisor = Supervisor::new(cfg, always_fails_to_load_factory(), None, None).unwrap();

        supervisor.launch_one_stage(Stage::Stt).await.unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let finished = supervisor.handles.lock().await.stt.as_ref().unwrap().is_finished();
            if finished || std::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        supervisor.check_liveness_once().await;

        assert!(supervisor.permanently_failed.lock().contains(&Stage::Stt));
        assert!(supervisor.handles.lock().await.stt.is_none());
        assert_eq!(supervisor.metrics.snapshot().supervisor_restarts, 0);
    }
}
