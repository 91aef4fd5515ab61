use crate::error::{ConfigError, PipelineError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of the STT Worker (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttState {
    Loading,
    Ready,
    Streaming,
    Stopping,
    Stopped,
}

/// Lifecycle of the whole pipeline, as orchestrated by the Supervisor (§4.E).
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Initializing,
    Running,
    Paused,
    Recovering { from_error: String },
    Stopping,
    Stopped,
}

/// Tracks the current `AppState` and validates transitions, broadcasting
/// every accepted transition to subscribers (the Supervisor's liveness loop
/// and any UI/CLI observer).
pub struct StateManager {
    state: Arc<RwLock<AppState>>,
    state_tx: Sender<AppState>,
    state_rx: Receiver<AppState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(AppState::Initializing)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: AppState) -> Result<(), PipelineError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (AppState::Initializing, AppState::Running)
                | (AppState::Running, AppState::Paused)
                | (AppState::Paused, AppState::Running)
                | (AppState::Running, AppState::Recovering { .. })
                | (AppState::Recovering { .. }, AppState::Running)
                | (AppState::Running, AppState::Stopping)
                | (AppState::Paused, AppState::Stopping)
                | (AppState::Recovering { .. }, AppState::Stopping)
                | (AppState::Stopping, AppState::Stopped)
        );

        if !valid {
            return Err(PipelineError::Config(ConfigError::Validation {
                field: "app_state".into(),
                reason: format!("invalid transition: {:?} -> {:?}", *current, new_state),
            }));
        }

        tracing::info!("state transition: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> AppState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<AppState> {
        self.state_rx.clone()
    }
}
