//! Foundation crate tests
//!
//! Covers the clock abstraction, error taxonomy + recovery strategy mapping,
//! config snapshot invariants, and the app state machine.

use std::time::{Duration, Instant};
use voxjockey_foundation::clock::{real_clock, test_clock, Clock, TestClock};
use voxjockey_foundation::config::{Config, ConfigCell, PersistedSettings};
use voxjockey_foundation::error::{
    AudioError, BrainError, ConfigError, PipelineError, RecoveryStrategy, SttError,
};
use voxjockey_foundation::state::{AppState, StateManager};

// ─── Clock ──────────────────────────────────────────────────────────

#[test]
fn real_clock_now_returns_current_time() {
    let clock = real_clock();
    let before = Instant::now();
    let t = clock.now();
    let after = Instant::now();
    assert!(t >= before && t <= after);
}

#[test]
fn test_clock_advance_accumulates() {
    let clock = TestClock::new();
    let start = clock.now();
    clock.advance(Duration::from_millis(100));
    clock.advance(Duration::from_millis(200));
    assert_eq!(clock.now().duration_since(start), Duration::from_millis(300));
}

#[test]
fn test_clock_factory_sleep() {
    let clock = test_clock();
    let t0 = clock.now();
    clock.sleep(Duration::from_secs(7));
    assert_eq!(clock.now().duration_since(t0), Duration::from_secs(7));
}

// ─── Error taxonomy / recovery strategy ────────────────────────────

#[test]
fn device_disconnected_retries() {
    let err: PipelineError = AudioError::DeviceDisconnected.into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::Retry { max_attempts: 5, .. }
    ));
}

#[test]
fn device_not_found_falls_back() {
    let err: PipelineError = AudioError::DeviceNotFound { name: None }.into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fallback { .. }));
}

#[test]
fn ring_overflow_is_ignored() {
    let err: PipelineError = AudioError::RingOverflow { count: 12 }.into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Ignore));
}

#[test]
fn model_load_failed_is_fatal() {
    let err: PipelineError = SttError::ModelLoadFailed("weights missing".into()).into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fatal));
}

#[test]
fn hidden_state_lost_restarts() {
    let err: PipelineError = SttError::HiddenStateLost.into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Restart));
}

#[test]
fn llm_unreachable_is_ignored_by_supervisor() {
    let err: PipelineError = BrainError::LlmUnreachable("connection refused".into()).into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Ignore));
}

#[test]
fn config_validation_error_is_fatal() {
    let err: PipelineError = ConfigError::Validation {
        field: "osc_port".into(),
        reason: "zero".into(),
    }
    .into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fatal));
}

// ─── Config ─────────────────────────────────────────────────────────

#[test]
fn config_default_satisfies_rate_invariant() {
    let cfg = Config::default();
    assert!(cfg.fast_rate_s <= cfg.history_s);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_cell_update_is_visible_to_new_snapshots_only() {
    let cell = ConfigCell::new(Config::default());
    let before = cell.snapshot();
    cell.update(Config {
        history_s: 5.0,
        fast_rate_s: 3.0,
        ..Config::default()
    });
    let after = cell.snapshot();
    assert_eq!(before.history_s, 30.0);
    assert_eq!(after.history_s, 5.0);
}

#[test]
fn persisted_settings_defaults_match_config_defaults() {
    let persisted = PersistedSettings::default();
    let cfg = Config::default();
    assert_eq!(persisted.history_s, cfg.history_s);
    assert_eq!(persisted.osc_target_port, cfg.osc_port);
}

// ─── App state machine ─────────────────────────────────────────────

#[test]
fn pause_resume_round_trip() {
    let mgr = StateManager::new();
    mgr.transition(AppState::Running).unwrap();
    mgr.transition(AppState::Paused).unwrap();
    mgr.transition(AppState::Running).unwrap();
    assert_eq!(mgr.current(), AppState::Running);
}

#[test]
fn recovering_to_stopping_is_allowed() {
    let mgr = StateManager::new();
    mgr.transition(AppState::Running).unwrap();
    mgr.transition(AppState::Recovering {
        from_error: "device disconnected".into(),
    })
    .unwrap();
    assert!(mgr.transition(AppState::Stopping).is_ok());
}

#[test]
fn subscribers_observe_transitions() {
    let mgr = StateManager::new();
    let rx = mgr.subscribe();
    mgr.transition(AppState::Running).unwrap();
    assert_eq!(rx.recv().unwrap(), AppState::Running);
}
