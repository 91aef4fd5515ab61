use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A fully-resolved snapshot of pipeline configuration (§3 Config).
///
/// Readers take a clone of the `Arc` at stage boundaries; there is a single
/// writer (the Supervisor's `update_config` command, itself invoked from the
/// UI/CLI). The hot paths (audio callback, STT consumer, brain loops) never
/// take a lock to read — they hold an `Arc<Config>` snapshot for the
/// duration of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub osc_ip: String,
    pub osc_port: u16,
    pub audio_device_id: Option<String>,
    pub sample_rate: u32,
    pub block_size: usize,
    pub gate_threshold: f32,
    pub agc_target: f32,
    pub agc_max_gain: f32,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub fast_rate_s: f64,
    pub history_s: f64,
    pub user_context: Option<String>,
    /// Special token ids the STT backend must never surface as text.
    /// Per §9 Open Question, this must be supplied explicitly by the model
    /// configuration — the worker refuses to emit tokens while it is empty.
    pub token_filter_set: HashSet<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            osc_ip: "192.168.1.77".to_string(),
            osc_port: 2992,
            audio_device_id: None,
            sample_rate: 24_000,
            block_size: 1920,
            gate_threshold: 0.04,
            agc_target: 0.95,
            agc_max_gain: 8.0,
            llm_endpoint: "http://localhost:11434".to_string(),
            llm_model: "mistral-nemo".to_string(),
            fast_rate_s: 7.5,
            history_s: 30.0,
            user_context: None,
            token_filter_set: HashSet::new(),
        }
    }
}

impl Config {
    /// Enforce `fast_rate_s <= history_s` (§3 invariant). The caller (UI/CLI)
    /// is expected to keep this true; engines re-validate at call boundaries
    /// by clamping rather than failing, matching §4.C's "rate-vs-history"
    /// rule.
    pub fn clamp_rate_to_history(&mut self) {
        if self.fast_rate_s > self.history_s {
            self.fast_rate_s = self.history_s;
        }
    }

    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if self.fast_rate_s > self.history_s {
            return Err(crate::error::ConfigError::Validation {
                field: "fast_rate_s".into(),
                reason: "must be <= history_s".into(),
            });
        }
        if self.osc_port == 0 {
            return Err(crate::error::ConfigError::Validation {
                field: "osc_port".into(),
                reason: "must be nonzero".into(),
            });
        }
        Ok(())
    }
}

/// Single-writer / many-reader snapshot cell for `Config`.
///
/// Grounded on the teacher's `StateManager` pattern (RwLock-guarded value,
/// cloned out for readers) but specialized to hand back an `Arc<Config>` so
/// hot-path readers never clone the struct itself.
pub struct ConfigCell {
    inner: RwLock<Arc<Config>>,
}

impl ConfigCell {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Take a cheap snapshot for the duration of one stage iteration.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    /// Replace the live config. Called only from the single writer thread.
    pub fn update(&self, mut new_config: Config) {
        new_config.clamp_rate_to_history();
        *self.inner.write() = Arc::new(new_config);
    }
}

/// The on-disk subset of `Config` that survives process restarts (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSettings {
    pub history_s: f64,
    pub fast_rate_s: f64,
    pub last_audio_device_id: Option<String>,
    pub osc_target_ip: String,
    pub osc_target_port: u16,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        let defaults = Config::default();
        Self {
            history_s: defaults.history_s,
            fast_rate_s: defaults.fast_rate_s,
            last_audio_device_id: None,
            osc_target_ip: defaults.osc_ip,
            osc_target_port: defaults.osc_port,
        }
    }
}

impl PersistedSettings {
    pub fn apply_to(&self, config: &mut Config) {
        config.history_s = self.history_s;
        config.fast_rate_s = self.fast_rate_s;
        config.audio_device_id = self.last_audio_device_id.clone();
        config.osc_ip = self.osc_target_ip.clone();
        config.osc_port = self.osc_target_port;
        config.clamp_rate_to_history();
    }

    pub fn capture_from(config: &Config) -> Self {
        Self {
            history_s: config.history_s,
            fast_rate_s: config.fast_rate_s,
            last_audio_device_id: config.audio_device_id.clone(),
            osc_target_ip: config.osc_ip.clone(),
            osc_target_port: config.osc_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_rate_above_history() {
        let mut cfg = Config {
            fast_rate_s: 40.0,
            history_s: 10.0,
            ..Config::default()
        };
        cfg.clamp_rate_to_history();
        assert_eq!(cfg.fast_rate_s, 10.0);
    }

    #[test]
    fn validate_rejects_rate_above_history() {
        let cfg = Config {
            fast_rate_s: 40.0,
            history_s: 10.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_cell_snapshot_is_independent() {
        let cell = ConfigCell::new(Config::default());
        let snap1 = cell.snapshot();
        cell.update(Config {
            llm_model: "other".into(),
            ..Config::default()
        });
        let snap2 = cell.snapshot();
        assert_eq!(snap1.llm_model, "mistral-nemo");
        assert_eq!(snap2.llm_model, "other");
    }

    #[test]
    fn persisted_settings_round_trip() {
        let mut cfg = Config::default();
        cfg.history_s = 60.0;
        cfg.fast_rate_s = 5.0;
        let persisted = PersistedSettings::capture_from(&cfg);
        let mut restored = Config::default();
        persisted.apply_to(&mut restored);
        assert_eq!(restored.history_s, 60.0);
        assert_eq!(restored.fast_rate_s, 5.0);
    }
}
