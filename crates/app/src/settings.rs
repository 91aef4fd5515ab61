use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use voxjockey_foundation::config::{Config, PersistedSettings};
use voxjockey_foundation::error::ConfigError;

/// CLI surface (§4.F, §6). Every flag also reads from its paired environment
/// variable via clap's `env` feature; an explicit flag wins over the env var,
/// which in turn wins over whatever the persisted settings file supplied.
/// Anything left `None` after CLI+env falls through to the file, then to
/// [`voxjockey_foundation::config::Config::default`].
#[derive(Parser, Debug)]
#[command(name = "voxjockey", author, version, about = "Real-time audio-to-visual cognition pipeline")]
pub struct Cli {
    /// Path to the persisted settings TOML file.
    #[arg(long, default_value = "voxjockey_settings.toml")]
    pub settings_file: PathBuf,

    /// List available input devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Which STT backend to drive. The token filter set is backend-specific
    /// (§9 Open Question) and is derived from this choice, not user-supplied.
    #[arg(long, env = "STT_BACKEND", default_value = "mock")]
    pub stt_backend: SttBackendChoice,

    #[arg(long = "osc-ip", env = "OSC_TARGET_IP")]
    pub osc_ip: Option<String>,

    #[arg(long = "osc-port", env = "OSC_TARGET_PORT")]
    pub osc_port: Option<u16>,

    #[arg(long = "audio-device")]
    pub audio_device_id: Option<String>,

    #[arg(long = "sample-rate", env = "AUDIO_SAMPLE_RATE")]
    pub sample_rate: Option<u32>,

    /// Accepted for interface parity with the reference env surface; mono
    /// capture is the only supported channel count (§6), so any other value
    /// is rejected at config validation rather than silently downmixed here.
    #[arg(long = "audio-channels", env = "AUDIO_CHANNELS")]
    pub audio_channels: Option<u16>,

    #[arg(long = "chunk-size", env = "AUDIO_CHUNK_SIZE")]
    pub block_size: Option<usize>,

    #[arg(long = "gate-threshold", env = "GATE_THRESHOLD")]
    pub gate_threshold: Option<f32>,

    #[arg(long = "llm-model", env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    #[arg(long = "llm-base-url", env = "LLM_BASE_URL")]
    pub llm_endpoint: Option<String>,

    #[arg(long = "fast-rate-s", env = "FAST_RATE_S")]
    pub fast_rate_s: Option<f64>,

    #[arg(long = "history-s", env = "HISTORY_S")]
    pub history_s: Option<f64>,

    #[arg(long = "user-context")]
    pub user_context: Option<String>,

    /// Quantization hint for model download/selection (out of scope per §1);
    /// accepted and logged only, never consulted by the core pipeline.
    #[arg(long = "moshi-quantization", env = "MOSHI_QUANTIZATION")]
    pub moshi_quantization: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SttBackendChoice {
    Mock,
    Moshi,
    Kyutai,
}

impl SttBackendChoice {
    /// The special token ids this backend's vocabulary reserves (§9 Open
    /// Question). The worker refuses to emit tokens until this is non-empty.
    pub fn token_filter_set(self) -> HashSet<u32> {
        match self {
            SttBackendChoice::Mock => [0, 3].into_iter().collect(),
            SttBackendChoice::Moshi => [0, 3].into_iter().collect(),
            SttBackendChoice::Kyutai => [0].into_iter().collect(),
        }
    }
}

/// Resolve a fully-validated [`Config`] from, in increasing precedence: the
/// persisted settings file, environment variables, and CLI flags (§4.F).
pub fn resolve_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(persisted) = load_persisted_settings(&cli.settings_file)? {
        persisted.apply_to(&mut config);
    }

    if let Some(v) = &cli.osc_ip {
        config.osc_ip = v.clone();
    }
    if let Some(v) = cli.osc_port {
        config.osc_port = v;
    }
    if let Some(v) = &cli.audio_device_id {
        config.audio_device_id = Some(v.clone());
    }
    if let Some(v) = cli.sample_rate {
        config.sample_rate = v;
    }
    if let Some(v) = cli.block_size {
        config.block_size = v;
    }
    if let Some(v) = cli.gate_threshold {
        config.gate_threshold = v;
    }
    if let Some(v) = &cli.llm_model {
        config.llm_model = v.clone();
    }
    if let Some(v) = &cli.llm_endpoint {
        config.llm_endpoint = v.clone();
    }
    if let Some(v) = cli.fast_rate_s {
        config.fast_rate_s = v;
    }
    if let Some(v) = cli.history_s {
        config.history_s = v;
    }
    if cli.user_context.is_some() {
        config.user_context = cli.user_context.clone();
    }

    if let Some(channels) = cli.audio_channels {
        if channels != 1 {
            return Err(ConfigError::Validation {
                field: "audio_channels".into(),
                reason: format!("only mono (1) capture is supported, got {channels}"),
            });
        }
    }

    config.token_filter_set = cli.stt_backend.token_filter_set();
    config.clamp_rate_to_history();
    config.validate()?;
    Ok(config)
}

fn load_persisted_settings(path: &Path) -> Result<Option<PersistedSettings>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ConfigError::SettingsFile(format!("{}: {e}", path.display())))?;
    let persisted: PersistedSettings =
        toml::from_str(&raw).map_err(|e| ConfigError::SettingsFile(format!("{}: {e}", path.display())))?;
    Ok(Some(persisted))
}

/// Save the user-adjustable subset of `config` back to `path` (§3, §6). Best
/// effort: logged on failure, never fatal to the running session.
pub fn save_persisted_settings(path: &Path, config: &Config) {
    let persisted = PersistedSettings::capture_from(config);
    match toml::to_string_pretty(&persisted) {
        Ok(toml_text) => {
            if let Err(e) = fs::write(path, toml_text) {
                tracing::warn!("failed to write settings file {}: {}", path.display(), e);
            }
        }
        Err(e) => tracing::warn!("failed to serialize settings: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with_defaults() -> Cli {
        Cli::parse_from(["voxjockey"])
    }

    #[test]
    fn resolves_compiled_defaults_with_no_file_and_no_overrides() {
        let mut cli = cli_with_defaults();
        cli.settings_file = PathBuf::from("/nonexistent/voxjockey_settings.toml");
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.osc_port, Config::default().osc_port);
        assert_eq!(config.token_filter_set, [0u32, 3].into_iter().collect());
    }

    #[test]
    fn cli_flag_overrides_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut file = fs::File::create(&path).unwrap();
        let persisted = PersistedSettings {
            history_s: 45.0,
            fast_rate_s: 10.0,
            last_audio_device_id: None,
            osc_target_ip: "10.0.0.1".into(),
            osc_target_port: 9000,
        };
        write!(file, "{}", toml::to_string(&persisted).unwrap()).unwrap();

        let mut cli = Cli::parse_from(["voxjockey", "--osc-port", "7000"]);
        cli.settings_file = path;
        let config = resolve_config(&cli).unwrap();

        assert_eq!(config.osc_ip, "10.0.0.1");
        assert_eq!(config.osc_port, 7000);
        assert_eq!(config.history_s, 45.0);
    }

    #[test]
    fn rejects_non_mono_channel_count() {
        let mut cli = Cli::parse_from(["voxjockey", "--audio-channels", "2"]);
        cli.settings_file = PathBuf::from("/nonexistent/voxjockey_settings.toml");
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn kyutai_backend_filters_only_id_zero() {
        let mut cli = Cli::parse_from(["voxjockey", "--stt-backend", "kyutai"]);
        cli.settings_file = PathBuf::from("/nonexistent/voxjockey_settings.toml");
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.token_filter_set, [0u32].into_iter().collect());
    }
}
