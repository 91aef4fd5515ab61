use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the pipeline. Domain errors are nested so each
/// stage can match on its own variant without pulling in unrelated kinds.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Brain(#[from] BrainError),

    #[error(transparent)]
    Osc(#[from] OscError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("stage {stage} failed health check")]
    HealthCheckFailed { stage: String },

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("device disconnected")]
    DeviceDisconnected,

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("ring buffer overflow, dropped {count} frames")]
    RingOverflow { count: u64 },

    #[error("cpal stream error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("cpal build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("cpal play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("fatal audio error: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum SttError {
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("backend not ready")]
    NotReady,

    #[error("per-frame inference error: {0}")]
    FrameInference(String),

    #[error("token filter set is empty; model configuration must supply it explicitly")]
    TokenFilterUnset,

    #[error("hidden state lost, session must restart")]
    HiddenStateLost,
}

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("llm unreachable: {0}")]
    LlmUnreachable(String),

    #[error("llm call timed out after {0:?}")]
    LlmTimeout(Duration),

    #[error("llm returned malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug)]
pub enum OscError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("stage '{stage}' construction failed: {reason}")]
    ConstructionFailed { stage: String, reason: String },

    #[error("stage '{stage}' is permanently failed and will not be restarted")]
    PermanentlyFailed { stage: String },

    #[error("stage '{stage}' did not join within the deadline")]
    JoinTimeout { stage: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("environment variable error: {0}")]
    EnvVar(String),

    #[error("settings file error: {0}")]
    SettingsFile(String),
}

/// How the Supervisor should react to a given error.
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Fallback { to: String },
    Restart,
    Ignore,
    Fatal,
}

impl PipelineError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            PipelineError::Audio(AudioError::DeviceDisconnected) => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_secs(2),
            },
            PipelineError::Audio(AudioError::DeviceNotFound { .. }) => RecoveryStrategy::Fallback {
                to: "default".into(),
            },
            PipelineError::Audio(AudioError::RingOverflow { .. }) => RecoveryStrategy::Ignore,
            PipelineError::Audio(_) => RecoveryStrategy::Fatal,
            PipelineError::Stt(SttError::FrameInference(_)) => RecoveryStrategy::Ignore,
            PipelineError::Stt(SttError::ModelLoadFailed(_)) => RecoveryStrategy::Fatal,
            PipelineError::Stt(SttError::HiddenStateLost) => RecoveryStrategy::Restart,
            PipelineError::Stt(_) => RecoveryStrategy::Fatal,
            PipelineError::Brain(BrainError::LlmUnreachable(_))
            | PipelineError::Brain(BrainError::LlmTimeout(_))
            | PipelineError::Brain(BrainError::MalformedResponse(_)) => RecoveryStrategy::Ignore,
            PipelineError::Osc(_) => RecoveryStrategy::Ignore,
            PipelineError::Config(_) => RecoveryStrategy::Fatal,
            PipelineError::Supervisor(SupervisorError::ConstructionFailed { .. }) => {
                RecoveryStrategy::Fatal
            }
            PipelineError::Supervisor(SupervisorError::PermanentlyFailed { .. }) => {
                RecoveryStrategy::Fatal
            }
            PipelineError::Supervisor(SupervisorError::JoinTimeout { .. }) => {
                RecoveryStrategy::Restart
            }
            PipelineError::Fatal(_) | PipelineError::ShutdownRequested => RecoveryStrategy::Fatal,
            PipelineError::HealthCheckFailed { .. } => RecoveryStrategy::Restart,
        }
    }
}
