use voxjockey_audio::ring_buffer::PcmFrame;
use voxjockey_foundation::error::SttError;

/// A transcription candidate surfaced by a backend before the worker applies
/// the configured `token_filter_set` and the common surface decode.
#[derive(Debug, Clone)]
pub struct RawToken {
    pub id: u32,
    pub piece: String,
}

/// The audio tokenizer + streaming LM pairing, abstracted so the worker can
/// swap backends without caring whether codebooks come from Mimi/Moshi,
/// Kyutai's STT stack, or a deterministic mock. Each backend owns its model
/// state internally and is driven one frame at a time.
///
/// Token-id discrimination between "this is a transcription candidate" and
/// "this is internal/audio-stream output" is backend-specific and happens
/// inside `step`; the worker only ever sees candidates worth surface-decoding.
pub trait SttBackend: Send {
    /// Load model weights, tokenizer, and LM generator. Must be called
    /// exactly once before `step`.
    fn init(&mut self) -> Result<(), SttError>;

    /// Advance the model by exactly one frame. Returns at most one
    /// candidate token. `Err(SttError::HiddenStateLost)` signals the
    /// session cannot continue and the worker must restart from `Loading`.
    fn step(&mut self, frame: &PcmFrame) -> Result<Option<RawToken>, SttError>;

    /// Human-readable backend name for logging.
    fn name(&self) -> &'static str;
}

impl SttBackend for Box<dyn SttBackend> {
    fn init(&mut self) -> Result<(), SttError> {
        (**self).init()
    }

    fn step(&mut self, frame: &PcmFrame) -> Result<Option<RawToken>, SttError> {
        (**self).step(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Deterministic backend for tests: yields a fixed token sequence regardless
/// of audio content, with the special ids a real Moshika-style vocabulary
/// reserves for padding/continuation.
pub struct MockBackend {
    script: Vec<RawToken>,
    cursor: usize,
    initialized: bool,
    fail_hidden_state_after: Option<usize>,
}

impl MockBackend {
    pub fn new(script: Vec<RawToken>) -> Self {
        Self {
            script,
            cursor: 0,
            initialized: false,
            fail_hidden_state_after: None,
        }
    }

    /// A backend that loses its hidden state after `n` successful steps, for
    /// exercising the worker's restart-from-`Loading` path.
    pub fn with_hidden_state_loss_after(script: Vec<RawToken>, n: usize) -> Self {
        Self {
            script,
            cursor: 0,
            initialized: false,
            fail_hidden_state_after: Some(n),
        }
    }
}

impl SttBackend for MockBackend {
    fn init(&mut self) -> Result<(), SttError> {
        self.initialized = true;
        Ok(())
    }

    fn step(&mut self, _frame: &PcmFrame) -> Result<Option<RawToken>, SttError> {
        if !self.initialized {
            return Err(SttError::NotReady);
        }
        if let Some(limit) = self.fail_hidden_state_after {
            if self.cursor >= limit {
                return Err(SttError::HiddenStateLost);
            }
        }
        if self.cursor >= self.script.len() {
            return Ok(None);
        }
        let token = self.script[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(token))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Stub for a Moshika/Mimi-style streaming backend (sentencepiece +
/// codebook LM). Concrete model loading, weight quantization, and the
/// inference loop are out of scope; this exists to pin the shape a real
/// integration would fill in behind the same trait.
pub struct MoshiBackend {
    pub model_repo: String,
    pub special_ids: Vec<u32>,
}

impl MoshiBackend {
    pub fn new(model_repo: impl Into<String>) -> Self {
        Self {
            model_repo: model_repo.into(),
            special_ids: vec![0, 3],
        }
    }
}

impl SttBackend for MoshiBackend {
    fn init(&mut self) -> Result<(), SttError> {
        Err(SttError::ModelLoadFailed(format!(
            "moshi backend requires model assets for {} (not bundled)",
            self.model_repo
        )))
    }

    fn step(&mut self, _frame: &PcmFrame) -> Result<Option<RawToken>, SttError> {
        Err(SttError::NotReady)
    }

    fn name(&self) -> &'static str {
        "moshi"
    }
}

/// Stub for a Kyutai STT-style backend (distinct vocabulary/codebook
/// layout). See [`MoshiBackend`] for why this is a stub.
pub struct KyutaiBackend {
    pub model_repo: String,
}

impl KyutaiBackend {
    pub fn new(model_repo: impl Into<String>) -> Self {
        Self {
            model_repo: model_repo.into(),
        }
    }
}

impl SttBackend for KyutaiBackend {
    fn init(&mut self) -> Result<(), SttError> {
        Err(SttError::ModelLoadFailed(format!(
            "kyutai backend requires model assets for {} (not bundled)",
            self.model_repo
        )))
    }

    fn step(&mut self, _frame: &PcmFrame) -> Result<Option<RawToken>, SttError> {
        Err(SttError::NotReady)
    }

    fn name(&self) -> &'static str {
        "kyutai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame() -> PcmFrame {
        PcmFrame {
            samples: vec![0.0; 1920],
            timestamp: Instant::now(),
            sample_rate: 24_000,
        }
    }

    #[test]
    fn mock_backend_requires_init_before_step() {
        let mut backend = MockBackend::new(vec![]);
        assert!(matches!(backend.step(&frame()), Err(SttError::NotReady)));
    }

    #[test]
    fn mock_backend_plays_back_script_in_order() {
        let mut backend = MockBackend::new(vec![
            RawToken { id: 10, piece: "▁hello".into() },
            RawToken { id: 11, piece: "▁world".into() },
        ]);
        backend.init().unwrap();
        assert_eq!(backend.step(&frame()).unwrap().unwrap().piece, "▁hello");
        assert_eq!(backend.step(&frame()).unwrap().unwrap().piece, "▁world");
        assert!(backend.step(&frame()).unwrap().is_none());
    }

    #[test]
    fn mock_backend_reports_hidden_state_loss() {
        let mut backend = MockBackend::with_hidden_state_loss_after(
            vec![RawToken { id: 10, piece: "▁hi".into() }],
            1,
        );
        backend.init().unwrap();
        assert!(backend.step(&frame()).unwrap().is_some());
        assert!(matches!(backend.step(&frame()), Err(SttError::HiddenStateLost)));
    }
}
