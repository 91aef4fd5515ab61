use std::fmt;

/// The three independently-supervised worker stages (§2, §4.E). The OSC
/// broadcaster (A) is not itself liveness-watched: it has no background
/// thread/task to crash, only a connect/disconnect state the Supervisor
/// drives directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Stt,
    FastBrain,
    SlowBrain,
    AudioCapture,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Stt => "stt",
            Stage::FastBrain => "fast_brain",
            Stage::SlowBrain => "slow_brain",
            Stage::AudioCapture => "audio_capture",
        };
        write!(f, "{name}")
    }
}
