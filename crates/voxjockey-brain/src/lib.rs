pub mod buffers;
pub mod fast_brain;
pub mod llm_client;
pub mod slow_brain;

pub use buffers::{AccumulationBuffer, ContextBuffer, TranscriptLog};
pub use fast_brain::{FastBrain, FastBrainHandle, FastBrainState, PromptCallback};
pub use llm_client::{ChatMessage, LlmClient};
pub use slow_brain::{SlowBrain, SlowBrainHandle, SlowBrainState, SummaryCallback};
