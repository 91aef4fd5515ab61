pub mod broadcaster;
pub mod types;

pub use broadcaster::OscBroadcaster;
pub use types::{PromptResult, SummaryResult, DEFAULT_MOOD, DEFAULT_STYLE};
