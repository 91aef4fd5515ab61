pub mod backend;
pub mod token_channel;
pub mod types;
pub mod worker;

pub use backend::{KyutaiBackend, MoshiBackend, RawToken, SttBackend};
pub use token_channel::{fast_token_channel, DropOldestSender};
pub use types::{decode_piece, TextToken, WORD_START_MARKER};
pub use worker::{SttWorker, SttWorkerHandle};
