pub mod stage;
pub mod supervisor;

pub use stage::Stage;
pub use supervisor::{BackendFactory, Supervisor};
