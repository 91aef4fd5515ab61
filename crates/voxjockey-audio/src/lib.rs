pub mod agc;
pub mod capture;
pub mod device;
pub mod ring_buffer;
pub mod watchdog;

pub use agc::*;
pub use capture::*;
pub use device::*;
pub use ring_buffer::*;
pub use watchdog::*;
