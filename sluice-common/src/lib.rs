pub mod address;
pub mod clock;
pub mod error;
pub mod header;
pub mod logging;
pub mod message;
pub mod window;

pub use address::{Address, Addresses};
pub use clock::{Clock, FixedClock, LocalClock};
pub use error::{ConfigError, MessageError};
pub use message::{Message, MessageBuilder};
pub use tracing;
pub use window::{DeliveryWindows, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
