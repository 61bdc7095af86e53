//! Delivery gate: sends mail straight away, or holds it in a spool until a
//! configured delivery window opens.

pub mod error;
pub mod gate;
pub mod transport;

pub use error::{DeliveryError, TransportError};
pub use gate::{
    DeliveryGate, DeliveryMode, DeliveryReceipt, FlushConfig, FlushPolicy, FlushReport,
};
pub use transport::{SmtpConfig, SmtpTransport, TlsMode, Transport, TransportReceipt};
