//! Process-level wiring for the sluice mail gate: configuration loading and
//! the long-running flusher.

pub mod controller;

pub use controller::{CONFIG_ENV, Sluice, find_config_file};
