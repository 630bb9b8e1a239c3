//! Observability for the edge-mqtt client
//!
//! The library only emits `tracing` events. Binaries pick a subscriber with
//! [`init_logging`] or [`init_default_logging`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LogSettings};
