//! Structured logging for feedmux.
//!
//! JSON output in production, pretty output for development.

pub mod error;
pub mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
