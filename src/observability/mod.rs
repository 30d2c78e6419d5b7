//! Observability for the RiceBot link
//!
//! Structured logging with `tracing`; every state transition, retry and
//! dispatch failure is logged with structured fields.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span};
