//! Wire-level vocabulary shared with the cooker
//!
//! Topic names, topic validation and the JSON messages the app, the
//! simulator and the ESP32 firmware exchange.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
