//! Testing utilities and mock implementations
//!
//! Lets the connection service be driven end to end without a broker.

pub mod mocks;

pub use mocks::*;
