//! Application core: the top-level loop and its port boundary.
//!
//! The protocol engines (`provision`, `ota`, `thing`) hold the business
//! rules.  All interaction with radios, flash and the chip happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod ports;
pub mod service;
