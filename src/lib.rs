//! Thing firmware core library.
//!
//! Exposes the protocol engines and port adapters for the ESP-IDF binary
//! and for host-side integration testing.  All ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module; host
//! builds get in-memory simulation back-ends.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channels;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod fsm;
pub mod ota;
pub mod provision;
pub mod secrets;
pub mod thing;
pub mod types;

pub use error::{Error, Result};
