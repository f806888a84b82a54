//! Unified error type for the thing firmware core.
//!
//! Each subsystem owns a small, `Copy`-able error enum next to its code
//! (`StorageError` in the ports, `OtaError` in the OTA pipeline, ...).
//! Boot code and anything that crosses subsystem boundaries funnels them
//! into [`Error`] with `?`.

use core::fmt;

use crate::app::ports::{BrokerError, ConfigError, NetworkError, RadioError, StorageError};
use crate::crypto::ChannelError;
use crate::events::BusError;
use crate::ota::OtaError;
use crate::provision::ProvisionError;
use crate::secrets::SecretError;
use crate::thing::ThingError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware core converts into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Persistent key-value store failure.
    Storage(StorageError),
    /// Secure channel framing or key failure.
    Channel(ChannelError),
    /// Event queue rejected an event.
    Bus(BusError),
    /// Write-once secret could not be read or written.
    Secret(SecretError),
    /// A provisioning step failed.
    Provision(ProvisionError),
    /// Firmware update failed.
    Ota(OtaError),
    /// Steady-state protocol step failed.
    Thing(ThingError),
    /// Short-range radio collaborator failed.
    Radio(RadioError),
    /// Local network collaborator failed.
    Network(NetworkError),
    /// Message broker collaborator failed.
    Broker(BrokerError),
    /// Persisted configuration is unusable.
    Config(ConfigError),
    /// Boot-time initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Channel(e) => write!(f, "secure channel: {e}"),
            Self::Bus(e) => write!(f, "event bus: {e}"),
            Self::Secret(e) => write!(f, "secret: {e}"),
            Self::Provision(e) => write!(f, "provision: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Thing(e) => write!(f, "thing: {e}"),
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Network(e) => write!(f, "network: {e}"),
            Self::Broker(e) => write!(f, "broker: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(e: $source) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from! {
    StorageError => Storage,
    ChannelError => Channel,
    BusError => Bus,
    SecretError => Secret,
    ProvisionError => Provision,
    OtaError => Ota,
    ThingError => Thing,
    RadioError => Radio,
    NetworkError => Network,
    BrokerError => Broker,
    ConfigError => Config,
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
