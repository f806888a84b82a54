//! Port traits: the hexagonal boundary between the protocol engines and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ThingService (domain)
//! ```
//!
//! Driven adapters (NVS, BLE GATT server, Wi-Fi station, MQTT client,
//! firmware partition) implement these traits.  The engines receive them
//! through [`Platform`](super::service::Platform), so the domain core never
//! touches the radio or flash directly.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** keys are at most 15 bytes (NVS limit); longer keys are
//!   rejected rather than truncated so two secrets can never alias.
//! - All port errors are typed; callers must handle every variant explicitly.

use crate::config::SystemConfig;

/// Longest key the persistent store accepts.
pub const STORAGE_KEY_MAX_LEN: usize = 15;

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges should be rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value store with independent flag words and blobs.
///
/// Flag words are `u32` bitsets read-modify-written by
/// [`set_flags`](Self::set_flags) / [`unset_flags`](Self::unset_flags); a
/// missing word reads as zero.  Blobs are opaque byte strings.
pub trait StoragePort {
    /// `true` only if **every** bit of `mask` is set in the flag word.
    fn has_flags(&self, key: &str, mask: u32) -> bool;

    /// OR `mask` into the flag word.
    fn set_flags(&mut self, key: &str, mask: u32) -> Result<(), StorageError>;

    /// Clear `mask` from the flag word.
    fn unset_flags(&mut self, key: &str, mask: u32) -> Result<(), StorageError>;

    /// Read a blob.  Fails with [`StorageError::TooLarge`] if the stored
    /// value is longer than `max_len`.
    fn get_blob(&self, key: &str, max_len: usize) -> Result<Vec<u8>, StorageError>;

    /// Replace a blob atomically.
    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Append `row` plus a trailing `'\n'` to a blob.  Nothing is written if
    /// the result would exceed `max_len`.
    fn append_blob(&mut self, key: &str, row: &[u8], max_len: usize) -> Result<(), StorageError>;

    /// Delete a blob.  Returns `Ok(())` even if the key didn't exist.
    fn erase_blob(&mut self, key: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Short-range radio port (BLE GATT provisioning service)
// ───────────────────────────────────────────────────────────────

/// The provisioning radio.  Inbound characteristic writes do not pass
/// through this trait; the adapter copies them into the shared
/// [`Inbox`](crate::channels::Inbox) from its own callback context.
pub trait RadioPort {
    /// Register the provisioning service and start advertising as `name`.
    fn start(&mut self, name: &str) -> Result<(), RadioError>;

    /// Send one notification on the status characteristic.
    fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Local network port (Wi-Fi station)
// ───────────────────────────────────────────────────────────────

/// One access point reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: heapless::String<32>,
    pub rssi: i8,
}

/// Wi-Fi station control.  Completion of `start`, `start_scan` and
/// `connect` is reported asynchronously through the event bus.
pub trait NetworkPort {
    /// Bring the station up with stored credentials (raises `WifiStart`).
    fn start(&mut self) -> Result<(), NetworkError>;

    /// Begin a non-blocking scan (raises `WifiScanDone`).
    fn start_scan(&mut self) -> Result<(), NetworkError>;

    /// Results of the last scan, at most `max` entries, strongest first.
    fn scan_results(&mut self, max: usize) -> Result<Vec<AccessPoint>, NetworkError>;

    /// Attempt association (raises `WifiConnected` or `WifiDisconnected`).
    fn connect(&mut self) -> Result<(), NetworkError>;

    /// Tear the station down and restart it with new credentials.
    fn reinit(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;
}

// ───────────────────────────────────────────────────────────────
// Message broker port (MQTT client)
// ───────────────────────────────────────────────────────────────

/// Broker client.  Received data is routed by topic into the
/// [`Inbox`](crate::channels::Inbox) by the adapter.
pub trait BrokerPort {
    /// Connect using the active credential bundle (raises `MqttConnected`).
    fn start(&mut self, bundle: &crate::secrets::bundle::CredentialSet) -> Result<(), BrokerError>;

    /// Disconnect and release the client.
    fn stop(&mut self) -> Result<(), BrokerError>;

    /// Subscribe to every topic (raises `MqttSubscribed` once).
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError>;

    /// Publish one message.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

// ───────────────────────────────────────────────────────────────
// System port (reset)
// ───────────────────────────────────────────────────────────────

/// Chip-level control.
pub trait SystemPort {
    /// Full device restart.  Does not return on hardware.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Key longer than [`STORAGE_KEY_MAX_LEN`].
    KeyTooLong,
    /// Value exceeds the caller's capacity.
    TooLarge,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`RadioPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Stack or controller failed to come up.
    InitFailed,
    /// No companion connected / notify characteristic not registered.
    NotConnected,
    /// Payload does not fit in one notification.
    PayloadTooLarge,
}

/// Errors from [`NetworkPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Driver refused the request.
    Driver,
    /// Credentials missing or malformed.
    InvalidCredentials,
    /// Scan results requested before a scan completed.
    ScanNotReady,
}

/// Errors from [`BrokerPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// Client not started or already stopped.
    NotConnected,
    /// Client rejected the request.
    Rejected,
    /// Payload exceeds the client buffer.
    PayloadTooLarge,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::KeyTooLong => write!(f, "key longer than {} bytes", STORAGE_KEY_MAX_LEN),
            Self::TooLarge => write!(f, "value too large"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InitFailed => write!(f, "radio init failed"),
            Self::NotConnected => write!(f, "no companion connected"),
            Self::PayloadTooLarge => write!(f, "notification too large"),
        }
    }
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Driver => write!(f, "wifi driver error"),
            Self::InvalidCredentials => write!(f, "invalid wifi credentials"),
            Self::ScanNotReady => write!(f, "scan results not ready"),
        }
    }
}

impl core::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "broker not connected"),
            Self::Rejected => write!(f, "broker rejected request"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}
