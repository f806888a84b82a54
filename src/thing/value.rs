//! Value documents exchanged with the cloud.
//!
//! Published (wrapped, the inner document travels as a string):
//!
//! ```json
//! { "value": "{\"thing_value\":{\"readwrite\":{..},\"read\":{..,\"hw_version\":..,\"fw_version\":..}},
//!              \"mobile_value\":{\"readwrite\":{\"network\":\"online\"},\"read\":{\"nickname\":..,\"sw_version\":..}}}" }
//! ```
//!
//! Received: the same inner document, unwrapped.  The `mobile_value` half
//! is companion-app bookkeeping that the device stores and echoes back.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ThingError;
use crate::types::{DeviceType, ThingValue};

/// Longest companion string kept, in bytes.
pub const MOBILE_STRING_MAX_LEN: usize = 15;

pub type MobileString = heapless::String<MOBILE_STRING_MAX_LEN>;

/// Reported network status; the device only publishes while online.
const NETWORK_ONLINE: &str = "online";

/// Longest prefix of `s` that fits, cut on a character boundary.
pub fn truncate(s: &str) -> MobileString {
    let mut end = s.len().min(MOBILE_STRING_MAX_LEN);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = MobileString::new();
    // Fits by construction.
    let _ = out.push_str(&s[..end]);
    out
}

// ── Companion value store ─────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MobileState {
    pub network: MobileString,
    pub nickname: MobileString,
    pub sw_version: MobileString,
}

#[derive(Deserialize)]
struct MobileDocIn<'a> {
    #[serde(borrow)]
    readwrite: MobileReadWriteIn<'a>,
    #[serde(borrow)]
    read: MobileReadIn<'a>,
}

#[derive(Deserialize)]
struct MobileReadWriteIn<'a> {
    network: &'a str,
}

#[derive(Deserialize)]
struct MobileReadIn<'a> {
    nickname: &'a str,
    sw_version: &'a str,
}

#[derive(Serialize)]
struct MobileDocOut<'a> {
    readwrite: MobileReadWriteOut,
    read: MobileReadOut<'a>,
}

#[derive(Serialize)]
struct MobileReadWriteOut {
    network: &'static str,
}

#[derive(Serialize)]
struct MobileReadOut<'a> {
    nickname: &'a str,
    sw_version: &'a str,
}

/// Companion strings, shared between the broker path and publishers.
pub struct MobileValue {
    state: Mutex<CriticalSectionRawMutex, MobileState>,
}

impl MobileValue {
    pub fn new() -> Self {
        let mut network = MobileString::new();
        let _ = network.push_str(NETWORK_ONLINE);
        Self {
            state: Mutex::new(MobileState {
                network,
                ..MobileState::default()
            }),
        }
    }

    pub fn snapshot(&self) -> Result<MobileState, ThingError> {
        self.state
            .try_lock()
            .map(|s| s.clone())
            .map_err(|_| ThingError::BufferBusy)
    }

    /// Store the `mobile_value` object of a received document.  All three
    /// strings must be present.
    pub fn set_from(&self, mobile_value: &Value) -> Result<(), ThingError> {
        let doc = MobileDocIn::deserialize(mobile_value).map_err(|_| ThingError::MobileRejected)?;
        let mut state = self.state.try_lock().map_err(|_| ThingError::BufferBusy)?;
        state.network = truncate(doc.readwrite.network);
        state.nickname = truncate(doc.read.nickname);
        state.sw_version = truncate(doc.read.sw_version);
        Ok(())
    }
}

impl Default for MobileValue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Documents ─────────────────────────────────────────────────

#[derive(Serialize)]
struct ValueDoc<'a> {
    thing_value: ThingValue,
    mobile_value: MobileDocOut<'a>,
}

#[derive(Serialize)]
struct Wrapped<'a> {
    value: &'a str,
}

/// Build the published document.  Fails `TooLarge` past `max_len` bytes.
pub fn encode(
    device: &dyn DeviceType,
    hw_version: &str,
    mobile: &MobileValue,
    max_len: usize,
) -> Result<Vec<u8>, ThingError> {
    let mut thing_value = ThingValue::default();
    if !device.get_value_json(&mut thing_value) {
        return Err(ThingError::TypeRejected);
    }
    thing_value
        .read
        .insert("hw_version".into(), Value::from(hw_version));
    thing_value
        .read
        .insert("fw_version".into(), Value::from(env!("CARGO_PKG_VERSION")));

    let m = mobile.snapshot()?;
    let inner = serde_json::to_string(&ValueDoc {
        thing_value,
        mobile_value: MobileDocOut {
            readwrite: MobileReadWriteOut {
                network: NETWORK_ONLINE,
            },
            read: MobileReadOut {
                nickname: &m.nickname,
                sw_version: &m.sw_version,
            },
        },
    })
    .map_err(|_| ThingError::Encode)?;

    let out = serde_json::to_vec(&Wrapped { value: &inner }).map_err(|_| ThingError::Encode)?;
    if out.len() > max_len {
        error!("Value document is {} bytes, limit {}", out.len(), max_len);
        return Err(ThingError::TooLarge);
    }
    Ok(out)
}

/// Apply a received document: companion strings first, then the device
/// type's `thing_value`.
pub fn apply(
    data: &[u8],
    device: &dyn DeviceType,
    mobile: &MobileValue,
) -> Result<(), ThingError> {
    let doc: Value = serde_json::from_slice(data).map_err(|_| ThingError::MalformedJson)?;
    let mobile_value = doc.get("mobile_value").ok_or(ThingError::MobileRejected)?;
    mobile.set_from(mobile_value)?;
    let thing_value = doc
        .get("thing_value")
        .and_then(Value::as_object)
        .ok_or(ThingError::NotAnObject)?;
    if !device.set_value_json(thing_value) {
        return Err(ThingError::TypeRejected);
    }
    Ok(())
}

#[derive(Deserialize)]
struct OtaUrlDoc {
    do_ota: bool,
    otaurl: String,
}

/// Extract the update URL.  `Ok(None)` when the cloud says not to update.
pub fn parse_ota_url(data: &[u8], max_len: usize) -> Result<Option<String>, ThingError> {
    let doc: OtaUrlDoc = serde_json::from_slice(data).map_err(|_| ThingError::MalformedJson)?;
    if !doc.do_ota {
        return Ok(None);
    }
    if doc.otaurl.is_empty() || doc.otaurl.len() + 1 > max_len {
        return Err(ThingError::InvalidOtaUrl);
    }
    Ok(Some(doc.otaurl))
}
