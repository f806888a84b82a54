//! Write-once device secrets on top of [`StoragePort`].
//!
//! | Secret          | Value key        | Flags key        | Bit |
//! |-----------------|------------------|------------------|-----|
//! | Symmetric key   | `aes_key`        | `aes_flags`      | 0   |
//! | POP             | `ble_pop`        | `ble_flags`      | 0   |
//! | Wi-Fi SSID      | `wifi_ssid`      | `wifi_flags`     | 0   |
//! | Wi-Fi password  | `wifi_pwd`       | `wifi_flags`     | 1   |
//! | Root CA         | `aws_root_ca`    | `auth_aws_flags` | 0   |
//! | Device cert     | `aws_thing_cert` | `auth_aws_flags` | 1   |
//! | Device key      | `aws_thing_key`  | `auth_aws_flags` | 2   |
//!
//! A setter refuses to overwrite while the has-bit is set; only the
//! matching `erase` makes the slot writable again.
//!
//! [`StoragePort`]: crate::app::ports::StoragePort

pub mod auth;
pub mod bundle;
pub mod key;
pub mod pop;
pub mod wifi;

use core::fmt;

use crate::app::ports::StorageError;

pub use auth::AuthMode;
pub use bundle::{Blob, CredentialSet};

/// Length of a 16-byte secret in its stored hex form.
pub const HEX_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretError {
    /// The has-bit is set; erase first.
    AlreadySet,
    /// The has-bit is clear.
    NotSet,
    /// Value has the wrong length or encoding.
    InvalidFormat,
    /// Backing store failed.
    Storage(StorageError),
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySet => write!(f, "already set"),
            Self::NotSet => write!(f, "not set"),
            Self::InvalidFormat => write!(f, "invalid format"),
            Self::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl From<StorageError> for SecretError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Decode exactly 32 hex characters (either case) into 16 bytes.
pub(crate) fn decode_hex16(hex: &[u8]) -> Result<[u8; 16], SecretError> {
    if hex.len() != HEX_SECRET_LEN {
        return Err(SecretError::InvalidFormat);
    }
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(hex)
        .map_err(|_| SecretError::InvalidFormat)?;
    bytes.try_into().map_err(|_| SecretError::InvalidFormat)
}

/// Byte comparison whose running time depends only on the lengths.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Stored blobs may carry a trailing NUL from older firmware.
pub(crate) fn strip_nul(mut v: Vec<u8>) -> Vec<u8> {
    while v.last() == Some(&0) {
        v.pop();
    }
    v
}
