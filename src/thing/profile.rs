//! Factory-written device profile: type name and hardware revision.
//!
//! | Field       | Value key   | Flags key     | Bit |
//! |-------------|-------------|---------------|-----|
//! | Type name   | `thing_type`| `thing_flags` | 0   |
//! | HW version  | `thing_hw`  | `thing_flags` | 1   |
//!
//! Both are write-once, like the secrets in [`crate::secrets`].

use log::{info, warn};

use crate::app::ports::StoragePort;
use crate::secrets::{SecretError, strip_nul};

/// Longest stored field, in bytes.
pub const FIELD_MAX_LEN: usize = 32;

const KEY_TYPE: &str = "thing_type";
const KEY_HW_VERSION: &str = "thing_hw";
const KEY_FLAGS: &str = "thing_flags";
const HAS_TYPE: u32 = 1 << 0;
const HAS_HW_VERSION: u32 = 1 << 1;

pub type Field = heapless::String<FIELD_MAX_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub type_name: Field,
    pub hw_version: Field,
}

fn set_field(
    storage: &mut dyn StoragePort,
    key: &str,
    flag: u32,
    value: &str,
) -> Result<(), SecretError> {
    if value.len() > FIELD_MAX_LEN {
        return Err(SecretError::InvalidFormat);
    }
    if storage.has_flags(KEY_FLAGS, flag) {
        return Err(SecretError::AlreadySet);
    }
    storage.set_blob(key, value.as_bytes())?;
    storage.set_flags(KEY_FLAGS, flag)?;
    Ok(())
}

fn load_field(storage: &dyn StoragePort, key: &str, flag: u32) -> Result<Field, SecretError> {
    if !storage.has_flags(KEY_FLAGS, flag) {
        return Err(SecretError::NotSet);
    }
    // Older firmware stored the terminating NUL too.
    let raw = strip_nul(storage.get_blob(key, FIELD_MAX_LEN + 1)?);
    let s = core::str::from_utf8(&raw).map_err(|_| SecretError::InvalidFormat)?;
    Field::try_from(s).map_err(|_| SecretError::InvalidFormat)
}

pub fn set_type(storage: &mut dyn StoragePort, type_name: &str) -> Result<(), SecretError> {
    set_field(storage, KEY_TYPE, HAS_TYPE, type_name)
}

pub fn set_hw_version(storage: &mut dyn StoragePort, hw_version: &str) -> Result<(), SecretError> {
    set_field(storage, KEY_HW_VERSION, HAS_HW_VERSION, hw_version)
}

pub fn has_type(storage: &dyn StoragePort) -> bool {
    storage.has_flags(KEY_FLAGS, HAS_TYPE)
}

pub fn has_hw_version(storage: &dyn StoragePort) -> bool {
    storage.has_flags(KEY_FLAGS, HAS_HW_VERSION)
}

/// Both fields are required to run the steady-state protocol.
pub fn load(storage: &dyn StoragePort) -> Result<Profile, SecretError> {
    let type_name = load_field(storage, KEY_TYPE, HAS_TYPE).inspect_err(|e| {
        warn!("Device type: {}", e);
    })?;
    let hw_version = load_field(storage, KEY_HW_VERSION, HAS_HW_VERSION).inspect_err(|e| {
        warn!("Hardware version: {}", e);
    })?;
    info!("Profile: type {}, hw {}", type_name, hw_version);
    Ok(Profile {
        type_name,
        hw_version,
    })
}
