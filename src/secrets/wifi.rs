//! Station credentials.  SSID and password are independent write-once
//! slots sharing one flag word; they are always erased together.

use log::error;

use super::{SecretError, strip_nul};
use crate::app::ports::StoragePort;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;

const SSID_VALUE: &str = "wifi_ssid";
const PASSWORD_VALUE: &str = "wifi_pwd";
const WIFI_FLAGS: &str = "wifi_flags";
const HAS_SSID: u32 = 1 << 0;
const HAS_PASSWORD: u32 = 1 << 1;

#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: heapless::String<SSID_MAX_LEN>,
    pub password: heapless::String<PASSWORD_MAX_LEN>,
}

impl core::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .finish_non_exhaustive()
    }
}

pub fn has_ssid(storage: &dyn StoragePort) -> bool {
    storage.has_flags(WIFI_FLAGS, HAS_SSID)
}

pub fn has_password(storage: &dyn StoragePort) -> bool {
    storage.has_flags(WIFI_FLAGS, HAS_PASSWORD)
}

pub fn set_ssid(storage: &mut dyn StoragePort, ssid: &str) -> Result<(), SecretError> {
    if has_ssid(storage) {
        error!("SSID already set");
        return Err(SecretError::AlreadySet);
    }
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
        return Err(SecretError::InvalidFormat);
    }
    storage.set_blob(SSID_VALUE, ssid.as_bytes())?;
    storage.set_flags(WIFI_FLAGS, HAS_SSID)?;
    Ok(())
}

pub fn set_password(storage: &mut dyn StoragePort, password: &str) -> Result<(), SecretError> {
    if has_password(storage) {
        error!("Wi-Fi password already set");
        return Err(SecretError::AlreadySet);
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(SecretError::InvalidFormat);
    }
    storage.set_blob(PASSWORD_VALUE, password.as_bytes())?;
    storage.set_flags(WIFI_FLAGS, HAS_PASSWORD)?;
    Ok(())
}

/// Store both halves.  Stops at the first failure.
pub fn set(storage: &mut dyn StoragePort, ssid: &str, password: &str) -> Result<(), SecretError> {
    set_ssid(storage, ssid)?;
    set_password(storage, password)
}

pub fn erase(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    storage.erase_blob(SSID_VALUE)?;
    storage.erase_blob(PASSWORD_VALUE)?;
    storage.unset_flags(WIFI_FLAGS, HAS_SSID | HAS_PASSWORD)?;
    Ok(())
}

pub fn load(storage: &dyn StoragePort) -> Result<WifiCredentials, SecretError> {
    if !has_ssid(storage) || !has_password(storage) {
        return Err(SecretError::NotSet);
    }
    let ssid = strip_nul(storage.get_blob(SSID_VALUE, SSID_MAX_LEN + 1)?);
    let password = strip_nul(storage.get_blob(PASSWORD_VALUE, PASSWORD_MAX_LEN + 1)?);
    Ok(WifiCredentials {
        ssid: to_string(&ssid)?,
        password: to_string(&password)?,
    })
}

fn to_string<const N: usize>(bytes: &[u8]) -> Result<heapless::String<N>, SecretError> {
    let s = core::str::from_utf8(bytes).map_err(|_| SecretError::InvalidFormat)?;
    heapless::String::try_from(s).map_err(|_| SecretError::InvalidFormat)
}
