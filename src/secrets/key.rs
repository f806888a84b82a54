//! Secure-channel symmetric key (`aes_key`).

use log::{error, info};

use super::{HEX_SECRET_LEN, SecretError, decode_hex16, strip_nul};
use crate::app::ports::StoragePort;
use crate::crypto::{ChannelError, SecureChannel};

const KEY_VALUE: &str = "aes_key";
const KEY_FLAGS: &str = "aes_flags";
const HAS_KEY: u32 = 1 << 0;

pub fn is_set(storage: &dyn StoragePort) -> bool {
    storage.has_flags(KEY_FLAGS, HAS_KEY)
}

/// Store the key as 32 hex characters.  Write-once.
pub fn set(storage: &mut dyn StoragePort, hex: &str) -> Result<(), SecretError> {
    if is_set(storage) {
        error!("Symmetric key already set");
        return Err(SecretError::AlreadySet);
    }
    decode_hex16(hex.as_bytes())?;
    storage.set_blob(KEY_VALUE, hex.as_bytes())?;
    storage.set_flags(KEY_FLAGS, HAS_KEY)?;
    info!("Symmetric key stored");
    Ok(())
}

pub fn erase(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    storage.erase_blob(KEY_VALUE)?;
    storage.unset_flags(KEY_FLAGS, HAS_KEY)?;
    Ok(())
}

/// Raw 16-byte key.
pub fn load(storage: &dyn StoragePort) -> Result<[u8; 16], SecretError> {
    if !is_set(storage) {
        return Err(SecretError::NotSet);
    }
    let hex = strip_nul(storage.get_blob(KEY_VALUE, HEX_SECRET_LEN + 1)?);
    decode_hex16(&hex)
}

/// Build the secure channel from the stored key.
pub fn channel(storage: &dyn StoragePort) -> Result<SecureChannel, ChannelError> {
    load(storage).map(SecureChannel::new).map_err(|e| {
        error!("No usable symmetric key: {}", e);
        ChannelError::NoKey
    })
}
