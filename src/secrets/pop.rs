//! Proof of possession (`ble_pop`).
//!
//! Stored as 32 hex characters.  A companion proves possession by sending
//! the same 32 characters through the secure channel.

use log::{error, info, warn};

use super::{HEX_SECRET_LEN, SecretError, constant_time_eq, decode_hex16, strip_nul};
use crate::app::ports::StoragePort;

const POP_VALUE: &str = "ble_pop";
const POP_FLAGS: &str = "ble_flags";
const HAS_POP: u32 = 1 << 0;

pub fn is_set(storage: &dyn StoragePort) -> bool {
    storage.has_flags(POP_FLAGS, HAS_POP)
}

/// Store the POP.  Write-once.
pub fn set(storage: &mut dyn StoragePort, hex: &str) -> Result<(), SecretError> {
    if is_set(storage) {
        error!("POP already set");
        return Err(SecretError::AlreadySet);
    }
    decode_hex16(hex.as_bytes())?;
    storage.set_blob(POP_VALUE, hex.as_bytes())?;
    storage.set_flags(POP_FLAGS, HAS_POP)?;
    info!("POP stored");
    Ok(())
}

pub fn erase(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    storage.erase_blob(POP_VALUE)?;
    storage.unset_flags(POP_FLAGS, HAS_POP)?;
    Ok(())
}

/// Compare the first 32 bytes of `candidate` with the stored POP.
pub fn verify(storage: &dyn StoragePort, candidate: &[u8]) -> Result<bool, SecretError> {
    if !is_set(storage) {
        return Err(SecretError::NotSet);
    }
    let stored = strip_nul(storage.get_blob(POP_VALUE, HEX_SECRET_LEN + 1)?);
    if candidate.len() < HEX_SECRET_LEN {
        warn!("POP candidate too short ({} bytes)", candidate.len());
        return Ok(false);
    }
    Ok(constant_time_eq(&stored, &candidate[..HEX_SECRET_LEN]))
}
