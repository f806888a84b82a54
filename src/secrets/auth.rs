//! Which credential bundle authenticates outbound connections.

use log::{error, info, warn};

use super::SecretError;
use super::bundle::{Blob, CredentialSet, is_complete, load};
use crate::app::ports::StoragePort;

const AUTH_FLAGS: &str = "auth_flags";
const USE_OTA: u32 = 1 << 0;
const USE_PROVISIONED: u32 = 1 << 1;

/// Persisted authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Factory bundle.
    #[default]
    Ota,
    /// Field-provisioned bundle.
    Provisioned,
}

/// Resolve the mode at boot.  `Provisioned` needs its flag plus a complete,
/// loadable bundle; anything less falls back to `Ota`.
pub fn init(storage: &dyn StoragePort) -> AuthMode {
    if !storage.has_flags(AUTH_FLAGS, USE_PROVISIONED) {
        info!("Auth: factory bundle");
        return AuthMode::Ota;
    }
    for blob in Blob::ALL {
        if !is_complete(storage, blob) {
            error!("Auth: {:?} incomplete, using factory bundle", blob);
            return AuthMode::Ota;
        }
        if let Err(e) = load(storage, blob) {
            error!("Auth: {:?} unreadable ({}), using factory bundle", blob, e);
            return AuthMode::Ota;
        }
    }
    info!("Auth: provisioned bundle");
    AuthMode::Provisioned
}

pub fn use_provisioned(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    storage.set_flags(AUTH_FLAGS, USE_PROVISIONED)?;
    storage.unset_flags(AUTH_FLAGS, USE_OTA)?;
    info!("Auth mode -> Provisioned");
    Ok(())
}

pub fn use_ota(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    storage.set_flags(AUTH_FLAGS, USE_OTA)?;
    storage.unset_flags(AUTH_FLAGS, USE_PROVISIONED)?;
    info!("Auth mode -> Ota");
    Ok(())
}

/// Credentials for `mode`.
pub fn credentials(storage: &dyn StoragePort, mode: AuthMode) -> Result<CredentialSet, SecretError> {
    let set = match mode {
        AuthMode::Provisioned => CredentialSet::load_provisioned(storage),
        AuthMode::Ota => CredentialSet::load_factory(storage),
    };
    if let Err(e) = &set {
        warn!("Auth: no {:?} credentials: {}", mode, e);
    }
    set
}
