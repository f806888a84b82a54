//! Cloud credential bundle: root CA, device certificate, device key.
//!
//! Each blob is built by appending PEM rows one chunk at a time and is
//! declared complete by the sender.  A blob with its complete bit set
//! refuses further appends until erased.

use log::{error, info};

use super::{SecretError, strip_nul};
use crate::app::ports::{StorageError, StoragePort};

const BUNDLE_FLAGS: &str = "auth_aws_flags";

/// One of the three bundle members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blob {
    RootCa,
    ThingCert,
    ThingKey,
}

impl Blob {
    pub const ALL: [Blob; 3] = [Blob::RootCa, Blob::ThingCert, Blob::ThingKey];

    /// Field-provisioned storage key.
    pub const fn key(self) -> &'static str {
        match self {
            Self::RootCa => "aws_root_ca",
            Self::ThingCert => "aws_thing_cert",
            Self::ThingKey => "aws_thing_key",
        }
    }

    /// Factory bundle storage key.
    pub const fn factory_key(self) -> &'static str {
        match self {
            Self::RootCa => "ota_root_ca",
            Self::ThingCert => "ota_thing_cert",
            Self::ThingKey => "ota_thing_key",
        }
    }

    /// Complete bit in `auth_aws_flags`.
    pub const fn flag(self) -> u32 {
        match self {
            Self::RootCa => 1 << 0,
            Self::ThingCert => 1 << 1,
            Self::ThingKey => 1 << 2,
        }
    }

    /// Capacity in bytes, including row separators.
    pub const fn max_len(self) -> usize {
        match self {
            Self::RootCa => 1280,
            Self::ThingCert => 1536,
            Self::ThingKey => 2048,
        }
    }
}

pub fn is_complete(storage: &dyn StoragePort, blob: Blob) -> bool {
    storage.has_flags(BUNDLE_FLAGS, blob.flag())
}

/// Append one row.  Fails without writing if the blob is already
/// complete or the row would overflow its capacity.
pub fn append(storage: &mut dyn StoragePort, blob: Blob, row: &str) -> Result<(), SecretError> {
    if is_complete(storage, blob) {
        error!("{:?} already complete", blob);
        return Err(SecretError::AlreadySet);
    }
    storage
        .append_blob(blob.key(), row.as_bytes(), blob.max_len())
        .map_err(|e| {
            if e == StorageError::TooLarge {
                error!("{:?} chunk overflows {} bytes", blob, blob.max_len());
            }
            SecretError::from(e)
        })
}

pub fn mark_complete(storage: &mut dyn StoragePort, blob: Blob) -> Result<(), SecretError> {
    storage.set_flags(BUNDLE_FLAGS, blob.flag())?;
    info!("{:?} complete", blob);
    Ok(())
}

pub fn erase(storage: &mut dyn StoragePort, blob: Blob) -> Result<(), SecretError> {
    storage.erase_blob(blob.key())?;
    storage.unset_flags(BUNDLE_FLAGS, blob.flag())?;
    Ok(())
}

pub fn erase_all(storage: &mut dyn StoragePort) -> Result<(), SecretError> {
    for blob in Blob::ALL {
        erase(storage, blob)?;
    }
    Ok(())
}

/// Read a complete field-provisioned blob.
pub fn load(storage: &dyn StoragePort, blob: Blob) -> Result<Vec<u8>, SecretError> {
    if !is_complete(storage, blob) {
        return Err(SecretError::NotSet);
    }
    Ok(strip_nul(storage.get_blob(blob.key(), blob.max_len())?))
}

/// Certificate material for one authentication mode.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub root_ca: Vec<u8>,
    pub thing_cert: Vec<u8>,
    pub thing_key: Vec<u8>,
}

impl CredentialSet {
    /// Field-provisioned bundle.  Every blob must be complete.
    pub fn load_provisioned(storage: &dyn StoragePort) -> Result<Self, SecretError> {
        Ok(Self {
            root_ca: load(storage, Blob::RootCa)?,
            thing_cert: load(storage, Blob::ThingCert)?,
            thing_key: load(storage, Blob::ThingKey)?,
        })
    }

    /// Factory bundle written at manufacturing.
    pub fn load_factory(storage: &dyn StoragePort) -> Result<Self, SecretError> {
        let get = |blob: Blob| -> Result<Vec<u8>, SecretError> {
            Ok(strip_nul(
                storage.get_blob(blob.factory_key(), blob.max_len())?,
            ))
        };
        Ok(Self {
            root_ca: get(Blob::RootCa)?,
            thing_cert: get(Blob::ThingCert)?,
            thing_key: get(Blob::ThingKey)?,
        })
    }
}

impl core::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("root_ca", &self.root_ca.len())
            .field("thing_cert", &self.thing_cert.len())
            .finish_non_exhaustive()
    }
}
