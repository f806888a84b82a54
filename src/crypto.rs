//! Secure channel framing for provisioning writes.
//!
//! ```text
//! ┌────────────────────┬───────────────────────────────┐
//! │ nonce (16 bytes)   │ ciphertext (len - 16 bytes)   │
//! └────────────────────┴───────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//!   initial counter block ──▶ AES-128-CTR keystream ⊕ ──▶ plaintext
//! ```
//!
//! The nonce is used directly as the first 128-bit big-endian counter
//! block.  There is no authentication tag: integrity comes from the JSON
//! parse and field checks that follow every decrypt.

use core::fmt;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Symmetric key size.
pub const KEY_LEN: usize = 16;
/// Nonce prefix size (one AES block).
pub const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Input shorter than the nonce prefix.
    TooShort,
    /// No symmetric key has been provisioned.
    NoKey,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame shorter than {} byte nonce", NONCE_LEN),
            Self::NoKey => write!(f, "no symmetric key provisioned"),
        }
    }
}

/// AES-128-CTR decryptor bound to the device's provisioned key.
#[derive(Clone)]
pub struct SecureChannel {
    key: [u8; KEY_LEN],
}

impl SecureChannel {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Decrypt a `[nonce][ciphertext]` frame.  Output length is
    /// `input.len() - 16`.
    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if input.len() < NONCE_LEN {
            return Err(ChannelError::TooShort);
        }
        let (nonce, ciphertext) = input.split_at(NONCE_LEN);
        let mut out = ciphertext.to_vec();
        let mut cipher = Aes128Ctr::new(&self.key.into(), nonce.into());
        cipher.apply_keystream(&mut out);
        Ok(out)
    }

    /// Build a frame the companion app would send.  Counter mode is its own
    /// inverse, so this is the same keystream applied to the plaintext.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(plaintext);
        let mut cipher = Aes128Ctr::new(&self.key.into(), nonce.as_slice().into());
        cipher.apply_keystream(&mut out[NONCE_LEN..]);
        out
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel").finish_non_exhaustive()
    }
}
