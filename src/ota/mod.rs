//! Encrypted firmware update pipeline.
//!
//! ```text
//! ┌──────────────┐ ciphertext ┌───────────────┐ plaintext ┌────────────┐     ┌──────────────┐
//! │FirmwareSource│───────────▶│ImageDecryptor │──────────▶│ HeaderGate │────▶│ FirmwareSink │
//! │ (HTTPS GET)  │            │ (RSA + AES)   │           │ (once)     │     │ (inactive    │
//! └──────────────┘            └───────────────┘           └────────────┘     │  partition)  │
//!                                                                            └──────────────┘
//! ```
//!
//! Any failure aborts all three stages and leaves the running image
//! active.  Success commits the new partition as the boot target.  Either
//! way the state machine restarts the device afterwards.

pub mod image;

use core::fmt;

use log::{error, info, warn};

use crate::app::service::Platform;
use crate::config::SystemConfig;
use crate::events::Event;
use crate::fsm::context::DeviceContext;
use crate::secrets::{self, CredentialSet};

pub use image::HeaderGate;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    InvalidUrl,
    Transport,
    DecryptFailed,
    HeaderRejected,
    Incomplete,
    ValidationFailed,
    WriteFailed,
    BeginFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl => write!(f, "missing or invalid update URL"),
            Self::Transport => write!(f, "download failed"),
            Self::DecryptFailed => write!(f, "image decryption failed"),
            Self::HeaderRejected => write!(f, "image header rejected"),
            Self::Incomplete => write!(f, "complete data was not received"),
            Self::ValidationFailed => write!(f, "image validation failed, image is corrupted"),
            Self::WriteFailed => write!(f, "partition write failed"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
        }
    }
}

// ── Ports ─────────────────────────────────────────────────────

/// Streaming download of the encrypted image.
pub trait FirmwareSource {
    /// Start the request.  `root_ca` authenticates the server.
    fn open(&mut self, url: &str, root_ca: &[u8], timeout_ms: u32) -> Result<(), OtaError>;

    /// Next ciphertext bytes.  `Ok(0)` marks the end of the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError>;

    /// Every byte the server announced has been read.
    fn is_complete(&self) -> bool;

    fn close(&mut self);
}

/// Streaming decryption of a pre-encrypted image.
pub trait ImageDecryptor {
    fn start(&mut self) -> Result<(), OtaError>;

    /// Decrypt `ciphertext`, appending whatever plaintext becomes
    /// available (possibly none) to `out`.
    fn feed(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), OtaError>;

    /// Verify the stream ended cleanly.
    fn finish(&mut self) -> Result<(), OtaError>;

    fn abort(&mut self);
}

/// The inactive application partition.
pub trait FirmwareSink {
    /// Project name of the running image.
    fn running_project(&self) -> heapless::String<32>;

    fn begin(&mut self) -> Result<(), OtaError>;

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError>;

    /// Validate the written image and make it the boot partition.
    /// A corrupt image fails with [`OtaError::ValidationFailed`].
    fn finalize(&mut self) -> Result<(), OtaError>;

    fn abort(&mut self);
}

/// The three update collaborators.
pub struct FirmwarePorts {
    pub source: Box<dyn FirmwareSource>,
    pub decryptor: Box<dyn ImageDecryptor>,
    pub sink: Box<dyn FirmwareSink>,
}

// ── Pipeline ──────────────────────────────────────────────────

/// Download, decrypt, check and commit one image.
pub fn update(
    url: &str,
    credentials: &CredentialSet,
    ports: &mut FirmwarePorts,
    config: &SystemConfig,
) -> Result<(), OtaError> {
    if url.is_empty() {
        return Err(OtaError::InvalidUrl);
    }
    ports.decryptor.start()?;
    if let Err(e) = ports
        .source
        .open(url, &credentials.root_ca, config.ota_recv_timeout_ms)
    {
        ports.decryptor.abort();
        return Err(e);
    }
    if let Err(e) = ports.sink.begin() {
        ports.decryptor.abort();
        ports.source.close();
        return Err(e);
    }

    let result = stream(ports, config);
    ports.source.close();
    match result {
        Ok(()) => {
            if let Err(e) = ports.decryptor.finish() {
                ports.sink.abort();
                return Err(e);
            }
            ports.sink.finalize()
        }
        Err(e) => {
            ports.decryptor.abort();
            ports.sink.abort();
            Err(e)
        }
    }
}

fn stream(ports: &mut FirmwarePorts, config: &SystemConfig) -> Result<(), OtaError> {
    let project = ports.sink.running_project();
    let mut gate = HeaderGate::new(&project);
    let mut ciphertext = vec![0u8; config.ota_chunk_size as usize];
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut total = 0usize;

    loop {
        let n = ports.source.read(&mut ciphertext)?;
        if n == 0 {
            break;
        }
        total += n;
        plaintext.clear();
        ports.decryptor.feed(&ciphertext[..n], &mut plaintext)?;
        if !plaintext.is_empty() {
            gate.process(&plaintext, ports.sink.as_mut())?;
        }
        info!("Image bytes read: {}", total);
    }

    if !ports.source.is_complete() {
        return Err(OtaError::Incomplete);
    }
    if !gate.is_checked() {
        error!("Stream ended before the image header");
        return Err(OtaError::HeaderRejected);
    }
    Ok(())
}

// ── State run function ────────────────────────────────────────

/// Run the update for the URL stored by the steady-state loop.  Always
/// returns `false`: the device restarts whatever the outcome.
pub fn run(ctx: &mut DeviceContext, platform: &mut Platform, _event: Event) -> bool {
    let Some(url) = ctx.ota_url.take() else {
        error!("OTA: {}", OtaError::InvalidUrl);
        return false;
    };
    info!("OTA URL: {}", url);

    let credentials = match secrets::auth::credentials(platform.storage.as_ref(), ctx.auth) {
        Ok(c) => c,
        Err(e) => {
            error!("OTA: no {:?} credentials: {}", ctx.auth, e);
            return false;
        }
    };

    match update(&url, &credentials, &mut platform.firmware, &ctx.config) {
        Ok(()) => {
            info!("OTA upgrade successful");
            if let Err(e) = secrets::auth::use_ota(platform.storage.as_mut()) {
                warn!("Auth mode not reset: {}", e);
            }
        }
        Err(e) => error!("OTA upgrade failed: {}", e),
    }
    false
}
