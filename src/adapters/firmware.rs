//! Firmware update adapters: HTTPS download, pre-encrypted image
//! decryption and the inactive OTA partition.
//!
//! | Adapter              | Implements       | Connects to                      |
//! |----------------------|------------------|----------------------------------|
//! | [`HttpSource`]       | FirmwareSource   | `esp_http_client` (TLS)          |
//! | [`ImgDecryptor`]     | ImageDecryptor   | `esp_encrypted_img` (RSA-3072)   |
//! | [`OtaPartition`]     | FirmwareSink     | `esp_ota_*` via `esp-ota`        |
//!
//! On host targets each one is an in-memory simulation: the source serves
//! a fixed byte string, the decryptor passes bytes through and the sink
//! collects what it is given.

use log::{error, info};

use crate::app::ports::StoragePort;
use crate::ota::{FirmwarePorts, FirmwareSink, FirmwareSource, ImageDecryptor, OtaError};
use crate::secrets::SecretError;

/// Storage key of the image decryption key (PEM), written at manufacturing.
pub const RSA_KEY_BLOB: &str = "ota_rsa_key";
const RSA_KEY_MAX_LEN: usize = 4096;

/// Read the image decryption key.
pub fn load_rsa_key(storage: &dyn StoragePort) -> Result<Vec<u8>, SecretError> {
    Ok(crate::secrets::strip_nul(
        storage.get_blob(RSA_KEY_BLOB, RSA_KEY_MAX_LEN)?,
    ))
}

/// Assemble the three update collaborators.
pub fn ports(rsa_key: Vec<u8>) -> FirmwarePorts {
    FirmwarePorts {
        source: Box::new(HttpSource::new()),
        decryptor: Box::new(ImgDecryptor::new(rsa_key)),
        sink: Box::new(OtaPartition::new()),
    }
}

// ───────────────────────────────────────────────────────────────
// HTTPS source
// ───────────────────────────────────────────────────────────────

pub struct HttpSource {
    #[cfg(target_os = "espidf")]
    conn: Option<esp_idf_svc::http::client::EspHttpConnection>,
    content_length: Option<usize>,
    received: usize,
    finished: bool,
    /// Simulation: bytes served by the next `open`.
    #[cfg(not(target_os = "espidf"))]
    pub sim_image: Vec<u8>,
    /// Simulation: pretend the server announced this many bytes.
    #[cfg(not(target_os = "espidf"))]
    pub sim_announced: Option<usize>,
}

impl HttpSource {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            conn: None,
            content_length: None,
            received: 0,
            finished: false,
            #[cfg(not(target_os = "espidf"))]
            sim_image: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_announced: None,
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_open(&mut self, url: &str, root_ca: &[u8], timeout_ms: u32) -> Result<(), OtaError> {
        use esp_idf_svc::http::Method;
        use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
        use esp_idf_svc::tls::X509;

        let mut pem = root_ca.to_vec();
        pem.push(0);
        let conf = Configuration {
            timeout: Some(core::time::Duration::from_millis(timeout_ms as u64)),
            server_certificate: Some(X509::pem_until_nul(Box::leak(pem.into_boxed_slice()))),
            buffer_size_tx: Some(4096),
            ..Default::default()
        };
        let mut conn = EspHttpConnection::new(&conf).map_err(|e| {
            error!("HTTP client init failed: {:?}", e);
            OtaError::Transport
        })?;
        conn.initiate_request(Method::Get, url, &[])
            .map_err(|_| OtaError::Transport)?;
        conn.initiate_response().map_err(|_| OtaError::Transport)?;
        let status = conn.status();
        if !(200..300).contains(&status) {
            error!("HTTP status {}", status);
            return Err(OtaError::Transport);
        }
        self.content_length = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok());
        self.conn = Some(conn);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_open(&mut self, url: &str, _root_ca: &[u8], _timeout_ms: u32) -> Result<(), OtaError> {
        info!("HTTP(sim): GET {} ({} bytes)", url, self.sim_image.len());
        self.content_length = Some(self.sim_announced.unwrap_or(self.sim_image.len()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        let conn = self.conn.as_mut().ok_or(OtaError::Transport)?;
        conn.read(buf).map_err(|e| {
            error!("HTTP read failed: {:?}", e);
            OtaError::Transport
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        let rest = self.sim_image.get(self.received..).unwrap_or_default();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareSource for HttpSource {
    fn open(&mut self, url: &str, root_ca: &[u8], timeout_ms: u32) -> Result<(), OtaError> {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(OtaError::InvalidUrl);
        }
        self.received = 0;
        self.finished = false;
        self.content_length = None;
        self.platform_open(url, root_ca, timeout_ms)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        if self.finished {
            return Ok(0);
        }
        let n = self.platform_read(buf)?;
        if n == 0 {
            self.finished = true;
        }
        self.received += n;
        Ok(n)
    }

    fn is_complete(&self) -> bool {
        match self.content_length {
            Some(len) => self.received == len,
            None => self.finished,
        }
    }

    fn close(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            self.conn = None;
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Pre-encrypted image decryptor
// ───────────────────────────────────────────────────────────────

pub struct ImgDecryptor {
    /// PEM, NUL-terminated; borrowed by the decrypt handle.
    rsa_key: Vec<u8>,
    #[cfg(target_os = "espidf")]
    handle: Option<esp_idf_svc::sys::encrypted_img::esp_decrypt_handle_t>,
    #[cfg(not(target_os = "espidf"))]
    active: bool,
}

impl ImgDecryptor {
    pub fn new(mut rsa_key: Vec<u8>) -> Self {
        rsa_key.push(0);
        Self {
            rsa_key,
            #[cfg(target_os = "espidf")]
            handle: None,
            #[cfg(not(target_os = "espidf"))]
            active: false,
        }
    }
}

#[cfg(target_os = "espidf")]
impl ImageDecryptor for ImgDecryptor {
    fn start(&mut self) -> Result<(), OtaError> {
        use esp_idf_svc::sys::encrypted_img::*;
        let cfg = esp_decrypt_cfg_t {
            rsa_priv_key: self.rsa_key.as_ptr() as *const _,
            rsa_priv_key_len: self.rsa_key.len() as _,
        };
        let handle = unsafe { esp_encrypted_img_decrypt_start(&cfg) };
        if handle.is_null() {
            error!("Decrypt start failed");
            return Err(OtaError::DecryptFailed);
        }
        self.handle = Some(handle);
        Ok(())
    }

    fn feed(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), OtaError> {
        use esp_idf_svc::sys::encrypted_img::*;
        let handle = self.handle.ok_or(OtaError::DecryptFailed)?;
        let mut args: pre_enc_decrypt_arg_t = unsafe { core::mem::zeroed() };
        args.data_in = ciphertext.as_ptr() as *mut _;
        args.data_in_len = ciphertext.len() as _;
        let rc = unsafe { esp_encrypted_img_decrypt_data(handle, &mut args) };
        if !args.data_out.is_null() {
            let plain = unsafe {
                core::slice::from_raw_parts(args.data_out as *const u8, args.data_out_len as usize)
            };
            out.extend_from_slice(plain);
            unsafe { esp_idf_svc::sys::free(args.data_out as *mut _) };
        }
        let ok = rc == esp_idf_svc::sys::ESP_OK as i32
            || rc == esp_idf_svc::sys::ESP_ERR_NOT_FINISHED as i32;
        if !ok {
            error!("Decrypt failed: {}", rc);
            return Err(OtaError::DecryptFailed);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OtaError> {
        use esp_idf_svc::sys::encrypted_img::*;
        let handle = self.handle.take().ok_or(OtaError::DecryptFailed)?;
        let rc = unsafe { esp_encrypted_img_decrypt_end(handle) };
        if rc != esp_idf_svc::sys::ESP_OK as i32 {
            error!("Decrypt end failed: {}", rc);
            return Err(OtaError::DecryptFailed);
        }
        Ok(())
    }

    fn abort(&mut self) {
        use esp_idf_svc::sys::encrypted_img::*;
        if let Some(handle) = self.handle.take() {
            unsafe { esp_encrypted_img_decrypt_abort(handle) };
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl ImageDecryptor for ImgDecryptor {
    fn start(&mut self) -> Result<(), OtaError> {
        if self.rsa_key.len() <= 1 {
            return Err(OtaError::DecryptFailed);
        }
        self.active = true;
        Ok(())
    }

    fn feed(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), OtaError> {
        if !self.active {
            return Err(OtaError::DecryptFailed);
        }
        out.extend_from_slice(ciphertext);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OtaError> {
        if !core::mem::replace(&mut self.active, false) {
            return Err(OtaError::DecryptFailed);
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.active = false;
    }
}

// ───────────────────────────────────────────────────────────────
// OTA partition sink
// ───────────────────────────────────────────────────────────────

pub struct OtaPartition {
    #[cfg(target_os = "espidf")]
    update: Option<esp_ota::OtaUpdate>,
    /// Simulation: bytes written to the inactive partition.
    #[cfg(not(target_os = "espidf"))]
    pub written: Option<Vec<u8>>,
    /// Simulation: the last image committed as boot target.
    #[cfg(not(target_os = "espidf"))]
    pub committed: Option<Vec<u8>>,
}

impl OtaPartition {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            update: None,
            #[cfg(not(target_os = "espidf"))]
            written: None,
            #[cfg(not(target_os = "espidf"))]
            committed: None,
        }
    }
}

impl Default for OtaPartition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareSink for OtaPartition {
    fn running_project(&self) -> heapless::String<32> {
        let mut name = heapless::String::new();
        let desc = unsafe { esp_idf_svc::sys::esp_app_get_description() };
        if !desc.is_null() {
            let raw = unsafe { core::ffi::CStr::from_ptr((*desc).project_name.as_ptr()) };
            let _ = name.push_str(raw.to_str().unwrap_or_default());
        }
        name
    }

    fn begin(&mut self) -> Result<(), OtaError> {
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            error!("esp_ota_begin failed: {:?}", e);
            OtaError::BeginFailed
        })?;
        self.update = Some(update);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        let update = self.update.as_mut().ok_or(OtaError::WriteFailed)?;
        update.write(data).map_err(|e| {
            error!("esp_ota_write failed: {:?}", e);
            OtaError::WriteFailed
        })
    }

    fn finalize(&mut self) -> Result<(), OtaError> {
        let update = self.update.take().ok_or(OtaError::WriteFailed)?;
        let mut completed = update.finalize().map_err(|e| {
            error!("Image validation failed: {:?}", e);
            OtaError::ValidationFailed
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            error!("Set boot partition failed: {:?}", e);
            OtaError::ValidationFailed
        })?;
        info!("New image set as boot partition");
        Ok(())
    }

    fn abort(&mut self) {
        // Dropping an unfinished update releases the partition.
        self.update = None;
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwareSink for OtaPartition {
    fn running_project(&self) -> heapless::String<32> {
        let mut name = heapless::String::new();
        let _ = name.push_str(env!("CARGO_PKG_NAME"));
        name
    }

    fn begin(&mut self) -> Result<(), OtaError> {
        self.written = Some(Vec::new());
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.written
            .as_mut()
            .ok_or(OtaError::WriteFailed)?
            .extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), OtaError> {
        let image = self.written.take().ok_or(OtaError::WriteFailed)?;
        crate::ota::image::parse_header(&image).map_err(|_| OtaError::ValidationFailed)?;
        info!("OTA(sim): committed {} bytes", image.len());
        self.committed = Some(image);
        Ok(())
    }

    fn abort(&mut self) {
        self.written = None;
    }
}
