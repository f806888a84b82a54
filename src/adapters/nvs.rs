//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the thing core.
//! Everything lives in the `"storage"` namespace; NVS entries are typed, so
//! a `u32` flag word and a blob never collide even under the same key.
//!
//! # Security
//!
//! - Config validation: all fields are range-checked before persistence.
//! - Encrypted NVS: on ESP32 the partition is encrypted when
//!   `CONFIG_NVS_ENCRYPTION` is set.  The simulation backend uses
//!   plaintext (dev/test only).
//! - Keys longer than 15 bytes are rejected, never truncated.
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.

use crate::app::ports::{
    ConfigError, ConfigPort, STORAGE_KEY_MAX_LEN, StorageError, StoragePort,
};
use crate::config::SystemConfig;
use log::{error, info};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

const NAMESPACE: &str = "storage";
const CONFIG_KEY: &str = "syscfg";

#[cfg(target_os = "espidf")]
const MAX_CONFIG_SIZE: usize = 256;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    blobs: std::cell::RefCell<HashMap<String, Vec<u8>>>,
    #[cfg(not(target_os = "espidf"))]
    flags: std::cell::RefCell<HashMap<String, u32>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(ConfigError::IoError)` if flash initialisation fails
    /// unrecoverably. On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            blobs: std::cell::RefCell::new(HashMap::new()),
            #[cfg(not(target_os = "espidf"))]
            flags: std::cell::RefCell::new(HashMap::new()),
        })
    }

    /// NUL-terminated copy of `key`.
    fn c_key(key: &str) -> Result<[u8; STORAGE_KEY_MAX_LEN + 1], StorageError> {
        if key.len() > STORAGE_KEY_MAX_LEN {
            error!("Storage key {} is too long (max {})", key, STORAGE_KEY_MAX_LEN);
            return Err(StorageError::KeyTooLong);
        }
        let mut buf = [0u8; STORAGE_KEY_MAX_LEN + 1];
        buf[..key.len()].copy_from_slice(key.as_bytes());
        Ok(buf)
    }

    /// Open the namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut ns_buf = [0u8; 16];
        ns_buf[..NAMESPACE.len()].copy_from_slice(NAMESPACE.as_bytes());

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn read_flags(key: &[u8; 16]) -> Result<u32, i32> {
        Self::with_nvs_handle(false, |handle| {
            let mut value: u32 = 0;
            let ret = unsafe { nvs_get_u32(handle, key.as_ptr() as *const _, &mut value) };
            match ret {
                ESP_OK => Ok(value),
                ESP_ERR_NVS_NOT_FOUND => Ok(0),
                e => Err(e),
            }
        })
        .or_else(|e| if e == ESP_ERR_NVS_NOT_FOUND { Ok(0) } else { Err(e) })
    }

    #[cfg(target_os = "espidf")]
    fn write_flags(key: &[u8; 16], update: impl FnOnce(u32) -> u32) -> Result<(), StorageError> {
        let current = Self::read_flags(key).map_err(|_| StorageError::IoError)?;
        Self::with_nvs_handle(true, |handle| {
            let ret = unsafe { nvs_set_u32(handle, key.as_ptr() as *const _, update(current)) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(|e| {
            error!("NVS flag write failed: {}", e);
            StorageError::IoError
        })
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(key: &[u8; 16], max_len: usize) -> Result<Vec<u8>, StorageError> {
        let result = Self::with_nvs_handle(false, |handle| {
            let mut size: usize = 0;
            // First call: get size
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size > max_len {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }
            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        });
        match result {
            Ok(buf) => Ok(buf),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
            Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(StorageError::TooLarge),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn write_blob(key: &[u8; 16], data: &[u8]) -> Result<(), StorageError> {
        Self::with_nvs_handle(true, |handle| {
            let ret = unsafe {
                nvs_set_blob(handle, key.as_ptr() as *const _, data.as_ptr() as *const _, data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(|e| {
            error!("NVS blob write failed: {}", e);
            StorageError::IoError
        })
    }
}

fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    if !(3600..=7 * 24 * 3600).contains(&cfg.ota_announce_interval_secs) {
        return Err(ConfigError::ValidationFailed(
            "ota_announce_interval_secs must be 3600–604800",
        ));
    }
    if !(1..=3600).contains(&cfg.default_publish_interval_secs) {
        return Err(ConfigError::ValidationFailed(
            "default_publish_interval_secs must be 1–3600",
        ));
    }
    if !(10..=2000).contains(&cfg.switch_debounce_ms) {
        return Err(ConfigError::ValidationFailed(
            "switch_debounce_ms must be 10–2000",
        ));
    }
    if !(256..=8192).contains(&cfg.mqtt_buffer_size) {
        return Err(ConfigError::ValidationFailed(
            "mqtt_buffer_size must be 256–8192",
        ));
    }
    if !(500..=60_000).contains(&cfg.ota_recv_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "ota_recv_timeout_ms must be 500–60000",
        ));
    }
    if !(256..=8192).contains(&cfg.ota_chunk_size) {
        return Err(ConfigError::ValidationFailed(
            "ota_chunk_size must be 256–8192",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.blobs.borrow().get(CONFIG_KEY).cloned();

        #[cfg(target_os = "espidf")]
        let stored = {
            let key = Self::c_key(CONFIG_KEY).map_err(|_| ConfigError::IoError)?;
            match Self::read_blob(&key, MAX_CONFIG_SIZE) {
                Ok(bytes) => Some(bytes),
                Err(StorageError::NotFound) => None,
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}, using defaults", e);
                    None
                }
            }
        };

        match stored {
            Some(bytes) => {
                let cfg: SystemConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                validate_config(&cfg)?;
                info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        self.blobs
            .borrow_mut()
            .insert(CONFIG_KEY.to_string(), bytes.clone());

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_key(CONFIG_KEY).map_err(|_| ConfigError::IoError)?;
            Self::write_blob(&key, &bytes).map_err(|_| ConfigError::IoError)?;
        }

        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn has_flags(&self, key: &str, mask: u32) -> bool {
        let Ok(_c_key) = Self::c_key(key) else {
            return false;
        };

        #[cfg(not(target_os = "espidf"))]
        let current = self.flags.borrow().get(key).copied().unwrap_or(0);

        #[cfg(target_os = "espidf")]
        let current = match Self::read_flags(&_c_key) {
            Ok(v) => v,
            Err(e) => {
                error!("NVS flag read failed: {}", e);
                return false;
            }
        };

        current & mask == mask
    }

    fn set_flags(&mut self, key: &str, mask: u32) -> Result<(), StorageError> {
        let _c_key = Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            *self.flags.borrow_mut().entry(key.to_string()).or_insert(0) |= mask;
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_flags(&_c_key, |v| v | mask)
        }
    }

    fn unset_flags(&mut self, key: &str, mask: u32) -> Result<(), StorageError> {
        let _c_key = Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            *self.flags.borrow_mut().entry(key.to_string()).or_insert(0) &= !mask;
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_flags(&_c_key, |v| v & !mask)
        }
    }

    fn get_blob(&self, key: &str, max_len: usize) -> Result<Vec<u8>, StorageError> {
        let _c_key = Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            match self.blobs.borrow().get(key) {
                Some(data) if data.len() > max_len => Err(StorageError::TooLarge),
                Some(data) => Ok(data.clone()),
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            Self::read_blob(&_c_key, max_len)
        }
    }

    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let _c_key = Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs.borrow_mut().insert(key.to_string(), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_blob(&_c_key, data)
        }
    }

    fn append_blob(&mut self, key: &str, row: &[u8], max_len: usize) -> Result<(), StorageError> {
        let mut blob = match self.get_blob(key, max_len) {
            Ok(b) => b,
            Err(StorageError::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        if blob.len() + row.len() + 1 > max_len {
            error!("Append to {} exceeds {} bytes", key, max_len);
            return Err(StorageError::TooLarge);
        }
        blob.extend_from_slice(row);
        blob.push(b'\n');
        self.set_blob(key, &blob)
    }

    fn erase_blob(&mut self, key: &str) -> Result<(), StorageError> {
        let _c_key = Self::c_key(key)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.blobs.borrow_mut().remove(key);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::with_nvs_handle(true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, _c_key.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(|_| StorageError::IoError)
        }
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            #[cfg(not(target_os = "espidf"))]
            blobs: std::cell::RefCell::new(HashMap::new()),
            #[cfg(not(target_os = "espidf"))]
            flags: std::cell::RefCell::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(validate_config(&SystemConfig::default()).is_ok());
    }

    #[test]
    fn rejects_tiny_mqtt_buffer() {
        let cfg = SystemConfig {
            mqtt_buffer_size: 64,
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn config_save_load_roundtrip() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = SystemConfig {
            switch_debounce_ms: 150,
            ..Default::default()
        };
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap(), cfg);
    }

    #[test]
    fn flags_are_bitwise() {
        let mut nvs = NvsAdapter::new().unwrap();
        assert!(!nvs.has_flags("f", 0b01));
        nvs.set_flags("f", 0b01).unwrap();
        nvs.set_flags("f", 0b10).unwrap();
        assert!(nvs.has_flags("f", 0b11));
        nvs.unset_flags("f", 0b01).unwrap();
        assert!(!nvs.has_flags("f", 0b01));
        assert!(nvs.has_flags("f", 0b10));
    }

    #[test]
    fn flags_and_blobs_do_not_collide() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.set_flags("k", 1).unwrap();
        assert_eq!(nvs.get_blob("k", 16), Err(StorageError::NotFound));
    }

    #[test]
    fn long_key_rejected() {
        let mut nvs = NvsAdapter::new().unwrap();
        assert_eq!(
            nvs.set_blob("sixteen_chars_xx", b"v"),
            Err(StorageError::KeyTooLong)
        );
        assert!(!nvs.has_flags("sixteen_chars_xx", 0));
    }

    #[test]
    fn append_adds_newline_and_respects_limit() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.append_blob("b", b"abc", 8).unwrap();
        nvs.append_blob("b", b"de", 8).unwrap();
        assert_eq!(nvs.get_blob("b", 8).unwrap(), b"abc\nde\n");
        assert_eq!(nvs.append_blob("b", b"x", 8), Err(StorageError::TooLarge));
        assert_eq!(nvs.get_blob("b", 8).unwrap(), b"abc\nde\n");
    }

    #[test]
    fn get_blob_over_capacity() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.set_blob("b", b"12345").unwrap();
        assert_eq!(nvs.get_blob("b", 4), Err(StorageError::TooLarge));
    }

    #[test]
    fn erase_missing_is_ok() {
        let mut nvs = NvsAdapter::new().unwrap();
        assert!(nvs.erase_blob("nope").is_ok());
    }
}
