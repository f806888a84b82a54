//! Device identity derived from the ESP32 station MAC address.
//!
//! Produces a stable device ID in the form `idXXXXXXXXXXXX` (all six MAC
//! bytes in uppercase hex).  This ID is:
//! - Deterministic across reboots (factory-burned eFuse MAC)
//! - Used as BLE advertising local name
//! - Embedded in every broker topic (`thingpub/<id>/...`)

use core::fmt::Write;

use crate::error::{Error, Result};

/// Fixed-size device ID string: "id" + 12 hex digits (14 chars).
pub type DeviceId = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the Wi-Fi station MAC address.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_read_mac(
            mac.as_mut_ptr(),
            esp_idf_svc::sys::esp_mac_type_t_ESP_MAC_WIFI_STA,
        );
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Format the device ID.  An all-zero MAC means the read failed.
pub fn device_id(mac: &MacAddress) -> Result<DeviceId> {
    if mac.iter().all(|b| *b == 0) {
        return Err(Error::Init("station MAC is all zeros"));
    }
    let mut id = DeviceId::new();
    write!(id, "id").map_err(|_| Error::Init("device id"))?;
    for b in mac {
        write!(id, "{:02X}", b).map_err(|_| Error::Init("device id"))?;
    }
    Ok(id)
}
