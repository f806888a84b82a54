//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements         | Connects to                  |
//! |------------|--------------------|------------------------------|
//! | `ble`      | RadioPort          | Bluedroid GATT server        |
//! | `firmware` | FirmwareSource     | HTTPS client                 |
//! |            | ImageDecryptor     | esp_encrypted_img            |
//! |            | FirmwareSink       | OTA partitions               |
//! | `mqtt`     | BrokerPort         | ESP-MQTT client (mutual TLS) |
//! | `nvs`      | ConfigPort         | NVS / in-memory store        |
//! |            | StoragePort        |                              |
//! | `system`   | SystemPort         | esp_restart                  |
//! | `wifi`     | NetworkPort        | ESP-IDF Wi-Fi STA            |
//!
//! `device_id` derives the thing identity from the station MAC and
//! `timer` holds the periodic event producers.

pub mod ble;
pub mod device_id;
pub mod firmware;
pub mod mqtt;
pub mod nvs;
pub mod system;
pub mod timer;
pub mod wifi;
