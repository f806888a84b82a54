//! System configuration parameters
//!
//! Tunable timings and limits for the thing core.
//! Values can be overridden via NVS (non-volatile storage); defaults match
//! the production firmware.

use serde::{Deserialize, Serialize};

/// Size of the MQTT fixed header, packet identifier and topic length prefix.
pub const MQTT_OVERHEAD_SIZE: usize = 6;

/// Longest topic the firmware ever builds (`thingpub/id0123456789AB/bootup` + NUL).
pub const MQTT_TOPIC_MAX_SIZE: usize = 32;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Steady state ---
    /// Interval between unsolicited "publish OTA URL" announcements (seconds)
    pub ota_announce_interval_secs: u32,
    /// Default device type publish period (seconds)
    pub default_publish_interval_secs: u32,
    /// Switch input debounce window (milliseconds)
    pub switch_debounce_ms: u32,

    // --- Broker ---
    /// MQTT client buffer size (bytes); bounds inbound and outbound payloads
    pub mqtt_buffer_size: u32,

    // --- OTA ---
    /// HTTP receive timeout while streaming the image (milliseconds)
    pub ota_recv_timeout_ms: u32,
    /// Ciphertext bytes requested from the transport per read
    pub ota_chunk_size: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Steady state
            ota_announce_interval_secs: 24 * 60 * 60, // 1/day
            default_publish_interval_secs: 5,
            switch_debounce_ms: 200,

            // Broker
            mqtt_buffer_size: 1024,

            // OTA
            ota_recv_timeout_ms: 5000,
            ota_chunk_size: 1024,
        }
    }
}

impl SystemConfig {
    /// Largest payload the broker client can carry once the topic and
    /// protocol overhead are subtracted.
    pub fn mqtt_data_max_len(&self) -> usize {
        (self.mqtt_buffer_size as usize).saturating_sub(MQTT_TOPIC_MAX_SIZE + MQTT_OVERHEAD_SIZE)
    }
}
