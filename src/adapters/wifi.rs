//! Wi-Fi station-mode adapter.
//!
//! Implements [`NetworkPort`].  Driver completions are not returned from
//! the calls; they arrive as events on the shared bus:
//!
//! | Driver event            | Bus event          |
//! |-------------------------|--------------------|
//! | `WIFI_EVENT_STA_START`  | `WifiStart`        |
//! | `IP_EVENT_STA_GOT_IP`   | `WifiConnected`    |
//! | `WIFI_EVENT_STA_DISCONNECTED` | `WifiDisconnected` |
//! | `WIFI_EVENT_SCAN_DONE`  | `WifiScanDone`     |
//!
//! A scan holds the station: `connect` is refused until the scan results
//! have been collected.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspWifi` for control, raw event loop
//!   handlers for completion events.
//! - **all other targets**: simulation that raises the completion events
//!   immediately.

use std::sync::Arc;

use log::{info, warn};

use crate::app::ports::{AccessPoint, NetworkError, NetworkPort};
use crate::channels::Inbox;
use crate::secrets::wifi::{PASSWORD_MAX_LEN, SSID_MAX_LEN, WifiCredentials};

#[cfg(target_os = "espidf")]
use std::sync::OnceLock;

#[cfg(target_os = "espidf")]
static WIFI_INBOX: OnceLock<Arc<Inbox>> = OnceLock::new();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn wifi_event_handler(
    _arg: *mut core::ffi::c_void,
    base: esp_idf_svc::sys::esp_event_base_t,
    id: i32,
    _data: *mut core::ffi::c_void,
) {
    use crate::events::Event;
    use esp_idf_svc::sys::*;

    let Some(inbox) = WIFI_INBOX.get() else {
        return;
    };
    let event = unsafe {
        if base == WIFI_EVENT {
            match id as u32 {
                wifi_event_t_WIFI_EVENT_STA_START => Some(Event::WifiStart),
                wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => Some(Event::WifiDisconnected),
                wifi_event_t_WIFI_EVENT_SCAN_DONE => Some(Event::WifiScanDone),
                _ => None,
            }
        } else if base == IP_EVENT && id as u32 == ip_event_t_IP_EVENT_STA_GOT_IP {
            Some(Event::WifiConnected)
        } else {
            None
        }
    };
    if let Some(event) = event {
        log::info!("WiFi: {:?}", event);
        let _ = inbox.bus().trigger(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate(ssid: &str, password: &str) -> Result<(), NetworkError> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN || password.len() > PASSWORD_MAX_LEN {
        return Err(NetworkError::InvalidCredentials);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    inbox: Arc<Inbox>,
    credentials: Option<WifiCredentials>,
    scanning: bool,
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::EspWifi<'static>,
    /// Simulation: networks "in range".
    #[cfg(not(target_os = "espidf"))]
    pub sim_networks: Vec<AccessPoint>,
    /// Simulation: when `false`, every connect attempt is refused by the AP.
    #[cfg(not(target_os = "espidf"))]
    pub sim_accept: bool,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        inbox: Arc<Inbox>,
        credentials: Option<WifiCredentials>,
        modem: esp_idf_hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
    ) -> crate::Result<Self> {
        let wifi = esp_idf_svc::wifi::EspWifi::new(modem, sysloop, nvs)
            .map_err(|_| crate::Error::Init("wifi driver"))?;
        let _ = WIFI_INBOX.set(Arc::clone(&inbox));
        Ok(Self {
            inbox,
            credentials,
            scanning: false,
            wifi,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(inbox: Arc<Inbox>, credentials: Option<WifiCredentials>) -> Self {
        Self {
            inbox,
            credentials,
            scanning: false,
            sim_networks: Vec::new(),
            sim_accept: true,
        }
    }

    pub fn credentials(&self) -> Option<&WifiCredentials> {
        self.credentials.as_ref()
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), NetworkError> {
        use esp_idf_svc::sys::*;
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        unsafe {
            esp_event_handler_register(
                WIFI_EVENT,
                ESP_EVENT_ANY_ID,
                Some(wifi_event_handler),
                core::ptr::null_mut(),
            );
            esp_event_handler_register(
                IP_EVENT,
                ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(wifi_event_handler),
                core::ptr::null_mut(),
            );
        }

        // Without stored credentials the station still starts so a scan
        // can be served during provisioning.
        let (ssid, password) = match &self.credentials {
            Some(c) => (c.ssid.as_str(), c.password.as_str()),
            None => ("", ""),
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| NetworkError::InvalidCredentials)?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials)?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        self.wifi
            .set_configuration(&config)
            .map_err(|_| NetworkError::Driver)?;
        self.wifi.start().map_err(|_| NetworkError::Driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), NetworkError> {
        info!("WiFi(sim): STA started");
        let _ = self.inbox.bus().trigger(crate::events::Event::WifiStart);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) -> Result<(), NetworkError> {
        unsafe {
            use esp_idf_svc::sys::*;
            esp_event_handler_unregister(WIFI_EVENT, ESP_EVENT_ANY_ID, Some(wifi_event_handler));
            esp_event_handler_unregister(
                IP_EVENT,
                ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(wifi_event_handler),
            );
        }
        self.wifi.stop().map_err(|_| NetworkError::Driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) -> Result<(), NetworkError> {
        info!("WiFi(sim): STA stopped");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), NetworkError> {
        self.wifi.connect().map_err(|_| NetworkError::Driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), NetworkError> {
        use crate::events::Event;
        let reachable = self.sim_accept
            && self.credentials.as_ref().is_some_and(|c| {
                self.sim_networks
                    .iter()
                    .any(|ap| ap.ssid.as_str() == c.ssid.as_str())
            });
        let event = if reachable {
            Event::WifiConnected
        } else {
            Event::WifiDisconnected
        };
        info!("WiFi(sim): connect -> {:?}", event);
        let _ = self.inbox.bus().trigger(event);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_scan(&mut self) -> Result<(), NetworkError> {
        self.wifi
            .start_scan(&Default::default(), false)
            .map_err(|_| NetworkError::Driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_scan(&mut self) -> Result<(), NetworkError> {
        let _ = self.inbox.bus().trigger(crate::events::Event::WifiScanDone);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_scan_results(&mut self) -> Result<Vec<AccessPoint>, NetworkError> {
        let found = self
            .wifi
            .get_scan_result()
            .map_err(|_| NetworkError::Driver)?;
        Ok(found
            .into_iter()
            .filter_map(|ap| {
                Some(AccessPoint {
                    ssid: heapless::String::try_from(ap.ssid.as_str()).ok()?,
                    rssi: ap.signal_strength,
                })
            })
            .collect())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_scan_results(&mut self) -> Result<Vec<AccessPoint>, NetworkError> {
        Ok(self.sim_networks.clone())
    }
}

// ───────────────────────────────────────────────────────────────
// NetworkPort
// ───────────────────────────────────────────────────────────────

impl NetworkPort for WifiAdapter {
    fn start(&mut self) -> Result<(), NetworkError> {
        if self.credentials.is_none() {
            warn!("WiFi: no stored credentials");
        }
        self.platform_start()
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        if self.scanning {
            return Err(NetworkError::Driver);
        }
        info!("WiFi: scanning...");
        self.scanning = true;
        self.platform_start_scan().inspect_err(|_| self.scanning = false)
    }

    fn scan_results(&mut self, max: usize) -> Result<Vec<AccessPoint>, NetworkError> {
        if !self.scanning {
            return Err(NetworkError::ScanNotReady);
        }
        self.scanning = false;
        let mut found = self.platform_scan_results()?;
        found.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        found.truncate(max);
        for ap in &found {
            info!("WiFi: SSID {} RSSI {}", ap.ssid, ap.rssi);
        }
        Ok(found)
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        if self.scanning {
            warn!("WiFi: connect refused while scanning");
            return Err(NetworkError::Driver);
        }
        if self.credentials.is_none() {
            return Err(NetworkError::InvalidCredentials);
        }
        info!("WiFi: connecting...");
        self.platform_connect()
    }

    fn reinit(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        validate(ssid, password)?;
        self.platform_stop()?;
        self.scanning = false;
        self.credentials = Some(WifiCredentials {
            ssid: heapless::String::try_from(ssid).map_err(|_| NetworkError::InvalidCredentials)?,
            password: heapless::String::try_from(password)
                .map_err(|_| NetworkError::InvalidCredentials)?,
        });
        self.platform_start()
    }
}
