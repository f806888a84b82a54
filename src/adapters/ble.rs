//! BLE GATT provisioning service adapter.
//!
//! Implements [`RadioPort`] on top of the Bluedroid GATT server.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID     | Properties | Description                    |
//! |----------------|----------|------------|--------------------------------|
//! | POP            | `0xFF01` | Write      | Encrypted proof of possession  |
//! | Wi-Fi creds    | `0xFF02` | Write      | Encrypted SSID / password doc  |
//! | Root CA        | `0xFF03` | Write      | Encrypted PEM chunk            |
//! | Device cert    | `0xFF04` | Write      | Encrypted PEM chunk            |
//! | Device key     | `0xFF05` | Write      | Encrypted PEM chunk            |
//! | Status         | `0xFF06` | Notify     | Plaintext JSON status / scan   |
//!
//! Service UUID: `0xFFFF`.  Writes are copied into the shared
//! [`Inbox`]; connection and notification completion are raised as
//! events.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid FFI via `esp_idf_svc::sys`.
//! - **all other targets**: simulation that records notifications.

use std::sync::Arc;

use log::info;

use crate::app::ports::{RadioError, RadioPort};
use crate::channels::Inbox;
#[cfg(target_os = "espidf")]
use crate::provision::{Characteristic, NOTIFY_UUID, SERVICE_UUID};

// ── ESP-IDF BLE static state ──────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
#[cfg(target_os = "espidf")]
use std::sync::OnceLock;

#[cfg(target_os = "espidf")]
static BLE_INBOX: OnceLock<Arc<Inbox>> = OnceLock::new();
#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONNECTED: AtomicBool = AtomicBool::new(false);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
/// Index into [`CHAR_ORDER`] of the characteristic being added.
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU32 = AtomicU32::new(0);
/// Attribute handles, in [`CHAR_ORDER`] order.
#[cfg(target_os = "espidf")]
static BLE_CHAR_HANDLES: [AtomicU32; 6] = [const { AtomicU32::new(0) }; 6];

/// Registration order: the five write characteristics, then notify.
#[cfg(target_os = "espidf")]
const CHAR_ORDER: [u16; 6] = [0xFF01, 0xFF02, 0xFF03, 0xFF04, 0xFF05, NOTIFY_UUID];

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u16) {
    use esp_idf_svc::sys::*;
    let (perm, prop) = if uuid == NOTIFY_UUID {
        (ESP_GATT_PERM_READ, ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY)
    } else {
        (ESP_GATT_PERM_WRITE, ESP_GATT_CHAR_PROP_BIT_WRITE)
    };
    let mut char_uuid = uuid16_to_esp(uuid);
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
fn characteristic_for_handle(handle: u32) -> Option<Characteristic> {
    CHAR_ORDER
        .iter()
        .zip(BLE_CHAR_HANDLES.iter())
        .find(|(_, h)| h.load(AtomicOrdering::Relaxed) == handle)
        .and_then(|(uuid, _)| Characteristic::from_uuid(*uuid))
}

#[cfg(target_os = "espidf")]
fn trigger(event: crate::events::Event) {
    if let Some(inbox) = BLE_INBOX.get() {
        let _ = inbox.bus().trigger(event);
    }
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe {
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use crate::events::Event;
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if as u32, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid16_to_esp(SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            };
            // 1 service + 6 characteristics (2 handles each) + 1 CCCD.
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 14);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle as u32, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", svc_handle);
            BLE_CHAR_STEP.store(0, AtomicOrdering::Relaxed);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                add_gatt_char(svc_handle, CHAR_ORDER[0]);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            let step = BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) as usize;
            if step < CHAR_ORDER.len() {
                BLE_CHAR_HANDLES[step].store(handle as u32, AtomicOrdering::Relaxed);
                log::info!("BLE GATTS: char 0x{:04X} (handle={})", CHAR_ORDER[step], handle);
                let next = step + 1;
                BLE_CHAR_STEP.store(next as u32, AtomicOrdering::Relaxed);
                if next < CHAR_ORDER.len() {
                    let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
                    unsafe { add_gatt_char(svc_handle, CHAR_ORDER[next]) };
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            BLE_CONN_ID.store(p.conn_id as u32, AtomicOrdering::Relaxed);
            BLE_CONNECTED.store(true, AtomicOrdering::Release);
            log::info!("BLE GATTS: client connected (conn_id={})", p.conn_id);
            trigger(Event::BleGapConnected);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            BLE_CONNECTED.store(false, AtomicOrdering::Release);
            log::info!("BLE GATTS: client disconnected");
            trigger(Event::BleGapDisconnected);
            unsafe { start_advertising() };
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        core::ptr::null_mut(),
                    );
                }
            }
            let Some(characteristic) = characteristic_for_handle(p.handle as u32) else {
                return;
            };
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
            if let Some(inbox) = BLE_INBOX.get() {
                inbox.on_radio_write(characteristic, data);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            trigger(Event::BleNotifyDone);
        }
        _ => {}
    }
}

pub struct BleAdapter {
    inbox: Arc<Inbox>,
    device_name: heapless::String<24>,
    started: bool,
    /// Simulation: every notification sent.
    #[cfg(not(target_os = "espidf"))]
    pub sent: Vec<Vec<u8>>,
}

impl BleAdapter {
    pub fn new(inbox: Arc<Inbox>) -> Self {
        Self {
            inbox,
            device_name: heapless::String::new(),
            started: false,
            #[cfg(not(target_os = "espidf"))]
            sent: Vec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        let _ = BLE_INBOX.set(Arc::clone(&self.inbox));
        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            if esp_bt_controller_init(&mut bt_cfg) != ESP_OK as i32 {
                return Err(RadioError::InitFailed);
            }
            if esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE) != ESP_OK as i32 {
                return Err(RadioError::InitFailed);
            }
            if esp_bluedroid_init() != ESP_OK as i32 {
                return Err(RadioError::InitFailed);
            }
            if esp_bluedroid_enable() != ESP_OK as i32 {
                return Err(RadioError::InitFailed);
            }

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            esp_ble_gatts_app_register(0);

            let mut name = self.device_name.clone();
            let _ = name.push('\0');
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);
            start_advertising();
        }
        info!("BLE(espidf): advertising as '{}'", self.device_name);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), RadioError> {
        info!(
            "BLE(sim): advertising '{}' (service 0x{:04X})",
            self.device_name,
            crate::provision::SERVICE_UUID
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        if !BLE_CONNECTED.load(AtomicOrdering::Acquire) {
            return Err(RadioError::NotConnected);
        }
        let handle = BLE_CHAR_HANDLES[CHAR_ORDER.len() - 1].load(AtomicOrdering::Relaxed);
        let conn = BLE_CONN_ID.load(AtomicOrdering::Relaxed);
        let rc = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as u8,
                conn as u16,
                handle as u16,
                payload.len() as u16,
                payload.as_ptr() as *mut u8,
                false,
            )
        };
        if rc != ESP_OK as i32 {
            return Err(RadioError::NotConnected);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.sent.push(payload.to_vec());
        // Notification completion is immediate in simulation.
        let _ = self.inbox.bus().trigger(crate::events::Event::BleNotifyDone);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// RadioPort implementation
// ───────────────────────────────────────────────────────────────

/// Largest notification payload (ATT MTU 517 minus the 3-byte header).
const NOTIFY_MAX_LEN: usize = 514;

impl RadioPort for BleAdapter {
    fn start(&mut self, name: &str) -> Result<(), RadioError> {
        self.device_name =
            heapless::String::try_from(name).map_err(|_| RadioError::InitFailed)?;
        self.platform_start()?;
        self.started = true;
        Ok(())
    }

    fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > NOTIFY_MAX_LEN {
            return Err(RadioError::PayloadTooLarge);
        }
        if !self.started {
            return Err(RadioError::NotConnected);
        }
        self.platform_notify(payload)
    }
}
