//! Recording mock ports for integration tests.
//!
//! Every mock keeps its record behind an `Arc<Mutex<..>>` handle so a test
//! can still inspect it after the mock has been boxed into a
//! [`Platform`].  Completion events are raised on the shared inbox the
//! way the real driver callbacks would.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use thingcore::adapters::device_id::DeviceId;
use thingcore::adapters::nvs::NvsAdapter;
use thingcore::app::ports::{
    AccessPoint, BrokerError, BrokerPort, NetworkError, NetworkPort, RadioError, RadioPort,
    StoragePort, SystemPort,
};
use thingcore::app::service::{Platform, ThingService};
use thingcore::channels::Inbox;
use thingcore::config::SystemConfig;
use thingcore::crypto::SecureChannel;
use thingcore::events::Event;
use thingcore::fsm::context::DeviceContext;
use thingcore::ota::{FirmwarePorts, FirmwareSink, FirmwareSource, ImageDecryptor, OtaError};
use thingcore::secrets::{self, CredentialSet};
use thingcore::thing::ThingEngine;
use thingcore::types::default::DefaultType;

pub const DEVICE_ID: &str = "id001122AABBCC";
pub const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f";
pub const POP_HEX: &str = "0123456789abcdef0123456789abcdef";

// ── Radio ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RadioLog {
    pub started_as: Option<String>,
    pub notifications: Vec<Vec<u8>>,
}

pub struct MockRadio {
    inbox: Arc<Inbox>,
    pub log: Arc<Mutex<RadioLog>>,
}

impl RadioPort for MockRadio {
    fn start(&mut self, name: &str) -> Result<(), RadioError> {
        self.log.lock().unwrap().started_as = Some(name.to_string());
        Ok(())
    }

    fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.log.lock().unwrap().notifications.push(payload.to_vec());
        let _ = self.inbox.bus().trigger(Event::BleNotifyDone);
        Ok(())
    }
}

// ── Network ───────────────────────────────────────────────────

#[derive(Default)]
pub struct NetworkLog {
    pub starts: u32,
    pub connects: u32,
    pub reinit_with: Option<(String, String)>,
    /// Networks reported by a scan.
    pub in_range: Vec<AccessPoint>,
    /// Event raised by `connect`; `None` leaves the attempt pending.
    pub connect_result: Option<Event>,
}

pub struct MockNetwork {
    inbox: Arc<Inbox>,
    pub log: Arc<Mutex<NetworkLog>>,
}

impl NetworkPort for MockNetwork {
    fn start(&mut self) -> Result<(), NetworkError> {
        self.log.lock().unwrap().starts += 1;
        let _ = self.inbox.bus().trigger(Event::WifiStart);
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        let _ = self.inbox.bus().trigger(Event::WifiScanDone);
        Ok(())
    }

    fn scan_results(&mut self, max: usize) -> Result<Vec<AccessPoint>, NetworkError> {
        let mut found = self.log.lock().unwrap().in_range.clone();
        found.truncate(max);
        Ok(found)
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        let result = {
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            log.connect_result
        };
        if let Some(event) = result {
            let _ = self.inbox.bus().trigger(event);
        }
        Ok(())
    }

    fn reinit(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.log.lock().unwrap().reinit_with = Some((ssid.to_string(), password.to_string()));
        let _ = self.inbox.bus().trigger(Event::WifiStart);
        Ok(())
    }
}

// ── Broker ────────────────────────────────────────────────────

#[derive(Default)]
pub struct BrokerLog {
    pub started_with: Option<CredentialSet>,
    pub stops: u32,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
}

impl BrokerLog {
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

/// Connection is not raised by `start`: tests trigger `MqttConnected`
/// themselves once Wi-Fi is up, as the real client would.
pub struct MockBroker {
    inbox: Arc<Inbox>,
    pub log: Arc<Mutex<BrokerLog>>,
}

impl BrokerPort for MockBroker {
    fn start(&mut self, bundle: &CredentialSet) -> Result<(), BrokerError> {
        self.log.lock().unwrap().started_with = Some(bundle.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        self.log.lock().unwrap().stops += 1;
        Ok(())
    }

    fn subscribe(&mut self, topics: &[&str]) -> Result<(), BrokerError> {
        self.log
            .lock()
            .unwrap()
            .subscriptions
            .extend(topics.iter().map(|t| t.to_string()));
        let _ = self.inbox.bus().trigger(Event::MqttSubscribed);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.log
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

// ── System ────────────────────────────────────────────────────

pub struct MockSystem {
    pub restarts: Arc<Mutex<u32>>,
}

impl SystemPort for MockSystem {
    fn restart(&mut self) {
        *self.restarts.lock().unwrap() += 1;
    }
}

// ── Firmware ──────────────────────────────────────────────────

#[derive(Default)]
pub struct FirmwareLog {
    /// Served by the source in `chunk`-sized reads.
    pub image: Vec<u8>,
    /// Content length the server announces; defaults to the image size.
    pub announced: Option<usize>,
    pub opened: Option<String>,
    pub read_at: usize,
    pub written: Vec<u8>,
    pub committed: bool,
    pub aborted: bool,
    /// Make `finalize` report a corrupt image.
    pub corrupt: bool,
}

pub struct MockSource(pub Arc<Mutex<FirmwareLog>>);

impl FirmwareSource for MockSource {
    fn open(&mut self, url: &str, _root_ca: &[u8], _timeout_ms: u32) -> Result<(), OtaError> {
        let mut log = self.0.lock().unwrap();
        log.opened = Some(url.to_string());
        log.read_at = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        let mut log = self.0.lock().unwrap();
        let start = log.read_at;
        let n = log.image.len().saturating_sub(start).min(buf.len());
        buf[..n].copy_from_slice(&log.image[start..start + n]);
        log.read_at += n;
        Ok(n)
    }

    fn is_complete(&self) -> bool {
        let log = self.0.lock().unwrap();
        log.read_at == log.announced.unwrap_or(log.image.len())
    }

    fn close(&mut self) {}
}

/// Identity "decryption".
pub struct MockDecryptor;

impl ImageDecryptor for MockDecryptor {
    fn start(&mut self) -> Result<(), OtaError> {
        Ok(())
    }

    fn feed(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), OtaError> {
        out.extend_from_slice(ciphertext);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OtaError> {
        Ok(())
    }

    fn abort(&mut self) {}
}

pub struct MockSink(pub Arc<Mutex<FirmwareLog>>);

impl FirmwareSink for MockSink {
    fn running_project(&self) -> heapless::String<32> {
        heapless::String::try_from("thing").unwrap()
    }

    fn begin(&mut self) -> Result<(), OtaError> {
        self.0.lock().unwrap().written.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        self.0.lock().unwrap().written.extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), OtaError> {
        let mut log = self.0.lock().unwrap();
        if log.corrupt {
            return Err(OtaError::ValidationFailed);
        }
        log.committed = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.0.lock().unwrap().aborted = true;
    }
}

/// Plaintext image whose header names `project`.
pub fn firmware_image(project: &str, len: usize) -> Vec<u8> {
    use thingcore::ota::image::{
        APP_DESC_MAGIC, APP_DESC_OFFSET, HEADER_GATE_LEN, IMAGE_MAGIC,
    };
    let mut img = vec![0x5Au8; len.max(HEADER_GATE_LEN)];
    img[0] = IMAGE_MAGIC;
    img[APP_DESC_OFFSET..APP_DESC_OFFSET + 4].copy_from_slice(&APP_DESC_MAGIC.to_le_bytes());
    // version (offset 16) and project name (offset 48), NUL-padded.
    let v = APP_DESC_OFFSET + 16;
    img[v..v + 32].fill(0);
    img[v..v + 5].copy_from_slice(b"1.0.1");
    let p = APP_DESC_OFFSET + 48;
    img[p..p + 32].fill(0);
    img[p..p + project.len()].copy_from_slice(project.as_bytes());
    img
}

// ── Rig ───────────────────────────────────────────────────────

/// A service wired to mocks, plus handles on every record.
pub struct Rig {
    pub service: ThingService,
    pub inbox: Arc<Inbox>,
    pub radio: Arc<Mutex<RadioLog>>,
    pub network: Arc<Mutex<NetworkLog>>,
    pub broker: Arc<Mutex<BrokerLog>>,
    pub restarts: Arc<Mutex<u32>>,
    pub firmware: Arc<Mutex<FirmwareLog>>,
}

/// Fresh store holding the symmetric key, the POP and a factory bundle.
pub fn factory_storage() -> Box<dyn StoragePort> {
    let mut storage = NvsAdapter::new().unwrap();
    secrets::key::set(&mut storage, KEY_HEX).unwrap();
    secrets::pop::set(&mut storage, POP_HEX).unwrap();
    storage.set_blob("ota_root_ca", b"factory-ca\0").unwrap();
    storage.set_blob("ota_thing_cert", b"factory-cert\0").unwrap();
    storage.set_blob("ota_thing_key", b"factory-key\0").unwrap();
    Box::new(storage)
}

impl Rig {
    pub fn new() -> Self {
        Self::with_storage(factory_storage())
    }

    /// Boot-time wiring, as the binary does it, on top of `storage`.
    pub fn with_storage(storage: Box<dyn StoragePort>) -> Self {
        let config = SystemConfig::default();
        let inbox = Arc::new(Inbox::new(config.mqtt_data_max_len()));
        let auth = secrets::auth::init(storage.as_ref());
        let channel = secrets::key::channel(storage.as_ref()).ok();
        let thing = ThingEngine::new(
            DEVICE_ID,
            Arc::new(DefaultType::new(config.default_publish_interval_secs)),
            "rev-a",
            config.mqtt_data_max_len(),
        )
        .unwrap();

        let radio = Arc::new(Mutex::new(RadioLog::default()));
        let network = Arc::new(Mutex::new(NetworkLog::default()));
        let broker = Arc::new(Mutex::new(BrokerLog::default()));
        let restarts = Arc::new(Mutex::new(0));
        let firmware = Arc::new(Mutex::new(FirmwareLog::default()));

        let platform = Platform {
            storage,
            radio: Box::new(MockRadio {
                inbox: Arc::clone(&inbox),
                log: Arc::clone(&radio),
            }),
            network: Box::new(MockNetwork {
                inbox: Arc::clone(&inbox),
                log: Arc::clone(&network),
            }),
            broker: Box::new(MockBroker {
                inbox: Arc::clone(&inbox),
                log: Arc::clone(&broker),
            }),
            system: Box::new(MockSystem {
                restarts: Arc::clone(&restarts),
            }),
            firmware: FirmwarePorts {
                source: Box::new(MockSource(Arc::clone(&firmware))),
                decryptor: Box::new(MockDecryptor),
                sink: Box::new(MockSink(Arc::clone(&firmware))),
            },
        };
        let identity = DeviceId::try_from(DEVICE_ID).unwrap();
        let ctx = DeviceContext::new(config, identity, auth, Arc::clone(&inbox), channel, thing);

        Self {
            service: ThingService::new(ctx, platform),
            inbox,
            radio,
            network,
            broker,
            restarts,
            firmware,
        }
    }

    /// Boot and drain whatever boot produced.
    pub fn boot(&mut self) {
        self.service.boot().unwrap();
        assert!(self.service.run_pending());
    }

    pub fn trigger(&self, event: Event) {
        self.inbox.bus().trigger(event).unwrap();
    }

    /// Companion write, sealed with the device key.
    pub fn write(&self, characteristic: thingcore::provision::Characteristic, plaintext: &[u8]) {
        let key = hex16(KEY_HEX);
        let frame = SecureChannel::new(key).seal(&[0x11; 16], plaintext);
        self.inbox.on_radio_write(characteristic, &frame);
    }

    /// Cloud message on the device's subscription `suffix`.
    pub fn deliver(&self, suffix: &str, data: &[u8]) {
        let topic = format!("thingsub/{}/{}", DEVICE_ID, suffix);
        self.inbox.on_broker_data(&topic, data);
    }

    pub fn restarts(&self) -> u32 {
        *self.restarts.lock().unwrap()
    }

    /// Parsed notifications, oldest first.
    pub fn notifications(&self) -> Vec<serde_json::Value> {
        self.radio
            .lock()
            .unwrap()
            .notifications
            .iter()
            .map(|n| serde_json::from_slice(n).unwrap())
            .collect()
    }

    pub fn last_status(&self) -> Option<String> {
        self.notifications()
            .iter()
            .rev()
            .find(|n| n["type"] == "provision")
            .map(|n| n["status"].as_str().unwrap().to_string())
    }
}

pub fn hex16(hex: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, b) in out.iter_mut().enumerate() {
        *b = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).unwrap();
    }
    out
}

pub fn ap(ssid: &str, rssi: i8) -> AccessPoint {
    AccessPoint {
        ssid: heapless::String::try_from(ssid).unwrap(),
        rssi,
    }
}
