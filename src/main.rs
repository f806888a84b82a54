//! Thing firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter      BleAdapter     WifiAdapter    MqttAdapter     │
//! │  (Config+Store)  (Radio)        (Network)      (Broker)        │
//! │  HttpSource · ImgDecryptor · OtaPartition      ChipSystem      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                ThingService (pure logic)               │    │
//! │  │  STATE_TABLE · Provision · Ota · Thing                 │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Tickers (announce, publish) · button task · Inbox/EventBus    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use esp_idf_hal::gpio::{PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;

use thingcore::adapters::ble::BleAdapter;
use thingcore::adapters::device_id;
use thingcore::adapters::firmware;
use thingcore::adapters::mqtt::MqttAdapter;
use thingcore::adapters::nvs::NvsAdapter;
use thingcore::adapters::system::ChipSystem;
use thingcore::adapters::timer::{self, Core, Ticker};
use thingcore::adapters::wifi::WifiAdapter;
use thingcore::app::ports::ConfigPort;
use thingcore::app::service::{Platform, ThingService};
use thingcore::channels::Inbox;
use thingcore::config::SystemConfig;
use thingcore::events::Event;
use thingcore::fsm::context::DeviceContext;
use thingcore::secrets;
use thingcore::thing::{ThingEngine, profile};
use thingcore::types::default::DefaultType;
use thingcore::types::switch::Switch;
use thingcore::types::{DeviceType, TypeKind};

fn now_ms() -> u32 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1000) as u32
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // The image booted, so cancel any pending rollback.
    unsafe {
        esp_idf_svc::sys::esp_ota_mark_app_valid_cancel_rollback();
    }

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // ── 2. Storage and config ─────────────────────────────────
    let storage = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let config = match storage.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    // ── 3. Identity and secrets ───────────────────────────────
    let identity = device_id::device_id(&device_id::read_mac())?;
    let auth = secrets::auth::init(&storage);
    let channel = match secrets::key::channel(&storage) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("No secure channel: {}", e);
            None
        }
    };
    let wifi_credentials = secrets::wifi::load(&storage).ok();
    let rsa_key = firmware::load_rsa_key(&storage).unwrap_or_else(|e| {
        warn!("No image decryption key: {}", e);
        Vec::new()
    });

    let inbox = Arc::new(Inbox::new(config.mqtt_data_max_len()));

    // ── 4. Device type ────────────────────────────────────────
    let (type_name, hw_version) = match profile::load(&storage) {
        Ok(p) => (p.type_name, p.hw_version),
        Err(e) => {
            warn!("No thing profile ({}), using the default type", e);
            (heapless::String::new(), heapless::String::new())
        }
    };
    let mut tickers = Vec::new();
    let device: Arc<dyn DeviceType> = match TypeKind::from_name(&type_name) {
        TypeKind::Switch => {
            let led = PinDriver::output(peripherals.pins.gpio22)?;
            let switch = Arc::new(Switch::new(
                led,
                Arc::clone(&inbox),
                config.switch_debounce_ms,
            ));

            let mut button = PinDriver::input(peripherals.pins.gpio23)?;
            button.set_pull(Pull::Up)?;
            let edges = Arc::clone(&switch);
            timer::spawn_on_core(Core::App, 10, 4, "button\0", move || {
                loop {
                    if let Err(e) = futures_lite::future::block_on(button.wait_for_falling_edge()) {
                        error!("Button wait failed: {:?}", e);
                        return;
                    }
                    edges.on_button_edge(now_ms());
                }
            })?;
            switch
        }
        TypeKind::Default => Arc::new(DefaultType::new(config.default_publish_interval_secs)),
    };
    if let Some(period) = device.publish_period() {
        tickers.push(Ticker::start(
            "publish\0",
            period,
            Arc::clone(&inbox),
            Event::ThingPublishValue,
        )?);
    }
    tickers.push(Ticker::start(
        "announce\0",
        Duration::from_secs(u64::from(config.ota_announce_interval_secs)),
        Arc::clone(&inbox),
        Event::ThingPublishOtaUrl,
    )?);

    // ── 5. Context and ports ──────────────────────────────────
    let thing = ThingEngine::new(
        &identity,
        device,
        &hw_version,
        config.mqtt_data_max_len(),
    )
    .map_err(thingcore::Error::from)?;
    let platform = Platform {
        storage: Box::new(storage),
        radio: Box::new(BleAdapter::new(Arc::clone(&inbox))),
        network: Box::new(WifiAdapter::new(
            Arc::clone(&inbox),
            wifi_credentials,
            peripherals.modem,
            sysloop,
            None,
        )?),
        broker: Box::new(MqttAdapter::new(
            Arc::clone(&inbox),
            config.mqtt_buffer_size as usize,
        )),
        system: Box::new(ChipSystem::new()),
        firmware: firmware::ports(rsa_key),
    };
    let ctx = DeviceContext::new(config, identity, auth, inbox, channel, thing);

    // ── 6. Run ────────────────────────────────────────────────
    let mut service = ThingService::new(ctx, platform);
    service.boot()?;
    service.run();

    // Unreachable on hardware: run() ends in a restart.
    drop(tickers);
    Ok(())
}
