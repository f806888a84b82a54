//! Steady-state cloud protocol.
//!
//! ```text
//!  wifi start ─▶ wifi up ─▶ broker up ─▶ subscribed ─▶ publish bootup
//!                                                          │
//!            received bootup (last value) ◀────────────────┘
//!                    │ apply, ask for update URL
//!                    ▼
//!            received otaurl ──▶ do_ota ──▶ OtaUpdating
//!                    │ no
//!                    ▼
//!   ┌──▶ received value / publish value / publish otaurl ──┐
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! A companion connecting over BLE, or the station dropping, is always
//! accepted whatever the current step.

pub mod profile;
pub mod topics;
pub mod value;

use core::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::app::ports::BrokerError;
use crate::app::service::Platform;
use crate::channels::Inbox;
use crate::events::{BusError, Event, EventMask};
use crate::fsm::OperatingState;
use crate::fsm::context::DeviceContext;
use crate::provision;
use crate::types::DeviceType;

pub use topics::Topics;
pub use value::MobileValue;

/// Payload of the bootup announcement.
pub const BOOTUP_MESSAGE: &[u8] = b"{}";

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThingError {
    /// Received data is not JSON.
    MalformedJson,
    /// `thing_value` is missing or not an object.
    NotAnObject,
    /// The device-type plugin refused the value.
    TypeRejected,
    /// `mobile_value` is missing a string.
    MobileRejected,
    /// A shared buffer was locked.
    BufferBusy,
    Encode,
    /// Document exceeds the broker data limit.
    TooLarge,
    InvalidOtaUrl,
    TopicTooLong,
    Broker(BrokerError),
    Bus(BusError),
}

impl fmt::Display for ThingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedJson => write!(f, "malformed JSON"),
            Self::NotAnObject => write!(f, "thing_value is not an object"),
            Self::TypeRejected => write!(f, "device type rejected the value"),
            Self::MobileRejected => write!(f, "mobile_value rejected"),
            Self::BufferBusy => write!(f, "buffer busy"),
            Self::Encode => write!(f, "encode failed"),
            Self::TooLarge => write!(f, "document too large"),
            Self::InvalidOtaUrl => write!(f, "invalid OTA URL"),
            Self::TopicTooLong => write!(f, "topic too long"),
            Self::Broker(e) => write!(f, "{e}"),
            Self::Bus(e) => write!(f, "{e}"),
        }
    }
}

impl From<BrokerError> for ThingError {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

impl From<BusError> for ThingError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Per-device steady-state data: topics, plugin and companion strings.
pub struct ThingEngine {
    topics: Topics,
    device: Arc<dyn DeviceType>,
    mobile: MobileValue,
    hw_version: heapless::String<{ profile::FIELD_MAX_LEN }>,
    data_max_len: usize,
}

impl ThingEngine {
    pub fn new(
        id: &str,
        device: Arc<dyn DeviceType>,
        hw_version: &str,
        data_max_len: usize,
    ) -> Result<Self, ThingError> {
        let topics = Topics::new(id)?;
        let hw_version = heapless::String::try_from(hw_version).map_err(|_| ThingError::TooLarge)?;
        info!("Thing {} ({}), hw {}", id, device.name(), hw_version);
        Ok(Self {
            topics,
            device,
            mobile: MobileValue::new(),
            hw_version,
            data_max_len,
        })
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn device(&self) -> &Arc<dyn DeviceType> {
        &self.device
    }

    pub fn mobile(&self) -> &MobileValue {
        &self.mobile
    }

    /// Route the subscribed topics into `inbox`.
    pub fn install_routes(&self, inbox: &Inbox) {
        inbox.set_broker_routes(self.topics.routes());
    }

    /// Current value document, as published.
    pub fn encode_value(&self) -> Result<Vec<u8>, ThingError> {
        value::encode(
            self.device.as_ref(),
            &self.hw_version,
            &self.mobile,
            self.data_max_len,
        )
    }

    fn apply_received(&self, inbox: &Inbox) -> Result<(), ThingError> {
        let data = inbox.take_broker_data().ok_or(ThingError::BufferBusy)?;
        value::apply(&data, self.device.as_ref(), &self.mobile)
    }

    fn received_ota_url(&self, inbox: &Inbox) -> Result<Option<String>, ThingError> {
        let data = inbox.take_broker_data().ok_or(ThingError::BufferBusy)?;
        value::parse_ota_url(&data, self.data_max_len)
    }

    fn publish(&self, platform: &mut Platform, topic: &str) -> Result<(), ThingError> {
        let doc = self.encode_value()?;
        platform.broker.publish(topic, &doc)?;
        Ok(())
    }

    fn publish_value(&self, platform: &mut Platform) {
        if let Err(e) = self.publish(platform, &self.topics.pub_value) {
            error!("Value not published: {}", e);
        }
    }

    fn publish_otaurl(&self, platform: &mut Platform) {
        if let Err(e) = self.publish(platform, &self.topics.pub_otaurl) {
            error!("OTA URL request not published: {}", e);
        }
    }

    fn apply_value(&self, inbox: &Inbox) {
        if let Err(e) = self.apply_received(inbox) {
            error!("Value not applied: {}", e);
        }
    }
}

// ── State run function ────────────────────────────────────────

/// Accepted in every steady-state step.
pub const ALWAYS: EventMask = EventMask::from_bits(
    Event::BleGapConnected.bit() | Event::WifiDisconnected.bit(),
);

/// Steady-state value traffic.
const VALUE_TRAFFIC: EventMask = EventMask::from_bits(
    Event::ThingReceivedValue.bit()
        | Event::ThingPublishOtaUrl.bit()
        | Event::ThingPublishValue.bit(),
);

/// Handle one event.  Returns `false` on an event this state has no
/// transition for.
pub fn run(ctx: &mut DeviceContext, platform: &mut Platform, event: Event) -> bool {
    let inbox = Arc::clone(&ctx.inbox);
    let bus = inbox.bus();

    match event {
        Event::BleGapConnected => {
            ctx.set_state(OperatingState::Provision);
            provision::begin(&inbox, platform.broker.as_mut());
        }

        Event::WifiStart => {
            bus.expect(ALWAYS | Event::WifiConnected);
            if let Err(e) = platform.network.connect() {
                error!("Wi-Fi connect failed: {}", e);
            }
        }

        Event::WifiConnected => {
            bus.expect(ALWAYS | Event::MqttConnected);
        }

        Event::WifiDisconnected => {
            bus.expect(ALWAYS | Event::WifiConnected);
            warn!("Wi-Fi lost, reconnecting");
            if let Err(e) = platform.network.connect() {
                error!("Wi-Fi connect failed: {}", e);
            }
        }

        Event::MqttConnected => {
            bus.expect(ALWAYS | Event::MqttSubscribed);
            let topics = ctx.thing.topics().subscriptions();
            if let Err(e) = platform.broker.subscribe(&topics) {
                error!("Subscribe failed: {}", e);
            }
        }

        Event::MqttSubscribed => {
            bus.expect(ALWAYS | Event::ThingReceivedBootup);
            let topic = ctx.thing.topics().pub_bootup.clone();
            if let Err(e) = platform.broker.publish(&topic, BOOTUP_MESSAGE) {
                error!("Bootup not published: {}", e);
            }
        }

        Event::ThingReceivedBootup => {
            bus.expect(ALWAYS | Event::ThingReceivedOtaUrl);
            ctx.thing.apply_value(&inbox);
            ctx.thing.publish_otaurl(platform);
        }

        Event::ThingReceivedOtaUrl => {
            bus.expect(ALWAYS | VALUE_TRAFFIC);
            match ctx.thing.received_ota_url(&inbox) {
                Ok(Some(url)) => {
                    ctx.ota_url = Some(url);
                    ctx.set_state(OperatingState::Ota);
                }
                Ok(None) => {
                    info!("No update requested");
                    ctx.thing.publish_value(platform);
                }
                Err(e) => {
                    error!("OTA URL rejected: {}", e);
                    ctx.thing.publish_value(platform);
                }
            }
        }

        Event::ThingReceivedValue => {
            bus.expect(ALWAYS | VALUE_TRAFFIC);
            ctx.thing.apply_value(&inbox);
            ctx.thing.publish_value(platform);
        }

        Event::ThingPublishOtaUrl => {
            bus.expect(ALWAYS | Event::ThingReceivedOtaUrl);
            ctx.thing.publish_otaurl(platform);
        }

        Event::ThingPublishValue => {
            bus.expect(
                ALWAYS | Event::MqttSubscribed | Event::ThingReceivedValue | Event::ThingPublishValue,
            );
            ctx.thing.publish_value(platform);
        }

        Event::Ignore => {}

        other => {
            warn!("No steady-state transition for {:?}", other);
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default::DefaultType;

    fn engine() -> ThingEngine {
        ThingEngine::new("id0000000000AA", Arc::new(DefaultType::new(5)), "rev-a", 986).unwrap()
    }

    #[test]
    fn always_mask_contents() {
        assert!(ALWAYS.contains(Event::BleGapConnected));
        assert!(ALWAYS.contains(Event::WifiDisconnected));
        assert!(!ALWAYS.contains(Event::WifiConnected));
    }

    #[test]
    fn routes_installed_into_inbox() {
        let e = engine();
        let inbox = Inbox::new(986);
        e.install_routes(&inbox);
        inbox.bus().expect(Event::ThingReceivedBootup);
        inbox.on_broker_data("thingsub/id0000000000AA/bootup", b"{}");
        assert_eq!(inbox.bus().try_wait(), Some(Event::ThingReceivedBootup));
    }

    #[test]
    fn received_data_needs_buffer_content() {
        let e = engine();
        let inbox = Inbox::new(986);
        // Empty buffer parses as malformed rather than panicking.
        assert_eq!(e.apply_received(&inbox), Err(ThingError::MalformedJson));
    }

    #[test]
    fn hw_version_too_long() {
        let long = "x".repeat(40);
        assert!(ThingEngine::new("id0000000000AA", Arc::new(DefaultType::new(5)), &long, 986).is_err());
    }
}
