//! Hand-off buffers between producer callbacks and the consumer loop.
//!
//! Radio and broker callbacks run on driver tasks.  They copy their
//! payload into a scratch buffer here and raise an event; the consumer
//! picks the payload up when it handles that event.  Both sides use
//! try-lock: a busy buffer means the update is dropped, never waited on.
//!
//! ```text
//! ┌──────────────┐  copy + trigger  ┌─────────┐  wait  ┌──────────────┐
//! │ GATT write   │─────────────────▶│  Inbox  │───────▶│ Provisioning │
//! │ MQTT data    │─────────────────▶│         │───────▶│ Thing        │
//! └──────────────┘                  └─────────┘        └──────────────┘
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::{error, info, warn};

use crate::events::{Event, EventBus};
use crate::provision::Characteristic;

/// Largest single GATT write the provisioning service accepts.
pub const BLE_BUFFER_SIZE: usize = 256;

/// Copy of one characteristic write.
pub type BleFrame = heapless::Vec<u8, BLE_BUFFER_SIZE>;

/// What the last characteristic write left in the scratch buffer.
#[derive(Debug)]
enum RadioSlot {
    Frame(BleFrame),
    /// The write did not fit; only its length is kept.
    Oversized(usize),
}

impl Default for RadioSlot {
    fn default() -> Self {
        Self::Frame(BleFrame::new())
    }
}

/// Why a characteristic write could not be handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioWriteError {
    /// Scratch buffer held by the other side.
    Busy,
    /// The write was longer than [`BLE_BUFFER_SIZE`].
    Oversized(usize),
}

impl core::fmt::Display for RadioWriteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "BLE buffer unavailable"),
            Self::Oversized(n) => write!(f, "BLE write of {n} bytes exceeds {BLE_BUFFER_SIZE}"),
        }
    }
}

/// Topic → event table for inbound broker data.
pub type BrokerRoutes = Vec<(heapless::String<32>, Event)>;

/// Shared between every producer context and the consumer.
pub struct Inbox {
    bus: EventBus,
    write_allowed: AtomicBool,
    ble: Mutex<CriticalSectionRawMutex, RadioSlot>,
    broker: Mutex<CriticalSectionRawMutex, Vec<u8>>,
    broker_limit: usize,
    routes: OnceLock<BrokerRoutes>,
}

impl Inbox {
    /// `broker_limit` bounds inbound broker payloads (see
    /// [`SystemConfig::mqtt_data_max_len`](crate::config::SystemConfig::mqtt_data_max_len)).
    pub fn new(broker_limit: usize) -> Self {
        Self {
            bus: EventBus::new(),
            write_allowed: AtomicBool::new(false),
            ble: Mutex::new(RadioSlot::default()),
            broker: Mutex::new(Vec::new()),
            broker_limit,
            routes: OnceLock::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ── Provisioning write permission ─────────────────────────

    /// Grant or revoke the companion's permission to write secrets.
    pub fn allow_writes(&self, allowed: bool) {
        self.write_allowed.store(allowed, Ordering::Release);
    }

    pub fn writes_allowed(&self) -> bool {
        self.write_allowed.load(Ordering::Acquire)
    }

    // ── BLE side ──────────────────────────────────────────────

    /// GATT write callback.  The POP write is always accepted; the others
    /// are dropped while writes are not allowed.  A write longer than the
    /// scratch buffer still raises its event so the consumer can fail the
    /// step.
    pub fn on_radio_write(&self, characteristic: Characteristic, data: &[u8]) {
        if characteristic != Characteristic::Pop && !self.writes_allowed() {
            error!("BLE write to {:?} refused: writes not allowed", characteristic);
            return;
        }
        let Ok(mut slot) = self.ble.try_lock() else {
            warn!("BLE buffer busy, dropped write to {:?}", characteristic);
            return;
        };
        *slot = match BleFrame::from_slice(data) {
            Ok(frame) => RadioSlot::Frame(frame),
            Err(()) => {
                error!(
                    "BLE write to {:?} too long: {} bytes > {}",
                    characteristic,
                    data.len(),
                    BLE_BUFFER_SIZE
                );
                RadioSlot::Oversized(data.len())
            }
        };
        drop(slot);
        if self.bus.trigger(characteristic.event()).is_err() {
            // No event will consume it.
            if let Ok(mut slot) = self.ble.try_lock() {
                *slot = RadioSlot::default();
            }
        }
    }

    /// Consumer side: copy out the last characteristic write.
    pub fn take_radio_write(&self) -> Result<BleFrame, RadioWriteError> {
        let Ok(mut slot) = self.ble.try_lock() else {
            error!("BLE buffer busy");
            return Err(RadioWriteError::Busy);
        };
        match core::mem::take(&mut *slot) {
            RadioSlot::Frame(frame) => Ok(frame),
            RadioSlot::Oversized(n) => Err(RadioWriteError::Oversized(n)),
        }
    }

    // ── Broker side ───────────────────────────────────────────

    /// Install the subscription table.  Only the first call takes effect.
    pub fn set_broker_routes(&self, routes: BrokerRoutes) {
        if self.routes.set(routes).is_err() {
            warn!("Broker routes already installed");
        }
    }

    /// MQTT data callback.  Unknown topics and oversized payloads are
    /// dropped.
    pub fn on_broker_data(&self, topic: &str, data: &[u8]) {
        let Some(event) = self
            .routes
            .get()
            .and_then(|r| r.iter().find(|(t, _)| t.as_str() == topic))
            .map(|(_, e)| *e)
        else {
            warn!("MQTT data on unrouted topic {}", topic);
            return;
        };
        if data.len() > self.broker_limit {
            error!("MQTT data too long for buffer ({} bytes)", data.len());
            return;
        }
        let Ok(mut buf) = self.broker.try_lock() else {
            error!("MQTT buffer busy, dropped {:?}", event);
            return;
        };
        buf.clear();
        buf.extend_from_slice(data);
        drop(buf);
        info!("MQTT data routed to {:?}", event);
        if self.bus.trigger(event).is_err() {
            if let Ok(mut buf) = self.broker.try_lock() {
                buf.clear();
            }
        }
    }

    /// Consumer side: copy out the last broker payload.
    pub fn take_broker_data(&self) -> Option<Vec<u8>> {
        match self.broker.try_lock() {
            Ok(mut buf) => Some(core::mem::take(&mut *buf)),
            Err(_) => {
                error!("MQTT buffer busy");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> BrokerRoutes {
        let mut t = heapless::String::new();
        t.push_str("thingsub/x/value").unwrap();
        vec![(t, Event::ThingReceivedValue)]
    }

    #[test]
    fn pop_write_accepted_without_permission() {
        let inbox = Inbox::new(64);
        inbox.bus().expect(Event::ProvisionReceivePop);
        inbox.on_radio_write(Characteristic::Pop, b"abc");
        assert_eq!(inbox.bus().try_wait(), Some(Event::ProvisionReceivePop));
        assert_eq!(inbox.take_radio_write().unwrap().as_slice(), b"abc");
        // Taking empties the slot.
        assert!(inbox.take_radio_write().unwrap().is_empty());
    }

    #[test]
    fn other_writes_need_permission() {
        let inbox = Inbox::new(64);
        inbox.on_radio_write(Characteristic::WifiCredentials, b"abc");
        assert_eq!(inbox.bus().pending(), 0);

        inbox.allow_writes(true);
        inbox.on_radio_write(Characteristic::WifiCredentials, b"abc");
        assert_eq!(inbox.bus().pending(), 1);
    }

    #[test]
    fn oversized_radio_write_still_raises_event() {
        let inbox = Inbox::new(64);
        inbox.allow_writes(true);
        inbox.bus().expect(Event::ProvisionReceiveRootCa);
        inbox.on_radio_write(Characteristic::RootCa, &[0u8; BLE_BUFFER_SIZE + 4]);
        assert_eq!(inbox.bus().try_wait(), Some(Event::ProvisionReceiveRootCa));
        assert_eq!(
            inbox.take_radio_write(),
            Err(RadioWriteError::Oversized(BLE_BUFFER_SIZE + 4))
        );
        // The marker is consumed with the write.
        assert!(inbox.take_radio_write().unwrap().is_empty());
    }

    #[test]
    fn write_at_buffer_size_fits() {
        let inbox = Inbox::new(64);
        inbox.on_radio_write(Characteristic::Pop, &[7u8; BLE_BUFFER_SIZE]);
        assert_eq!(inbox.take_radio_write().unwrap().len(), BLE_BUFFER_SIZE);
    }

    #[test]
    fn full_queue_discards_radio_write() {
        let inbox = Inbox::new(64);
        for _ in 0..crate::events::EVENT_QUEUE_CAPACITY {
            inbox.bus().trigger(Event::WifiStart).unwrap();
        }
        inbox.on_radio_write(Characteristic::Pop, b"abc");
        assert!(inbox.take_radio_write().unwrap().is_empty());
    }

    #[test]
    fn broker_data_routed_by_topic() {
        let inbox = Inbox::new(8);
        inbox.set_broker_routes(routes());
        inbox.on_broker_data("thingsub/x/other", b"{}");
        assert_eq!(inbox.bus().pending(), 0);

        inbox.on_broker_data("thingsub/x/value", b"{}");
        inbox.bus().expect(Event::ThingReceivedValue);
        assert_eq!(inbox.bus().try_wait(), Some(Event::ThingReceivedValue));
        assert_eq!(inbox.take_broker_data().unwrap(), b"{}");
    }

    #[test]
    fn broker_data_over_limit_dropped() {
        let inbox = Inbox::new(4);
        inbox.set_broker_routes(routes());
        inbox.on_broker_data("thingsub/x/value", b"12345");
        assert_eq!(inbox.bus().pending(), 0);
    }
}
