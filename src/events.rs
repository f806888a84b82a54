//! Event bus: bounded FIFO of bitmask events with a single filtering
//! consumer.
//!
//! Events are produced by:
//! - BLE GAP / GATT callbacks (companion connect, characteristic writes)
//! - Wi-Fi and MQTT driver event handlers
//! - Timer threads (periodic publish, daily OTA announce)
//! - The button task of the switch device type
//! - The consumer itself (notification bookkeeping)
//!
//! Events are consumed by the top-level state machine loop, one per
//! [`EventBus::wait`] call.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────┐
//! │ BLE cb      │────▶│              │     │              │     │ run-loop │
//! │ Wi-Fi cb    │────▶│  Event Queue │────▶│ expect mask  │────▶│ (single  │
//! │ MQTT cb     │────▶│  (50 slots)  │     │ filter       │     │ consumer)│
//! │ Timers      │────▶│              │     │              │     │          │
//! └─────────────┘     └──────────────┘     └──────────────┘     └──────────┘
//! ```
//!
//! An event that is dequeued while outside the current expect mask is
//! dropped and reported as [`Event::Ignore`]; it is never requeued.

use core::fmt;
use core::ops::BitOr;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, error};

/// Queue depth.  The BLE host task runs at higher priority than the
/// consumer and can burst one notify-done per scan result.
pub const EVENT_QUEUE_CAPACITY: usize = 50;

/// Every event the firmware produces.  The discriminant is the bit index
/// in an [`EventMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Event {
    /// Produced event was outside the expect mask.
    Ignore = 0,

    // ── BLE ───────────────────────────────────────────────
    BleGapConnected = 1,
    BleGapDisconnected = 2,
    /// A notification left the radio.
    BleNotifyDone = 3,

    // ── Wi-Fi ─────────────────────────────────────────────
    WifiStart = 4,
    WifiDisconnected = 5,
    WifiConnected = 6,
    WifiScanDone = 7,

    // ── MQTT ──────────────────────────────────────────────
    MqttConnected = 8,
    MqttSubscribed = 9,
    MqttDataReceived = 10,

    // ── Provisioning ──────────────────────────────────────
    ProvisionNotifyingWifiScan = 11,
    ProvisionNotifyingStatus = 12,
    ProvisionReceivePop = 13,
    ProvisionReceiveRootCa = 14,
    ProvisionReceiveThingCert = 15,
    ProvisionReceiveThingKey = 16,
    ProvisionReceiveWifiCreds = 17,

    // ── Steady state ──────────────────────────────────────
    ThingReceivedOtaUrl = 18,
    ThingReceivedValue = 19,
    ThingReceivedBootup = 20,
    ThingPublishOtaUrl = 21,
    ThingPublishValue = 22,
    ThingPublishBootup = 23,
}

impl Event {
    /// Number of distinct events.
    pub const COUNT: usize = 24;

    /// All events in bit order.
    pub const ALL: [Event; Self::COUNT] = [
        Event::Ignore,
        Event::BleGapConnected,
        Event::BleGapDisconnected,
        Event::BleNotifyDone,
        Event::WifiStart,
        Event::WifiDisconnected,
        Event::WifiConnected,
        Event::WifiScanDone,
        Event::MqttConnected,
        Event::MqttSubscribed,
        Event::MqttDataReceived,
        Event::ProvisionNotifyingWifiScan,
        Event::ProvisionNotifyingStatus,
        Event::ProvisionReceivePop,
        Event::ProvisionReceiveRootCa,
        Event::ProvisionReceiveThingCert,
        Event::ProvisionReceiveThingKey,
        Event::ProvisionReceiveWifiCreds,
        Event::ThingReceivedOtaUrl,
        Event::ThingReceivedValue,
        Event::ThingReceivedBootup,
        Event::ThingPublishOtaUrl,
        Event::ThingPublishValue,
        Event::ThingPublishBootup,
    ];

    /// Single-bit mask for this event.
    pub const fn bit(self) -> u32 {
        1 << self as u8
    }

    /// Inverse of `self as u8`.
    pub fn from_index(idx: u32) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }
}

// ---------------------------------------------------------------------------
// EventMask
// ---------------------------------------------------------------------------

/// A set of events.  Produced events may carry several bits; the consumer
/// filter is also a mask.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: Self = Self(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lowest-numbered event in the set.
    pub fn first(self) -> Option<Event> {
        if self.0 == 0 {
            return None;
        }
        Event::from_index(self.0.trailing_zeros())
    }

    fn iter(self) -> impl Iterator<Item = Event> {
        Event::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl From<Event> for EventMask {
    fn from(e: Event) -> Self {
        Self(e.bit())
    }
}

impl BitOr for Event {
    type Output = EventMask;
    fn bitor(self, rhs: Event) -> EventMask {
        EventMask(self.bit() | rhs.bit())
    }
}

impl BitOr<Event> for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: Event) -> EventMask {
        EventMask(self.0 | rhs.bit())
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// All queue slots are occupied.  Capacity is sized so this never
    /// happens in normal operation.
    QueueFull,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "event queue full"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Multi-producer, single-consumer event queue plus the process-wide
/// expect mask.
pub struct EventBus {
    queue: Channel<CriticalSectionRawMutex, EventMask, EVENT_QUEUE_CAPACITY>,
    expected: AtomicU32,
}

impl EventBus {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            expected: AtomicU32::new(0),
        }
    }

    /// Non-blocking enqueue.  Safe from any thread.
    pub fn trigger(&self, events: impl Into<EventMask>) -> Result<(), BusError> {
        let events = events.into();
        match self.queue.try_send(events) {
            Ok(()) => {
                debug!("TRIGGER -> {:?}", events);
                Ok(())
            }
            Err(_) => {
                error!("Event queue full, dropped {:?}", events);
                Err(BusError::QueueFull)
            }
        }
    }

    /// Replace the consumer filter.  Must be called before the events it
    /// should catch can be produced.
    pub fn expect(&self, mask: impl Into<EventMask>) {
        self.expected.store(mask.into().bits(), Ordering::Release);
    }

    /// Current consumer filter.
    pub fn expected(&self) -> EventMask {
        EventMask(self.expected.load(Ordering::Acquire))
    }

    /// Block until one event is dequeued.  Returns it if it intersects the
    /// expect mask, otherwise [`Event::Ignore`].
    pub fn wait(&self) -> Event {
        debug!("Waiting for events...");
        let produced = futures_lite::future::block_on(self.queue.receive());
        self.filter(produced)
    }

    /// Non-blocking variant of [`wait`](Self::wait); `None` when the queue is
    /// empty.
    pub fn try_wait(&self) -> Option<Event> {
        self.queue.try_receive().ok().map(|produced| self.filter(produced))
    }

    /// Events currently queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn filter(&self, produced: EventMask) -> Event {
        match produced.intersection(self.expected()).first() {
            Some(event) => {
                debug!("DO -> {:?}", event);
                event
            }
            None => {
                debug!("IGNORE -> {:?}", produced);
                Event::Ignore
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
