//! On/off switch: one boolean driving an output pin, toggled by a push
//! button or by the cloud.
//!
//! ```json
//! { "readwrite": { "status": true }, "read": {} }
//! ```
//!
//! The button thread calls [`Switch::on_button_edge`] for every falling
//! edge.  Edges closer than the debounce window to the previous one are
//! ignored; an accepted edge toggles `status`, drives the pin and raises
//! `ThingPublishValue`.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal::digital::{OutputPin, PinState};
use log::{error, info, warn};
use serde_json::{Map, Value};

use super::{DeviceType, ThingValue, has_sections};
use crate::channels::Inbox;
use crate::events::Event;

pub const TYPE_NAME: &str = "switch";

/// `last_edge_ms` before the first edge.
const NO_EDGE: u32 = u32::MAX;

struct SwitchState<P> {
    status: bool,
    pin: P,
}

impl<P: OutputPin> SwitchState<P> {
    fn update_hw(&mut self) {
        if let Err(e) = self.pin.set_state(PinState::from(self.status)) {
            error!("Switch output not driven: {:?}", e);
        }
    }
}

pub struct Switch<P> {
    state: Mutex<CriticalSectionRawMutex, SwitchState<P>>,
    inbox: Arc<Inbox>,
    debounce_ms: u32,
    last_edge_ms: AtomicU32,
}

impl<P: OutputPin> Switch<P> {
    /// Takes ownership of the output and drives it low.
    pub fn new(pin: P, inbox: Arc<Inbox>, debounce_ms: u32) -> Self {
        let mut state = SwitchState { status: false, pin };
        state.update_hw();
        Self {
            state: Mutex::new(state),
            inbox,
            debounce_ms,
            last_edge_ms: AtomicU32::new(NO_EDGE),
        }
    }

    pub fn status(&self) -> Option<bool> {
        self.state.try_lock().ok().map(|s| s.status)
    }

    /// Falling edge on the button at `now_ms` (monotonic, wrapping).
    /// Returns `true` if the edge toggled the switch.  A toggle that cannot
    /// be published is undone.
    pub fn on_button_edge(&self, now_ms: u32) -> bool {
        let last = self.last_edge_ms.swap(now_ms, Ordering::AcqRel);
        if last != NO_EDGE && now_ms.wrapping_sub(last) <= self.debounce_ms {
            return false;
        }
        let Ok(mut state) = self.state.try_lock() else {
            warn!("Switch busy, edge dropped");
            return false;
        };
        state.status = !state.status;
        state.update_hw();
        if let Err(e) = self.inbox.bus().trigger(Event::ThingPublishValue) {
            error!("Switch toggle reverted: {}", e);
            state.status = !state.status;
            state.update_hw();
            return false;
        }
        info!("Switch toggled {}", if state.status { "on" } else { "off" });
        true
    }
}

impl<P: OutputPin + Send> DeviceType for Switch<P> {
    fn name(&self) -> &'static str {
        TYPE_NAME
    }

    fn get_value_json(&self, value: &mut ThingValue) -> bool {
        let Ok(state) = self.state.try_lock() else {
            error!("Switch busy");
            return false;
        };
        value
            .readwrite
            .insert("status".into(), Value::Bool(state.status));
        true
    }

    fn set_value_json(&self, value: &Map<String, Value>) -> bool {
        if !has_sections(value) {
            error!("thing_value lacks read/readwrite");
            return false;
        }
        let Some(status) = value
            .get("readwrite")
            .and_then(|rw| rw.get("status"))
            .and_then(Value::as_bool)
        else {
            error!("readwrite.status is not a bool");
            return false;
        };
        let Ok(mut state) = self.state.try_lock() else {
            error!("Switch busy");
            return false;
        };
        state.status = status;
        state.update_hw();
        true
    }
}
