//! Top-level operating-mode state machine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  STATE_TABLE                                             │
//! │  ┌───────────────┬───────┬───────────────────────────┐   │
//! │  │ OperatingState│ waits │ run                       │   │
//! │  ├───────────────┼───────┼───────────────────────────┤   │
//! │  │ Uninitialised │  -    │ none (leave loop)         │   │
//! │  │ Provision     │  yes  │ provision::run            │   │
//! │  │ Ota           │  no   │ ota::run                  │   │
//! │  │ Thing         │  yes  │ thing::run                │   │
//! │  └───────────────┴───────┴───────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each iteration the service looks up the current state.  A state that
//! `waits` gets the next filtered event from the bus; the others run
//! once with [`Event::Ignore`].  The run function returns `false` to leave
//! the loop, after which the device restarts.  Run functions change the
//! state through [`DeviceContext::set_state`]; the new state's run
//! function is used from the next iteration on.

pub mod context;

use context::DeviceContext;

use crate::app::service::Platform;
use crate::events::Event;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Operating modes of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum OperatingState {
    #[default]
    Uninitialised = 0,
    Provision = 1,
    Ota = 2,
    Thing = 3,
}

impl OperatingState {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 4;

    pub fn descriptor(self) -> &'static StateDescriptor {
        &STATE_TABLE[self as usize]
    }
}

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Handle one event.  `false` leaves the top-level loop.
pub type StateRunFn = fn(&mut DeviceContext, &mut Platform, Event) -> bool;

pub struct StateDescriptor {
    pub id: OperatingState,
    pub name: &'static str,
    /// Block on the event bus before each run.
    pub waits: bool,
    pub run: Option<StateRunFn>,
}

pub static STATE_TABLE: [StateDescriptor; OperatingState::COUNT] = [
    StateDescriptor {
        id: OperatingState::Uninitialised,
        name: "Uninitialised",
        waits: false,
        run: None,
    },
    StateDescriptor {
        id: OperatingState::Provision,
        name: "Provision",
        waits: true,
        run: Some(crate::provision::run),
    },
    StateDescriptor {
        id: OperatingState::Ota,
        name: "Ota",
        waits: false,
        run: Some(crate::ota::run),
    },
    StateDescriptor {
        id: OperatingState::Thing,
        name: "Thing",
        waits: true,
        run: Some(crate::thing::run),
    },
];
