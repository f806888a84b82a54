//! Device-type plugins.
//!
//! A device type owns the hardware-facing half of the `thing_value`
//! document.  The steady-state engine hands it the `readwrite` / `read`
//! objects to fill on publish and the received `thing_value` object on
//! update; everything else in the document belongs to the engine.
//!
//! | Stored type name | Plugin                   | Publishes               |
//! |------------------|--------------------------|-------------------------|
//! | `"switch"`       | [`switch::Switch`]       | on every debounced edge |
//! | anything else    | [`default::DefaultType`] | every 5 s               |
//!
//! Plugins are shared with the thread that produces their hardware events,
//! so every method takes `&self` and state sits behind a try-lock.

pub mod default;
pub mod switch;

use core::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

/// The `thing_value` object of a published document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThingValue {
    pub readwrite: Map<String, Value>,
    pub read: Map<String, Value>,
}

/// Contract between the steady-state engine and a device-type plugin.
pub trait DeviceType: Send + Sync {
    /// Name stored under `thing_type`.
    fn name(&self) -> &'static str;

    /// Add this type's properties.  `false` if the state is busy.
    fn get_value_json(&self, value: &mut ThingValue) -> bool;

    /// Apply a received `thing_value` object.  `false` if it is malformed
    /// for this type or the state is busy.
    fn set_value_json(&self, value: &Map<String, Value>) -> bool;

    /// Last chance to park the hardware before the device restarts.
    fn pre_restart_hook(&self) -> bool {
        true
    }

    /// Period of unsolicited publishes, if the type wants them.
    fn publish_period(&self) -> Option<Duration> {
        None
    }
}

/// Plugin selected by the stored type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Switch,
    Default,
}

impl TypeKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            switch::TYPE_NAME => Self::Switch,
            _ => Self::Default,
        }
    }
}

/// Both `read` and `readwrite` must be present as objects before a plugin
/// looks at its own fields.
pub(crate) fn has_sections(value: &Map<String, Value>) -> bool {
    value.get("read").is_some_and(Value::is_object)
        && value.get("readwrite").is_some_and(Value::is_object)
}
