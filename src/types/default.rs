//! Placeholder device type with no properties.  Publishes its (empty)
//! value on a fixed period so the cloud side sees the device alive.

use core::time::Duration;

use log::{error, info};
use serde_json::{Map, Value};

use super::{DeviceType, ThingValue, has_sections};

pub const TYPE_NAME: &str = "default";

pub struct DefaultType {
    period: Duration,
}

impl DefaultType {
    pub fn new(publish_interval_secs: u32) -> Self {
        info!("Default type, publishing every {} s", publish_interval_secs);
        Self {
            period: Duration::from_secs(u64::from(publish_interval_secs)),
        }
    }
}

impl DeviceType for DefaultType {
    fn name(&self) -> &'static str {
        TYPE_NAME
    }

    fn get_value_json(&self, _value: &mut ThingValue) -> bool {
        true
    }

    fn set_value_json(&self, value: &Map<String, Value>) -> bool {
        if !has_sections(value) {
            error!("thing_value lacks read/readwrite");
            return false;
        }
        true
    }

    fn publish_period(&self) -> Option<Duration> {
        Some(self.period)
    }
}
