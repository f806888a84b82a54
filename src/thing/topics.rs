//! Broker topic names.
//!
//! ```text
//! thingpub/<id>/otaurl   device → cloud   ask for an update URL
//! thingpub/<id>/value    device → cloud   current value document
//! thingpub/<id>/bootup   device → cloud   "{}" once subscribed
//! thingsub/<id>/otaurl   cloud → device   {"do_ota":..,"otaurl":..}
//! thingsub/<id>/value    cloud → device   value update
//! thingsub/<id>/bootup   cloud → device   last known value
//! ```

use core::fmt::Write;

use super::ThingError;
use crate::channels::BrokerRoutes;
use crate::config::MQTT_TOPIC_MAX_SIZE;
use crate::events::Event;

/// A topic plus its terminating NUL fits in [`MQTT_TOPIC_MAX_SIZE`].
pub type Topic = heapless::String<MQTT_TOPIC_MAX_SIZE>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub pub_otaurl: Topic,
    pub pub_value: Topic,
    pub pub_bootup: Topic,
    pub sub_otaurl: Topic,
    pub sub_value: Topic,
    pub sub_bootup: Topic,
}

fn build(direction: &str, id: &str, leaf: &str) -> Result<Topic, ThingError> {
    let mut t = Topic::new();
    write!(t, "{direction}/{id}/{leaf}").map_err(|_| ThingError::TopicTooLong)?;
    if t.len() + 1 > MQTT_TOPIC_MAX_SIZE {
        return Err(ThingError::TopicTooLong);
    }
    Ok(t)
}

impl Topics {
    pub fn new(id: &str) -> Result<Self, ThingError> {
        Ok(Self {
            pub_otaurl: build("thingpub", id, "otaurl")?,
            pub_value: build("thingpub", id, "value")?,
            pub_bootup: build("thingpub", id, "bootup")?,
            sub_otaurl: build("thingsub", id, "otaurl")?,
            sub_value: build("thingsub", id, "value")?,
            sub_bootup: build("thingsub", id, "bootup")?,
        })
    }

    pub fn subscriptions(&self) -> [&str; 3] {
        [
            self.sub_otaurl.as_str(),
            self.sub_value.as_str(),
            self.sub_bootup.as_str(),
        ]
    }

    /// Which event each subscribed topic raises.
    pub fn routes(&self) -> BrokerRoutes {
        vec![
            (self.sub_otaurl.clone(), Event::ThingReceivedOtaUrl),
            (self.sub_value.clone(), Event::ThingReceivedValue),
            (self.sub_bootup.clone(), Event::ThingReceivedBootup),
        ]
    }
}
