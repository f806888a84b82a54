//! Steady-state broker traffic.
//!
//! Station up → broker connected → subscribed → bootup exchange → OTA
//! URL exchange → periodic value publishing.

use serde_json::Value;
use thingcore::events::Event;
use thingcore::fsm::OperatingState;

use crate::mock_hw::{DEVICE_ID, Rig};

fn topic(leaf: &str) -> String {
    format!("thingpub/{}/{}", DEVICE_ID, leaf)
}

/// Inner document of a published value.
fn inner(published: &[u8]) -> Value {
    let outer: Value = serde_json::from_slice(published).unwrap();
    serde_json::from_str(outer["value"].as_str().unwrap()).unwrap()
}

fn cloud_value(nickname: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "thing_value": { "readwrite": {}, "read": {} },
        "mobile_value": {
            "readwrite": { "network": "online" },
            "read": { "nickname": nickname, "sw_version": "2.1" }
        }
    }))
    .unwrap()
}

/// Booted, connected and subscribed; the bootup request is out.
fn online() -> Rig {
    let mut rig = Rig::new();
    rig.network.lock().unwrap().connect_result = Some(Event::WifiConnected);
    rig.boot();
    rig.trigger(Event::MqttConnected);
    assert!(rig.service.run_pending());
    rig
}

#[test]
fn boot_starts_transports_with_factory_bundle() {
    let mut rig = Rig::new();
    rig.boot();

    assert_eq!(
        rig.radio.lock().unwrap().started_as.as_deref(),
        Some(DEVICE_ID)
    );
    let network = rig.network.lock().unwrap();
    assert_eq!(network.starts, 1);
    assert_eq!(network.connects, 1);
    let broker = rig.broker.lock().unwrap();
    let bundle = broker.started_with.as_ref().unwrap();
    assert_eq!(bundle.root_ca, b"factory-ca");
    assert_eq!(bundle.thing_key, b"factory-key");
    assert_eq!(rig.service.context().state(), OperatingState::Thing);
}

#[test]
fn subscribes_then_announces_bootup() {
    let rig = online();
    let broker = rig.broker.lock().unwrap();

    assert_eq!(
        broker.subscriptions,
        [
            format!("thingsub/{}/otaurl", DEVICE_ID),
            format!("thingsub/{}/value", DEVICE_ID),
            format!("thingsub/{}/bootup", DEVICE_ID),
        ]
    );
    assert_eq!(broker.published_on(&topic("bootup")), vec![b"{}".to_vec()]);
}

#[test]
fn bootup_value_is_applied_and_otaurl_requested() {
    let mut rig = online();
    rig.deliver("bootup", &cloud_value("kitchen"));
    assert!(rig.service.run_pending());

    let broker = rig.broker.lock().unwrap();
    let requests = broker.published_on(&topic("otaurl"));
    assert_eq!(requests.len(), 1);
    let doc = inner(&requests[0]);
    assert_eq!(doc["mobile_value"]["read"]["nickname"], "kitchen");
    assert_eq!(doc["mobile_value"]["read"]["sw_version"], "2.1");
    assert_eq!(doc["mobile_value"]["readwrite"]["network"], "online");
    assert_eq!(doc["thing_value"]["read"]["hw_version"], "rev-a");
}

#[test]
fn no_update_publishes_value() {
    let mut rig = online();
    rig.deliver("bootup", &cloud_value("kitchen"));
    assert!(rig.service.run_pending());
    rig.deliver("otaurl", br#"{"do_ota":false,"otaurl":""}"#);
    assert!(rig.service.run_pending());

    assert_eq!(rig.service.context().state(), OperatingState::Thing);
    assert_eq!(
        rig.broker.lock().unwrap().published_on(&topic("value")).len(),
        1
    );

    rig.trigger(Event::ThingPublishValue);
    assert!(rig.service.run_pending());
    assert_eq!(
        rig.broker.lock().unwrap().published_on(&topic("value")).len(),
        2
    );
}

#[test]
fn cloud_value_update_is_echoed() {
    let mut rig = online();
    rig.deliver("bootup", &cloud_value("kitchen"));
    assert!(rig.service.run_pending());
    rig.deliver("otaurl", br#"{"do_ota":false,"otaurl":""}"#);
    assert!(rig.service.run_pending());

    rig.deliver("value", &cloud_value("hallway"));
    assert!(rig.service.run_pending());

    let broker = rig.broker.lock().unwrap();
    let values = broker.published_on(&topic("value"));
    let last = inner(values.last().unwrap());
    assert_eq!(last["mobile_value"]["read"]["nickname"], "hallway");
}

#[test]
fn malformed_value_is_not_applied() {
    let mut rig = online();
    rig.deliver("bootup", &cloud_value("kitchen"));
    assert!(rig.service.run_pending());
    rig.deliver("otaurl", br#"{"do_ota":false,"otaurl":""}"#);
    assert!(rig.service.run_pending());

    // thing_value is not an object.
    let bad = br#"{"thing_value":3,"mobile_value":{"readwrite":{"network":"x"},"read":{"nickname":"attic","sw_version":"9"}}}"#;
    rig.deliver("value", bad);
    assert!(rig.service.run_pending());

    let broker = rig.broker.lock().unwrap();
    let values = broker.published_on(&topic("value"));
    assert_eq!(values.len(), 2);
    // Companion strings are stored before the thing value is checked.
    assert_eq!(
        inner(values.last().unwrap())["mobile_value"]["read"]["nickname"],
        "attic"
    );
}

#[test]
fn announce_tick_requests_otaurl() {
    let mut rig = online();
    rig.deliver("bootup", &cloud_value("kitchen"));
    assert!(rig.service.run_pending());
    rig.deliver("otaurl", br#"{"do_ota":false,"otaurl":""}"#);
    assert!(rig.service.run_pending());

    rig.trigger(Event::ThingPublishOtaUrl);
    assert!(rig.service.run_pending());
    assert_eq!(
        rig.broker.lock().unwrap().published_on(&topic("otaurl")).len(),
        2
    );
}

#[test]
fn value_before_bootup_exchange_is_ignored() {
    let mut rig = online();
    rig.deliver("value", &cloud_value("early"));
    assert!(rig.service.run_pending());
    assert!(rig.broker.lock().unwrap().published_on(&topic("value")).is_empty());
}

#[test]
fn lost_station_reconnects() {
    let mut rig = online();
    let before = rig.network.lock().unwrap().connects;
    rig.network.lock().unwrap().connect_result = None;
    rig.trigger(Event::WifiDisconnected);
    assert!(rig.service.run_pending());
    assert_eq!(rig.network.lock().unwrap().connects, before + 1);
    assert_eq!(rig.restarts(), 0);
}

#[test]
fn companion_takes_over_from_steady_state() {
    let mut rig = online();
    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());
    assert_eq!(rig.service.context().state(), OperatingState::Provision);
    assert_eq!(rig.broker.lock().unwrap().stops, 1);
}

#[test]
fn unhandled_event_ends_loop() {
    let mut rig = Rig::new();
    rig.boot();
    // Accepted by the current mask but with no steady-state transition.
    rig.inbox.bus().expect(Event::ProvisionReceivePop);
    rig.trigger(Event::ProvisionReceivePop);
    assert!(!rig.service.run_pending());
    assert_eq!(rig.restarts(), 1);
}
