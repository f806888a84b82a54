//! BLE provisioning, end to end.
//!
//! The companion connects, proves possession, picks a network from the
//! scan, sends Wi-Fi credentials and the three certificate blobs in
//! chunks, and the device joins the network with them.  Every session
//! ends in a restart.

use thingcore::events::Event;
use thingcore::fsm::OperatingState;
use thingcore::provision::Characteristic;
use thingcore::channels::BLE_BUFFER_SIZE;
use thingcore::secrets::{self, AuthMode, Blob};

use crate::mock_hw::{POP_HEX, Rig, ap};

fn chunk(kind: &str, row: &str, ready: u8) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "type": kind, "row": row, "ready": ready })).unwrap()
}

fn wifi_credentials(ssid: &str, password: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": "wifi_credentials",
        "ssid": ssid,
        "password": password,
    }))
    .unwrap()
}

/// Booted rig with a companion connected and the POP accepted.
fn session() -> Rig {
    let mut rig = Rig::new();
    rig.network.lock().unwrap().in_range = vec![ap("home", -40), ap("cafe", -71)];
    rig.boot();
    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());
    assert_eq!(rig.service.context().state(), OperatingState::Provision);

    rig.write(Characteristic::Pop, POP_HEX.as_bytes());
    assert!(rig.service.run_pending());
    rig
}

/// Credentials plus every blob; the station is then reinitialised.
fn send_secrets(rig: &mut Rig) {
    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert!(rig.service.run_pending());

    rig.write(Characteristic::RootCa, &chunk("aws_root_ca", "ca-row-1", 0));
    assert!(rig.service.run_pending());
    rig.write(Characteristic::RootCa, &chunk("aws_root_ca", "ca-row-2", 1));
    assert!(rig.service.run_pending());
    rig.write(
        Characteristic::ThingCert,
        &chunk("aws_thing_certificate", "cert-row", 1),
    );
    assert!(rig.service.run_pending());
    rig.write(Characteristic::ThingKey, &chunk("aws_thing_key", "key-row", 1));
}

#[test]
fn companion_connect_stops_broker_and_opens_pop_step() {
    let mut rig = Rig::new();
    rig.boot();
    assert!(rig.broker.lock().unwrap().started_with.is_some());

    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());

    assert_eq!(rig.broker.lock().unwrap().stops, 1);
    assert!(rig.inbox.writes_allowed());
    assert!(rig.notifications().is_empty());
}

#[test]
fn pop_accepted_reports_progress_and_scan() {
    let rig = session();

    let notes = rig.notifications();
    assert_eq!(notes[0]["type"], "provision");
    assert_eq!(notes[0]["status"], "progress");
    assert_eq!(notes[1]["type"], "wifi_scan");
    assert_eq!(notes[1]["ssid"], "home");
    assert_eq!(notes[1]["rssi"], -40);
    assert_eq!(notes[1]["count"], 1);
    assert_eq!(notes[2]["ssid"], "cafe");
    assert_eq!(notes[2]["count"], 0);
    assert_eq!(notes.len(), 3);
    assert_eq!(rig.restarts(), 0);
}

#[test]
fn full_session_switches_to_provisioned_bundle() {
    let mut rig = session();
    send_secrets(&mut rig);
    rig.network.lock().unwrap().connect_result = Some(Event::WifiConnected);

    // Last chunk → reinit → WifiStart → connect → WifiConnected → DONE,
    // and the loop ends once the DONE notification went out.
    assert!(!rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("done"));
    assert_eq!(rig.restarts(), 1);
    assert_eq!(
        rig.network.lock().unwrap().reinit_with,
        Some(("home".to_string(), "hunter22".to_string()))
    );
    assert_eq!(rig.service.context().auth, AuthMode::Provisioned);

    let (_, platform) = rig.service.into_parts();
    assert_eq!(
        secrets::auth::init(platform.storage.as_ref()),
        AuthMode::Provisioned
    );

    // Next boot authenticates with what the companion sent.
    let mut next = Rig::with_storage(platform.storage);
    next.boot();
    let broker = next.broker.lock().unwrap();
    let bundle = broker.started_with.as_ref().unwrap();
    assert_eq!(bundle.root_ca, b"ca-row-1\nca-row-2\n");
    assert_eq!(bundle.thing_cert, b"cert-row\n");
    assert_eq!(bundle.thing_key, b"key-row\n");
}

#[test]
fn wrong_pop_fails_and_revokes_writes() {
    let mut rig = Rig::new();
    rig.boot();
    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());

    rig.write(Characteristic::Pop, b"ffffffffffffffffffffffffffffffff");
    assert!(!rig.service.run_pending());

    assert_eq!(rig.last_status().as_deref(), Some("fail"));
    assert!(!rig.inbox.writes_allowed());
    assert_eq!(rig.restarts(), 1);
    // Nothing was erased.
    let (_, platform) = rig.service.into_parts();
    assert!(secrets::pop::is_set(platform.storage.as_ref()));
}

#[test]
fn writes_refused_after_failure() {
    let mut rig = Rig::new();
    rig.boot();
    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());
    rig.write(Characteristic::Pop, b"not even hex");
    assert!(!rig.service.run_pending());

    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert_eq!(rig.inbox.bus().pending(), 0);
}

#[test]
fn companion_disconnect_ends_session() {
    let mut rig = session();
    rig.trigger(Event::BleGapDisconnected);
    assert!(!rig.service.run_pending());
    assert_eq!(rig.restarts(), 1);
    assert_ne!(rig.last_status().as_deref(), Some("done"));
}

#[test]
fn rejected_network_credentials_fail() {
    let mut rig = session();
    send_secrets(&mut rig);
    rig.network.lock().unwrap().connect_result = Some(Event::WifiDisconnected);

    assert!(!rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("fail"));
    assert_eq!(rig.service.context().auth, AuthMode::Ota);
    let (_, platform) = rig.service.into_parts();
    assert_eq!(secrets::auth::init(platform.storage.as_ref()), AuthMode::Ota);
}

#[test]
fn chunk_without_ready_fails() {
    let mut rig = session();
    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert!(rig.service.run_pending());

    let missing = serde_json::to_vec(&serde_json::json!({
        "type": "aws_root_ca",
        "row": "ca-row-1",
    }))
    .unwrap();
    rig.write(Characteristic::RootCa, &missing);
    assert!(!rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("fail"));
}

#[test]
fn chunk_with_wrong_type_tag_fails() {
    let mut rig = session();
    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert!(rig.service.run_pending());

    rig.write(Characteristic::RootCa, &chunk("aws_thing_key", "x", 1));
    assert!(!rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("fail"));
}

#[test]
fn out_of_order_write_is_ignored() {
    let mut rig = session();
    let before = rig.notifications().len();

    // Still waiting for Wi-Fi credentials.
    rig.write(Characteristic::ThingKey, &chunk("aws_thing_key", "key-row", 1));
    assert!(rig.service.run_pending());
    assert_eq!(rig.notifications().len(), before);

    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert!(rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("progress"));
    assert_eq!(rig.restarts(), 0);
}

#[test]
fn write_from_wrong_key_fails() {
    use thingcore::crypto::SecureChannel;

    let mut rig = Rig::new();
    rig.boot();
    rig.trigger(Event::BleGapConnected);
    assert!(rig.service.run_pending());

    let frame = SecureChannel::new([0xAA; 16]).seal(&[0x22; 16], POP_HEX.as_bytes());
    rig.inbox.on_radio_write(Characteristic::Pop, &frame);
    assert!(!rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("fail"));
}

/// Session with the Wi-Fi credentials stored, waiting for the root CA.
fn awaiting_root_ca() -> Rig {
    let mut rig = session();
    rig.write(
        Characteristic::WifiCredentials,
        &wifi_credentials("home", "hunter22"),
    );
    assert!(rig.service.run_pending());
    assert_eq!(rig.last_status().as_deref(), Some("progress"));
    rig
}

#[test]
fn write_longer_than_radio_buffer_fails_session() {
    let mut rig = awaiting_root_ca();
    let row = "A".repeat(BLE_BUFFER_SIZE);
    let plaintext = chunk("aws_root_ca", &row, 0);
    assert!(plaintext.len() + 16 > BLE_BUFFER_SIZE);

    rig.write(Characteristic::RootCa, &plaintext);
    assert!(!rig.service.run_pending());

    assert_eq!(rig.last_status().as_deref(), Some("fail"));
    assert!(!rig.inbox.writes_allowed());
    assert_eq!(rig.restarts(), 1);
    let (_, platform) = rig.service.into_parts();
    assert!(!secrets::bundle::is_complete(platform.storage.as_ref(), Blob::RootCa));
    assert!(secrets::bundle::load(platform.storage.as_ref(), Blob::RootCa).is_err());
}

#[test]
fn blob_over_capacity_fails_session() {
    let mut rig = awaiting_root_ca();
    // Each stored row takes 181 bytes; seven fit in the root CA blob.
    let row = "B".repeat(180);
    let fits = Blob::RootCa.max_len() / (row.len() + 1);
    assert_eq!(fits, 7);
    for _ in 0..fits {
        rig.write(Characteristic::RootCa, &chunk("aws_root_ca", &row, 0));
        assert!(rig.service.run_pending());
        assert_eq!(rig.last_status().as_deref(), Some("progress"));
    }

    rig.write(Characteristic::RootCa, &chunk("aws_root_ca", &row, 1));
    assert!(!rig.service.run_pending());

    assert_eq!(rig.last_status().as_deref(), Some("fail"));
    assert!(!rig.inbox.writes_allowed());
    assert_eq!(rig.restarts(), 1);
    let (_, platform) = rig.service.into_parts();
    assert!(!secrets::bundle::is_complete(platform.storage.as_ref(), Blob::RootCa));
}
