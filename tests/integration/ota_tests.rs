//! Update requested by the cloud, through to the restart.

use thingcore::events::Event;
use thingcore::secrets::{self, AuthMode, Blob};

use crate::mock_hw::{Rig, factory_storage, firmware_image};

const URL: &str = "https://updates.example.com/thing.bin";

fn update_offer(url: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "do_ota": true, "otaurl": url })).unwrap()
}

/// Drive a rig up to the point where it waits for the OTA URL answer.
fn awaiting_otaurl(mut rig: Rig) -> Rig {
    rig.network.lock().unwrap().connect_result = Some(Event::WifiConnected);
    rig.boot();
    rig.trigger(Event::MqttConnected);
    assert!(rig.service.run_pending());
    let value = serde_json::json!({
        "thing_value": { "readwrite": {}, "read": {} },
        "mobile_value": {
            "readwrite": { "network": "online" },
            "read": { "nickname": "n", "sw_version": "1" }
        }
    });
    rig.deliver("bootup", &serde_json::to_vec(&value).unwrap());
    assert!(rig.service.run_pending());
    rig
}

#[test]
fn successful_update_commits_and_restarts() {
    let mut rig = awaiting_otaurl(Rig::new());
    let image = firmware_image("thing", 3000);
    rig.firmware.lock().unwrap().image = image.clone();

    rig.deliver("otaurl", &update_offer(URL));
    assert!(!rig.service.run_pending());

    let fw = rig.firmware.lock().unwrap();
    assert_eq!(fw.opened.as_deref(), Some(URL));
    assert!(fw.committed);
    assert!(!fw.aborted);
    assert_eq!(fw.written, image);
    drop(fw);
    assert_eq!(rig.restarts(), 1);
    assert!(rig.service.context().ota_url.is_none());
}

#[test]
fn image_for_another_project_is_rejected() {
    let mut rig = awaiting_otaurl(Rig::new());
    rig.firmware.lock().unwrap().image = firmware_image("other", 2000);

    rig.deliver("otaurl", &update_offer(URL));
    assert!(!rig.service.run_pending());

    let fw = rig.firmware.lock().unwrap();
    assert!(fw.aborted);
    assert!(!fw.committed);
    assert!(fw.written.is_empty());
    drop(fw);
    assert_eq!(rig.restarts(), 1);
}

#[test]
fn truncated_download_is_rejected() {
    let mut rig = awaiting_otaurl(Rig::new());
    {
        let mut fw = rig.firmware.lock().unwrap();
        fw.image = firmware_image("thing", 4000);
        fw.announced = Some(8000);
    }

    rig.deliver("otaurl", &update_offer(URL));
    assert!(!rig.service.run_pending());

    let fw = rig.firmware.lock().unwrap();
    assert!(fw.aborted);
    assert!(!fw.committed);
}

#[test]
fn corrupt_image_is_not_committed() {
    let mut rig = awaiting_otaurl(Rig::new());
    {
        let mut fw = rig.firmware.lock().unwrap();
        fw.image = firmware_image("thing", 2000);
        fw.corrupt = true;
    }

    rig.deliver("otaurl", &update_offer(URL));
    assert!(!rig.service.run_pending());
    assert!(!rig.firmware.lock().unwrap().committed);
    assert_eq!(rig.restarts(), 1);
}

#[test]
fn empty_url_keeps_steady_state() {
    let mut rig = awaiting_otaurl(Rig::new());
    rig.deliver("otaurl", &update_offer(""));
    assert!(rig.service.run_pending());

    assert!(rig.firmware.lock().unwrap().opened.is_none());
    assert_eq!(rig.restarts(), 0);
}

#[test]
fn success_falls_back_to_factory_bundle() {
    // A device that was provisioned in the field.
    let mut storage = factory_storage();
    for (blob, row) in [
        (Blob::RootCa, "field-ca"),
        (Blob::ThingCert, "field-cert"),
        (Blob::ThingKey, "field-key"),
    ] {
        secrets::bundle::append(storage.as_mut(), blob, row).unwrap();
        secrets::bundle::mark_complete(storage.as_mut(), blob).unwrap();
    }
    secrets::auth::use_provisioned(storage.as_mut()).unwrap();

    let mut rig = awaiting_otaurl(Rig::with_storage(storage));
    assert_eq!(rig.service.context().auth, AuthMode::Provisioned);
    rig.firmware.lock().unwrap().image = firmware_image("thing", 1500);

    rig.deliver("otaurl", &update_offer(URL));
    assert!(!rig.service.run_pending());
    assert!(rig.firmware.lock().unwrap().committed);

    let (_, platform) = rig.service.into_parts();
    assert_eq!(secrets::auth::init(platform.storage.as_ref()), AuthMode::Ota);
}
