//! Integration test driver for the `tests/integration/` flows.
//!
//! Each `mod` below drives [`ThingService`](thingcore::app::service::ThingService)
//! through one operating mode against the recording ports in `mock_hw`.
//! Everything runs on the host with the in-memory NVS back-end.

mod mock_hw;
mod ota_tests;
mod provisioning_flow_tests;
mod thing_flow_tests;
