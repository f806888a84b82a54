//! Shared mutable context threaded through every state run function.
//!
//! `DeviceContext` is the blackboard the provisioning, OTA and steady-state
//! engines read from and write to: the current operating state, the
//! device identity and credential mode, the producer hand-off buffers and
//! the per-engine data that outlives a single event.

use std::sync::Arc;

use log::info;

use super::OperatingState;
use crate::adapters::device_id::DeviceId;
use crate::channels::Inbox;
use crate::config::SystemConfig;
use crate::crypto::SecureChannel;
use crate::secrets::AuthMode;
use crate::thing::ThingEngine;

pub struct DeviceContext {
    state: OperatingState,
    pub config: SystemConfig,
    pub identity: DeviceId,
    /// Credential bundle the broker and OTA download use.
    pub auth: AuthMode,
    pub inbox: Arc<Inbox>,
    /// `None` when no symmetric key is provisioned; every encrypted write
    /// is then rejected.
    pub channel: Option<SecureChannel>,
    pub thing: ThingEngine,
    /// Set by the steady-state loop right before switching to `Ota`.
    pub ota_url: Option<String>,
}

impl DeviceContext {
    pub fn new(
        config: SystemConfig,
        identity: DeviceId,
        auth: AuthMode,
        inbox: Arc<Inbox>,
        channel: Option<SecureChannel>,
        thing: ThingEngine,
    ) -> Self {
        Self {
            state: OperatingState::Uninitialised,
            config,
            identity,
            auth,
            inbox,
            channel,
            thing,
            ota_url: None,
        }
    }

    pub fn state(&self) -> OperatingState {
        self.state
    }

    pub fn set_state(&mut self, next: OperatingState) {
        if next != self.state {
            info!(
                "State: {} -> {}",
                self.state.descriptor().name,
                next.descriptor().name
            );
        }
        self.state = next;
    }
}
