//! Application service, the hexagonal core.
//!
//! [`ThingService`] owns the device context and the platform ports and
//! drives the top-level loop: wait for a filtered event, hand it to the
//! current state's run function, repeat until a run function returns
//! `false`, then restart.
//!
//! ```text
//!  Producers ──▶ Inbox/EventBus ──▶ ┌────────────────────────────┐
//!                                   │        ThingService        │
//!   StoragePort ◀──────────────────▶│ Provision · Ota · Thing    │
//!   Radio/Network/Broker ◀──────────│       (STATE_TABLE)        │
//!   SystemPort ◀── restart ─────────└────────────────────────────┘
//! ```

use log::{error, info, warn};

use crate::error::Result;
use crate::events::Event;
use crate::fsm::OperatingState;
use crate::fsm::context::DeviceContext;
use crate::ota::FirmwarePorts;
use crate::secrets;

use super::ports::{BrokerPort, NetworkPort, RadioPort, StoragePort, SystemPort};

// ───────────────────────────────────────────────────────────────
// Platform
// ───────────────────────────────────────────────────────────────

/// Every collaborator the engines talk to.
pub struct Platform {
    pub storage: Box<dyn StoragePort>,
    pub radio: Box<dyn RadioPort>,
    pub network: Box<dyn NetworkPort>,
    pub broker: Box<dyn BrokerPort>,
    pub system: Box<dyn SystemPort>,
    pub firmware: FirmwarePorts,
}

// ───────────────────────────────────────────────────────────────
// ThingService
// ───────────────────────────────────────────────────────────────

pub struct ThingService {
    ctx: DeviceContext,
    platform: Platform,
}

impl ThingService {
    /// Does **not** start anything; call [`boot`](Self::boot) next.
    pub fn new(ctx: DeviceContext, platform: Platform) -> Self {
        Self { ctx, platform }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start the transports and enter the steady state, waiting for either
    /// a companion or the station.
    pub fn boot(&mut self) -> Result<()> {
        self.ctx.thing.install_routes(&self.ctx.inbox);
        self.ctx
            .inbox
            .bus()
            .expect(Event::BleGapConnected | Event::WifiStart);
        self.ctx.set_state(OperatingState::Thing);

        self.platform.radio.start(&self.ctx.identity)?;
        self.platform.network.start()?;
        match secrets::auth::credentials(self.platform.storage.as_ref(), self.ctx.auth) {
            Ok(bundle) => {
                if let Err(e) = self.platform.broker.start(&bundle) {
                    error!("Broker not started: {}", e);
                }
            }
            // Still reachable over BLE for provisioning.
            Err(e) => warn!("No {:?} credentials, broker not started: {}", self.ctx.auth, e),
        }

        info!(
            "{} v{} up as {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.ctx.identity
        );
        Ok(())
    }

    // ── Per-event orchestration ───────────────────────────────

    /// Run the current state once, blocking on the bus if it waits.
    /// Returns `false` when the loop should end.
    pub fn step(&mut self) -> bool {
        let desc = self.ctx.state().descriptor();
        let Some(run) = desc.run else {
            error!("No run function for state {}", desc.name);
            return false;
        };
        let event = if desc.waits {
            self.ctx.inbox.bus().wait()
        } else {
            Event::Ignore
        };
        run(&mut self.ctx, &mut self.platform, event)
    }

    /// Non-blocking [`step`](Self::step): `None` when a waiting state has
    /// nothing queued.
    pub fn poll(&mut self) -> Option<bool> {
        let desc = self.ctx.state().descriptor();
        let Some(run) = desc.run else {
            error!("No run function for state {}", desc.name);
            return Some(false);
        };
        let event = if desc.waits {
            self.ctx.inbox.bus().try_wait()?
        } else {
            Event::Ignore
        };
        Some(run(&mut self.ctx, &mut self.platform, event))
    }

    /// Drain everything queued.  Returns `false` if the loop ended, in
    /// which case the device has been restarted.
    pub fn run_pending(&mut self) -> bool {
        loop {
            match self.poll() {
                Some(true) => {}
                Some(false) => {
                    self.restart();
                    return false;
                }
                None => return true,
            }
        }
    }

    /// Top-level loop.  Only returns on the host, where restart is
    /// simulated.
    pub fn run(&mut self) {
        while self.step() {}
        self.restart();
    }

    /// Give the device type its hook, then restart.
    pub fn restart(&mut self) {
        warn!("Pre-restart, last state {}", self.ctx.state().descriptor().name);
        if !self.ctx.thing.device().pre_restart_hook() {
            warn!("Pre-restart hook failed");
        }
        info!("Restart...");
        self.platform.system.restart();
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DeviceContext {
        &mut self.ctx
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut Platform {
        &mut self.platform
    }

    pub fn into_parts(self) -> (DeviceContext, Platform) {
        (self.ctx, self.platform)
    }
}
