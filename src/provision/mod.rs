//! BLE provisioning protocol.
//!
//! A companion app connects over BLE, proves possession of the device
//! secret, and then hands over Wi-Fi credentials and the cloud credential
//! bundle one characteristic write at a time.  Every write is
//! AES-128-CTR framed (see [`crate::crypto`]).
//!
//! ```text
//!  connected ─▶ POP ─▶ scan ─▶ scan notified ─▶ Wi-Fi creds
//!                │                                  │
//!                ▼                                  ▼
//!              FAIL ◀──────── any bad step ──── root CA* ─▶ cert* ─▶ key*
//!                │                                                   │
//!                ▼                                                   ▼
//!        notifying status ─▶ notify done ─▶ restart ◀── DONE ◀── Wi-Fi up
//! ```
//!
//! Each step sets the expect mask for the next one before it produces
//! anything, so a write that arrives out of order is dropped by the bus.
//! The companion disconnecting ends the loop at any step.

pub mod messages;

use core::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::app::ports::{BrokerPort, NetworkError, RadioError, RadioPort};
use crate::app::service::Platform;
use crate::channels::{Inbox, RadioWriteError};
use crate::crypto::ChannelError;
use crate::events::{BusError, Event};
use crate::fsm::context::DeviceContext;
use crate::secrets::{self, Blob, SecretError, bundle, pop, wifi};

pub use messages::ProvisionStatus;

/// Scan results reported to the companion.
pub const MAX_SCAN_RESULTS: usize = 20;

/// Provisioning GATT service.
pub const SERVICE_UUID: u16 = 0xFFFF;
/// Status / scan notifications.
pub const NOTIFY_UUID: u16 = 0xFF06;

// ---------------------------------------------------------------------------
// Radio surface
// ---------------------------------------------------------------------------

/// Writable characteristics of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    Pop,
    WifiCredentials,
    RootCa,
    ThingCert,
    ThingKey,
}

impl Characteristic {
    pub const ALL: [Characteristic; 5] = [
        Characteristic::Pop,
        Characteristic::WifiCredentials,
        Characteristic::RootCa,
        Characteristic::ThingCert,
        Characteristic::ThingKey,
    ];

    pub const fn uuid(self) -> u16 {
        match self {
            Self::Pop => 0xFF01,
            Self::WifiCredentials => 0xFF02,
            Self::RootCa => 0xFF03,
            Self::ThingCert => 0xFF04,
            Self::ThingKey => 0xFF05,
        }
    }

    pub fn from_uuid(uuid: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Event raised when the companion writes this characteristic.
    pub const fn event(self) -> Event {
        match self {
            Self::Pop => Event::ProvisionReceivePop,
            Self::WifiCredentials => Event::ProvisionReceiveWifiCreds,
            Self::RootCa => Event::ProvisionReceiveRootCa,
            Self::ThingCert => Event::ProvisionReceiveThingCert,
            Self::ThingKey => Event::ProvisionReceiveThingKey,
        }
    }

    const fn for_blob(blob: Blob) -> Self {
        match blob {
            Blob::RootCa => Self::RootCa,
            Blob::ThingCert => Self::ThingCert,
            Blob::ThingKey => Self::ThingKey,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    /// The write could not be decrypted.
    Decrypt(ChannelError),
    /// The write never made it out of the scratch buffer intact.
    Write(RadioWriteError),
    /// Plaintext is not JSON.
    MalformedJson,
    /// `type` field absent or for another step.
    WrongType,
    /// A required field is missing or has the wrong JSON type.
    MissingField,
    /// Notification could not be serialised.
    Encode,
    /// Proof of possession did not match.
    PopMismatch,
    /// Companion is not allowed to talk to us.
    NotAllowed,
    Secret(SecretError),
    Network(NetworkError),
    Radio(RadioError),
    Bus(BusError),
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decrypt(e) => write!(f, "decrypt: {e}"),
            Self::Write(e) => write!(f, "{e}"),
            Self::MalformedJson => write!(f, "malformed JSON"),
            Self::WrongType => write!(f, "unexpected document type"),
            Self::MissingField => write!(f, "missing or mistyped field"),
            Self::Encode => write!(f, "notification encode failed"),
            Self::PopMismatch => write!(f, "POP mismatch"),
            Self::NotAllowed => write!(f, "BLE connection not allowed"),
            Self::Secret(e) => write!(f, "secret store: {e}"),
            Self::Network(e) => write!(f, "{e}"),
            Self::Radio(e) => write!(f, "{e}"),
            Self::Bus(e) => write!(f, "{e}"),
        }
    }
}

impl From<ChannelError> for ProvisionError {
    fn from(e: ChannelError) -> Self {
        Self::Decrypt(e)
    }
}

impl From<RadioWriteError> for ProvisionError {
    fn from(e: RadioWriteError) -> Self {
        Self::Write(e)
    }
}

impl From<SecretError> for ProvisionError {
    fn from(e: SecretError) -> Self {
        Self::Secret(e)
    }
}

impl From<NetworkError> for ProvisionError {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

impl From<RadioError> for ProvisionError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

impl From<BusError> for ProvisionError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

/// Outcome of one chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobStatus {
    Progress,
    Done,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Companion connected: open the POP step.  Shared with the steady-state
/// loop, which hands over to provisioning on the same event.
pub fn begin(inbox: &Inbox, broker: &mut dyn BrokerPort) {
    inbox
        .bus()
        .expect(Event::BleGapDisconnected | Event::ProvisionReceivePop);
    inbox.allow_writes(true);
    if let Err(e) = broker.stop() {
        warn!("Broker stop failed: {}", e);
    }
    info!("Companion connected, waiting for POP");
}

/// Handle one event.  Returns `false` when the session is over and the
/// device should restart.
pub fn run(ctx: &mut DeviceContext, platform: &mut Platform, event: Event) -> bool {
    let inbox = Arc::clone(&ctx.inbox);
    let bus = inbox.bus();

    match event {
        Event::BleGapConnected => begin(&inbox, platform.broker.as_mut()),

        Event::ProvisionReceivePop => {
            if let Err(e) = check_pop(ctx, platform) {
                fail(&inbox, platform.radio.as_mut(), e);
            } else {
                bus.expect(Event::BleGapDisconnected | Event::WifiScanDone);
                info!("POP accepted, erasing previous secrets");
                if let Err(e) = erase_secrets(platform) {
                    fail(&inbox, platform.radio.as_mut(), e);
                    return true;
                }
                inbox.allow_writes(true);
                report(&inbox, platform.radio.as_mut(), ProvisionStatus::Progress);
                if let Err(e) = platform.network.start_scan() {
                    fail(&inbox, platform.radio.as_mut(), e.into());
                }
            }
        }

        Event::WifiScanDone => {
            bus.expect(Event::BleGapDisconnected | Event::ProvisionNotifyingWifiScan);
            if let Err(e) = notify_wifi_scan(&inbox, platform) {
                fail(&inbox, platform.radio.as_mut(), e);
            }
        }

        Event::ProvisionNotifyingWifiScan => {
            bus.expect(Event::BleGapDisconnected | Event::ProvisionReceiveWifiCreds);
        }

        Event::ProvisionReceiveWifiCreds => match receive_wifi_credentials(ctx, platform) {
            Ok(()) => {
                bus.expect(Event::BleGapDisconnected | Event::ProvisionReceiveRootCa);
                report(&inbox, platform.radio.as_mut(), ProvisionStatus::Progress);
            }
            Err(e) => fail(&inbox, platform.radio.as_mut(), e),
        },

        Event::ProvisionReceiveRootCa => on_chunk(ctx, platform, Blob::RootCa),
        Event::ProvisionReceiveThingCert => on_chunk(ctx, platform, Blob::ThingCert),
        Event::ProvisionReceiveThingKey => on_chunk(ctx, platform, Blob::ThingKey),

        Event::WifiStart => {
            bus.expect(Event::BleGapDisconnected | Event::WifiConnected | Event::WifiDisconnected);
            if let Err(e) = platform.network.connect() {
                fail(&inbox, platform.radio.as_mut(), e.into());
            }
        }

        Event::WifiConnected => {
            bus.expect(Event::BleGapDisconnected | Event::ProvisionNotifyingStatus);
            match secrets::auth::use_provisioned(platform.storage.as_mut()) {
                Ok(()) => {
                    ctx.auth = secrets::AuthMode::Provisioned;
                    info!("Provisioning complete");
                    report(&inbox, platform.radio.as_mut(), ProvisionStatus::Done);
                }
                Err(e) => fail(&inbox, platform.radio.as_mut(), e.into()),
            }
        }

        Event::WifiDisconnected => {
            bus.expect(Event::BleGapDisconnected | Event::ProvisionNotifyingStatus);
            // Most likely a wrong password.
            fail(
                &inbox,
                platform.radio.as_mut(),
                ProvisionError::Network(NetworkError::InvalidCredentials),
            );
        }

        Event::ProvisionNotifyingStatus => {
            bus.expect(Event::BleGapDisconnected | Event::BleNotifyDone);
        }

        Event::BleNotifyDone => {
            info!("Final status delivered");
            return false;
        }

        Event::BleGapDisconnected => {
            info!("Companion disconnected");
            return false;
        }

        _ => {}
    }

    true
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Copy the pending write out of the inbox and decrypt it.
fn decrypt_write(ctx: &DeviceContext) -> Result<Vec<u8>, ProvisionError> {
    let frame = ctx.inbox.take_radio_write()?;
    let channel = ctx.channel.as_ref().ok_or(ChannelError::NoKey)?;
    Ok(channel.decrypt(&frame)?)
}

fn check_pop(ctx: &DeviceContext, platform: &Platform) -> Result<(), ProvisionError> {
    let plaintext = decrypt_write(ctx)?;
    match pop::verify(platform.storage.as_ref(), &plaintext) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ProvisionError::PopMismatch),
        Err(e) => Err(e.into()),
    }
}

fn erase_secrets(platform: &mut Platform) -> Result<(), ProvisionError> {
    wifi::erase(platform.storage.as_mut())?;
    bundle::erase_all(platform.storage.as_mut())?;
    Ok(())
}

fn receive_wifi_credentials(
    ctx: &DeviceContext,
    platform: &mut Platform,
) -> Result<(), ProvisionError> {
    let plaintext = decrypt_write(ctx)?;
    let doc = messages::parse_wifi_credentials(&plaintext)?;
    info!("Receiving Wi-Fi credentials for {}", doc.ssid);
    wifi::set(platform.storage.as_mut(), &doc.ssid, &doc.password)?;
    Ok(())
}

fn receive_chunk(
    ctx: &DeviceContext,
    platform: &mut Platform,
    blob: Blob,
) -> Result<BlobStatus, ProvisionError> {
    let plaintext = decrypt_write(ctx)?;
    let doc = messages::parse_chunk(&plaintext, blob)?;
    bundle::append(platform.storage.as_mut(), blob, &doc.row)?;
    if !doc.is_last() {
        return Ok(BlobStatus::Progress);
    }
    bundle::mark_complete(platform.storage.as_mut(), blob)?;
    Ok(BlobStatus::Done)
}

fn on_chunk(ctx: &DeviceContext, platform: &mut Platform, blob: Blob) {
    let inbox = Arc::clone(&ctx.inbox);
    let bus = inbox.bus();
    match receive_chunk(ctx, platform, blob) {
        Ok(BlobStatus::Progress) => {
            bus.expect(Event::BleGapDisconnected | Characteristic::for_blob(blob).event());
            report(&inbox, platform.radio.as_mut(), ProvisionStatus::Progress);
        }
        Ok(BlobStatus::Done) => {
            let next = match blob {
                Blob::RootCa => Some(Characteristic::ThingCert),
                Blob::ThingCert => Some(Characteristic::ThingKey),
                Blob::ThingKey => None,
            };
            if let Some(next) = next {
                bus.expect(Event::BleGapDisconnected | next.event());
                report(&inbox, platform.radio.as_mut(), ProvisionStatus::Progress);
                return;
            }
            match restart_network(platform) {
                Ok(()) => {
                    bus.expect(Event::BleGapDisconnected | Event::WifiStart);
                    report(&inbox, platform.radio.as_mut(), ProvisionStatus::Progress);
                }
                Err(e) => fail(&inbox, platform.radio.as_mut(), e),
            }
        }
        Err(e) => fail(&inbox, platform.radio.as_mut(), e),
    }
}

/// Bring the station back up with the credentials just received.
fn restart_network(platform: &mut Platform) -> Result<(), ProvisionError> {
    let creds = wifi::load(platform.storage.as_ref())?;
    platform.network.reinit(&creds.ssid, &creds.password)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// FAIL path: wait for the status notification to go out, tell the
/// companion, then revoke its write access.
fn fail(inbox: &Inbox, radio: &mut dyn RadioPort, reason: ProvisionError) {
    error!("Provisioning failed: {}", reason);
    inbox
        .bus()
        .expect(Event::BleGapDisconnected | Event::ProvisionNotifyingStatus);
    report(inbox, radio, ProvisionStatus::Fail);
    inbox.allow_writes(false);
}

/// Notify a status, logging instead of propagating a failure.
fn report(inbox: &Inbox, radio: &mut dyn RadioPort, status: ProvisionStatus) {
    if let Err(e) = notify_status(inbox, radio, status) {
        error!("Status {:?} not sent: {}", status, e);
    }
}

/// Raises `ProvisionNotifyingStatus` before the notification is handed to
/// the radio, so the caller's expect mask decides whether it is awaited.
fn notify_status(
    inbox: &Inbox,
    radio: &mut dyn RadioPort,
    status: ProvisionStatus,
) -> Result<(), ProvisionError> {
    if !inbox.writes_allowed() {
        return Err(ProvisionError::NotAllowed);
    }
    let message = messages::status_message(status)?;
    inbox.bus().trigger(Event::ProvisionNotifyingStatus)?;
    radio.notify(&message)?;
    Ok(())
}

/// One notification per access point, then `ProvisionNotifyingWifiScan`.
fn notify_wifi_scan(inbox: &Inbox, platform: &mut Platform) -> Result<(), ProvisionError> {
    if !inbox.writes_allowed() {
        return Err(ProvisionError::NotAllowed);
    }
    let networks = platform.network.scan_results(MAX_SCAN_RESULTS)?;
    info!("Reporting {} networks", networks.len());
    let n = networks.len();
    for (i, ap) in networks.iter().enumerate() {
        let message = messages::scan_message(ap, n - i - 1)?;
        platform.radio.notify(&message)?;
    }
    inbox.bus().trigger(Event::ProvisionNotifyingWifiScan)?;
    Ok(())
}
