//! Periodic event producers and task spawning.
//!
//! A [`Ticker`] is a thread that raises one event on the bus at a fixed
//! period, e.g. `ThingPublishOtaUrl` every 24 h or `ThingPublishValue`
//! at the device type's publish period.  The first tick fires one full
//! period after start.
//!
//! On ESP-IDF, `esp_pthread_set_cfg()` is applied before the spawn so the
//! FreeRTOS task lands on the requested core with the requested priority.
//! The config applies to the *next* `pthread_create()` from the calling
//! thread, so config and spawn must not be interleaved with other spawns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info};

use crate::channels::Inbox;
use crate::events::Event;

/// CPU core for a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Protocol stacks (Wi-Fi, BLE, lwIP).
    Pro = 0,
    /// Application logic.
    App = 1,
}

/// Spawn a thread pinned to `core`.  `name` must be NUL-terminated.
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = priority as i32;
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = name.as_ptr() as *const _;
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            return Err(std::io::Error::other("esp_pthread_set_cfg failed"));
        }
    }

    let display_name = name.trim_end_matches('\0');
    info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name, core, priority, stack_kb
    );
    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
}

/// Simulation: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    let display_name = name.trim_end_matches('\0');
    info!("Spawning '{}' (sim, stack={}KB)", display_name, stack_kb);
    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}

/// Granularity at which a ticker notices [`Ticker::stop`].
const STOP_POLL: Duration = Duration::from_millis(100);

pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Raise `event` every `period` until stopped or dropped.  A full event
    /// queue stops the ticker.
    pub fn start(
        name: &'static str,
        period: Duration,
        inbox: Arc<Inbox>,
        event: Event,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = spawn_on_core(Core::App, 5, 3, name, move || {
            info!("Ticker {:?} every {:?}", event, period);
            'outer: loop {
                let mut waited = Duration::ZERO;
                while waited < period {
                    if flag.load(Ordering::Acquire) {
                        break 'outer;
                    }
                    let slice = STOP_POLL.min(period - waited);
                    std::thread::sleep(slice);
                    waited += slice;
                }
                if let Err(e) = inbox.bus().trigger(event) {
                    error!("Ticker {:?} stopped: {}", event, e);
                    break;
                }
            }
        })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// `false` once stopped or given up on a full queue.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
