//! Chip-level control.

#[cfg(not(target_os = "espidf"))]
use log::warn;

use crate::app::ports::SystemPort;

#[derive(Default)]
pub struct ChipSystem {
    /// Simulation: restarts requested so far.
    #[cfg(not(target_os = "espidf"))]
    pub restarts: u32,
}

impl ChipSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SystemPort for ChipSystem {
    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        // Let the last log lines drain.
        std::thread::sleep(std::time::Duration::from_millis(100));
        unsafe { esp_idf_svc::sys::esp_restart() };
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        self.restarts += 1;
        warn!("System(sim): restart #{}", self.restarts);
    }
}
