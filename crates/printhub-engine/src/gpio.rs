//! # GPIO Printer Reset
//!
//! Pulses a sysfs GPIO line wired to a printer's reset/power relay.
//!
//! ```text
//!   <root>/export          ← "<pin>"      (once, if gpio<pin> is missing)
//!   <root>/gpio<pin>/direction ← "out"
//!   <root>/gpio<pin>/value     ← "1" ... pulse ... "0"
//! ```
//!
//! At most one pulse per [`MIN_PULSE_INTERVAL`]; a printer that keeps
//! erroring does not get its relay hammered.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::GpioSettings;

pub const MIN_PULSE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct GpioReset {
    root: PathBuf,
    pin: u32,
    pulse: Duration,
    last_pulse: Mutex<Option<Instant>>,
}

impl GpioReset {
    pub fn new(root: impl Into<PathBuf>, pin: u32, pulse: Duration) -> Self {
        GpioReset {
            root: root.into(),
            pin,
            pulse,
            last_pulse: Mutex::new(None),
        }
    }

    /// `None` when no reset pin is configured.
    pub fn from_settings(settings: &GpioSettings) -> Option<Self> {
        settings.reset_pin.map(|pin| {
            Self::new(
                settings.sysfs_root.clone(),
                pin,
                Duration::from_millis(settings.pulse_ms),
            )
        })
    }

    /// Drives the line high for the pulse length, then low.
    ///
    /// Returns `Ok(false)` when skipped by the rate limit.
    pub async fn pulse(&self) -> std::io::Result<bool> {
        let mut last = self.last_pulse.lock().await;
        if let Some(at) = *last {
            if at.elapsed() < MIN_PULSE_INTERVAL {
                debug!(pin = self.pin, "GPIO reset skipped (rate limited)");
                return Ok(false);
            }
        }
        *last = Some(Instant::now());

        let line = self.root.join(format!("gpio{}", self.pin));
        if tokio::fs::metadata(&line).await.is_err() {
            tokio::fs::write(self.root.join("export"), self.pin.to_string()).await?;
        }
        tokio::fs::write(line.join("direction"), "out").await?;
        tokio::fs::write(line.join("value"), "1").await?;
        tokio::time::sleep(self.pulse).await;
        tokio::fs::write(line.join("value"), "0").await?;

        info!(pin = self.pin, pulse_ms = self.pulse.as_millis() as u64, "GPIO reset pulsed");
        Ok(true)
    }
}
