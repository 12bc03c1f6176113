use std::path::{Path, PathBuf};

use super::{Actuator, ActuatorError};

/// Lock output on a GPIO line driven through the sysfs interface
/// (`<root>/export`, `<root>/gpioN/{direction,value}`).
pub struct SysfsGpio {
    root: PathBuf,
    pin: u32,
    exported_by_us: bool,
    closed: bool,
}

impl SysfsGpio {
    /// Export the line if needed and configure it as a low output.
    pub fn open(root: impl Into<PathBuf>, pin: u32) -> Result<Self, ActuatorError> {
        let root = root.into();
        let line_dir = root.join(format!("gpio{pin}"));
        let mut exported_by_us = false;
        if !line_dir.exists() {
            write_attr(&root.join("export"), &pin.to_string(), pin)?;
            exported_by_us = true;
        }
        write_attr(&line_dir.join("direction"), "out", pin)?;
        let mut gpio = Self {
            root,
            pin,
            exported_by_us,
            closed: false,
        };
        gpio.release()?;
        tracing::debug!(pin, exported_by_us, "GPIO line ready");
        Ok(gpio)
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join("value")
    }

    fn set(&mut self, high: bool) -> Result<(), ActuatorError> {
        if self.closed {
            return Err(ActuatorError::Closed);
        }
        write_attr(&self.value_path(), if high { "1" } else { "0" }, self.pin)
    }
}

impl Actuator for SysfsGpio {
    fn engage(&mut self) -> Result<(), ActuatorError> {
        self.set(true)
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.set(false)
    }

    fn close(&mut self) -> Result<(), ActuatorError> {
        if self.closed {
            return Ok(());
        }
        self.release()?;
        self.closed = true;
        if self.exported_by_us {
            write_attr(&self.root.join("unexport"), &self.pin.to_string(), self.pin)?;
        }
        tracing::debug!(pin = self.pin, "GPIO line closed");
        Ok(())
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(pin = self.pin, "Failed to close GPIO line: {e}");
        }
    }
}

fn write_attr(path: &Path, value: &str, pin: u32) -> Result<(), ActuatorError> {
    std::fs::write(path, value).map_err(|source| ActuatorError::Gpio { pin, source })
}
