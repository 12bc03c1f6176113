use std::time::Duration;

pub mod gpio;

pub use gpio::SysfsGpio;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("GPIO {pin}: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Actuator closed")]
    Closed,
}

/// Binary lock output: engaged means the door is released.
pub trait Actuator: Send {
    fn engage(&mut self) -> Result<(), ActuatorError>;
    fn release(&mut self) -> Result<(), ActuatorError>;

    /// Return the output to idle and give up the line.
    fn close(&mut self) -> Result<(), ActuatorError> {
        self.release()
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn engage(&mut self) -> Result<(), ActuatorError> {
        (**self).engage()
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        (**self).release()
    }

    fn close(&mut self) -> Result<(), ActuatorError> {
        (**self).close()
    }
}

/// Engage, hold for `hold`, release. Release is attempted even when
/// engaging failed.
pub async fn actuate<A: Actuator + ?Sized>(
    actuator: &mut A,
    hold: Duration,
) -> Result<(), ActuatorError> {
    let engaged = actuator.engage();
    if engaged.is_ok() {
        tracing::info!(hold_ms = hold.as_millis() as u64, "Door unlocked");
        tokio::time::sleep(hold).await;
    }
    let released = actuator.release();
    engaged?;
    released?;
    tracing::debug!("Door locked");
    Ok(())
}

/// Stand-in used with `--dry-run`: logs instead of driving hardware.
#[derive(Debug, Default)]
pub struct LogActuator {
    engaged: bool,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }
}

impl Actuator for LogActuator {
    fn engage(&mut self) -> Result<(), ActuatorError> {
        tracing::info!("[dry-run] lock engaged");
        self.engaged = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        if self.engaged {
            tracing::info!("[dry-run] lock released");
        }
        self.engaged = false;
        Ok(())
    }
}
