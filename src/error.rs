#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Credential: {0}")]
    Credential(#[from] crate::credential::CredentialError),
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Scanner: {0}")]
    Scan(#[from] crate::scanner::ScanError),
    #[error("Actuator: {0}")]
    Actuator(#[from] crate::actuator::ActuatorError),
    #[error("Distribution: {0}")]
    Distribution(#[from] crate::distribution::DistributionError),
    #[error("Notify: {0}")]
    Notify(#[from] crate::notify::NotifyError),
    #[error("Bus: {0}")]
    Bus(#[from] crate::bus::BusError),
    #[error("Supervisor: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
