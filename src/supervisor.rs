use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::Instrument;

use crate::bus::{BusError, Delivery, Subscriber};
use crate::credential::codec;
use crate::store::{CredentialStore, StoreError, has_rotated};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Bus: {0}")]
    Bus(#[from] BusError),
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to start scanner: {0}")]
    Launch(#[source] std::io::Error),
}

/// Starts validation loop instances.
pub trait LoopLauncher: Send {
    fn launch(&mut self) -> Result<(), SupervisorError>;
    /// Some instance started earlier is still running.
    fn is_running(&mut self) -> bool;
}

/// Runs every loop instance as a child `scan` process.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    children: Vec<Child>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Vec::new(),
        }
    }

    /// Launch `scan` through the currently running executable.
    pub fn current_exe(extra_args: Vec<String>) -> std::io::Result<Self> {
        let mut args = vec!["scan".to_string()];
        args.extend(extra_args);
        Ok(Self::new(std::env::current_exe()?, args))
    }

    fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(pid = ?child.id(), %status, "Scanner exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("Lost track of scanner: {e}");
                false
            }
        });
    }
}

impl LoopLauncher for ProcessLauncher {
    fn launch(&mut self) -> Result<(), SupervisorError> {
        self.reap();
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(SupervisorError::Launch)?;
        tracing::info!(pid = ?child.id(), running = self.children.len(), "Scanner launched");
        self.children.push(child);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.reap();
        !self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Stored and a fresh loop instance started.
    Launched,
    /// Same key as the stored one while a loop is running; nothing to do.
    Duplicate,
    /// Not a key; acked and dropped.
    Rejected,
}

/// Device-side receiver: persists every key delivered on the bus and starts
/// a validation loop for it.
pub struct Supervisor<Sub, St, L> {
    subscriber: Sub,
    store: St,
    launcher: L,
    span: tracing::Span,
}

impl<Sub, St, L> Supervisor<Sub, St, L>
where
    Sub: Subscriber,
    St: CredentialStore,
    L: LoopLauncher,
{
    pub fn new(subscriber: Sub, store: St, launcher: L, span: tracing::Span) -> Self {
        Self {
            subscriber,
            store,
            launcher,
            span,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Start a loop for the key already on disk, if there is one and nothing
    /// is running for it.
    pub fn resume(&mut self) -> Result<bool, SupervisorError> {
        let _enter = self.span.enter();
        match self.store.load() {
            Ok(record) => {
                if self.launcher.is_running() {
                    return Ok(false);
                }
                tracing::info!(door_id = record.door_id(), "Resuming stored key");
                self.launcher.launch()?;
                Ok(true)
            }
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => {
                tracing::warn!("Ignoring stored key: {e}");
                Ok(false)
            }
        }
    }

    /// Receive and handle messages until the subscription fails.
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        let span = self.span.clone();
        self.receive_forever().instrument(span).await
    }

    async fn receive_forever(&mut self) -> Result<(), SupervisorError> {
        loop {
            let delivery = self.subscriber.receive().await?;
            self.handle(&delivery).await?;
        }
    }

    pub async fn handle(&mut self, delivery: &Delivery) -> Result<Handled, SupervisorError> {
        tracing::info!(id = %delivery.id, "Received message");

        let text = match std::str::from_utf8(&delivery.payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(id = %delivery.id, "Dropping non-UTF-8 message: {e}");
                self.subscriber.ack(delivery).await?;
                return Ok(Handled::Rejected);
            }
        };
        let record = match codec::decode(text) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(id = %delivery.id, "Dropping malformed key: {e}");
                self.subscriber.ack(delivery).await?;
                return Ok(Handled::Rejected);
            }
        };

        let rotated = match self.store.load() {
            Ok(previous) => has_rotated(&previous, &record),
            Err(e) if e.is_missing() => true,
            Err(e) => {
                tracing::warn!("Replacing unreadable stored key: {e}");
                true
            }
        };
        if rotated {
            self.store.save(text)?;
        }
        self.subscriber.ack(delivery).await?;
        tracing::info!(id = %delivery.id, "Acknowledged message");

        if rotated || !self.launcher.is_running() {
            self.launcher.launch()?;
            Ok(Handled::Launched)
        } else {
            tracing::debug!(id = %delivery.id, "Duplicate delivery of the active key");
            Ok(Handled::Duplicate)
        }
    }
}
