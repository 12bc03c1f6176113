use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::Instrument;

use super::{LoopOutcome, LoopState, PayloadSource, ScanError, Termination, validate};
use crate::actuator::{Actuator, actuate};
use crate::clock::{Clock, SystemClock};
use crate::config::{SCAN_HOLD_SECS, WAITING_POLL_MS};
use crate::credential::codec;
use crate::limiter::RateLimiter;
use crate::store::{CredentialStore, StoredKey, has_rotated};

#[derive(Default)]
struct Counters {
    iterations: u64,
    actuations: u32,
    rejected: u32,
    malformed: u32,
    rate_limited: u32,
}

/// Device-side loop for one stored key.
///
/// Each iteration reads one frame from the decoder, checks every payload in
/// it against the key, releases the lock on a match (subject to the rate
/// limiter), then reloads the store. The loop ends when the key is replaced
/// or its window closes; a new key needs a new instance.
pub struct ValidationLoop<St, Src, A, C = SystemClock> {
    store: St,
    source: Src,
    actuator: A,
    clock: C,
    limiter: RateLimiter,
    hold: Duration,
    idle_poll: Duration,
    stop: Arc<AtomicBool>,
    span: tracing::Span,
    state: LoopState,
}

impl<St, Src, A, C> ValidationLoop<St, Src, A, C>
where
    St: CredentialStore,
    Src: PayloadSource,
    A: Actuator,
    C: Clock,
{
    pub fn new(store: St, source: Src, actuator: A, clock: C, span: tracing::Span) -> Self {
        Self {
            store,
            source,
            actuator,
            clock,
            limiter: RateLimiter::new(),
            hold: Duration::from_secs(SCAN_HOLD_SECS),
            idle_poll: Duration::from_millis(WAITING_POLL_MS),
            stop: Arc::new(AtomicBool::new(false)),
            span,
            state: LoopState::Waiting,
        }
    }

    /// How long the lock stays released per match.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Sleep between store checks while the key is not valid yet.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Setting the flag ends the loop at the next iteration.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run until rotation, expiry, or a stop request. Decoder and actuator
    /// are released before returning, on success and on error.
    pub async fn run(&mut self) -> Result<LoopOutcome, ScanError> {
        if self.state == LoopState::Terminated {
            return Err(ScanError::Terminated);
        }
        let span = self.span.clone();
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<LoopOutcome, ScanError> {
        let active = match self.store.load_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::error!("Cannot start scanner: {e}");
                self.terminate().await;
                return Err(e.into());
            }
        };
        tracing::info!(
            door_id = active.record.door_id(),
            start = %active.record.valid_from(),
            end = %active.record.valid_until(),
            "Scanner started"
        );

        let mut counters = Counters::default();
        let result = self.poll_until_done(&active, &mut counters).await;
        self.terminate().await;

        let termination = result?;
        Ok(LoopOutcome {
            termination,
            iterations: counters.iterations,
            actuations: counters.actuations,
            rejected: counters.rejected,
            malformed: counters.malformed,
            rate_limited: counters.rate_limited,
        })
    }

    async fn poll_until_done(
        &mut self,
        active: &StoredKey,
        counters: &mut Counters,
    ) -> Result<Termination, ScanError> {
        let record = &active.record;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("Stop requested");
                return Ok(Termination::Stopped);
            }

            self.state = LoopState::at(record, self.clock.now());
            match self.state {
                LoopState::Active => {
                    counters.iterations += 1;
                    let payloads = self.source.poll().await?;
                    self.handle_frame(active, payloads, counters).await;
                }
                LoopState::Waiting => {
                    tracing::debug!(start = %record.valid_from(), "Key not valid yet");
                    tokio::time::sleep(self.idle_poll).await;
                }
                _ => {
                    self.state = LoopState::Expired;
                    tracing::info!("Key expired");
                    return Ok(Termination::Expired);
                }
            }

            // Rotation and expiry are checked after the frame so a match in
            // the same iteration still opens the door.
            let current = self.store.load()?;
            if has_rotated(record, &current) {
                self.state = LoopState::Rotated;
                tracing::info!(door_id = current.door_id(), "New key detected, restarting scanner");
                return Ok(Termination::Rotated { next: current });
            }
            if self.clock.now() >= record.valid_until() {
                self.state = LoopState::Expired;
                tracing::info!("Key expired");
                return Ok(Termination::Expired);
            }
        }
    }

    async fn handle_frame(
        &mut self,
        active: &StoredKey,
        payloads: Vec<String>,
        counters: &mut Counters,
    ) {
        let mut matched = false;
        for payload in payloads {
            let fields = match codec::decode_fields(&payload) {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(payload = %payload, "Invalid QR code format: {e}");
                    counters.malformed += 1;
                    continue;
                }
            };
            match validate(&fields, &active.fields) {
                Ok(()) => matched = true,
                Err(mismatch) => {
                    tracing::info!("{mismatch}");
                    counters.rejected += 1;
                }
            }
        }
        if !matched {
            return;
        }

        let now = self.clock.now();
        if !self.limiter.permit(now) {
            tracing::info!(
                last = ?self.limiter.last_actuation_at(),
                "Valid key inside cool-down, not unlocking"
            );
            counters.rate_limited += 1;
            return;
        }
        match actuate(&mut self.actuator, self.hold).await {
            Ok(()) => {
                self.limiter.record(now);
                counters.actuations += 1;
            }
            Err(e) => tracing::error!("Failed to unlock door: {e}"),
        }
        // codes read while the door was held open are not serviced
        let skipped = self.source.discard_pending();
        if skipped > 0 {
            tracing::debug!(skipped, "Dropped codes seen during hold");
        }
    }

    async fn terminate(&mut self) {
        self.source.close().await;
        if let Err(e) = self.actuator.close() {
            tracing::warn!("Failed to idle actuator: {e}");
        }
        self.state = LoopState::Terminated;
        tracing::info!("QR scanner terminated");
    }
}
