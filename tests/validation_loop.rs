use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use doorlens::actuator::{Actuator, ActuatorError};
use doorlens::clock::{Clock, ManualClock};
use doorlens::credential::{CredentialRecord, codec};
use doorlens::limiter::RateLimiter;
use doorlens::scanner::{
    ChannelSource, DecoderError, LoopState, PayloadSource, ScanError, Termination, ValidationLoop,
};
use doorlens::store::{CredentialStore, FileStore, MemoryStore, StoreError};

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
}

fn key(secret: &str) -> CredentialRecord {
    CredentialRecord::new("front", secret, at(10, 0, 0), at(10, 10, 0)).unwrap()
}

fn payload(secret: &str) -> String {
    codec::encode(&key(secret))
}

/// One decoder frame: time passes by `advance`, then `payloads` are seen.
/// `store` is written into the key slot while the frame is read.
struct Frame {
    advance: TimeDelta,
    payloads: Vec<String>,
    store: Option<String>,
}

impl Frame {
    fn after(secs: i64) -> Self {
        Frame {
            advance: TimeDelta::seconds(secs),
            payloads: Vec::new(),
            store: None,
        }
    }

    fn showing(mut self, payload: String) -> Self {
        self.payloads.push(payload);
        self
    }

    fn storing(mut self, payload: String) -> Self {
        self.store = Some(payload);
        self
    }
}

struct ScriptedSource {
    frames: VecDeque<Frame>,
    clock: ManualClock,
    store: MemoryStore,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl PayloadSource for ScriptedSource {
    async fn poll(&mut self) -> Result<Vec<String>, DecoderError> {
        let frame = self.frames.pop_front().ok_or(DecoderError::Closed)?;
        self.clock.advance(frame.advance);
        if let Some(next) = frame.store {
            self.store.save(&next).unwrap();
        }
        Ok(frame.payloads)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Engage(NaiveDateTime),
    Release,
    Close,
}

#[derive(Clone)]
struct RecordingActuator<C> {
    events: Arc<Mutex<Vec<Event>>>,
    clock: C,
}

impl<C: Clock> Actuator for RecordingActuator<C> {
    fn engage(&mut self) -> Result<(), ActuatorError> {
        self.events.lock().unwrap().push(Event::Engage(self.clock.now()));
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.events.lock().unwrap().push(Event::Release);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ActuatorError> {
        self.events.lock().unwrap().push(Event::Close);
        Ok(())
    }
}

impl<C> RecordingActuator<C> {
    fn engagements(&self) -> Vec<NaiveDateTime> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Engage(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    fn closed(&self) -> bool {
        self.events.lock().unwrap().last() == Some(&Event::Close)
    }
}

struct Harness {
    scanner: ValidationLoop<MemoryStore, ScriptedSource, RecordingActuator<ManualClock>, ManualClock>,
    actuator: RecordingActuator<ManualClock>,
    source_closed: Arc<AtomicBool>,
}

fn harness(active: Option<&str>, start: NaiveDateTime, frames: Vec<Frame>) -> Harness {
    harness_storing(active.map(payload), start, frames)
}

/// Like [`harness`], with `stored` saved as the key text verbatim.
fn harness_storing(stored: Option<String>, start: NaiveDateTime, frames: Vec<Frame>) -> Harness {
    let clock = ManualClock::new(start);
    let store = MemoryStore::new();
    if let Some(text) = stored {
        store.save(&text).unwrap();
    }
    let source_closed = Arc::new(AtomicBool::new(false));
    let source = ScriptedSource {
        frames: frames.into(),
        clock: clock.clone(),
        store: store.clone(),
        closed: source_closed.clone(),
    };
    let actuator = RecordingActuator {
        events: Arc::new(Mutex::new(Vec::new())),
        clock: clock.clone(),
    };
    let scanner = ValidationLoop::new(store, source, actuator.clone(), clock, tracing::Span::none())
        .with_hold(Duration::ZERO);
    Harness {
        scanner,
        actuator,
        source_closed,
    }
}

#[tokio::test]
async fn test_matching_scan_unlocks_then_key_expires() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![Frame::after(5).showing(payload("X")), Frame::after(600)],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.termination, Termination::Expired);
    assert_eq!(outcome.actuations, 1);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(h.actuator.engagements(), [at(10, 0, 5)]);
    assert_eq!(h.scanner.state(), LoopState::Terminated);
}

#[tokio::test]
async fn test_wrong_secret_does_not_unlock() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![Frame::after(1).showing(payload("Y")), Frame::after(600)],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.actuations, 0);
    assert!(h.actuator.engagements().is_empty());
}

#[tokio::test]
async fn test_extra_fields_in_scan_still_match() {
    let mut fields = codec::to_fields(&key("X"));
    fields.insert("room".into(), "101".into());
    let scanned = serde_json::Value::Object(fields).to_string();
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![Frame::after(1).showing(scanned), Frame::after(600)],
    );

    assert_eq!(h.scanner.run().await.unwrap().actuations, 1);
}

/// Stored text shown to the camera verbatim must open the door.
async fn scan_stored_text(stored: &str, scanned: &str) -> u32 {
    let mut h = harness_storing(
        Some(stored.to_owned()),
        at(10, 0, 0),
        vec![Frame::after(1).showing(scanned.to_owned()), Frame::after(600)],
    );
    h.scanner.run().await.unwrap().actuations
}

#[tokio::test]
async fn test_stored_door_id_spelling_matches_its_own_code() {
    let stored = r#"{"door_id":"front","passwd":"X","start":"2025-01-01, 10:00:00","end":"2025-01-01, 10:10:00"}"#;
    assert_eq!(scan_stored_text(stored, stored).await, 1);
}

#[tokio::test]
async fn test_unpadded_stored_timestamps_match_their_own_code() {
    let stored = r#"{"doorID":"front","passwd":"X","start":"2025-1-1, 10:00:00","end":"2025-1-1, 10:10:00"}"#;
    assert_eq!(scan_stored_text(stored, stored).await, 1);
}

#[tokio::test]
async fn test_stored_extra_field_must_be_scanned() {
    let stored = r#"{"doorID":"front","passwd":"X","start":"2025-01-01, 10:00:00","end":"2025-01-01, 10:10:00","room":"101"}"#;
    assert_eq!(scan_stored_text(stored, &payload("X")).await, 0);
    assert_eq!(scan_stored_text(stored, stored).await, 1);
}

#[tokio::test]
async fn test_second_match_inside_cooldown_is_rate_limited() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![
            Frame::after(0).showing(payload("X")),
            Frame::after(30).showing(payload("X")),
            Frame::after(31).showing(payload("X")),
            Frame::after(600),
        ],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.actuations, 2);
    assert_eq!(outcome.rate_limited, 1);
    // the rate-limited scan at 10:00:30 did not reset the cool-down
    assert_eq!(h.actuator.engagements(), [at(10, 0, 0), at(10, 1, 1)]);
    assert_eq!(h.scanner.limiter().last_actuation_at(), Some(at(10, 1, 1)));
}

#[tokio::test]
async fn test_custom_cooldown() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![
            Frame::after(0).showing(payload("X")),
            Frame::after(11).showing(payload("X")),
            Frame::after(600),
        ],
    );
    h.scanner = h
        .scanner
        .with_limiter(RateLimiter::with_interval(TimeDelta::seconds(10)));

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.actuations, 2);
    assert_eq!(outcome.rate_limited, 0);
}

#[tokio::test]
async fn test_rotation_terminates_loop() {
    let mut h = harness(
        Some("A"),
        at(10, 0, 0),
        vec![
            Frame::after(1),
            Frame::after(1).storing(payload("B")),
            Frame::after(1),
        ],
    );

    let outcome = h.scanner.run().await.unwrap();
    match outcome.termination {
        Termination::Rotated { next } => assert_eq!(next.secret(), "B"),
        other => panic!("expected rotation, got {other:?}"),
    }
    assert_eq!(outcome.iterations, 2);
}

#[tokio::test]
async fn test_restored_same_secret_is_not_rotation() {
    // same secret, different window: not a new key
    let echoed = codec::encode(
        &CredentialRecord::new("front", "A", at(10, 0, 0), at(10, 5, 0)).unwrap(),
    );
    let mut h = harness(
        Some("A"),
        at(10, 0, 0),
        vec![Frame::after(1).storing(echoed), Frame::after(600)],
    );

    assert_eq!(h.scanner.run().await.unwrap().termination, Termination::Expired);
}

#[tokio::test]
async fn test_match_in_rotating_iteration_still_unlocks() {
    let mut h = harness(
        Some("A"),
        at(10, 0, 0),
        vec![Frame::after(1).showing(payload("A")).storing(payload("B"))],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert!(matches!(outcome.termination, Termination::Rotated { .. }));
    assert_eq!(outcome.actuations, 1);
}

#[tokio::test]
async fn test_match_in_expiring_iteration_still_unlocks() {
    let mut h = harness(
        Some("A"),
        at(10, 9, 59),
        vec![Frame::after(0).showing(payload("A")), Frame::after(1)],
    );
    // first frame is the last active second; the next one crosses the end
    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.termination, Termination::Expired);
    assert_eq!(outcome.actuations, 1);
    assert_eq!(outcome.iterations, 2);
}

#[tokio::test]
async fn test_key_expired_at_start_never_polls() {
    let mut h = harness(Some("X"), at(10, 10, 0), vec![Frame::after(0).showing(payload("X"))]);

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.termination, Termination::Expired);
    assert_eq!(outcome.iterations, 0);
    assert!(h.actuator.engagements().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_not_fatal() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![
            Frame::after(1).showing("https://example.com".into()),
            Frame::after(1).showing("[1,2,3]".into()),
            Frame::after(1).showing(payload("X")),
            Frame::after(600),
        ],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.malformed, 2);
    assert_eq!(outcome.actuations, 1);
}

#[tokio::test]
async fn test_empty_frames_are_noops() {
    let mut h = harness(
        Some("X"),
        at(10, 0, 0),
        vec![Frame::after(1), Frame::after(1), Frame::after(1), Frame::after(600)],
    );

    let outcome = h.scanner.run().await.unwrap();
    assert_eq!(outcome.iterations, 4);
    assert_eq!((outcome.rejected, outcome.malformed, outcome.actuations), (0, 0, 0));
}

#[tokio::test]
async fn test_missing_key_is_fatal_and_releases_devices() {
    let mut h = harness(None, at(10, 0, 0), vec![Frame::after(1)]);

    let err = h.scanner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::Store(StoreError::Empty)));
    assert!(h.source_closed.load(Ordering::SeqCst));
    assert!(h.actuator.closed());
}

#[tokio::test]
async fn test_missing_key_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(at(10, 0, 0));
    let (_tx, rx) = tokio::sync::mpsc::channel(1);
    let actuator = RecordingActuator {
        events: Arc::new(Mutex::new(Vec::new())),
        clock: clock.clone(),
    };
    let mut scanner = ValidationLoop::new(
        FileStore::new(dir.path().join("keyinfo.json")),
        ChannelSource::new(rx, Duration::from_millis(10)),
        actuator,
        clock,
        tracing::Span::none(),
    );

    let err = scanner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_decoder_failure_releases_devices() {
    let mut h = harness(Some("X"), at(10, 0, 0), vec![Frame::after(1)]);

    let err = h.scanner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::Decoder(DecoderError::Closed)));
    assert!(h.source_closed.load(Ordering::SeqCst));
    assert!(h.actuator.closed());
}

#[tokio::test]
async fn test_stop_request_ends_loop() {
    let stop = Arc::new(AtomicBool::new(true));
    let h = harness(Some("X"), at(10, 0, 0), vec![Frame::after(1)]);
    let mut scanner = h.scanner.with_stop_flag(stop);

    let outcome = scanner.run().await.unwrap();
    assert_eq!(outcome.termination, Termination::Stopped);
    assert_eq!(outcome.iterations, 0);
    assert!(h.actuator.closed());
}

#[tokio::test]
async fn test_terminated_loop_cannot_resume() {
    let mut h = harness(Some("X"), at(10, 10, 0), vec![]);
    h.scanner.run().await.unwrap();
    assert!(matches!(h.scanner.run().await, Err(ScanError::Terminated)));
}

/// Clock following tokio's (pausable) timer.
#[derive(Clone)]
struct TimerClock {
    base: NaiveDateTime,
    started: tokio::time::Instant,
}

impl Clock for TimerClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap();
        doorlens::clock::truncate_to_seconds(self.base + elapsed)
    }
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_window_to_open() {
    let clock = TimerClock {
        base: at(9, 59, 58),
        started: tokio::time::Instant::now(),
    };
    let store = MemoryStore::new();
    store.save(&payload("X")).unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tx.send(payload("X")).await.unwrap();
    drop(tx);
    let actuator = RecordingActuator {
        events: Arc::new(Mutex::new(Vec::new())),
        clock: clock.clone(),
    };
    let mut scanner = ValidationLoop::new(
        store,
        ChannelSource::new(rx, Duration::from_millis(200)),
        actuator.clone(),
        clock,
        tracing::Span::none(),
    )
    .with_hold(Duration::ZERO)
    .with_idle_poll(Duration::from_millis(500));

    // the queued code is only read once the window opens; then the decoder
    // runs dry
    let err = scanner.run().await.unwrap_err();
    assert!(matches!(err, ScanError::Decoder(DecoderError::Closed)));
    let engaged = actuator.engagements();
    assert_eq!(engaged.len(), 1);
    assert!(engaged[0] >= at(10, 0, 0));
}

/// The code stays in front of the camera while the door is held open.
struct LingeringCode {
    tx: tokio::sync::mpsc::Sender<String>,
    code: String,
}

impl Actuator for LingeringCode {
    fn engage(&mut self) -> Result<(), ActuatorError> {
        for _ in 0..3 {
            let _ = self.tx.try_send(self.code.clone());
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_codes_seen_during_hold_are_dropped() {
    let clock = TimerClock {
        base: at(10, 0, 0),
        started: tokio::time::Instant::now(),
    };
    let code = codec::encode(&CredentialRecord::new("front", "X", at(10, 0, 0), at(10, 0, 3)).unwrap());
    let store = MemoryStore::new();
    store.save(&code).unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tx.send(code.clone()).await.unwrap();
    let mut scanner = ValidationLoop::new(
        store,
        ChannelSource::new(rx, Duration::from_millis(200)),
        LingeringCode { tx, code },
        clock,
        tracing::Span::none(),
    )
    .with_hold(Duration::from_secs(1));

    let outcome = scanner.run().await.unwrap();
    assert_eq!(outcome.termination, Termination::Expired);
    assert_eq!(outcome.actuations, 1);
    // the copies read during the hold never reach the rate limiter
    assert_eq!(outcome.rate_limited, 0);
}
