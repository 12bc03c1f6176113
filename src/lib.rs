pub mod actuator;
pub mod bus;
pub mod clock;
pub mod config;
pub mod credential;
pub mod diagnostics;
pub mod distribution;
pub mod error;
pub mod limiter;
pub mod notify;
pub mod scanner;
pub mod store;
pub mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

use crate::actuator::{Actuator, LogActuator, SysfsGpio};
use crate::clock::Clock;
use crate::bus::{SpoolPublisher, SpoolSubscriber};
use crate::config::{
    ActuatorArgs, BusArgs, Command, Config, DEVICE_LOCK_FILE, DEVICE_LOCK_WAIT_SECS, FRAME_TIMEOUT_MS,
    IssueArgs, ListenArgs, NotifyArgs, OpenArgs, ResendArgs, SPOOL_POLL_MS, ScanArgs,
};
use crate::credential::{CredentialIssuer, codec};
use crate::distribution::{DistributionReport, Recipient};
use crate::notify::SendmailNotifier;
use crate::scanner::{ScanError, Termination, ValidationLoop, ZbarSource};
use crate::store::FileStore;
use crate::supervisor::{ProcessLauncher, Supervisor};

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let _log_guard = init_logging(cfg.verbose, cfg.log_file.as_deref())?;
    match cfg.command {
        Command::Issue(args) => issue(args).await,
        Command::Resend(args) => resend(args).await,
        Command::Listen(args) => listen(args, cfg.verbose).await,
        Command::Scan(args) => scan(args).await,
        Command::Open(args) => open(args).await,
    }
}

/// Console logging, plus a plain-text copy in `log_file` when given. Keep
/// the returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(verbose: u8, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install logger: {e}"))?;
    Ok(guard)
}

fn data_dir() -> anyhow::Result<PathBuf> {
    Ok(directories::ProjectDirs::from("", "", "doorlens")
        .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
        .data_dir()
        .to_path_buf())
}

fn spool_root(bus: &BusArgs) -> anyhow::Result<PathBuf> {
    match &bus.spool_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(data_dir()?.join("spool")),
    }
}

fn runtime_dir() -> anyhow::Result<PathBuf> {
    let dir = match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => data_dir()?,
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn recipient<'a>(
    notify: &'a NotifyArgs,
    notifier: &'a SendmailNotifier,
    image: &'a Path,
) -> Option<Recipient<'a>> {
    notify.email_to.as_deref().map(|address| Recipient {
        notifier,
        address,
        image,
    })
}

/// Mint a key, save its payload and QR image, then publish and mail it.
pub async fn issue(args: IssueArgs) -> anyhow::Result<()> {
    diagnostics::check_notify(&args.notify)?;
    let door_id = args.door_id.clone().unwrap_or_else(|| args.bus.topic.clone());

    let issuer = CredentialIssuer::new(tracing::info_span!("issuer", door_id = %door_id));
    let issuance = issuer
        .issue(&door_id, &args.secret, args.window_minutes)
        .map_err(|e| anyhow::anyhow!("cannot issue key: {e}"))?;
    let payload = issuance.payload();

    std::fs::create_dir_all(&args.out_dir)?;
    let payload_path = args.out_dir.join(format!("{}.json", issuance.key_id));
    store::disk::write_atomic(&payload_path, payload.as_bytes())?;
    let image = args.out_dir.join(format!("{}.png", issuance.key_id));
    render_image(&args.notify, &payload, &image, &payload_path).await?;

    let report = distribute(&args.bus, &args.notify, &payload, &image)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "key {} was minted but not delivered: {e:#}\n  → retry with: doorlens resend {}",
                issuance.key_id,
                payload_path.display()
            )
        })?;
    tracing::info!(message_id = %report.message_id, "Key distributed");
    println!("Key generated and distributed successfully: {}", image.display());
    Ok(())
}

/// Publish and mail a key minted earlier, without minting a new one.
pub async fn resend(args: ResendArgs) -> anyhow::Result<()> {
    diagnostics::check_notify(&args.notify)?;
    let payload = std::fs::read_to_string(&args.payload)?;
    let record = codec::decode(&payload)
        .map_err(|e| anyhow::anyhow!("{} is not a key: {e}", args.payload.display()))?;
    if !record.is_valid_at(clock::SystemClock.now()) {
        tracing::warn!(
            start = %record.valid_from(),
            end = %record.valid_until(),
            "Resending a key outside its window"
        );
    }

    let image = args.payload.with_extension("png");
    if !image.exists() {
        render_image(&args.notify, &payload, &image, &args.payload).await?;
    }
    let report = distribute(&args.bus, &args.notify, &payload, &image).await?;
    println!("Key redistributed as message {}", report.message_id);
    Ok(())
}

async fn render_image(
    notify: &NotifyArgs,
    payload: &str,
    image: &Path,
    payload_path: &Path,
) -> anyhow::Result<()> {
    match notify::render_qr(&notify.qrencode, payload, image).await {
        Ok(()) => Ok(()),
        Err(e) if notify.email_to.is_none() => {
            tracing::warn!("QR image not rendered: {e}");
            Ok(())
        }
        Err(e) => anyhow::bail!(
            "cannot render QR image: {e}\n  → key saved at {}; retry with: doorlens resend {}",
            payload_path.display(),
            payload_path.display()
        ),
    }
}

async fn distribute(
    bus: &BusArgs,
    notify: &NotifyArgs,
    payload: &str,
    image: &Path,
) -> anyhow::Result<DistributionReport> {
    let publisher = SpoolPublisher::new(spool_root(bus)?, &bus.topic)?;
    let notifier = SendmailNotifier::new(&notify.sendmail, &notify.email_from);
    let report =
        distribution::distribute(&publisher, payload, recipient(notify, &notifier, image)).await?;
    Ok(report)
}

/// Device receiver: store each delivered key and start a scanner for it.
pub async fn listen(args: ListenArgs, verbose: u8) -> anyhow::Result<()> {
    let lock_path = runtime_dir()?.join("doorlens-listen.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock
        .try_write()
        .map_err(|_| anyhow::anyhow!("a listener is already running (lock: {})", lock_path.display()))?;

    let root = spool_root(&args.bus)?;
    let subscriber = SpoolSubscriber::open(
        &root,
        &args.bus.topic,
        &args.bus.subscription,
        Duration::from_millis(SPOOL_POLL_MS),
    )?;

    let mut scan_args = Vec::new();
    if verbose > 0 {
        scan_args.push(format!("-{}", "v".repeat(verbose.into())));
    }
    scan_args.push("--key-file".into());
    scan_args.push(args.key_file.display().to_string());
    scan_args.extend(args.scan_args.iter().cloned());
    let launcher = ProcessLauncher::current_exe(scan_args)?;

    let span = tracing::info_span!("listener", subscription = %args.bus.subscription);
    let mut supervisor = Supervisor::new(subscriber, FileStore::new(&args.key_file), launcher, span);
    supervisor.resume()?;

    tokio::select! {
        res = supervisor.run() => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Listener shutting down"),
    }
    Ok(())
}

/// Validate scanned codes against the stored key until it rotates or
/// expires.
pub async fn scan(args: ScanArgs) -> anyhow::Result<()> {
    diagnostics::check_scan(&args)?;

    // One scanner owns the camera and the lock output at a time; a freshly
    // started instance waits for the one it replaces to wind down.
    let lock_path = runtime_dir()?.join(DEVICE_LOCK_FILE);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    wait_for_lock(&mut lock, Duration::from_secs(DEVICE_LOCK_WAIT_SECS)).await;
    let _guard = lock
        .try_write()
        .map_err(|_| anyhow::anyhow!("another scanner holds the device (lock: {})", lock_path.display()))?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let actuator = open_actuator(&args.actuator)?;
    let source = ZbarSource::spawn(
        &args.decoder,
        &args.video_device,
        Duration::from_millis(FRAME_TIMEOUT_MS),
    )?;
    let span = tracing::info_span!("scanner", key_file = %args.key_file.display());
    let mut scanner = ValidationLoop::new(
        FileStore::new(&args.key_file),
        source,
        actuator,
        clock::SystemClock,
        span,
    )
    .with_hold(Duration::from_secs(args.hold_secs))
    .with_stop_flag(stop);

    match scanner.run().await {
        Ok(outcome) => {
            match &outcome.termination {
                Termination::Rotated { .. } => tracing::info!("Handing over to the scanner for the new key"),
                Termination::Expired => tracing::info!("Key expired, scanner done"),
                Termination::Stopped => tracing::info!("Scanner stopped"),
            }
            tracing::info!(
                iterations = outcome.iterations,
                unlocks = outcome.actuations,
                rejected = outcome.rejected,
                malformed = outcome.malformed,
                rate_limited = outcome.rate_limited,
                "Scanner summary"
            );
            Ok(())
        }
        Err(ScanError::Store(e)) if e.is_missing() => {
            anyhow::bail!("no key to validate against: {e}")
        }
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_lock(lock: &mut fd_lock::RwLock<std::fs::File>, max_wait: Duration) {
    let started = Instant::now();
    let mut logged = false;
    while started.elapsed() < max_wait {
        if lock.try_write().is_ok() {
            return;
        }
        if !logged {
            tracing::info!("Waiting for the previous scanner to release the device");
            logged = true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn open_actuator(args: &ActuatorArgs) -> error::Result<Box<dyn Actuator>> {
    if args.dry_run {
        return Ok(Box::new(LogActuator::new()));
    }
    Ok(Box::new(SysfsGpio::open(&args.gpio_root, args.gpio_pin)?))
}

/// Release the lock once for `hold_secs`, without any key.
pub async fn open(args: OpenArgs) -> anyhow::Result<()> {
    diagnostics::check_open(&args.actuator)?;
    let mut actuator = open_actuator(&args.actuator)?;
    println!("door opened!");
    let result = actuator::actuate(&mut actuator, Duration::from_secs(args.hold_secs)).await;
    actuator.close()?;
    result?;
    Ok(())
}
