use std::path::PathBuf;

pub const DEFAULT_WINDOW_MINUTES: i64 = 10;
pub const MIN_ACTUATION_INTERVAL_SECS: i64 = 60;
pub const SCAN_HOLD_SECS: u64 = 5;
pub const MANUAL_HOLD_SECS: u64 = 10;
pub const KEY_FILE: &str = "keyinfo.json";
/// Wire format of `start`/`end`; local time, no zone.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d, %H:%M:%S";
pub const FRAME_TIMEOUT_MS: u64 = 200;
pub const WAITING_POLL_MS: u64 = 500;
pub const DEVICE_LOCK_FILE: &str = "doorlens-scan.lock";
pub const DEVICE_LOCK_WAIT_SECS: u64 = 30;
pub const SPOOL_POLL_MS: u64 = 500;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "doorlens", version)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Also write logs to this file.
    #[arg(long, env = "DOORLENS_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Mint a new key, publish it to the device and mail the QR image.
    Issue(IssueArgs),
    /// Re-distribute a key minted earlier without minting a new one.
    Resend(ResendArgs),
    /// Device side: wait for keys on the bus and restart the scanner per key.
    Listen(ListenArgs),
    /// Device side: validate scanned codes against the stored key.
    Scan(ScanArgs),
    /// Release the lock once, bypassing validation.
    Open(OpenArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct BusArgs {
    /// Root directory of the message spool. Defaults to the XDG data dir.
    #[arg(long, env = "DOORLENS_SPOOL_DIR")]
    pub spool_dir: Option<PathBuf>,
    #[arg(long, env = "DOORLENS_TOPIC", default_value = "doorlens")]
    pub topic: String,
    #[arg(long, env = "DOORLENS_SUBSCRIPTION", default_value = "doorlens-device")]
    pub subscription: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct NotifyArgs {
    /// Recipient of the QR image. Notification is skipped when unset.
    #[arg(long, env = "DOORLENS_EMAIL_TO")]
    pub email_to: Option<String>,
    #[arg(long, env = "DOORLENS_EMAIL_FROM", default_value = "doorlens@localhost")]
    pub email_from: String,
    #[arg(long, env = "DOORLENS_SENDMAIL", default_value = "sendmail")]
    pub sendmail: String,
    #[arg(long, env = "DOORLENS_QRENCODE", default_value = "qrencode")]
    pub qrencode: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IssueArgs {
    /// Door the key opens. Defaults to the topic name.
    #[arg(long, env = "DOORLENS_DOOR_ID")]
    pub door_id: Option<String>,
    /// Key secret; `default` generates a fresh one.
    #[arg(long, env = "DOORLENS_SECRET", default_value = "default")]
    pub secret: String,
    #[arg(long, env = "DOORLENS_WINDOW_MINUTES", default_value_t = DEFAULT_WINDOW_MINUTES, allow_negative_numbers = true)]
    pub window_minutes: i64,
    /// Where the payload and QR image are written.
    #[arg(long, env = "DOORLENS_OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,
    #[command(flatten)]
    pub bus: BusArgs,
    #[command(flatten)]
    pub notify: NotifyArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ResendArgs {
    /// Payload file written by `issue` (`<key id>.json`).
    pub payload: PathBuf,
    #[command(flatten)]
    pub bus: BusArgs,
    #[command(flatten)]
    pub notify: NotifyArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListenArgs {
    #[arg(long, env = "DOORLENS_KEY_FILE", default_value = KEY_FILE)]
    pub key_file: PathBuf,
    #[command(flatten)]
    pub bus: BusArgs,
    /// Extra arguments passed to every spawned `scan` process.
    #[arg(last = true)]
    pub scan_args: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ActuatorArgs {
    #[arg(long, env = "DOORLENS_GPIO_PIN", default_value_t = 17)]
    pub gpio_pin: u32,
    #[arg(long, env = "DOORLENS_GPIO_ROOT", default_value = "/sys/class/gpio")]
    pub gpio_root: PathBuf,
    /// Log actuations instead of driving the GPIO line.
    #[arg(long, env = "DOORLENS_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    #[arg(long, env = "DOORLENS_KEY_FILE", default_value = KEY_FILE)]
    pub key_file: PathBuf,
    #[arg(long, env = "DOORLENS_DECODER", default_value = "zbarcam")]
    pub decoder: String,
    #[arg(long, env = "DOORLENS_VIDEO_DEVICE", default_value = "/dev/video0")]
    pub video_device: String,
    #[arg(long, env = "DOORLENS_SCAN_HOLD_SECS", default_value_t = SCAN_HOLD_SECS)]
    pub hold_secs: u64,
    #[command(flatten)]
    pub actuator: ActuatorArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct OpenArgs {
    #[arg(long, env = "DOORLENS_OPEN_HOLD_SECS", default_value_t = MANUAL_HOLD_SECS)]
    pub hold_secs: u64,
    #[command(flatten)]
    pub actuator: ActuatorArgs,
}
