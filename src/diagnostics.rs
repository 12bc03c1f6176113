use std::path::Path;

use crate::config::{ActuatorArgs, NotifyArgs, ScanArgs};

/// Preflight for `scan`: decoder and lock output must be usable.
pub fn check_scan(args: &ScanArgs) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: decoder binary found
    if let Err(e) = std::process::Command::new(&args.decoder).arg("--version").output() {
        errors.push(format!(
            "decoder binary not found: '{}': {e}\n  \
             → install zbar tools: apt install zbar-tools",
            args.decoder
        ));
    }

    // Check 2: video device readable
    if let Err(e) = std::fs::OpenOptions::new().read(true).open(&args.video_device) {
        errors.push(format!(
            "cannot open {}: {e}\n  \
             → add yourself to the 'video' group: sudo usermod -aG video $USER",
            args.video_device
        ));
    }

    check_actuator(&args.actuator, &mut errors);
    report(errors)
}

/// Preflight for `open`.
pub fn check_open(args: &ActuatorArgs) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    check_actuator(args, &mut errors);
    report(errors)
}

/// Preflight for `issue`/`resend`: tools needed to mail the QR image.
pub fn check_notify(args: &NotifyArgs) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();
    if args.email_to.is_none() {
        return Ok(());
    }
    if let Err(e) = std::process::Command::new(&args.qrencode).arg("--version").output() {
        errors.push(format!(
            "qrencode binary not found: '{}': {e}\n  \
             → install qrencode: apt install qrencode",
            args.qrencode
        ));
    }
    let sendmail = Path::new(&args.sendmail);
    let found = if sendmail.components().count() > 1 {
        sendmail.is_file()
    } else {
        which(&args.sendmail).is_some()
    };
    if !found {
        errors.push(format!(
            "sendmail binary not found: '{}'\n  \
             → install an MTA providing sendmail, or pass --sendmail",
            args.sendmail
        ));
    }
    report(errors)
}

fn check_actuator(args: &ActuatorArgs, errors: &mut Vec<String>) {
    if args.dry_run {
        return;
    }
    let export = args.gpio_root.join("export");
    if let Err(e) = std::fs::OpenOptions::new().write(true).open(&export) {
        errors.push(format!(
            "cannot open {}: {e}\n  \
             → add yourself to the 'gpio' group, or run with --dry-run",
            export.display()
        ));
    }
}

fn which(binary: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

fn report(errors: Vec<String>) -> anyhow::Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
