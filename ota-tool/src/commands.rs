// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for the firmware console.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ota_core::flash::CRC32;

use crate::transport::Transport;

/// Bytes of firmware sent per console line (each byte becomes 2 hex chars).
const CHUNK_SIZE: usize = 128;
/// Erasing the target bank before receiving can take tens of seconds.
const UPDATE_TIMEOUT_MS: u64 = 60_000;

/// Get and display the device's current update/boot status.
pub fn status(transport: &mut Transport) -> Result<()> {
    for line in transport.command("status")? {
        println!("{line}");
    }
    Ok(())
}

/// Upload firmware to the device's inactive bank.
pub fn upload(transport: &mut Transport, file: &Path, version: Option<&str>) -> Result<()> {
    let firmware = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let size = firmware.len() as u32;
    let crc32 = CRC32.checksum(&firmware);

    println!(
        "Firmware: {} ({size} bytes, CRC32: 0x{crc32:08x})",
        file.display()
    );
    if let Some(v) = version {
        println!("Version:  {v}");
    }
    println!();

    let mut cmd = format!("update {size} {crc32:08x}");
    if let Some(v) = version {
        cmd.push(' ');
        cmd.push_str(v);
    }

    print!("Starting update (erasing bank)... ");
    let response = transport.command_timeout(&cmd, UPDATE_TIMEOUT_MS)?;
    if response.iter().any(|l| l.starts_with("usage:") || l.contains("failed")) {
        bail!("device rejected update: {}", response.join(" / "));
    }
    println!("OK");

    let pb = ProgressBar::new(size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut hex_line = String::with_capacity(CHUNK_SIZE * 2);
    for chunk in firmware.chunks(CHUNK_SIZE) {
        hex_line.clear();
        for byte in chunk {
            use std::fmt::Write as _;
            let _ = write!(hex_line, "{byte:02x}");
        }
        let response = transport.command(&hex_line)?;
        if response.iter().any(|l| l.contains("failed")) {
            pb.abandon();
            bail!("device rejected chunk: {}", response.join(" / "));
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_with_message("Upload complete");
    println!();

    print!("Finalizing... ");
    let response = transport.command(".")?;
    if response.iter().any(|l| l.contains("failed")) {
        bail!("finalize failed: {}", response.join(" / "));
    }
    println!("OK");

    println!();
    println!("Firmware uploaded and validated.");
    println!(
        "Use 'ota-tool --port {} activate' then 'reboot' to run it.",
        transport.port_name()
    );

    Ok(())
}

/// Swap the active bank to the just-validated update.
pub fn activate(transport: &mut Transport) -> Result<()> {
    let response = transport.command("activate")?;
    for line in &response {
        println!("{line}");
    }
    if response.iter().any(|l| l.contains("failed")) {
        bail!("activate failed");
    }
    Ok(())
}

/// Force a rollback to the other bank on next boot.
pub fn rollback(transport: &mut Transport) -> Result<()> {
    let response = transport.command("rollback")?;
    for line in &response {
        println!("{line}");
    }
    if response.iter().any(|l| l.contains("failed")) {
        bail!("rollback failed");
    }
    Ok(())
}

/// Abort an in-progress update.
pub fn cancel(transport: &mut Transport) -> Result<()> {
    let response = transport.command("cancel")?;
    for line in &response {
        println!("{line}");
    }
    if response.iter().any(|l| l.contains("failed")) {
        bail!("cancel failed");
    }
    Ok(())
}

/// Reboot the device.
pub fn reboot(transport: &mut Transport) -> Result<()> {
    print!("Rebooting device... ");
    // The device resets before it can send --END--, so don't wait for one.
    let _ = transport.command_timeout("reboot", 500);
    println!("OK");
    Ok(())
}
