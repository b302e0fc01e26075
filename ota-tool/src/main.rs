// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware upload and control tool for the dual-bank OTA bootloader, via
//! the device's USB CDC console.
//!
//! Usage:
//!   ota-tool --port /dev/ttyACM0 status
//!   ota-tool --port /dev/ttyACM0 upload firmware.bin --version 1.3.0
//!   ota-tool --port /dev/ttyACM0 activate
//!   ota-tool --port /dev/ttyACM0 reboot

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
