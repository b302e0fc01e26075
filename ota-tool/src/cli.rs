// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "ota-tool")]
#[command(about = "Firmware upload and control tool for the dual-bank OTA bootloader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show update and per-bank status
    Status,

    /// Upload firmware to the inactive bank and validate it
    Upload {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Firmware version string, recorded with the bank once validated
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Make the just-validated bank active on next boot
    Activate,

    /// Force a rollback to the other bank on next boot
    Rollback,

    /// Abort an in-progress upload
    Cancel,

    /// Reboot the device
    Reboot,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut transport = Transport::new(&cli.port)?;
    transport.sync()?;

    match cli.command {
        Commands::Status => commands::status(&mut transport),
        Commands::Upload { file, version } => {
            commands::upload(&mut transport, &file, version.as_deref())
        }
        Commands::Activate => commands::activate(&mut transport),
        Commands::Rollback => commands::rollback(&mut transport),
        Commands::Cancel => commands::cancel(&mut transport),
        Commands::Reboot => commands::reboot(&mut transport),
    }
}
