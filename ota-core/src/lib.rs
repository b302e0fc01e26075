// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Dual-bank OTA firmware update core.
//!
//! Portable, `no_std` logic for a two-bank (A/B) over-the-air firmware
//! update subsystem on XIP NOR flash: flash primitives, a fault-tolerant
//! double-buffered metadata store, a firmware update state machine, a
//! boot-time bank selector, and thin HTTP download/upload adapters.
//! Board- and transport-specific glue (the actual flash ROM calls, the
//! actual TCP stack) lives outside this crate and implements the traits
//! declared here.
//!
//! - Default: `no_std`, suitable for the bootloader itself.
//! - `std`: enables [`mock_flash`] and richer `Display`/`Error` impls for
//!   host-side testing and tooling.
//! - `embedded`: pulls in `embedded-hal`/`cortex-m` trait bounds shared
//!   with `rp2040-hal`-based backends.
//! - `defmt`: derives `defmt::Format` on the public error/status types.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod boot_fsm;
pub mod error;
pub mod flash;
pub mod manager;
pub mod metadata;
pub mod partition;
pub mod sink;

#[cfg(feature = "std")]
pub mod mock_flash;

pub use boot_fsm::BootOutcome;
pub use error::{FlashError, ManagerError, MetadataError, SinkError};
pub use flash::{Flash, FlashDevice, SharedFlash, CRC32};
pub use manager::{FirmwareManager, ManagerState, UpdateStatus};
pub use metadata::{BankMetadata, MetadataRecord, MetadataStore};
pub use partition::FirmwareBank;
pub use sink::{DnsResolver, DownloadState, TcpConnector, UploadSink, UrlPullSink};
