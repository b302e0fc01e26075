// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot bank selection FSM — pure logic without hardware dependencies where
//! possible. This module decides which bank to jump to, applying at most
//! one metadata mutation per call; a physical reboot is what actually
//! re-enters the sequence for the next attempt, so the driver here only
//! ever executes a single step before returning.

use crate::flash::Flash;
use crate::metadata::{MetadataError, MetadataStore, MAX_BOOT_ATTEMPTS};
use crate::partition::{is_in_sram, FirmwareBank};

/// What the boot selector decided to do on this pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootOutcome {
    /// `bank` validated; transfer control to its entry point.
    Boot(FirmwareBank),
    /// Metadata was mutated (bank switch and/or rollback bookkeeping); the
    /// caller must trigger an actual reset so the selector re-runs against
    /// the new metadata with fresh in-silicon state.
    Rebooted,
    /// No bank is usable. Caller should show a hard-fault indication and
    /// halt — there is no recovery path left.
    HardFault,
}

/// `true` once `boot_count` has reached the point where the bank must be
/// rolled back rather than tried again.
pub fn is_exhausted(boot_count: u32) -> bool {
    boot_count >= MAX_BOOT_ATTEMPTS
}

/// Reads the image's Cortex-M vector table header (initial SP, reset
/// vector) and checks both resolve to plausible addresses: the initial SP
/// in SRAM, the reset vector inside the bank's own flash range. A
/// CRC-valid image with a corrupt vector table would otherwise hard-fault
/// immediately after the jump with no recovery path, so this runs as a
/// gate ahead of the CRC check rather than relying on CRC alone.
fn is_valid_for_ram_execution<F: Flash>(flash: &mut F, bank: FirmwareBank) -> bool {
    let mut header = [0u8; 8];
    if flash.read(bank.offset(), &mut header).is_err() {
        return false;
    }
    let initial_sp = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let reset_vector = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let reset_addr = reset_vector & !1; // Thumb bit is not part of the address.

    is_in_sram(initial_sp) && (bank.address()..bank.address() + bank.size()).contains(&reset_addr)
}

/// Mark `from` invalid, swap `active_bank` to `to` via rollback bookkeeping,
/// or halt if `to` is not valid. Shared by both rollback trigger points
/// (exhausted boot count, and CRC mismatch at validation time).
fn rollback_or_halt<F: Flash>(store: &mut MetadataStore<F>) -> Result<BootOutcome, MetadataError> {
    let opposite = store.current().active_bank().opposite();
    if !store.current().bank(opposite).is_valid() {
        return Ok(BootOutcome::HardFault);
    }
    store.trigger_rollback()?;
    Ok(BootOutcome::Rebooted)
}

/// Runs one pass of the boot selector contract:
/// 1. (handled by [`MetadataStore::init`] before this is ever called.)
/// 2. If the active bank is invalid, switch to the opposite if valid.
/// 3. If the active bank's boot count is exhausted, roll back.
/// 4. Increment the active bank's boot count.
/// 5. Validate the active bank's image CRC32; mismatch re-enters step 3.
/// 6. Return `Boot(active)` for the caller to jump to.
pub fn run<F: Flash>(store: &mut MetadataStore<F>) -> Result<BootOutcome, MetadataError> {
    let active = store.current().active_bank();

    if !store.current().bank(active).is_valid() {
        let opposite = active.opposite();
        if !store.current().bank(opposite).is_valid() {
            return Ok(BootOutcome::HardFault);
        }
        store.set_active_bank(opposite)?;
        return Ok(BootOutcome::Rebooted);
    }

    if is_exhausted(store.current().bank(active).boot_count) {
        return rollback_or_halt(store);
    }

    store.increment_boot_count(active)?;

    if !is_valid_for_ram_execution(store.flash_mut(), active) {
        return rollback_or_halt(store);
    }

    let meta = *store.current().bank(active);
    let crc_ok = store
        .flash_mut()
        .calculate_crc32(active.offset(), meta.size)
        .map(|crc| crc == meta.crc32)
        .unwrap_or(false);

    if !crc_ok {
        return rollback_or_halt(store);
    }

    Ok(BootOutcome::Boot(active))
}
