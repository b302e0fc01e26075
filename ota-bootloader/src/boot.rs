// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot sequencing: run the bank-selection FSM against the metadata store,
//! persist its decision, and jump into flash in place (XIP) once a bank is
//! chosen. A `Rebooted` outcome is carried out as a software reset so the
//! selector re-enters fresh against the mutated metadata — the selector
//! itself applies at most one mutation per call.

use ota_core::boot_fsm::{self, BootOutcome};
use ota_core::flash::Flash;
use ota_core::metadata::MetadataStore;
use ota_core::partition::FirmwareBank;

use crate::flash::RomFlash;

/// Run one pass of the selector and either jump into firmware, reset to
/// re-run selection against fresh metadata, or halt.
pub fn run_boot_sequence(flash: RomFlash) -> ! {
    let mut store = match MetadataStore::init(flash) {
        Ok(store) => store,
        Err(e) => {
            defmt::error!("metadata store failed to initialize: {}", e);
            halt()
        }
    };

    match boot_fsm::run(&mut store) {
        Ok(BootOutcome::Boot(bank)) => {
            defmt::println!("booting bank {}", bank.index());
            unsafe { jump_to_bank(store.flash_mut(), bank) }
        }
        Ok(BootOutcome::Rebooted) => {
            defmt::println!("metadata updated, resetting to re-run selection");
            cortex_m::peripheral::SCB::sys_reset();
        }
        Ok(BootOutcome::HardFault) => {
            defmt::error!("no valid firmware bank, halting");
            halt()
        }
        Err(e) => {
            defmt::error!("boot selector metadata error: {}", e);
            halt()
        }
    }
}

fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Jump directly into `bank`'s flash contents in place — no RAM copy. The
/// boot selector has already validated the vector table and CRC before
/// this is called.
///
/// # Safety
/// Caller must ensure `bank` was validated by [`boot_fsm::run`] in this
/// same pass.
unsafe fn jump_to_bank(flash: &mut RomFlash, bank: FirmwareBank) -> ! {
    let mut header = [0u8; 8];
    flash
        .read(bank.offset(), &mut header)
        .expect("boot selector already validated this bank's readability");
    let initial_sp = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let reset_vector = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    cortex_m::interrupt::disable();

    // Clear and disable all NVIC interrupts so the firmware starts clean.
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);

    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(bank.address());
    cortex_m::asm::dsb();
    cortex_m::asm::isb();

    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",  // Re-enable interrupts before jumping.
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
