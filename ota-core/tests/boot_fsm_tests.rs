// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Integration tests for the boot bank selector, covering the full
//! metadata-store-backed end-to-end scenarios from outside the crate.

use ota_core::boot_fsm::{run, BootOutcome};
use ota_core::flash::Flash;
use ota_core::metadata::{MetadataStore, MAX_BOOT_ATTEMPTS};
use ota_core::mock_flash::MockFlash;
use ota_core::partition::FirmwareBank;

/// Builds a minimal, plausible Cortex-M image: a vector table header
/// (initial SP in SRAM, reset vector inside `bank`'s own flash range)
/// followed by `tail`, then flashes and records it as valid.
fn flash_image(store: &mut MetadataStore<MockFlash>, bank: FirmwareBank, tail: &[u8]) {
    let page = ota_core::partition::PAGE_SIZE as usize;

    let mut image = std::vec![0u8; 8];
    image[0..4].copy_from_slice(&(ota_core::partition::SRAM_BASE + 0x1000).to_le_bytes());
    image[4..8].copy_from_slice(&(bank.address() | 1).to_le_bytes());
    image.extend_from_slice(tail);

    let padded_len = image.len().next_multiple_of(page);
    let mut padded = std::vec![0xFFu8; padded_len];
    padded[..image.len()].copy_from_slice(&image);
    store.flash_mut().erase_region(bank.offset(), bank.size()).unwrap();
    store.flash_mut().write(bank.offset(), &padded).unwrap();
    let crc = ota_core::flash::CRC32.checksum(&image);
    store.mark_bank_valid(bank, crc, image.len() as u32, "v1").unwrap();
}

// Scenario 4 (spec end-to-end #4): rollback after three failed boots,
// then the application confirming the new bank on the next boot.
#[test]
fn rollback_after_three_failed_boots_then_confirms_on_next_boot() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    flash_image(&mut store, FirmwareBank::A, b"primary image bytes");
    flash_image(&mut store, FirmwareBank::B, b"fallback image bytes");
    store.set_active_bank(FirmwareBank::B).unwrap();
    for _ in 0..MAX_BOOT_ATTEMPTS {
        store.increment_boot_count(FirmwareBank::B).unwrap();
    }

    let outcome = run(&mut store).unwrap();
    assert_eq!(outcome, BootOutcome::Rebooted);
    assert_eq!(store.current().active_bank(), FirmwareBank::A);
    assert!(store.did_rollback_occur());

    // Next boot attempt (post-reset) runs from the restored bank.
    let outcome = run(&mut store).unwrap();
    assert_eq!(outcome, BootOutcome::Boot(FirmwareBank::A));
    assert_eq!(store.current().bank_a.boot_count, 1);

    assert!(store.did_rollback_occur());
    store.clear_rollback_flag().unwrap();
    assert!(!store.did_rollback_occur());
}

// Scenario 6 (spec end-to-end #6): rollback unavailable — the selector
// must not touch metadata when there is no valid fallback.
#[test]
fn halts_cleanly_when_exhausted_and_no_fallback_available() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    flash_image(&mut store, FirmwareBank::A, b"only bootable image");
    for _ in 0..MAX_BOOT_ATTEMPTS {
        store.increment_boot_count(FirmwareBank::A).unwrap();
    }

    let before = *store.current();
    let outcome = run(&mut store).unwrap();
    assert_eq!(outcome, BootOutcome::HardFault);
    // A halt must not mutate metadata any further.
    assert_eq!(*store.current(), before);
}

#[test]
fn fresh_cold_boot_boots_bank_a_with_boot_count_one() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    flash_image(&mut store, FirmwareBank::A, b"factory image");
    let outcome = run(&mut store).unwrap();
    assert_eq!(outcome, BootOutcome::Boot(FirmwareBank::A));
    assert_eq!(store.current().bank_a.boot_count, 1);
}

#[test]
fn boot_count_invariant_never_exceeds_max_across_repeated_runs() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    flash_image(&mut store, FirmwareBank::A, b"stable image");
    flash_image(&mut store, FirmwareBank::B, b"backup image");

    for _ in 0..(MAX_BOOT_ATTEMPTS * 2) {
        let _ = run(&mut store);
        assert!(store.current().bank_a.boot_count <= MAX_BOOT_ATTEMPTS);
        assert!(store.current().bank_b.boot_count <= MAX_BOOT_ATTEMPTS);
    }
}
