// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Integration tests for the compile-time flash layout: region ordering,
//! alignment predicates, and protected-range checks as consumed from
//! outside the crate.

use ota_core::partition::{
    fits_in_bank, is_page_aligned, is_protected_region, is_sector_aligned, FirmwareBank,
    BANK_A_OFFSET, BANK_B_OFFSET, BANK_SIZE, METADATA_SECTOR0_OFFSET, METADATA_SECTOR1_OFFSET,
    PAGE_SIZE, RESERVED_OFFSET, RESERVED_SIZE, SECTOR_SIZE, TOTAL_FLASH_SIZE,
};

#[test]
fn regions_are_laid_out_in_order_with_no_overlap() {
    assert!(METADATA_SECTOR0_OFFSET < METADATA_SECTOR1_OFFSET);
    assert!(METADATA_SECTOR1_OFFSET + SECTOR_SIZE <= BANK_A_OFFSET);
    assert!(BANK_A_OFFSET + BANK_SIZE <= BANK_B_OFFSET);
    assert!(BANK_B_OFFSET + BANK_SIZE <= RESERVED_OFFSET);
    assert_eq!(RESERVED_OFFSET + RESERVED_SIZE, TOTAL_FLASH_SIZE);
}

#[test]
fn bank_offsets_are_sector_aligned() {
    assert!(is_sector_aligned(BANK_A_OFFSET));
    assert!(is_sector_aligned(BANK_B_OFFSET));
    assert!(is_sector_aligned(METADATA_SECTOR0_OFFSET));
    assert!(is_sector_aligned(METADATA_SECTOR1_OFFSET));
}

#[test]
fn page_alignment_rejects_partial_pages() {
    assert!(is_page_aligned(0));
    assert!(is_page_aligned(PAGE_SIZE));
    assert!(!is_page_aligned(PAGE_SIZE - 1));
    assert!(!is_page_aligned(PAGE_SIZE + 1));
}

#[test]
fn protected_region_covers_bootloader_and_metadata() {
    assert!(is_protected_region(0));
    assert!(is_protected_region(METADATA_SECTOR0_OFFSET));
    assert!(is_protected_region(METADATA_SECTOR1_OFFSET));
    assert!(!is_protected_region(BANK_A_OFFSET));
    assert!(!is_protected_region(BANK_B_OFFSET));
}

#[test]
fn fits_in_bank_rejects_overflowing_ranges() {
    assert!(fits_in_bank(0, BANK_SIZE));
    assert!(!fits_in_bank(0, BANK_SIZE + 1));
    assert!(!fits_in_bank(BANK_SIZE, 1));
}

#[test]
fn firmware_bank_offset_and_opposite_are_consistent() {
    assert_eq!(FirmwareBank::A.offset(), BANK_A_OFFSET);
    assert_eq!(FirmwareBank::B.offset(), BANK_B_OFFSET);
    assert_eq!(FirmwareBank::A.opposite().opposite(), FirmwareBank::A);
    assert_ne!(FirmwareBank::A.opposite(), FirmwareBank::A);
}
