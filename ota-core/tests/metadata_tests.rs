// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Integration tests for the metadata store: cold start, atomic-write
//! fault tolerance, and the rollback bookkeeping contract, driven only
//! through the public API.

use ota_core::error::MetadataError;
use ota_core::flash::Flash;
use ota_core::mock_flash::{Fault, MockFlash};
use ota_core::metadata::{MetadataStore, MAX_BOOT_ATTEMPTS};
use ota_core::partition::{FirmwareBank, METADATA_SECTOR0_OFFSET, METADATA_SECTOR1_OFFSET};

// Scenario 1 (spec end-to-end #1): cold start with both sectors all-0xFF.
#[test]
fn cold_start_bootstraps_factory_default_pair() {
    let store = MetadataStore::init(MockFlash::new()).unwrap();
    let record = store.current();
    assert_eq!(record.sequence, 2);
    assert_eq!(record.active_bank(), FirmwareBank::A);
    assert!(record.bank_a.is_valid());
    assert!(!record.bank_b.is_valid());
}

// Scenario 2 (spec end-to-end #2): a torn write to the lower-sequence
// sector must not disturb the other, still-valid sector.
#[test]
fn atomic_write_survives_fault_between_erase_and_program() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    let seq_before = store.current().sequence;

    store.flash_mut().inject_fault(Fault::FailProgram {
        calls_remaining: 0,
        err: ota_core::error::FlashError::Timeout,
    });

    let result = store.set_active_bank(FirmwareBank::B);
    assert!(result.is_err());
    // The cache must be untouched: a failed write never updates it.
    assert_eq!(store.current().sequence, seq_before);
    assert_eq!(store.current().active_bank(), FirmwareBank::A);
}

#[test]
fn verify_failed_on_readback_mismatch_preserves_cache() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    let before = *store.current();

    store.flash_mut().inject_fault(Fault::TearAfterProgram {
        calls_remaining: 0,
        offset: METADATA_SECTOR0_OFFSET,
        len: 4,
    });

    let err = store.set_active_bank(FirmwareBank::B).unwrap_err();
    assert_eq!(err, MetadataError::VerifyFailed);
    assert_eq!(*store.current(), before);
    let _ = METADATA_SECTOR1_OFFSET;
}

#[test]
fn sequence_is_strictly_monotone_across_writes() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    let mut last = store.current().sequence;
    for _ in 0..5 {
        store.increment_boot_count(FirmwareBank::A).unwrap();
        assert!(store.current().sequence > last);
        last = store.current().sequence;
    }
}

#[test]
fn boot_count_never_exceeds_max_attempts() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    for _ in 0..(MAX_BOOT_ATTEMPTS + 5) {
        store.increment_boot_count(FirmwareBank::A).unwrap();
    }
    assert_eq!(store.current().bank_a.boot_count, MAX_BOOT_ATTEMPTS);
}

// Scenario 4 (spec end-to-end #4): rollback after three failed boots.
#[test]
fn trigger_rollback_flips_active_bank_and_sets_flag() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    store
        .flash_mut()
        .erase_region(FirmwareBank::B.offset(), FirmwareBank::B.size())
        .unwrap();
    store.mark_bank_valid(FirmwareBank::B, 0x1234_5678, 16, "v2").unwrap();
    store.set_active_bank(FirmwareBank::B).unwrap();
    for _ in 0..MAX_BOOT_ATTEMPTS {
        store.increment_boot_count(FirmwareBank::B).unwrap();
    }

    store.trigger_rollback().unwrap();

    assert_eq!(store.current().active_bank(), FirmwareBank::A);
    assert!(!store.current().bank_b.is_valid());
    assert_eq!(store.current().bank_b.boot_count, MAX_BOOT_ATTEMPTS);
    assert!(store.did_rollback_occur());

    store.clear_rollback_flag().unwrap();
    assert!(!store.did_rollback_occur());
}

// Scenario 6 (spec end-to-end #6): rollback unavailable leaves everything
// untouched.
#[test]
fn trigger_rollback_fails_without_mutation_when_opposite_invalid() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    let before = *store.current();
    let err = store.trigger_rollback().unwrap_err();
    assert_eq!(err, MetadataError::RollbackUnavailable);
    assert_eq!(*store.current(), before);
}

#[test]
fn mark_bank_valid_is_idempotent_except_sequence() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    store.mark_bank_valid(FirmwareBank::A, 0xAAAA_AAAA, 1000, "v5").unwrap();
    let seq1 = store.current().sequence;
    store.mark_bank_valid(FirmwareBank::A, 0xAAAA_AAAA, 1000, "v5").unwrap();
    let seq2 = store.current().sequence;
    assert!(seq2 > seq1);
    assert_eq!(store.current().bank_a.version_str(), "v5");
    assert_eq!(store.current().bank_a.crc32, 0xAAAA_AAAA);
}

#[test]
fn set_update_in_progress_then_clear_preserves_bank_metadata() {
    let mut store = MetadataStore::init(MockFlash::new()).unwrap();
    let bank_a_before = store.current().bank_a;
    store.set_update_in_progress(FirmwareBank::B).unwrap();
    store.clear_update_in_progress().unwrap();
    assert_eq!(store.current().bank_a, bank_a_before);
    assert_eq!(store.current().update_in_progress, ota_core::metadata::UPDATE_IDLE);
}
