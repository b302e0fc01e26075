// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Integration tests for the firmware manager state machine, covering the
//! happy-path update/activate/confirm cycle and the CRC-mismatch-at-
//! finalize recovery path, driven only through the public API.

use core::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use critical_section::Mutex;

use ota_core::error::ManagerError;
use ota_core::flash::CRC32;
use ota_core::manager::{FirmwareManager, ManagerState};
use ota_core::mock_flash::MockFlash;
use ota_core::partition::{FirmwareBank, PAGE_SIZE};

fn new_manager(cell: &Mutex<RefCell<MockFlash>>) -> FirmwareManager<'_, MockFlash> {
    FirmwareManager::new(cell).unwrap()
}

// Scenario 3 (spec end-to-end #3): happy-path update, streamed in
// small HTTP-sized chunks, then activated and boot-confirmed.
#[test]
fn happy_path_update_streamed_in_small_chunks_then_activated() {
    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);

    let size = PAGE_SIZE * 8 + 37;
    m.start_update(size, Some("v2")).unwrap();
    assert_eq!(m.status().target_bank, FirmwareBank::B);
    assert_eq!(m.status().state, ManagerState::Receiving);

    let payload: std::vec::Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    for chunk in payload.chunks(1500) {
        m.write_chunk(chunk).unwrap();
    }
    assert_eq!(m.status().progress_percent(), 100);

    let expected_crc = CRC32.checksum(&payload);
    m.finalize_update(expected_crc).unwrap();
    assert_eq!(m.status().state, ManagerState::Complete);

    // No real watchdog on the host: activate_and_reboot's success path
    // ends in a reboot that the mock stands in for with a panic.
    let result = catch_unwind(AssertUnwindSafe(|| m.activate_and_reboot()));
    assert!(result.is_err(), "activate_and_reboot should reboot (panic) on success");
    assert_eq!(m.metadata().current().active_bank(), FirmwareBank::B);

    // Simulate the post-reboot boot-count bump, then the application's
    // health check confirming the new image is good.
    m.confirm_boot().unwrap();
    assert_eq!(m.metadata().current().bank_b.boot_count, 0);
}

// Scenario 5 (spec end-to-end #5): CRC mismatch at finalize must not mark
// the target bank valid, and must leave `update_in_progress` set until an
// explicit cancel.
#[test]
fn crc_mismatch_at_finalize_leaves_bank_invalid_until_cancelled() {
    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);

    let size = PAGE_SIZE * 4;
    m.start_update(size, None).unwrap();
    let payload = std::vec![0xCCu8; size as usize];
    m.write_chunk(&payload).unwrap();

    let actual_crc = CRC32.checksum(&payload);
    let wrong_crc = actual_crc ^ 0xFFFF_FFFF;
    assert_eq!(m.finalize_update(wrong_crc), Err(ManagerError::CrcMismatch));
    assert_eq!(m.status().state, ManagerState::Error);
    assert!(!m.metadata().current().bank_b.is_valid());
    assert_eq!(
        m.metadata().current().update_in_progress,
        ota_core::metadata::UPDATE_IN_PROGRESS
    );

    m.cancel_update().unwrap();
    assert_eq!(m.status().state, ManagerState::Idle);
    assert_eq!(
        m.metadata().current().update_in_progress,
        ota_core::metadata::UPDATE_IDLE
    );

    // A retry after cancellation re-erases the same target and can
    // succeed normally.
    m.start_update(size, None).unwrap();
    m.write_chunk(&payload).unwrap();
    m.finalize_update(actual_crc).unwrap();
    assert_eq!(m.status().state, ManagerState::Complete);
}

#[test]
fn start_update_at_exactly_bank_size_succeeds_one_byte_over_fails() {
    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);
    m.start_update(ota_core::partition::BANK_SIZE, None).unwrap();
    assert_eq!(m.status().state, ManagerState::Receiving);

    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);
    assert_eq!(
        m.start_update(ota_core::partition::BANK_SIZE + 1, None),
        Err(ManagerError::ExpectedSizeTooLarge)
    );
}

#[test]
fn second_start_update_while_receiving_is_rejected() {
    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);
    m.start_update(PAGE_SIZE, None).unwrap();
    assert_eq!(m.start_update(PAGE_SIZE, None), Err(ManagerError::WrongState));
}

#[test]
fn rollback_through_manager_delegates_to_metadata_store() {
    let cell = Mutex::new(RefCell::new(MockFlash::new()));
    let mut m = new_manager(&cell);
    let size = PAGE_SIZE;
    m.start_update(size, Some("v2")).unwrap();
    let payload = std::vec![0x01u8; size as usize];
    m.write_chunk(&payload).unwrap();
    m.finalize_update(CRC32.checksum(&payload)).unwrap();
    let result = catch_unwind(AssertUnwindSafe(|| m.activate_and_reboot()));
    assert!(result.is_err(), "activate_and_reboot should reboot (panic) on success");

    let result = catch_unwind(AssertUnwindSafe(|| m.rollback_and_reboot()));
    assert!(result.is_err(), "rollback_and_reboot should reboot (panic) on success");
    assert_eq!(m.metadata().current().active_bank(), FirmwareBank::A);
    assert!(m.did_rollback_occur());
    m.clear_rollback_flag().unwrap();
    assert!(!m.did_rollback_occur());
}
