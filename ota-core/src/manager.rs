// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The firmware manager: the update state machine that orchestrates
//! staging, validation, activation, boot-confirmation, and rollback atop
//! the flash and metadata layers.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::String;

use crate::error::ManagerError;
use crate::flash::{Flash, FlashDevice, SharedFlash, CRC32};
use crate::metadata::{MetadataStore, VERSION_STRING_LENGTH};
use crate::partition::{FirmwareBank, PAGE_SIZE};

/// In-RAM, non-persisted snapshot of the current update's progress.
/// Small and read-mostly; the REST layer is expected to read it under a
/// short critical section or via an atomic snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateStatus {
    pub state: ManagerState,
    pub bytes_received: u32,
    pub total_bytes: u32,
    pub target_bank: FirmwareBank,
    pub error_message: Option<String<64>>,
}

impl UpdateStatus {
    fn idle() -> Self {
        UpdateStatus {
            state: ManagerState::Idle,
            bytes_received: 0,
            total_bytes: 0,
            target_bank: FirmwareBank::Unknown,
            error_message: None,
        }
    }

    /// Integer progress in `0..=100`. `0` while `total_bytes` is unknown.
    pub fn progress_percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        ((self.bytes_received as u64 * 100) / self.total_bytes as u64) as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Preparing,
    Erasing,
    Receiving,
    Validating,
    Complete,
    Error,
}

/// Orchestrates a single update at a time atop a [`Flash`] device and a
/// [`MetadataStore`]. Not `Sync`; callers must serialize access to one
/// update task, matching the single-update-at-a-time contract.
pub struct FirmwareManager<'a, F> {
    flash: SharedFlash<'a, F>,
    metadata: MetadataStore<SharedFlash<'a, F>>,
    status: UpdateStatus,
    expected_version: String<VERSION_STRING_LENGTH>,
    crc_digest: Option<crc::Digest<'static, u32>>,
    page_buf: [u8; PAGE_SIZE as usize],
    page_buf_len: usize,
    write_cursor: u32,
}

impl<'a, F: FlashDevice> FirmwareManager<'a, F> {
    /// Builds both the manager's own flash handle and its `MetadataStore`
    /// from the same `critical_section::Mutex<RefCell<F>>`, so metadata
    /// writes and bank writes never race for the physical device.
    pub fn new(flash_cell: &'a Mutex<RefCell<F>>) -> Result<Self, ManagerError> {
        let flash = SharedFlash::new(flash_cell);
        let metadata = MetadataStore::init(flash)?;
        Ok(FirmwareManager {
            flash,
            metadata,
            status: UpdateStatus::idle(),
            expected_version: String::new(),
            crc_digest: None,
            page_buf: [0xFFu8; PAGE_SIZE as usize],
            page_buf_len: 0,
            write_cursor: 0,
        })
    }

    pub fn status(&self) -> &UpdateStatus {
        &self.status
    }

    pub fn metadata(&self) -> &MetadataStore<SharedFlash<'a, F>> {
        &self.metadata
    }

    fn fail(&mut self, msg: &str) {
        self.status.state = ManagerState::Error;
        self.status.error_message = String::try_from(msg).ok();
    }

    /// Rejects if not Idle or if `expected_size` exceeds the bank size.
    /// Erases the opposite bank, records `update_in_progress`, and starts
    /// receiving. `expected_version`, if given, is recorded on the target
    /// bank once the update reaches `finalize_update`.
    pub fn start_update(
        &mut self,
        expected_size: u32,
        expected_version: Option<&str>,
    ) -> Result<(), ManagerError> {
        if self.status.state != ManagerState::Idle {
            return Err(ManagerError::WrongState);
        }
        let target = self.metadata.current().active_bank().opposite();
        if expected_size > target.size() {
            return Err(ManagerError::ExpectedSizeTooLarge);
        }

        self.status.state = ManagerState::Preparing;
        self.status.target_bank = target;
        self.status.total_bytes = expected_size;
        self.status.bytes_received = 0;
        self.status.error_message = None;
        self.expected_version = String::new();
        if let Some(v) = expected_version {
            let n = v.len().min(VERSION_STRING_LENGTH);
            let _ = self.expected_version.push_str(&v[..n]);
        }

        self.status.state = ManagerState::Erasing;
        if let Err(e) = self.flash.erase_region(target.offset(), target.size()) {
            self.fail("erase failed");
            return Err(e.into());
        }

        self.metadata.set_update_in_progress(target)?;

        self.crc_digest = Some(CRC32.digest());
        self.page_buf = [0xFFu8; PAGE_SIZE as usize];
        self.page_buf_len = 0;
        self.write_cursor = 0;
        self.status.state = ManagerState::Receiving;
        Ok(())
    }

    /// Valid only in `Receiving`. Buffers bytes until a full page
    /// accumulates, then commits that page to the target bank.
    pub fn write_chunk(&mut self, mut data: &[u8]) -> Result<(), ManagerError> {
        if self.status.state != ManagerState::Receiving {
            return Err(ManagerError::WrongState);
        }
        if self.status.bytes_received + data.len() as u32 > self.status.total_bytes {
            self.fail("write would exceed expected size");
            return Err(ManagerError::WriteWouldOverflow);
        }

        let digest = self.crc_digest.as_mut().expect("Receiving implies an open CRC context");
        digest.update(data);
        self.status.bytes_received += data.len() as u32;

        while !data.is_empty() {
            let space = self.page_buf.len() - self.page_buf_len;
            let n = space.min(data.len());
            self.page_buf[self.page_buf_len..self.page_buf_len + n].copy_from_slice(&data[..n]);
            self.page_buf_len += n;
            data = &data[n..];

            if self.page_buf_len == self.page_buf.len() {
                let offset = self.status.target_bank.offset() + self.write_cursor;
                if let Err(e) = self.flash.write(offset, &self.page_buf) {
                    self.fail("page write failed");
                    return Err(e.into());
                }
                self.write_cursor += PAGE_SIZE;
                self.page_buf = [0xFFu8; PAGE_SIZE as usize];
                self.page_buf_len = 0;
            }
        }

        Ok(())
    }

    /// Flushes any residual partial page (0xFF-padded), then validates the
    /// full image from flash against `expected_crc32`.
    pub fn finalize_update(&mut self, expected_crc32: u32) -> Result<(), ManagerError> {
        if self.status.state != ManagerState::Receiving {
            return Err(ManagerError::WrongState);
        }
        if self.status.bytes_received != self.status.total_bytes {
            self.fail("received size does not match expected size");
            return Err(ManagerError::SizeMismatch);
        }

        if self.page_buf_len > 0 {
            let offset = self.status.target_bank.offset() + self.write_cursor;
            if let Err(e) = self.flash.write(offset, &self.page_buf) {
                self.fail("trailing page write failed");
                return Err(e.into());
            }
            self.write_cursor += PAGE_SIZE;
            self.page_buf_len = 0;
        }

        self.status.state = ManagerState::Validating;

        // Re-read from flash rather than trust the streaming digest, to
        // catch silent write corruption the streaming CRC never saw.
        let actual = self
            .flash
            .calculate_crc32(self.status.target_bank.offset(), self.status.total_bytes)?;
        if actual != expected_crc32 {
            self.fail("image CRC32 does not match expected value");
            // update_in_progress stays set so the operator can retry or cancel.
            return Err(ManagerError::CrcMismatch);
        }

        let target = self.status.target_bank;
        let size = self.status.total_bytes;
        self.metadata.mark_bank_valid(target, actual, size, &self.expected_version)?;
        self.metadata.clear_update_in_progress()?;

        self.status.state = ManagerState::Complete;
        Ok(())
    }

    /// Valid only in `Complete`. Commits the metadata swap.
    fn activate_internal(&mut self) -> Result<(), ManagerError> {
        if self.status.state != ManagerState::Complete {
            return Err(ManagerError::WrongState);
        }
        self.metadata.set_active_bank(self.status.target_bank)?;
        Ok(())
    }

    /// Valid from any state. Fails without mutating metadata if the
    /// opposite bank is not valid.
    fn rollback_internal(&mut self) -> Result<(), ManagerError> {
        self.metadata.trigger_rollback()?;
        Ok(())
    }

    /// Valid only in `Complete`. Commits the metadata swap, then arms the
    /// watchdog and spins until it fires. Does not return on success; on
    /// failure the metadata is untouched and the device keeps running.
    pub fn activate_and_reboot(&mut self) -> Result<(), ManagerError> {
        self.activate_internal()?;
        self.flash.reboot()
    }

    /// Valid from any state. Fails without mutating metadata if the
    /// opposite bank is not valid; otherwise arms the watchdog and spins
    /// until it fires. Does not return on success.
    pub fn rollback_and_reboot(&mut self) -> Result<(), ManagerError> {
        self.rollback_internal()?;
        self.flash.reboot()
    }

    /// Clears `update_in_progress` and returns to `Idle`. Does not erase
    /// the target bank — it is already effectively invalidated by the
    /// cleared flag and will be re-erased by the next `start_update`.
    pub fn cancel_update(&mut self) -> Result<(), ManagerError> {
        if self.status.state != ManagerState::Idle {
            self.metadata.clear_update_in_progress()?;
        }
        self.status = UpdateStatus::idle();
        self.crc_digest = None;
        self.page_buf_len = 0;
        Ok(())
    }

    /// Resets the active bank's boot counter. Call after the application
    /// completes its own post-boot health checks.
    pub fn confirm_boot(&mut self) -> Result<(), ManagerError> {
        let active = self.metadata.current().active_bank();
        self.metadata.reset_boot_count(active)?;
        Ok(())
    }

    pub fn did_rollback_occur(&self) -> bool {
        self.metadata.did_rollback_occur()
    }

    pub fn clear_rollback_flag(&mut self) -> Result<(), ManagerError> {
        self.metadata.clear_rollback_flag()?;
        Ok(())
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::mock_flash::MockFlash;
    use crate::partition::BANK_SIZE;

    macro_rules! new_manager {
        ($name:ident) => {
            let cell = Mutex::new(RefCell::new(MockFlash::new()));
            let mut $name = FirmwareManager::new(&cell).unwrap();
        };
    }

    #[test]
    fn start_update_rejects_oversized_image() {
        new_manager!(m);
        assert_eq!(
            m.start_update(BANK_SIZE + 1, None),
            Err(ManagerError::ExpectedSizeTooLarge)
        );
    }

    #[test]
    fn happy_path_update_reaches_complete_and_activates() {
        new_manager!(m);
        let size = PAGE_SIZE * 4;
        m.start_update(size, None).unwrap();
        assert_eq!(m.status().state, ManagerState::Receiving);

        let payload = std::vec![0xABu8; size as usize];
        m.write_chunk(&payload[..300]).unwrap();
        m.write_chunk(&payload[300..]).unwrap();

        let expected_crc = CRC32.checksum(&payload);
        m.finalize_update(expected_crc).unwrap();
        assert_eq!(m.status().state, ManagerState::Complete);

        m.activate_internal().unwrap();
        assert_eq!(m.metadata().current().active_bank(), FirmwareBank::B);
    }

    #[test]
    fn write_chunk_rejects_overflow() {
        new_manager!(m);
        m.start_update(10, None).unwrap();
        assert_eq!(
            m.write_chunk(&[0u8; 11]),
            Err(ManagerError::WriteWouldOverflow)
        );
        assert_eq!(m.status().state, ManagerState::Error);
    }

    #[test]
    fn finalize_with_wrong_crc_leaves_update_in_progress() {
        new_manager!(m);
        let size = PAGE_SIZE;
        m.start_update(size, None).unwrap();
        m.write_chunk(&std::vec![0x11u8; size as usize]).unwrap();

        assert_eq!(m.finalize_update(0xCAFE_BABE), Err(ManagerError::CrcMismatch));
        assert_eq!(m.status().state, ManagerState::Error);
        assert_eq!(m.metadata().current().update_in_progress, crate::metadata::UPDATE_IN_PROGRESS);
        assert!(!m.metadata().current().bank_b.is_valid());
    }

    #[test]
    fn cancel_update_clears_flag_and_returns_to_idle() {
        new_manager!(m);
        m.start_update(PAGE_SIZE, None).unwrap();
        m.cancel_update().unwrap();
        assert_eq!(m.status().state, ManagerState::Idle);
        assert_eq!(m.metadata().current().update_in_progress, crate::metadata::UPDATE_IDLE);
    }

    #[test]
    fn rollback_unavailable_when_opposite_invalid() {
        new_manager!(m);
        assert_eq!(
            m.rollback_internal(),
            Err(ManagerError::Metadata(crate::error::MetadataError::RollbackUnavailable))
        );
    }

    #[test]
    #[should_panic(expected = "reboot requested")]
    fn activate_and_reboot_reboots_on_success() {
        new_manager!(m);
        let size = PAGE_SIZE * 4;
        m.start_update(size, None).unwrap();
        let payload = std::vec![0xABu8; size as usize];
        m.write_chunk(&payload).unwrap();
        let expected_crc = CRC32.checksum(&payload);
        m.finalize_update(expected_crc).unwrap();

        let _ = m.activate_and_reboot();
    }

    #[test]
    fn rollback_and_reboot_fails_without_rebooting_when_opposite_invalid() {
        new_manager!(m);
        assert_eq!(
            m.rollback_and_reboot(),
            Err(ManagerError::Metadata(crate::error::MetadataError::RollbackUnavailable))
        );
    }

    #[test]
    fn confirm_boot_resets_active_bank_counter() {
        new_manager!(m);
        m.metadata.increment_boot_count(FirmwareBank::A).unwrap();
        m.confirm_boot().unwrap();
        assert_eq!(m.metadata().current().bank_a.boot_count, 0);
    }

    #[test]
    fn odd_sized_image_pads_trailing_page_and_crc_covers_exact_size() {
        new_manager!(m);
        let size = PAGE_SIZE + 10;
        m.start_update(size, None).unwrap();
        let payload = std::vec![0x77u8; size as usize];
        m.write_chunk(&payload).unwrap();
        let expected_crc = CRC32.checksum(&payload);
        m.finalize_update(expected_crc).unwrap();
        assert_eq!(m.status().state, ManagerState::Complete);
    }
}
