// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash operations: erase/program/verify at sector and page granularity,
//! with strict alignment, bounds, and interrupt-discipline checks.
//!
//! The hardware-specific part — masking interrupts, pacing the watchdog,
//! and the ROM/driver calls that actually move bits — lives behind
//! [`FlashDevice`], implemented once per target (RP2040 ROM routines, an
//! in-RAM mock for host tests, ...). Everything alignment/bounds/CRC
//! related is implemented once, here, atop that trait.

use core::cell::RefCell;

use crc::{Crc, CRC_32_ISO_HDLC};
use critical_section::Mutex;

use crate::error::FlashError;
use crate::partition::{
    is_page_aligned, is_protected_region, is_sector_aligned, FirmwareBank, PAGE_SIZE, SECTOR_SIZE,
    TOTAL_FLASH_SIZE,
};

/// CRC-32/ISO-HDLC: poly 0xEDB88320 (reflected 0x04C11DB7), init 0xFFFFFFFF,
/// final XOR 0xFFFFFFFF — the standard ZIP/PNG/Ethernet CRC used for both
/// metadata integrity and image integrity.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// How many sectors to erase between watchdog feeds.
const WATCHDOG_SECTORS_PER_FEED: u32 = 10;
/// How many pages to program between watchdog feeds.
const WATCHDOG_PAGES_PER_FEED: u32 = 16;
/// CRC streaming chunk size through the XIP window.
const CRC_CHUNK_SIZE: usize = 4096;
/// How many CRC chunks to process between watchdog feeds.
const WATCHDOG_CRC_CHUNKS_PER_FEED: usize = 16;

/// The hardware-specific primitives a target must provide. Implementors
/// are responsible for interrupt masking and XIP teardown/setup around
/// `erase_sector`/`program_page` — everything above this trait assumes
/// each call is already safe to issue back-to-back.
pub trait FlashDevice {
    /// Erase one `SECTOR_SIZE`-byte sector at a sector-aligned offset.
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError>;

    /// Program one `PAGE_SIZE`-byte page at a page-aligned offset. The
    /// sector containing it must already be erased.
    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Copy `buf.len()` bytes from the XIP window starting at `offset`.
    /// No alignment requirement; infallible (flash is memory-mapped).
    fn read_raw(&self, offset: u32, buf: &mut [u8]);

    /// Pace a long-running operation. No-op on targets without a watchdog
    /// (host mock, tests).
    fn feed_watchdog(&mut self) {}

    /// Arm a short watchdog timeout and spin until it fires, resetting the
    /// chip. Never returns.
    fn reboot(&mut self) -> !;
}

/// A shared handle onto one physical flash device. The metadata store and
/// the firmware manager each hold their own `Copy` of this handle, backed
/// by the same `critical_section::Mutex<RefCell<F>>`, so both can issue
/// flash operations without requiring `F` itself to be `Send`/`Sync` or
/// cloneable.
pub struct SharedFlash<'a, F>(&'a Mutex<RefCell<F>>);

impl<'a, F> SharedFlash<'a, F> {
    pub fn new(inner: &'a Mutex<RefCell<F>>) -> Self {
        SharedFlash(inner)
    }
}

impl<'a, F> Clone for SharedFlash<'a, F> {
    fn clone(&self) -> Self {
        SharedFlash(self.0)
    }
}

impl<'a, F> Copy for SharedFlash<'a, F> {}

impl<'a, F: FlashDevice> FlashDevice for SharedFlash<'a, F> {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        critical_section::with(|cs| self.0.borrow(cs).borrow_mut().erase_sector(offset))
    }

    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        critical_section::with(|cs| self.0.borrow(cs).borrow_mut().program_page(offset, data))
    }

    fn read_raw(&self, offset: u32, buf: &mut [u8]) {
        critical_section::with(|cs| self.0.borrow(cs).borrow().read_raw(offset, buf))
    }

    fn feed_watchdog(&mut self) {
        critical_section::with(|cs| self.0.borrow(cs).borrow_mut().feed_watchdog())
    }

    fn reboot(&mut self) -> ! {
        critical_section::with(|cs| self.0.borrow(cs).borrow_mut().reboot())
    }
}

/// High-level flash operations, implemented once atop [`FlashDevice`].
///
/// Blanket-implemented for every `FlashDevice` — callers only ever need to
/// name `Flash`, never `FlashDevice` directly, unless they're writing a new
/// hardware backend.
pub trait Flash: FlashDevice {
    /// Erase `[offset, offset+size)`. Both must be sector-aligned; the
    /// range must lie entirely within the application banks (the
    /// bootloader and metadata sectors are protected from this path).
    fn erase_region(&mut self, offset: u32, size: u32) -> Result<(), FlashError> {
        if !is_sector_aligned(offset) || !is_sector_aligned(size) {
            return Err(FlashError::NotAligned);
        }
        let end = offset.checked_add(size).ok_or(FlashError::OutOfRange)?;
        if end > TOTAL_FLASH_SIZE {
            return Err(FlashError::OutOfRange);
        }
        if is_protected_region(offset) {
            return Err(FlashError::OutOfRange);
        }

        let num_sectors = size / SECTOR_SIZE;
        for i in 0..num_sectors {
            self.erase_sector(offset + i * SECTOR_SIZE)?;
            if (i + 1) % WATCHDOG_SECTORS_PER_FEED == 0 {
                self.feed_watchdog();
            }
        }
        self.feed_watchdog();
        Ok(())
    }

    /// Program `data` (length a multiple of `PAGE_SIZE`) starting at a
    /// page-aligned `offset`. The caller must pad the final chunk of an
    /// odd-sized image to a page boundary with `0xFF`.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if !is_page_aligned(offset) || data.len() as u32 % PAGE_SIZE != 0 {
            return Err(FlashError::NotAligned);
        }
        let end = offset
            .checked_add(data.len() as u32)
            .ok_or(FlashError::OutOfRange)?;
        if end > TOTAL_FLASH_SIZE {
            return Err(FlashError::OutOfRange);
        }

        let num_pages = data.len() as u32 / PAGE_SIZE;
        for i in 0..num_pages {
            let start = (i * PAGE_SIZE) as usize;
            let page = &data[start..start + PAGE_SIZE as usize];
            self.program_page(offset + i * PAGE_SIZE, page)?;
            if (i + 1) % WATCHDOG_PAGES_PER_FEED == 0 {
                self.feed_watchdog();
            }
        }
        self.feed_watchdog();
        Ok(())
    }

    /// `write` followed by a memcmp against the same buffer.
    fn write_and_verify(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.write(offset, data)?;
        self.verify(offset, data)
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let end = offset
            .checked_add(buf.len() as u32)
            .ok_or(FlashError::OutOfRange)?;
        if end > TOTAL_FLASH_SIZE {
            return Err(FlashError::OutOfRange);
        }
        self.read_raw(offset, buf);
        Ok(())
    }

    /// Memcmp flash contents at `offset` against `expected`.
    fn verify(&self, offset: u32, expected: &[u8]) -> Result<(), FlashError> {
        let mut chunk = [0u8; 256];
        let mut pos = 0usize;
        while pos < expected.len() {
            let n = (expected.len() - pos).min(chunk.len());
            self.read(offset + pos as u32, &mut chunk[..n])?;
            if chunk[..n] != expected[pos..pos + n] {
                return Err(FlashError::VerifyFailed);
            }
            pos += n;
        }
        Ok(())
    }

    /// Stream `len` bytes from `offset` through a CRC32 context, pacing
    /// the watchdog every few chunks.
    fn calculate_crc32(&mut self, offset: u32, len: u32) -> Result<u32, FlashError> {
        let end = offset.checked_add(len).ok_or(FlashError::OutOfRange)?;
        if end > TOTAL_FLASH_SIZE {
            return Err(FlashError::OutOfRange);
        }

        let mut digest = CRC32.digest();
        let mut remaining = len;
        let mut pos = offset;
        let mut chunk = [0u8; CRC_CHUNK_SIZE];
        let mut chunks_done = 0usize;

        while remaining > 0 {
            let n = remaining.min(CRC_CHUNK_SIZE as u32) as usize;
            self.read_raw(pos, &mut chunk[..n]);
            digest.update(&chunk[..n]);
            pos += n as u32;
            remaining -= n as u32;
            chunks_done += 1;
            if chunks_done % WATCHDOG_CRC_CHUNKS_PER_FEED == 0 {
                self.feed_watchdog();
            }
        }
        self.feed_watchdog();
        Ok(digest.finalize())
    }

    /// Bounds-check `expected_size` against the bank size, then compute
    /// CRC32 over exactly that many bytes from the bank's base.
    fn validate_firmware(
        &mut self,
        bank: FirmwareBank,
        expected_crc: u32,
        expected_size: u32,
    ) -> Result<(), FlashError> {
        if expected_size > bank.size() {
            return Err(FlashError::InvalidParam);
        }
        let actual = self.calculate_crc32(bank.offset(), expected_size)?;
        if actual != expected_crc {
            return Err(FlashError::CrcMismatch);
        }
        Ok(())
    }
}

impl<T: FlashDevice + ?Sized> Flash for T {}
