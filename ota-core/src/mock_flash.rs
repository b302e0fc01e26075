// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-RAM flash device for host-side tests, plus fault injection for
//! exercising power-loss and corruption handling in the metadata store
//! and firmware manager without hardware.

use crate::error::FlashError;
use crate::flash::FlashDevice;
use crate::partition::{PAGE_SIZE, SECTOR_SIZE, TOTAL_FLASH_SIZE};

/// A fault to inject on a future flash operation, consumed on first trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail the Nth remaining `erase_sector` call with the given error.
    FailErase { calls_remaining: u32, err: FlashError },
    /// Fail the Nth remaining `program_page` call with the given error.
    FailProgram { calls_remaining: u32, err: FlashError },
    /// Corrupt `len` bytes at `offset` after the Nth remaining `program_page`
    /// call completes, simulating a torn write from a power loss mid-page.
    TearAfterProgram { calls_remaining: u32, offset: u32, len: u32 },
}

/// An in-RAM stand-in for physical NOR flash. Erased bytes read as `0xFF`;
/// `program_page` can only clear bits, matching real NOR semantics (it
/// ANDs the incoming byte into the existing cell rather than overwriting).
pub struct MockFlash {
    cells: std::vec::Vec<u8>,
    fault: Option<Fault>,
    erase_count: u32,
    program_count: u32,
}

impl MockFlash {
    pub fn new() -> Self {
        MockFlash {
            cells: std::vec![0xFFu8; TOTAL_FLASH_SIZE as usize],
            fault: None,
            erase_count: 0,
            program_count: 0,
        }
    }

    /// Arm a one-shot fault. Replaces any previously armed fault.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }

    pub fn program_count(&self) -> u32 {
        self.program_count
    }

    /// Direct, unchecked read for test assertions.
    pub fn peek(&self, offset: u32, len: usize) -> &[u8] {
        &self.cells[offset as usize..offset as usize + len]
    }
}

impl Default for MockFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashDevice for MockFlash {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        self.erase_count += 1;

        if let Some(Fault::FailErase { calls_remaining, err }) = self.fault {
            if calls_remaining == 0 {
                self.fault = None;
                return Err(err);
            }
            self.fault = Some(Fault::FailErase { calls_remaining: calls_remaining - 1, err });
        }

        let start = offset as usize;
        let end = start + SECTOR_SIZE as usize;
        self.cells[start..end].fill(0xFF);
        Ok(())
    }

    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.program_count += 1;

        if let Some(Fault::FailProgram { calls_remaining, err }) = self.fault {
            if calls_remaining == 0 {
                self.fault = None;
                return Err(err);
            }
            self.fault = Some(Fault::FailProgram { calls_remaining: calls_remaining - 1, err });
        }

        let start = offset as usize;
        for (i, &byte) in data.iter().enumerate() {
            self.cells[start + i] &= byte;
        }

        if let Some(Fault::TearAfterProgram { calls_remaining, offset: tear_off, len }) = self.fault {
            if calls_remaining == 0 {
                self.fault = None;
                let s = tear_off as usize;
                let e = s + len as usize;
                self.cells[s..e].fill(0x00);
            } else {
                self.fault = Some(Fault::TearAfterProgram {
                    calls_remaining: calls_remaining - 1,
                    offset: tear_off,
                    len,
                });
            }
        }

        let _ = PAGE_SIZE;
        Ok(())
    }

    fn read_raw(&self, offset: u32, buf: &mut [u8]) {
        let start = offset as usize;
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
    }

    /// No hardware watchdog on the host; stands in for one so reboot-path
    /// callers can be exercised with `#[should_panic]`.
    fn reboot(&mut self) -> ! {
        panic!("reboot requested (no hardware watchdog available in tests)");
    }
}
