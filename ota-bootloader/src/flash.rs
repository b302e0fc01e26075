// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! `ota_core::flash::FlashDevice` backend for the on-chip RP2040 flash,
//! issuing erase/program through the boot ROM.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! `#[link_section = ".data"]` places the two RAM-resident methods below,
//! and the ROM function pointers are resolved once, at construction.

use ota_core::error::FlashError;
use ota_core::flash::FlashDevice;
use ota_core::partition::{FLASH_XIP_BASE, SECTOR_SIZE};
use rp2040_hal::fugit::ExtU32;
use rp2040_hal::Watchdog;

const REBOOT_WATCHDOG_MILLIS: u32 = 100;

type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// Look up a ROM function by its two-character tag. ROM table pointer at
/// 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// ROM-backed flash device. Holds pre-resolved ROM function pointers and
/// the watchdog handle used to pace long erase/program sequences.
pub struct RomFlash {
    connect_internal_flash: RomFnVoid,
    exit_xip: RomFnVoid,
    range_erase: RomFnErase,
    range_program: RomFnProgram,
    flush_cache: RomFnVoid,
    enter_cmd_xip: RomFnVoid,
    watchdog: Watchdog,
}

impl RomFlash {
    /// Resolves the ROM function table. Must be called with XIP still
    /// active, which holds at this point during boot.
    pub fn new(watchdog: Watchdog) -> Self {
        unsafe {
            RomFlash {
                connect_internal_flash: core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF")),
                exit_xip: core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX")),
                range_erase: core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE")),
                range_program: core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP")),
                flush_cache: core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC")),
                enter_cmd_xip: core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX")),
                watchdog,
            }
        }
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn raw_erase(&mut self, offset: u32, size: u32) {
        cortex_m::interrupt::disable();
        (self.connect_internal_flash)();
        (self.exit_xip)();
        (self.range_erase)(offset, size as usize, SECTOR_SIZE, 0x20);
        (self.flush_cache)();
        (self.enter_cmd_xip)();
        cortex_m::interrupt::enable();
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn raw_program(&mut self, offset: u32, data: &[u8]) {
        cortex_m::interrupt::disable();
        (self.connect_internal_flash)();
        (self.exit_xip)();
        (self.range_program)(offset, data.as_ptr(), data.len());
        (self.flush_cache)();
        (self.enter_cmd_xip)();
        cortex_m::interrupt::enable();
    }
}

impl FlashDevice for RomFlash {
    fn erase_sector(&mut self, offset: u32) -> Result<(), FlashError> {
        unsafe { self.raw_erase(offset, SECTOR_SIZE) };
        Ok(())
    }

    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        unsafe { self.raw_program(offset, data) };
        Ok(())
    }

    fn read_raw(&self, offset: u32, buf: &mut [u8]) {
        let abs = FLASH_XIP_BASE + offset;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((abs + i as u32) as *const u8).read_volatile() };
        }
    }

    fn feed_watchdog(&mut self) {
        self.watchdog.feed();
    }

    fn reboot(&mut self) -> ! {
        self.watchdog.start(REBOOT_WATCHDOG_MILLIS.millis());
        loop {
            cortex_m::asm::wfi();
        }
    }
}
