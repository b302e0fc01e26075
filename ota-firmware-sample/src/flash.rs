// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! `ota_core::flash::FlashDevice` backend built directly on
//! `rp2040_hal::rom_data`'s boot ROM bindings.

use ota_core::error::FlashError;
use ota_core::flash::FlashDevice;
use ota_core::partition::{FLASH_XIP_BASE, SECTOR_SIZE};
use rp2040_hal::fugit::ExtU32;
use rp2040_hal::Watchdog;

/// Short enough that an operator waiting on `activate`/`rollback` sees the
/// reset promptly, long enough to let the in-flight UART/USB write finish.
const REBOOT_WATCHDOG_MILLIS: u32 = 100;

pub struct RomFlash {
    watchdog: Watchdog,
}

impl RomFlash {
    pub fn new(watchdog: Watchdog) -> Self {
        RomFlash { watchdog }
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn raw_erase(&mut self, offset: u32, size: u32) {
        cortex_m::interrupt::disable();
        rp2040_hal::rom_data::connect_internal_flash();
        rp2040_hal::rom_data::flash_exit_xip();
        rp2040_hal::rom_data::flash_range_erase(offset, size as usize, SECTOR_SIZE, 0x20);
        rp2040_hal::rom_data::flash_flush_cache();
        rp2040_hal::rom_data::flash_enter_cmd_xip();
        cortex_m::interrupt::enable();
    }

    #[link_section = ".data"]
    #[inline(never)]
    unsafe fn raw_program(&mut self, offset: u32, data: &[u8]) {
        cortex_m::interrupt::disable();
        rp2040_hal::rom_data::connect_internal_flash();
        rp2040_hal::rom_data::flash_exit_xip();
        rp2040_hal::rom_data::flash_range_program(offset, data.as_ptr(), data.len());
        rp2040_hal::rom_data::flash_flush_cache();
        rp2040_hal::rom_data::flash_enter_cmd_xip();
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
