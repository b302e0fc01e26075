// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! OTA bootloader for RP2040: A/B bank selection with CRC validation and
//! automatic rollback. Firmware is received and staged over HTTP by the
//! running application (see `ota-firmware-sample`), not by this bootloader
//! — its only job is to pick a bank and jump.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;

use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use panic_probe as _;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut p = peripherals::init();
    blink(&mut p.led_pin, &mut p.timer, 3, 200);

    let rom_flash = flash::RomFlash::new(p.watchdog);
    boot::run_boot_sequence(rom_flash)
}

/// Toggle `pin` `times` times, `delay_ms` apart, as a visual boot heartbeat.
fn blink(pin: &mut peripherals::LedPin, timer: &mut rp2040_hal::Timer, times: u32, delay_ms: u32) {
    for _ in 0..times {
        pin.set_high().ok();
        timer.delay_ms(delay_ms);
        pin.set_low().ok();
        timer.delay_ms(delay_ms);
    }
}
