// Copyright (c) 2026 ADNT Sarl <info@adnt.io>
// SPDX-License-Identifier: MIT

#![no_std]
#![no_main]

mod flash;

use core::cell::RefCell;

use critical_section::Mutex;
use defmt_rtt as _;
use embedded_hal::digital::OutputPin;
use embedded_hal::digital::StatefulOutputPin;
use ota_core::manager::FirmwareManager;
use panic_probe as _;
use rp2040_hal as hal;
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

use crate::flash::RomFlash;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

/// Static storage for UsbBusAllocator (required by usb-device for 'static lifetime).
static mut USB_BUS: Option<UsbBusAllocator<UsbBus>> = None;

fn usb_bus_ref() -> &'static UsbBusAllocator<UsbBus> {
    unsafe { (*core::ptr::addr_of!(USB_BUS)).as_ref().unwrap() }
}

/// Parses `update <size> <crc32-hex> [version]` into its three fields.
fn parse_update_args(rest: &str) -> Option<(u32, u32, Option<&str>)> {
    let mut parts = rest.split_whitespace();
    let size: u32 = parts.next()?.parse().ok()?;
    let crc = u32::from_str_radix(parts.next()?.trim_start_matches("0x"), 16).ok()?;
    let version = parts.next();
    Some((size, crc, version))
}

/// Process a received command line against the firmware manager and return
/// a response over `serial`. Returns true if the caller should reboot.
fn process_command<F: ota_core::flash::FlashDevice>(
    line: &str,
    serial: &mut SerialPort<UsbBus>,
    mgr: &mut FirmwareManager<'_, F>,
    receiving: &mut Option<(u32, u32)>,
) -> bool {
    let line = line.trim();

    if let Some((_, expected_crc)) = *receiving {
        if line == "." {
            *receiving = None;
            match mgr.finalize_update(expected_crc) {
                Ok(()) => {
                    let _ = serial.write(b"update complete, validated\r\n");
                }
                Err(e) => {
                    write_line(serial, "finalize failed", &e);
                }
            }
        } else {
            // Raw binary is not representable on a line-based console; the
            // PC-side tool streams the image as hex pairs per line.
            let mut byte_buf = heapless::Vec::<u8, 128>::new();
            let bytes = line.as_bytes();
            let mut i = 0;
            while i + 1 < bytes.len() {
                let hi = (bytes[i] as char).to_digit(16);
                let lo = (bytes[i + 1] as char).to_digit(16);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    let _ = byte_buf.push(((hi << 4) | lo) as u8);
                }
                i += 2;
            }
            if let Err(e) = mgr.write_chunk(&byte_buf) {
                write_line(serial, "write_chunk failed", &e);
                *receiving = None;
            }
        }
        return false;
    }

    match line.split_once(' ').map(|(c, r)| (c, r)).unwrap_or((line, "")) {
        ("help", _) | ("?", _) => {
            let _ = serial.write(b"Available commands:\r\n");
            let _ = serial.write(b"  help                          - Show this help\r\n");
            let _ = serial.write(b"  status                        - Show update/boot status\r\n");
            let _ = serial.write(b"  update <size> <crc32hex> [ver] - Begin receiving firmware\r\n");
            let _ = serial.write(b"  .                             - End firmware transfer and validate\r\n");
            let _ = serial.write(b"  activate                      - Swap active bank to completed update\r\n");
            let _ = serial.write(b"  rollback                      - Force rollback to the other bank\r\n");
            let _ = serial.write(b"  cancel                        - Abort an in-progress update\r\n");
            let _ = serial.write(b"  reboot                        - Reboot normally\r\n");
        }
        ("status", _) => {
            let status = mgr.status();
            let mut buf = [0u8; 192];
            let len = format_status(status, &mut buf);
            let _ = serial.write(&buf[..len]);
        }
        ("update", rest) => match parse_update_args(rest) {
            Some((size, crc, version)) => match mgr.start_update(size, version) {
                Ok(()) => {
                    *receiving = Some((size, crc));
                    let _ = serial.write(b"ready, send hex-encoded bytes per line, '.' to finish\r\n");
                }
                Err(e) => write_line(serial, "start_update failed", &e),
            },
            None => {
                let _ = serial.write(b"usage: update <size> <crc32hex> [version]\r\n");
            }
        },
        ("activate", _) => {
            let _ = serial.write(b"activating, rebooting into the new bank...\r\n");
            if let Err(e) = mgr.activate_and_reboot() {
                write_line(serial, "activate failed", &e);
            }
        }
        ("rollback", _) => {
            let _ = serial.write(b"rolling back, rebooting...\r\n");
            if let Err(e) = mgr.rollback_and_reboot() {
                write_line(serial, "rollback failed", &e);
            }
        }
        ("cancel", _) => match mgr.cancel_update() {
            Ok(()) => {
                *receiving = None;
                let _ = serial.write(b"update canceled\r\n");
            }
            Err(e) => write_line(serial, "cancel failed", &e),
        },
        ("reboot", _) => {
            let _ = serial.write(b"Rebooting...\r\n");
            cortex_m::asm::delay(1_000_000);
            cortex_m::peripheral::SCB::sys_reset();
        }
        ("", _) => {}
        _ => {
            let _ = serial.write(b"Unknown command. Type 'help' for available commands.\r\n");
        }
    }

    false
}

fn write_line<E: core::fmt::Display>(serial: &mut SerialPort<UsbBus>, prefix: &str, e: &E) {
    let mut buf = [0u8; 96];
    let mut writer = BufWriter { buf: &mut buf, pos: 0 };
    let _ = core::fmt::Write::write_fmt(&mut writer, format_args!("{prefix}: {e}\r\n"));
    let pos = writer.pos;
    let _ = serial.write(&buf[..pos]);
}

struct BufWriter<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> core::fmt::Write for BufWriter<'b> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

fn format_status(status: &ota_core::manager::UpdateStatus, buf: &mut [u8]) -> usize {
    use core::fmt::Write;

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = write!(
        writer,
        "State: {:?}\r\n  Target bank: {}\r\n  Progress: {}/{} ({}%)\r\n",
        status.state,
        status.target_bank.index(),
        status.bytes_received,
        status.total_bytes,
        status.progress_percent(),
    );
    if let Some(msg) = &status.error_message {
        let _ = write!(writer, "  Error: {msg}\r\n");
    }
    writer.pos
}

#[entry]
fn main() -> ! {
    defmt::println!("Firmware started!");

    // --- Inline peripheral init (need USB access) ---
    let mut pac = unsafe { hal::pac::Peripherals::steal() };

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        12_000_000u32,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let mut timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    let mut led_pin = pins.gpio25.into_push_pull_output();

    blink(&mut led_pin, &mut timer, 5, 100);

    let flash_cell = Mutex::new(RefCell::new(RomFlash::new(watchdog)));
    let mut mgr = FirmwareManager::new(&flash_cell).expect("metadata store failed to initialize");
    if mgr.did_rollback_occur() {
        defmt::println!("booted after a rollback");
        let _ = mgr.clear_rollback_flag();
    }
    mgr.confirm_boot().expect("confirm_boot");

    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        pac.USBCTRL_REGS,
        pac.USBCTRL_DPRAM,
        clocks.usb_clock,
        true,
        &mut pac.RESETS,
    ));
    unsafe {
        USB_BUS = Some(usb_bus);
    }

    let mut serial = SerialPort::new(usb_bus_ref());
    let mut usb_dev = UsbDeviceBuilder::new(usb_bus_ref(), UsbVidPid(0x2E8A, 0x000B))
        .strings(&[StringDescriptors::default()
            .manufacturer("ADNT")
            .product("OTA Firmware Sample")
            .serial_number("FW001")])
        .unwrap()
        .device_class(usbd_serial::USB_CLASS_CDC)
        .build();

    defmt::println!("USB CDC initialized, entering main loop");
    defmt::println!("Connect via serial terminal and type 'help' for commands");

    let mut cmd_buf = [0u8; 512];
    let mut cmd_pos = 0usize;
    let mut blink_counter = 0u32;
    let mut receiving: Option<(u32, u32)> = None;

    loop {
        usb_dev.poll(&mut [&mut serial]);

        let mut buf = [0u8; 64];
        if let Ok(count) = serial.read(&mut buf) {
            for &byte in &buf[..count] {
                let _ = serial.write(&[byte]);

                if byte == b'\r' || byte == b'\n' {
                    let _ = serial.write(b"\r\n");

                    if cmd_pos > 0 {
                        if let Ok(line) = core::str::from_utf8(&cmd_buf[..cmd_pos]) {
                            let _ = process_command(line, &mut serial, &mut mgr, &mut receiving);
                        }
                        cmd_pos = 0;
                        // Fixed sentinel so a host tool can frame one response per line.
                        let _ = serial.write(b"--END--\r\n");
                    }
                } else if byte == 0x7F || byte == 0x08 {
                    if cmd_pos > 0 {
                        cmd_pos -= 1;
                        let _ = serial.write(b"\x08 \x08");
                    }
                } else if cmd_pos < cmd_buf.len() {
                    cmd_buf[cmd_pos] = byte;
                    cmd_pos += 1;
                }
            }
        }

        blink_counter += 1;
        if blink_counter >= 500_000 {
            blink_counter = 0;
            if led_pin.is_set_high().unwrap_or(false) {
                led_pin.set_low().ok();
            } else {
                led_pin.set_high().ok();
            }
        }
    }
}

/// Toggle `pin` `times` times, `delay_ms` apart, as a visual boot heartbeat.
fn blink(
    pin: &mut impl OutputPin,
    timer: &mut hal::Timer,
    times: u32,
    delay_ms: u32,
) {
    use embedded_hal::delay::DelayNs;
    for _ in 0..times {
        pin.set_high().ok();
        timer.delay_ms(delay_ms);
        pin.set_low().ok();
        timer.delay_ms(delay_ms);
    }
}
