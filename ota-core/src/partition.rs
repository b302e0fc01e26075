// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Compile-time flash partitioning: bank addresses/sizes, metadata sector
//! offsets, and alignment predicates.
//!
//! All offsets are relative to [`FLASH_XIP_BASE`], the start of the XIP
//! address window. The layout is bit-exact for compatibility with an
//! existing bootloader ROM and must never be changed without also bumping
//! the metadata schema version.

/// Base address of the flash XIP window.
pub const FLASH_XIP_BASE: u32 = 0x1000_0000;

/// Flash erase granularity.
pub const SECTOR_SIZE: u32 = 4096;
/// Flash program granularity.
pub const PAGE_SIZE: u32 = 256;

/// Second-stage boot region (ROM-loaded, not touched by this core).
pub const SECOND_STAGE_BOOT_OFFSET: u32 = 0x0000;
pub const SECOND_STAGE_BOOT_SIZE: u32 = 256;

/// OTA bootloader region.
pub const BOOTLOADER_OFFSET: u32 = 0x0000_0100;
pub const BOOTLOADER_SIZE: u32 = METADATA_SECTOR0_OFFSET - BOOTLOADER_OFFSET;

/// The two metadata sectors (double-buffered).
pub const METADATA_SECTOR0_OFFSET: u32 = 0x0000_4000;
pub const METADATA_SECTOR1_OFFSET: u32 = 0x0000_5000;
pub const METADATA_SECTOR_SIZE: u32 = SECTOR_SIZE;

/// Application bank A.
pub const BANK_A_OFFSET: u32 = 0x0000_6000;
/// Both banks are identically sized.
pub const BANK_SIZE: u32 = 896 * 1024;
/// Application bank B.
pub const BANK_B_OFFSET: u32 = BANK_A_OFFSET + BANK_SIZE;

/// Unused tail of the flash.
pub const RESERVED_OFFSET: u32 = BANK_B_OFFSET + BANK_SIZE;
pub const RESERVED_SIZE: u32 = 232 * 1024;

/// Total addressable flash size.
pub const TOTAL_FLASH_SIZE: u32 = 2 * 1024 * 1024;

/// RP2040 SRAM window. A firmware image's vector table initial stack
/// pointer must resolve inside this range to be considered executable —
/// used by the boot selector's basic-validity gate, independent of CRC.
pub const SRAM_BASE: u32 = 0x2000_0000;
pub const SRAM_SIZE: u32 = 264 * 1024;

/// True if `addr` falls inside the SRAM window.
pub fn is_in_sram(addr: u32) -> bool {
    (SRAM_BASE..SRAM_BASE + SRAM_SIZE).contains(&addr)
}

const _: () = assert!(RESERVED_OFFSET + RESERVED_SIZE == TOTAL_FLASH_SIZE);
const _: () = assert!(BANK_A_OFFSET % SECTOR_SIZE == 0);
const _: () = assert!(BANK_B_OFFSET % SECTOR_SIZE == 0);
const _: () = assert!(BANK_SIZE % SECTOR_SIZE == 0);

/// One of the two application image banks, or an unresolved selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirmwareBank {
    A,
    B,
    Unknown,
}

impl FirmwareBank {
    /// The other bank. `Unknown` has no opposite and maps to itself.
    pub fn opposite(self) -> Self {
        match self {
            FirmwareBank::A => FirmwareBank::B,
            FirmwareBank::B => FirmwareBank::A,
            FirmwareBank::Unknown => FirmwareBank::Unknown,
        }
    }

    /// Flash-relative offset of this bank's first byte.
    ///
    /// Panics if called on `Unknown` — callers must resolve the bank first.
    pub fn offset(self) -> u32 {
        match self {
            FirmwareBank::A => BANK_A_OFFSET,
            FirmwareBank::B => BANK_B_OFFSET,
            FirmwareBank::Unknown => panic!("FirmwareBank::Unknown has no offset"),
        }
    }

    /// Absolute XIP address of this bank's first byte.
    pub fn address(self) -> u32 {
        FLASH_XIP_BASE + self.offset()
    }

    /// Bank size in bytes. Both banks are the same size.
    pub fn size(self) -> u32 {
        BANK_SIZE
    }

    /// Bank index as stored in [`crate::metadata::MetadataRecord::active_bank`].
    pub fn index(self) -> u8 {
        match self {
            FirmwareBank::A => 0,
            FirmwareBank::B => 1,
            FirmwareBank::Unknown => 0xFF,
        }
    }

    pub fn from_index(index: u8) -> Self {
        match index {
            0 => FirmwareBank::A,
            1 => FirmwareBank::B,
            _ => FirmwareBank::Unknown,
        }
    }
}

/// True if `offset` is a multiple of [`SECTOR_SIZE`].
pub fn is_sector_aligned(offset: u32) -> bool {
    offset % SECTOR_SIZE == 0
}

/// True if `offset` is a multiple of [`PAGE_SIZE`].
pub fn is_page_aligned(offset: u32) -> bool {
    offset % PAGE_SIZE == 0
}

/// True if `offset` lies below the application banks' start.
/// `erase_region` refuses to touch this range — it covers the bootloader
/// and both metadata sectors.
pub fn is_protected_region(offset: u32) -> bool {
    offset < BANK_A_OFFSET
}

/// True if `[offset, offset+len)` fits inside a single bank.
pub fn fits_in_bank(offset: u32, len: u32) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= BANK_SIZE)
}
