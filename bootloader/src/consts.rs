// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

pub use dfu_consts::stm32f1::{APP_BASE, PAGE_SIZE};
pub use dfu_consts::{USB_PID, USB_VID};

/// DfuSe memory layout descriptor advertised to the host: everything from
/// the application base to the end of flash, 2 KiB pages that are
/// readable, erasable and writable.
/// The page count is (0x0810_0000 - 0x0800_2000) / 2048.
pub const MEM_INFO_STRING: &str = "@Flash/0x08002000/508*002Kg";

/// Worst case for one 128 byte transfer: 64 half-words at 70 us each.
pub const BLOCK_PROGRAM_TIME_MS: u32 = 5;

/// Datasheet maximum for a 2 KiB page erase.
pub const PAGE_ERASE_TIME_MS: u32 = 40;

/// DFU transfer size, also the size of the staging buffers.
pub const TRANSFER_SIZE: usize = 128;

pub const MANUFACTURER: &str = "Foundation Devices";
pub const PRODUCT: &str = "DFU bootloader";
