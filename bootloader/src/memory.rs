// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! `usbd-dfu` memory callbacks on top of the bootloader's DFU handlers.

use defmt::{info, warn};
use dfu_core::{BlockingFlash, DfuHandlers, FlashZone, RebootTarget};
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind, ReadNorFlash};
use usbd_dfu::{DFUManifestationError, DFUMemError, DFUMemIO};

use crate::consts::{
    APP_BASE, BLOCK_PROGRAM_TIME_MS, MEM_INFO_STRING, PAGE_ERASE_TIME_MS, PAGE_SIZE, TRANSFER_SIZE,
};

pub struct DfuMemory<H: DfuHandlers> {
    flash: BlockingFlash<H>,
    write_buffer: [u8; TRANSFER_SIZE],
    read_buffer: [u8; TRANSFER_SIZE],
}

impl<H: DfuHandlers> DfuMemory<H> {
    pub fn new(handlers: H, zone: FlashZone) -> Self {
        Self {
            flash: BlockingFlash::new(handlers, zone),
            write_buffer: [0; TRANSFER_SIZE],
            read_buffer: [0; TRANSFER_SIZE],
        }
    }

    /// Zone-relative offset of `address`, if `length` bytes from there fit.
    fn offset(&self, address: u32, length: usize) -> Result<u32, DFUMemError> {
        let zone = self.flash.zone();
        if zone.covers(address, length) {
            Ok(address - zone.start())
        } else {
            warn!("{=u32:#x}+{=usize} outside firmware zone", address, length);
            Err(DFUMemError::Address)
        }
    }
}

fn mem_error(error: NorFlashErrorKind) -> DFUMemError {
    match error {
        NorFlashErrorKind::NotAligned | NorFlashErrorKind::OutOfBounds => DFUMemError::Address,
        _ => DFUMemError::Unknown,
    }
}

impl<H: DfuHandlers> DFUMemIO for DfuMemory<H> {
    const INITIAL_ADDRESS_POINTER: u32 = APP_BASE;
    const MEM_INFO_STRING: &'static str = MEM_INFO_STRING;
    const BLOCK_PROGRAM_TIME_MS: u32 = BLOCK_PROGRAM_TIME_MS;
    const PAGE_ERASE_TIME_MS: u32 = PAGE_ERASE_TIME_MS;
    const FULL_ERASE_TIME_MS: u32 = PAGE_ERASE_TIME_MS * 508;
    const TRANSFER_SIZE: u16 = TRANSFER_SIZE as u16;

    fn store_write_buffer(&mut self, src: &[u8]) -> Result<(), ()> {
        let buffer = self.write_buffer.get_mut(..src.len()).ok_or(())?;
        buffer.copy_from_slice(src);
        Ok(())
    }

    fn read_block(&mut self, address: u32, length: usize) -> Result<&[u8], DFUMemError> {
        let zone = *self.flash.zone();
        if !zone.contains(address) {
            // Reading past the end tells the host the upload is complete.
            return if address == zone.end() {
                Ok(&[])
            } else {
                Err(DFUMemError::Address)
            };
        }
        let length = length
            .min(TRANSFER_SIZE)
            .min((zone.end() - address) as usize);
        let offset = address - zone.start();
        self.flash
            .read(offset, &mut self.read_buffer[..length])
            .map_err(mem_error)?;
        Ok(&self.read_buffer[..length])
    }

    fn program_block(&mut self, address: u32, length: usize) -> Result<(), DFUMemError> {
        if length > TRANSFER_SIZE {
            return Err(DFUMemError::Prog);
        }
        let offset = self.offset(address, length)?;
        self.flash
            .write(offset, &self.write_buffer[..length])
            .map_err(mem_error)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), DFUMemError> {
        if address % PAGE_SIZE != 0 {
            return Err(DFUMemError::Address);
        }
        let offset = self.offset(address, PAGE_SIZE as usize)?;
        self.flash
            .erase(offset, offset + PAGE_SIZE)
            .map_err(|_| DFUMemError::Erase)
    }

    fn erase_all_pages(&mut self) -> Result<(), DFUMemError> {
        info!("erasing firmware zone");
        let capacity = self.flash.capacity() as u32;
        self.flash.erase(0, capacity).map_err(|_| DFUMemError::Erase)
    }

    /// The image is in place; reset and let the boot decision start it.
    fn manifestation(&mut self) -> Result<(), DFUManifestationError> {
        self.flash.handlers_mut().reboot(RebootTarget::Application)
    }
}
