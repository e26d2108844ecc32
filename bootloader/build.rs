// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! This build script renders `memory.x` from the shared memory map and puts
//! it, together with an empty `device.x`, in a directory where the linker
//! can always find it at build time.
//!
//! The boot marker gets its own one-word region pinned at
//! `BOOT_MARKER_ADDR`, holding the NOLOAD `.boot_magic` section. It is
//! neither `.data` nor `.bss`, so the reset handler never initialises it
//! and the marker written before a reset is still there afterwards.

use dfu_consts::stm32f1::{APP_BASE, BOOTLOADER_RAM_SIZE, FLASH_BASE, RAM_BASE};
use dfu_consts::BOOT_MARKER_ADDR;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    assert_eq!(
        RAM_BASE + BOOTLOADER_RAM_SIZE,
        BOOT_MARKER_ADDR,
        "the stack must end right below the boot marker"
    );

    let memory_x_content = format!(
        r##"
        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            /* The bootloader owns the flash below the application */
            FLASH : ORIGIN = {FLASH_BASE:#X}, LENGTH = {flash_len:#X}
            RAM : ORIGIN = {RAM_BASE:#X}, LENGTH = {BOOTLOADER_RAM_SIZE:#X}
            BOOT_MAGIC (rw) : ORIGIN = {BOOT_MARKER_ADDR:#X}, LENGTH = 4
        }}

        SECTIONS {{
            .boot_magic (NOLOAD) : {{
                KEEP(*(.boot_magic));
                . = ALIGN(4);
            }} > BOOT_MAGIC
        }} INSERT AFTER .uninit;
        "##,
        flash_len = APP_BASE - FLASH_BASE,
    );
    // Put `memory.x` in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();
    // The interrupt table is built in `main.rs`; no handler aliases needed.
    File::create(out.join("device.x")).unwrap();
    println!("cargo:rustc-link-search={}", out.display());

    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
