// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod consts;
mod memory;

use defmt_rtt as _;
// global logger
use panic_probe as _;

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use cortex_m::peripheral::NVIC;
use cortex_m_rt::entry;
use critical_section::Mutex;
use defmt::{info, unwrap};
use dfu_core::marker::LinkedCell;
use dfu_core::platform::cortexm::{CortexM, Irq};
use dfu_core::platform::stm32f1::{IRQ_COUNT, USB_IRQ};
use dfu_core::reset::Stm32f1ResetCause;
use dfu_core::vectors::InterruptTable;
use dfu_core::zone::STM32F1_FIRMWARE;
use dfu_core::{
    hand_off_to_application, should_enter_bootloader, BootMarker, Dfu, DfuEngine, FlashZone,
    Volatile,
};
use dfu_core::flash::stm32f1::Stm32f1Flash;
use static_cell::StaticCell;
use stm32f1xx_hal::pac;
use stm32f1xx_hal::prelude::*;
use stm32f1xx_hal::usb::{Peripheral, UsbBus, UsbBusType};
use usb_device::bus::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_dfu::DFUClass;

use consts::{APP_BASE, MANUFACTURER, PRODUCT, USB_PID, USB_VID};
use memory::DfuMemory;

type Platform = CortexM<Stm32f1ResetCause<Volatile>>;
type Handlers = Dfu<Stm32f1Flash<Volatile>, Platform, LinkedCell>;

struct UsbState {
    device: UsbDevice<'static, UsbBusType>,
    dfu: DFUClass<UsbBusType, DfuMemory<Handlers>>,
}

static USB_BUS: StaticCell<UsbBusAllocator<UsbBusType>> = StaticCell::new();
static SERIAL: StaticCell<[u8; 8]> = StaticCell::new();
static USB: Mutex<RefCell<Option<UsbState>>> = Mutex::new(RefCell::new(None));
static USB_PENDING: AtomicBool = AtomicBool::new(false);

#[used]
#[no_mangle]
#[link_section = ".vector_table.interrupts"]
pub static __INTERRUPTS: InterruptTable<IRQ_COUNT> =
    InterruptTable::new().with(USB_IRQ as usize, usb_interrupt);

fn platform() -> Platform {
    // SAFETY: the bootloader runs on the STM32F103 these register maps describe.
    let mmio = unsafe { Volatile::new() };
    CortexM::new(Stm32f1ResetCause::new(mmio), Irq(USB_IRQ))
}

/// Device serial as eight hex digits of the folded 96-bit unique ID.
fn serial_number() -> &'static str {
    const UID: u32 = 0x1FFF_F7E8;
    let uid = unsafe {
        let words = UID as *const u32;
        words.read_volatile() ^ words.add(1).read_volatile() ^ words.add(2).read_volatile()
    };
    let serial = SERIAL.init([0; 8]);
    for (i, digit) in serial.iter_mut().enumerate() {
        let nibble = (uid >> (28 - 4 * i)) as u8 & 0xF;
        *digit = match nibble {
            0..=9 => b'0' + nibble,
            _ => b'A' + nibble - 10,
        };
    }
    core::str::from_utf8(serial).unwrap_or("00000000")
}

/// The `usbd-dfu` class, polled from the main loop.
struct UsbEngine {
    bus: &'static UsbBusAllocator<UsbBusType>,
}

impl DfuEngine<Handlers> for UsbEngine {
    fn register_handlers(
        &mut self,
        handlers: Handlers,
        zones: &'static [FlashZone],
        start_configuration: u8,
        interface_count: u8,
    ) {
        info!(
            "DFU interface in configuration {}, {} alternate setting(s)",
            start_configuration, interface_count
        );
        let zone = unwrap!(zones.first().copied());
        let dfu = DFUClass::new(self.bus, DfuMemory::new(handlers, zone));
        let device = UsbDeviceBuilder::new(self.bus, UsbVidPid(USB_VID, USB_PID))
            .manufacturer(MANUFACTURER)
            .product(PRODUCT)
            .serial_number(serial_number())
            .device_release(0x0200)
            .self_powered(false)
            .max_power(100)
            .max_packet_size_0(64)
            .build();
        critical_section::with(|cs| {
            USB.borrow(cs).replace(Some(UsbState { device, dfu }));
        });
    }
}

#[entry]
fn main() -> ! {
    let mut platform = platform();
    // SAFETY: the only live handle on the marker cell.
    let mut marker = BootMarker::new(unsafe { LinkedCell::new() });

    if !should_enter_bootloader(&mut platform, &mut marker, APP_BASE) {
        hand_off_to_application(&mut platform, APP_BASE);
    }
    info!("staying in the bootloader");

    // SAFETY: nothing else has claimed the peripherals yet.
    let dp = unsafe { pac::Peripherals::steal() };
    let mut flash = dp.FLASH.constrain();
    let rcc = dp.RCC.constrain();
    let clocks = rcc
        .cfgr
        .use_hse(8.MHz())
        .sysclk(48.MHz())
        .pclk1(24.MHz())
        .freeze(&mut flash.acr);
    if !clocks.usbclk_valid() {
        defmt::panic!("USB clock is not 48 MHz");
    }

    // Drive D+ low for a moment so the host sees a fresh attach.
    let mut gpioa = dp.GPIOA.split();
    let mut usb_dp = gpioa.pa12.into_push_pull_output(&mut gpioa.crh);
    usb_dp.set_low();
    cortex_m::asm::delay(clocks.sysclk().raw() / 100);

    let bus = USB_BUS.init(UsbBus::new(Peripheral {
        usb: dp.USB,
        pin_dm: gpioa.pa11,
        pin_dp: usb_dp.into_floating_input(&mut gpioa.crh),
    }));

    // SAFETY: the flash controller is driven only through the DFU handlers
    // from here on; the HAL part above only touched ACR.
    let handlers = Dfu::new(
        Stm32f1Flash::new(unsafe { Volatile::new() }),
        platform,
        marker,
    );
    UsbEngine { bus }.register_handlers(handlers, &STM32F1_FIRMWARE, 0, 1);

    // Flash busy waits inside the DFU callbacks can run for seconds, so the
    // device is polled in thread mode with interrupts enabled.
    let Some(mut usb) = critical_section::with(|cs| USB.borrow(cs).take()) else {
        defmt::panic!("DFU handlers not registered");
    };

    unsafe {
        NVIC::unmask(Irq(USB_IRQ));
        cortex_m::interrupt::enable();
    }

    loop {
        // WFI still wakes on a pending line while PRIMASK is set.
        critical_section::with(|_| {
            if !USB_PENDING.load(Ordering::Relaxed) {
                cortex_m::asm::wfi();
            }
        });
        USB_PENDING.store(false, Ordering::Relaxed);
        usb.device.poll(&mut [&mut usb.dfu]);
        unsafe { NVIC::unmask(Irq(USB_IRQ)) };
    }
}

/// `USB_LP_CAN_RX0`: hand the work to the main loop and stay masked until it
/// has polled the device.
unsafe extern "C" fn usb_interrupt() {
    NVIC::mask(Irq(USB_IRQ));
    USB_PENDING.store(true, Ordering::Relaxed);
}
