//! Typestate GPIO pins for the STM32L4 family.
//!
//! Each pin is a zero sized token owning one line of a port. Mode
//! transitions consume the token, so only correctly configured pins can be
//! handed to the drivers that need them.
use crate::{
    hal::gpio::{InputPin, OutputPin},
    stm32pac::{gpioa::RegisterBlock, GPIOA, GPIOB},
};
use core::marker::PhantomData;

/// Pin mode on reset; analog on most lines.
pub struct Unconfigured;
pub struct Input;
pub struct Output;
/// Alternate function `AF`, push pull.
pub struct Alternate<const AF: u8>;
/// Alternate function `AF`, open drain with pull-up.
pub struct AlternateOpenDrain<const AF: u8>;

pub struct Pin<const PORT: char, const N: u8, MODE> {
    _mode: PhantomData<MODE>,
}

const fn port_address(port: char) -> usize {
    match port {
        'A' => 0x4800_0000,
        _ => 0x4800_0400,
    }
}

const MODE_INPUT: u32 = 0b00;
const MODE_OUTPUT: u32 = 0b01;
const MODE_ALTERNATE: u32 = 0b10;
const PULL_NONE: u32 = 0b00;
const PULL_UP: u32 = 0b01;

impl<const PORT: char, const N: u8, MODE> Pin<PORT, N, MODE> {
    const fn new() -> Self { Self { _mode: PhantomData } }

    fn block() -> &'static RegisterBlock {
        // NOTE(Safety): Ports A and B share the GPIOA register layout, and
        // the token for this line is owned.
        unsafe { &*(port_address(PORT) as *const RegisterBlock) }
    }

    // NOTE(Safety): All unsafe blocks below refer to using the "bits()" method
    // to change this pin's fields only.
    fn configure(mode: u32, pull: u32, open_drain: bool) {
        let block = Self::block();
        let shift = 2 * N as u32;
        block.pupdr.modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | (pull << shift)) });
        block.otyper.modify(|r, w| unsafe {
            w.bits(if open_drain { r.bits() | (1 << N) } else { r.bits() & !(1 << N) })
        });
        block.moder.modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | (mode << shift)) });
    }

    fn select_alternate(function: u8) {
        let block = Self::block();
        let shift = 4 * (N as u32 % 8);
        let field = |bits: u32| (bits & !(0xF << shift)) | ((function as u32) << shift);
        if N < 8 {
            block.afrl.modify(|r, w| unsafe { w.bits(field(r.bits())) });
        } else {
            block.afrh.modify(|r, w| unsafe { w.bits(field(r.bits())) });
        }
    }

    pub fn into_push_pull_output(self) -> Pin<PORT, N, Output> {
        Self::configure(MODE_OUTPUT, PULL_NONE, false);
        Pin::new()
    }

    pub fn into_pull_up_input(self) -> Pin<PORT, N, Input> {
        Self::configure(MODE_INPUT, PULL_UP, false);
        Pin::new()
    }

    pub fn into_alternate<const AF: u8>(self) -> Pin<PORT, N, Alternate<AF>> {
        Self::select_alternate(AF);
        Self::configure(MODE_ALTERNATE, PULL_NONE, false);
        Pin::new()
    }

    pub fn into_alternate_open_drain<const AF: u8>(self) -> Pin<PORT, N, AlternateOpenDrain<AF>> {
        Self::select_alternate(AF);
        Self::configure(MODE_ALTERNATE, PULL_UP, true);
        Pin::new()
    }
}

impl<const PORT: char, const N: u8> OutputPin for Pin<PORT, N, Output> {
    fn set_low(&mut self) {
        // NOTE(Safety): BSRR writes are atomic and only touch this line.
        Self::block().bsrr.write(|w| unsafe { w.bits(1 << (N as u32 + 16)) });
    }

    fn set_high(&mut self) {
        // NOTE(Safety): BSRR writes are atomic and only touch this line.
        Self::block().bsrr.write(|w| unsafe { w.bits(1 << N) });
    }
}

impl<const PORT: char, const N: u8> InputPin for Pin<PORT, N, Input> {
    fn is_high(&self) -> bool { Self::block().idr.read().bits() & (1 << N) != 0 }
}

/// Lines of the NUCLEO-L432KC used by the bootloader.
pub struct Pins {
    pub pa2: Pin<'A', 2, Unconfigured>,
    pub pa12: Pin<'A', 12, Unconfigured>,
    pub pa15: Pin<'A', 15, Unconfigured>,
    pub pb0: Pin<'B', 0, Unconfigured>,
    pub pb1: Pin<'B', 1, Unconfigured>,
    pub pb3: Pin<'B', 3, Unconfigured>,
    pub pb6: Pin<'B', 6, Unconfigured>,
    pub pb7: Pin<'B', 7, Unconfigured>,
}

/// Consumes the port peripherals. Their clocks must already be enabled.
pub fn split(_gpioa: GPIOA, _gpiob: GPIOB) -> Pins {
    Pins {
        pa2: Pin::new(),
        pa12: Pin::new(),
        pa15: Pin::new(),
        pb0: Pin::new(),
        pb1: Pin::new(),
        pb3: Pin::new(),
        pb6: Pin::new(),
        pb7: Pin::new(),
    }
}
