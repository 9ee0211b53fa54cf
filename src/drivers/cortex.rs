//! Core peripherals shared by every Cortex-M4 port.
use crate::{
    drivers::tick::Tick,
    hal::{
        boot::Launch,
        time::{Hertz, Now},
    },
};
use cortex_m::peripheral::{DCB, DWT, NVIC, SCB, SYST};

/// Millisecond clock backed by the DWT cycle counter.
pub struct CycleClock {
    frequency: Hertz,
    _dwt: DWT,
}

impl CycleClock {
    pub fn new(mut dcb: DCB, mut dwt: DWT, frequency: Hertz) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();
        Self { frequency, _dwt: dwt }
    }
}

impl Now for CycleClock {
    type I = Tick;
    fn now(&self) -> Tick { Tick::new(DWT::cycle_count(), self.frequency) }
}

/// Hands the core over to an image, leaving it as close to reset state as
/// the bootloader can.
pub struct Launcher;

impl Launch for Launcher {
    fn launch(&mut self, stack_pointer: u32, entry: u32, vector_table: u32) -> ! {
        cortex_m::interrupt::disable();
        // NOTE(Safety): Interrupts are masked and nothing the bootloader
        // owns survives the jump, so aliasing the core peripherals is sound.
        unsafe {
            (*SYST::PTR).csr.write(0);
            let nvic = &*NVIC::PTR;
            for (enabled, pending) in nvic.icer.iter().zip(nvic.icpr.iter()) {
                enabled.write(u32::MAX);
                pending.write(u32::MAX);
            }
            (*SCB::PTR).vtor.write(vector_table);
            cortex_m::interrupt::enable();
            cortex_m::asm::bootstrap(stack_pointer as *const u32, entry as *const u32)
        }
    }
}

/// Points the core at the vector table the bootloader was linked with.
pub fn relocate_vector_table(scb: &mut SCB, vector_table: u32) {
    // NOTE(Safety): No interrupt is enabled yet.
    unsafe { scb.vtor.write(vector_table) };
}

pub fn reset() -> ! { SCB::sys_reset() }
