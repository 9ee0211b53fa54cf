use crate::{
    hal::time::{Hertz, MegaHertz},
    stm32pac::RCC,
};

const GPIOA_EN: u32 = 1 << 0;
const GPIOB_EN: u32 = 1 << 1;
const USART2_EN: u32 = 1 << 17;
const I2C1_EN: u32 = 1 << 21;

/// Frozen clock frequencies
///
/// The existence of this value indicates that the clock configuration can no longer be changed
#[derive(Clone, Copy, Debug)]
pub struct Clocks {
    pclk1: Hertz,
    sysclk: Hertz,
}

impl Clocks {
    pub fn pclk1(&self) -> Hertz { self.pclk1 }

    pub fn sysclk(&self) -> Hertz { self.sysclk }

    /// Keeps the 4MHz MSI reset clock on undivided buses, and gates on the
    /// peripherals the bootloader drives. USART2 and I2C1 kernel clocks stay
    /// on their PCLK1 reset selection.
    pub fn hardcoded(rcc: RCC) -> Self {
        // NOTE(Safety): All unsafe blocks in this function refer to using the "bits()"
        // method for easy writing.
        rcc.ahb2enr.modify(|r, w| unsafe { w.bits(r.bits() | GPIOA_EN | GPIOB_EN) });
        rcc.apb1enr1.modify(|r, w| unsafe { w.bits(r.bits() | USART2_EN | I2C1_EN) });

        // Reads back to let the enables settle before the first register access.
        let _ = rcc.apb1enr1.read().bits();

        Self { pclk1: MegaHertz(4).into(), sysclk: MegaHertz(4).into() }
    }
}
