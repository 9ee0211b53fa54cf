//! USART2 console, wired to the NUCLEO-L432KC virtual COM port.
use super::{
    gpio::{Alternate, Pin},
    rcc::Clocks,
};
use crate::{
    hal::{serial, time::Bps},
    stm32pac::USART2,
};

const CR1_UE: u32 = 1 << 0;
const CR1_RE: u32 = 1 << 2;
const CR1_TE: u32 = 1 << 3;

const ISR_FE: u32 = 1 << 1;
const ISR_NF: u32 = 1 << 2;
const ISR_ORE: u32 = 1 << 3;
const ISR_RXNE: u32 = 1 << 5;
const ISR_TXE: u32 = 1 << 7;

pub type TxPin = Pin<'A', 2, Alternate<7>>;
pub type RxPin = Pin<'A', 15, Alternate<3>>;

/// Serial error
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Framing error
    Framing,
    /// Noise error
    Noise,
    /// RX buffer overrun
    Overrun,
}

pub struct Serial {
    usart: USART2,
    _pins: (TxPin, RxPin),
}

impl Serial {
    pub fn new(usart: USART2, pins: (TxPin, RxPin), baud_rate: Bps, clocks: &Clocks) -> Self {
        // NOTE(safety) uses .bits for ease of writing a whole word.
        usart.cr1.write(|w| unsafe { w.bits(0) });
        usart.brr.write(|w| unsafe { w.bits(clocks.pclk1().0 / baud_rate.0) });
        usart.cr1.write(|w| unsafe { w.bits(CR1_UE | CR1_RE | CR1_TE) });
        Self { usart, _pins: pins }
    }
}

impl serial::Read<u8> for Serial {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let isr = self.usart.isr.read().bits();
        let error = if isr & ISR_ORE != 0 {
            Some((Error::Overrun, ISR_ORE))
        } else if isr & ISR_FE != 0 {
            Some((Error::Framing, ISR_FE))
        } else if isr & ISR_NF != 0 {
            Some((Error::Noise, ISR_NF))
        } else {
            None
        };

        if let Some((error, flag)) = error {
            // NOTE(Safety) ICR clear bits share their ISR positions.
            self.usart.icr.write(|w| unsafe { w.bits(flag) });
            return Err(nb::Error::Other(error));
        }

        if isr & ISR_RXNE != 0 {
            Ok(self.usart.rdr.read().bits() as u8)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl serial::Write<u8> for Serial {
    type Error = Error;

    fn write(&mut self, byte: u8) -> nb::Result<(), Error> {
        if self.usart.isr.read().bits() & ISR_TXE != 0 {
            // NOTE(Safety) Single byte write on an empty transmit register.
            self.usart.tdr.write(|w| unsafe { w.bits(byte as u32) });
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}
