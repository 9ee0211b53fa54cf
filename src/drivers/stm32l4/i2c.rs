//! I2C1 as the chain bus, in either controller or target role.
use super::gpio::{AlternateOpenDrain, Pin};
use crate::{
    hal::bus::{Controller, Target, Transaction},
    stm32pac::I2C1,
};

pub type SclPin = Pin<'B', 6, AlternateOpenDrain<4>>;
pub type SdaPin = Pin<'B', 7, AlternateOpenDrain<4>>;

/// 100kHz from a 4MHz kernel clock.
const TIMING: u32 = (0x4 << 20) | (0x2 << 16) | (0xF << 8) | 0x13;

const CR1_PE: u32 = 1 << 0;

const CR2_RD_WRN: u32 = 1 << 10;
const CR2_START: u32 = 1 << 13;
const CR2_NBYTES_SHIFT: u32 = 16;
const CR2_RELOAD: u32 = 1 << 24;
const CR2_AUTOEND: u32 = 1 << 25;

const OAR1_EN: u32 = 1 << 15;

const ISR_TXE: u32 = 1 << 0;
const ISR_TXIS: u32 = 1 << 1;
const ISR_RXNE: u32 = 1 << 2;
const ISR_ADDR: u32 = 1 << 3;
const ISR_NACKF: u32 = 1 << 4;
const ISR_STOPF: u32 = 1 << 5;
const ISR_TCR: u32 = 1 << 7;
const ISR_BERR: u32 = 1 << 8;
const ISR_ARLO: u32 = 1 << 9;
const ISR_BUSY: u32 = 1 << 15;
const ISR_DIR: u32 = 1 << 16;

const MAX_CHUNK: usize = 255;

/// Filler clocked out for reads the target chose not to answer.
const UNANSWERED: u32 = 0xFF;

#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Address or data not acknowledged
    Nack,
    /// Misplaced start/stop or lost arbitration
    Bus,
    /// The controller ended the transaction early
    Truncated,
}

pub struct I2c {
    i2c: I2C1,
    _pins: (SclPin, SdaPin),
}

// NOTE(Safety): All unsafe blocks below refer to using the "bits()" method
// for easy writing.
impl I2c {
    pub fn new(i2c: I2C1, pins: (SclPin, SdaPin)) -> Self {
        i2c.cr1.write(|w| unsafe { w.bits(0) });
        i2c.timingr.write(|w| unsafe { w.bits(TIMING) });
        i2c.cr1.write(|w| unsafe { w.bits(CR1_PE) });
        Self { i2c, _pins: pins }
    }

    fn isr(&self) -> u32 { self.i2c.isr.read().bits() }

    /// Clears flags through ICR, where they share their ISR positions.
    fn clear(&self, flags: u32) { self.i2c.icr.write(|w| unsafe { w.bits(flags) }) }

    /// Blocks until any of `flags` is raised, or the transfer fails.
    fn wait_for(&self, flags: u32) -> Result<u32, Error> {
        loop {
            let isr = self.isr();
            if isr & ISR_NACKF != 0 {
                // A NACK under AUTOEND still produces a stop condition.
                while self.isr() & ISR_STOPF == 0 {}
                self.clear(ISR_NACKF | ISR_STOPF);
                return Err(Error::Nack);
            }
            if isr & (ISR_BERR | ISR_ARLO) != 0 {
                self.clear(ISR_BERR | ISR_ARLO);
                return Err(Error::Bus);
            }
            if isr & flags != 0 {
                return Ok(isr);
            }
        }
    }

    fn chunk_control(remaining: usize) -> u32 {
        let chunk = remaining.min(MAX_CHUNK) as u32;
        let end = if remaining > MAX_CHUNK { CR2_RELOAD } else { CR2_AUTOEND };
        (chunk << CR2_NBYTES_SHIFT) | end
    }

    fn start(&self, address: u8, length: usize, read: bool) {
        while self.isr() & ISR_BUSY != 0 {}
        let direction = if read { CR2_RD_WRN } else { 0 };
        let control = ((address as u32) << 1) | direction | Self::chunk_control(length) | CR2_START;
        self.i2c.cr2.write(|w| unsafe { w.bits(control) });
    }

    fn reload(&self, remaining: usize) {
        let keep = 0x3FF | CR2_RD_WRN;
        self.i2c.cr2.modify(|r, w| unsafe { w.bits((r.bits() & keep) | Self::chunk_control(remaining)) });
    }

    fn finish(&self) -> Result<(), Error> {
        self.wait_for(ISR_STOPF)?;
        self.clear(ISR_STOPF);
        Ok(())
    }
}

impl Controller for I2c {
    type Error = Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        self.start(address, bytes.len(), false);
        for (index, byte) in bytes.iter().enumerate() {
            if index > 0 && index % MAX_CHUNK == 0 {
                self.wait_for(ISR_TCR)?;
                self.reload(bytes.len() - index);
            }
            self.wait_for(ISR_TXIS)?;
            self.i2c.txdr.write(|w| unsafe { w.bits(*byte as u32) });
        }
        self.finish()
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Error> {
        let length = buffer.len();
        self.start(address, length, true);
        for (index, byte) in buffer.iter_mut().enumerate() {
            if index > 0 && index % MAX_CHUNK == 0 {
                self.wait_for(ISR_TCR)?;
                self.reload(length - index);
            }
            self.wait_for(ISR_RXNE)?;
            *byte = self.i2c.rxdr.read().bits() as u8;
        }
        self.finish()
    }
}

impl Target for I2c {
    type Error = Error;

    fn listen(&mut self, address: u8) {
        self.i2c.oar1.write(|w| unsafe { w.bits(0) });
        self.i2c.oar1.write(|w| unsafe { w.bits(OAR1_EN | ((address as u32) << 1)) });
    }

    fn receive(&mut self) -> Transaction {
        let isr = self.isr();
        if isr & ISR_RXNE != 0 {
            // Data beyond what the last command consumed.
            let _ = self.i2c.rxdr.read().bits();
        }
        if isr & ISR_TXIS != 0 && isr & ISR_ADDR == 0 {
            // Read phase left unanswered; release the stretched clock.
            self.i2c.txdr.write(|w| unsafe { w.bits(UNANSWERED) });
        }
        if isr & (ISR_STOPF | ISR_NACKF) != 0 {
            self.clear(ISR_STOPF | ISR_NACKF);
        }
        if isr & ISR_ADDR == 0 {
            return Transaction::None;
        }

        if isr & ISR_DIR != 0 {
            // Flushes any byte left over from a previous read phase.
            self.i2c.isr.write(|w| unsafe { w.bits(ISR_TXE) });
            self.clear(ISR_ADDR);
            Transaction::ReadAddressed
        } else {
            self.clear(ISR_ADDR);
            Transaction::WriteAddressed
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        for byte in buffer.iter_mut() {
            loop {
                let isr = self.isr();
                if isr & ISR_RXNE != 0 {
                    *byte = self.i2c.rxdr.read().bits() as u8;
                    break;
                }
                if isr & (ISR_STOPF | ISR_ADDR) != 0 {
                    return Err(Error::Truncated);
                }
            }
        }
        Ok(())
    }

    fn respond(&mut self, byte: u8) -> Result<(), Error> {
        loop {
            let isr = self.isr();
            if isr & ISR_TXIS != 0 {
                self.i2c.txdr.write(|w| unsafe { w.bits(byte as u32) });
                return Ok(());
            }
            if isr & ISR_STOPF != 0 {
                return Err(Error::Truncated);
            }
        }
    }
}
