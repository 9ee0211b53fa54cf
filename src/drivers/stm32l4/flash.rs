//! Internal Flash controller for the STM32L4 family
use crate::{error::Error as ChainloaderError, hal::flash::Peripheral, stm32pac::FLASH};
use core::ptr;

/// From section 3.3.5 of RM0394
const UNLOCK_KEYS: [u32; 2] = [0x4567_0123, 0xCDEF_89AB];

const FLASH_START: u32 = 0x0800_0000;
const FLASH_END: u32 = 0x0804_0000;
const PAGE_SIZE: usize = 2048;
const DOUBLE_WORD: usize = 8;

const CR_PG: u32 = 1 << 0;
const CR_PER: u32 = 1 << 1;
const CR_PNB_SHIFT: u32 = 3;
const CR_PNB_MASK: u32 = 0xFF << CR_PNB_SHIFT;
const CR_STRT: u32 = 1 << 16;
const CR_LOCK: u32 = 1 << 31;

const SR_EOP: u32 = 1 << 0;
const SR_OPERR: u32 = 1 << 1;
const SR_PROGERR: u32 = 1 << 3;
const SR_WRPERR: u32 = 1 << 4;
const SR_PGAERR: u32 = 1 << 5;
const SR_SIZERR: u32 = 1 << 6;
const SR_PGSERR: u32 = 1 << 7;
const SR_MISERR: u32 = 1 << 8;
const SR_FASTERR: u32 = 1 << 9;
const SR_RDERR: u32 = 1 << 14;
const SR_OPTVERR: u32 = 1 << 15;
const SR_BSY: u32 = 1 << 16;
const SR_ERRORS: u32 = SR_OPERR
    | SR_PROGERR
    | SR_WRPERR
    | SR_PGAERR
    | SR_SIZERR
    | SR_PGSERR
    | SR_MISERR
    | SR_FASTERR
    | SR_RDERR
    | SR_OPTVERR;

pub struct McuFlash {
    flash: FLASH,
}

#[derive(Copy, Clone, Debug)]
pub enum Error {
    MemoryNotReachable,
    MisalignedAccess,
    WriteProtected,
    NotErased,
    Locked,
    OperationFailed,
}

impl From<Error> for ChainloaderError {
    fn from(error: Error) -> Self {
        ChainloaderError::DriverError(match error {
            Error::MemoryNotReachable => "MCU flash memory not reachable",
            Error::MisalignedAccess => "MCU flash memory access misaligned",
            Error::WriteProtected => "MCU flash memory write protected",
            Error::NotErased => "MCU flash memory programmed over unerased data",
            Error::Locked => "MCU flash memory failed to unlock",
            Error::OperationFailed => "MCU flash memory operation failed",
        })
    }
}

impl Error {
    fn from_status(status: u32) -> Self {
        if status & SR_WRPERR != 0 {
            Error::WriteProtected
        } else if status & SR_PROGERR != 0 {
            Error::NotErased
        } else if status & (SR_PGAERR | SR_SIZERR) != 0 {
            Error::MisalignedAccess
        } else {
            Error::OperationFailed
        }
    }
}

impl McuFlash {
    pub fn new(flash: FLASH) -> Self { Self { flash } }

    fn is_locked(&self) -> bool { self.flash.cr.read().bits() & CR_LOCK != 0 }

    // NOTE(Safety): All unsafe blocks below refer to using the "bits()" method
    // for easy writing, on a peripheral this driver owns.
    fn clear_status(&mut self) {
        let latched = self.flash.sr.read().bits() & (SR_ERRORS | SR_EOP);
        if latched != 0 {
            self.flash.sr.write(|w| unsafe { w.bits(latched) });
        }
    }
}

impl Peripheral for McuFlash {
    type Error = Error;

    fn range(&self) -> (u32, u32) { (FLASH_START, FLASH_END) }
    fn erase_granularity(&self) -> usize { PAGE_SIZE }
    fn write_granularity(&self) -> usize { DOUBLE_WORD }

    fn unlock(&mut self) -> Result<(), Error> {
        if self.is_locked() {
            for key in UNLOCK_KEYS.iter() {
                self.flash.keyr.write(|w| unsafe { w.bits(*key) });
            }
        }
        if self.is_locked() {
            Err(Error::Locked)
        } else {
            self.clear_status();
            Ok(())
        }
    }

    fn lock(&mut self) -> Result<(), Error> {
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() | CR_LOCK) });
        Ok(())
    }

    fn status(&mut self) -> nb::Result<(), Error> {
        let status = self.flash.sr.read().bits();
        if status & SR_BSY != 0 {
            return Err(nb::Error::WouldBlock);
        }
        let errors = status & SR_ERRORS;
        self.clear_status();
        if errors != 0 {
            Err(nb::Error::Other(Error::from_status(errors)))
        } else {
            Ok(())
        }
    }

    fn start_erase(&mut self, address: u32) {
        let page = (address - FLASH_START) / PAGE_SIZE as u32;
        self.flash.cr.modify(|r, w| unsafe {
            w.bits((r.bits() & !(CR_PG | CR_PNB_MASK)) | CR_PER | (page << CR_PNB_SHIFT))
        });
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() | CR_STRT) });
    }

    fn start_program(&mut self, address: u32, unit: &[u8]) {
        self.flash.cr.modify(|r, w| unsafe { w.bits((r.bits() & !CR_PER) | CR_PG) });
        for (offset, word) in unit.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            // NOTE(Safety): The address is a validated, double word aligned
            // location in main flash. Programming starts on the second word.
            unsafe { ptr::write_volatile((address + 4 * offset as u32) as *mut u32, word) };
        }
    }

    fn end_operation(&mut self) {
        self.flash.cr.modify(|r, w| unsafe { w.bits(r.bits() & !(CR_PG | CR_PER | CR_PNB_MASK)) });
    }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Error> {
        let end = address as u64 + bytes.len() as u64;
        if address < FLASH_START || end > FLASH_END as u64 {
            return Err(Error::MemoryNotReachable);
        }
        for (offset, byte) in bytes.iter_mut().enumerate() {
            // NOTE(Safety): Bounds checked above against main flash.
            *byte = unsafe { ptr::read_volatile((address as usize + offset) as *const u8) };
        }
        Ok(())
    }
}
