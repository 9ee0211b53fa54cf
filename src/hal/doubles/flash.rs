use crate::{error::Error, hal::flash::Peripheral};
use std::vec::Vec;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlashEvent {
    Unlock,
    Lock,
    Erase(u32),
    Program(u32, Vec<u8>),
    EndOperation,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FakeError {
    /// Operation attempted while the controller was locked
    Locked,
    /// Programming over bytes that weren't erased
    NotErased,
    /// Fault injected by the test
    Injected,
    OutOfBounds,
}

impl From<FakeError> for Error {
    fn from(error: FakeError) -> Self {
        Error::DriverError(match error {
            FakeError::Locked => "Fake flash locked",
            FakeError::NotErased => "Fake flash not erased",
            FakeError::Injected => "Fake flash fault",
            FakeError::OutOfBounds => "Fake flash out of bounds",
        })
    }
}

/// In-memory flash array behaving like a NOR flash controller: erase sets
/// whole units to `0xFF`, programming requires erased bytes, and every
/// operation keeps the controller busy for a configurable number of polls.
#[derive(Debug)]
pub struct FakeFlash {
    base: u32,
    memory: Vec<u8>,
    erase_granularity: usize,
    write_granularity: usize,
    locked: bool,
    busy_polls: u32,
    busy_remaining: u32,
    latched: Option<FakeError>,
    /// Any operation touching this address latches an error
    pub fail_at: Option<u32>,
    pub events: Vec<FlashEvent>,
}

impl FakeFlash {
    pub fn new(base: u32, size: usize, erase_granularity: usize, write_granularity: usize) -> Self {
        Self {
            base,
            memory: vec![0xFF; size],
            erase_granularity,
            write_granularity,
            locked: true,
            busy_polls: 0,
            busy_remaining: 0,
            latched: None,
            fail_at: None,
            events: Vec::new(),
        }
    }

    /// Same geometry as the STM32L432KC internal flash.
    pub fn stm32l432kc() -> Self { Self::new(0x0800_0000, 256 * 1024, 2048, 8) }

    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Writes straight into the array, bypassing the controller.
    pub fn preload(&mut self, address: u32, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn bytes(&self, address: u32, length: usize) -> &[u8] {
        let offset = (address - self.base) as usize;
        &self.memory[offset..offset + length]
    }

    pub fn is_locked(&self) -> bool { self.locked }

    /// Erase and program events only, in order.
    pub fn operations(&self) -> Vec<FlashEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, FlashEvent::Erase(_) | FlashEvent::Program(..)))
            .cloned()
            .collect()
    }

    fn offset(&self, address: u32, length: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset + length <= self.memory.len()).then(|| offset)
    }

    fn check(&self, address: u32, length: usize) -> Result<usize, FakeError> {
        if self.locked {
            return Err(FakeError::Locked);
        }
        if let Some(fail) = self.fail_at {
            if fail >= address && (fail as u64) < address as u64 + length as u64 {
                return Err(FakeError::Injected);
            }
        }
        self.offset(address, length).ok_or(FakeError::OutOfBounds)
    }
}

impl Peripheral for FakeFlash {
    type Error = FakeError;

    fn range(&self) -> (u32, u32) { (self.base, self.base + self.memory.len() as u32) }
    fn erase_granularity(&self) -> usize { self.erase_granularity }
    fn write_granularity(&self) -> usize { self.write_granularity }

    fn unlock(&mut self) -> Result<(), Self::Error> {
        self.events.push(FlashEvent::Unlock);
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), Self::Error> {
        self.events.push(FlashEvent::Lock);
        self.locked = true;
        Ok(())
    }

    fn status(&mut self) -> nb::Result<(), Self::Error> {
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Err(nb::Error::WouldBlock);
        }
        match self.latched.take() {
            Some(error) => Err(nb::Error::Other(error)),
            None => Ok(()),
        }
    }

    fn start_erase(&mut self, address: u32) {
        self.events.push(FlashEvent::Erase(address));
        self.busy_remaining = self.busy_polls;
        match self.check(address, self.erase_granularity) {
            Ok(offset) => self.memory[offset..offset + self.erase_granularity].fill(0xFF),
            Err(error) => self.latched = Some(error),
        }
    }

    fn start_program(&mut self, address: u32, unit: &[u8]) {
        self.events.push(FlashEvent::Program(address, unit.to_vec()));
        self.busy_remaining = self.busy_polls;
        let result = self.check(address, unit.len()).and_then(|offset| {
            let target = &self.memory[offset..offset + unit.len()];
            if target.iter().all(|b| *b == 0xFF) {
                Ok(offset)
            } else {
                Err(FakeError::NotErased)
            }
        });
        match result {
            Ok(offset) => self.memory[offset..offset + unit.len()].copy_from_slice(unit),
            Err(error) => self.latched = Some(error),
        }
    }

    fn end_operation(&mut self) { self.events.push(FlashEvent::EndOperation); }

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = self.offset(address, bytes.len()).ok_or(FakeError::OutOfBounds)?;
        bytes.copy_from_slice(&self.memory[offset..offset + bytes.len()]);
        Ok(())
    }
}
