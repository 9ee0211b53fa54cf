//! Raw flash peripheral interface.
//!
//! Implementers expose the primitive, one unit at a time operations of an
//! internal flash controller. Sequencing, validation and bookkeeping live
//! above this interface, in the ISP state machine.
use crate::error::Error;
use core::fmt;

pub trait Peripheral {
    type Error: Clone + Copy + fmt::Debug + Into<Error>;

    /// First programmable address and one past the last.
    fn range(&self) -> (u32, u32);

    /// Size, in bytes, of the smallest erasable unit. A power of two.
    fn erase_granularity(&self) -> usize;

    /// Size, in bytes, of the smallest programmable unit. A power of two.
    fn write_granularity(&self) -> usize;

    fn unlock(&mut self) -> Result<(), Self::Error>;
    fn lock(&mut self) -> Result<(), Self::Error>;

    /// `WouldBlock` while an operation is in progress. Once idle, reports
    /// (and clears) any error latched by the last operation.
    fn status(&mut self) -> nb::Result<(), Self::Error>;

    /// Starts erasing the unit at `address`. Returns immediately.
    fn start_erase(&mut self, address: u32);

    /// Starts programming `unit` (exactly one write granule) at `address`.
    /// Returns immediately.
    fn start_program(&mut self, address: u32, unit: &[u8]);

    /// Clears any operation mode left selected by a finished sequence.
    fn end_operation(&mut self);

    fn read(&mut self, address: u32, bytes: &mut [u8]) -> Result<(), Self::Error>;
}
