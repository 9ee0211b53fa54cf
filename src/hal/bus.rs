//! Addressed chain bus interfaces.
//!
//! The chain is a shared, 7-bit addressed bus. The master drives it as a
//! controller; every other node services it as a target, answering to the
//! broadcast address until it is assigned one of its own.
use core::fmt;

/// Bus controller (master) side.
pub trait Controller {
    type Error: Clone + Copy + fmt::Debug;

    /// Writes `bytes` to `address`. Fails if the address isn't acknowledged.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Reads `buffer.len()` bytes from `address`.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

/// Bus transaction observed by a target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Transaction {
    None,
    /// The controller addressed us for reading; answer with `respond`.
    ReadAddressed,
    /// The controller addressed us for writing; drain it with `read`.
    WriteAddressed,
}

/// Bus target (slave) side. Polled.
pub trait Target {
    type Error: Clone + Copy + fmt::Debug;

    /// Starts answering to `address` instead of the current one.
    fn listen(&mut self, address: u8);

    fn receive(&mut self) -> Transaction;

    /// Fills `buffer` from the ongoing write phase. Fails if the
    /// controller ends the transaction early.
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Answers the ongoing read phase with a single byte.
    fn respond(&mut self, byte: u8) -> Result<(), Self::Error>;
}
