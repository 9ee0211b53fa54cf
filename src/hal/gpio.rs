//! # Simple GPIO interface
//!
//! Separate interfaces to Input and Output pins, automatically
//! implemented by GPIOs that support such operations.

/// Interface to a writable pin.
pub trait OutputPin {
    fn set_low(&mut self);
    fn set_high(&mut self);
}

/// Interface to a readable pin.
pub trait InputPin {
    fn is_high(&self) -> bool;
    fn is_low(&self) -> bool { !self.is_high() }
}
