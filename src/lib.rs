//! # Chainloader Library
//!
//! This crate contains all functionality for the daisy-chain
//! firmware updater in library form.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

#[cfg(feature = "stm32l432kc")]
pub use stm32l4::stm32l4x2 as stm32pac;

#[cfg(target_arch = "arm")]
use defmt_rtt as _;
#[cfg(target_arch = "arm")]
use panic_semihosting as _;
extern crate static_assertions;

#[macro_use]
pub mod utilities {
    #[macro_use]
    mod macros;
    pub mod cobs;
    pub mod memory;
    pub mod packet;
}

pub mod config;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod ports;
