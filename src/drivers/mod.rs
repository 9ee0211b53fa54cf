//! Driver implementations for all supported platforms. They offer
//! a safe API, and are
//! [typestate](https://rust-embedded.github.io/book/static-guarantees/typestate-programming.html)
//! based whenever possible.

pub mod tick;

#[cfg(all(target_arch = "arm", feature = "cortex_m_any"))]
pub mod cortex;

#[cfg(all(target_arch = "arm", feature = "stm32l4_any"))]
pub mod stm32l4 {
    pub mod flash;
    pub mod gpio;
    pub mod i2c;
    pub mod rcc;
    pub mod serial;
}
