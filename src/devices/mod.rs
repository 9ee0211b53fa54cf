//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic, while board specifics (pins, board config) are
//! handled in the `ports` module.

pub mod activity;
pub mod bootloader;
pub mod chain;
pub mod isp;
pub mod led;
pub mod protocol;

/// General purpose traits that summarize requirements on devices.
pub mod traits {
    use crate::hal::serial;
    use marker_blanket::marker_blanket;

    /// A supported console must be able to read and write bytes.
    #[marker_blanket]
    pub trait Serial: serial::Read<u8> + serial::Write<u8> {}
}
