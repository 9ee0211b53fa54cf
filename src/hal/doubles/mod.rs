//! Test doubles for the hardware interfaces. Host only.
pub mod boot;
pub mod bus;
pub mod flash;
pub mod gpio;
pub mod serial;
pub mod time;
