//! Build time configuration, generated by the build script from the
//! `CHAINLOADER_CONFIG` RON description (or the reference board defaults).
use crate::utilities::memory::Region;
use static_assertions::const_assert;

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// Stack pointer and reset handler, as fetched by the core on reset.
pub const VECTOR_LENGTH: usize = 8;

const_assert!(BOOT_VECTOR.length as usize == VECTOR_LENGTH);
const_assert!(VECTOR_LENGTH % WRITE_GRANULARITY == 0);
const_assert!(BOOTLOADER_DATA.length as usize >= VECTOR_LENGTH);
const_assert!(MAX_PAYLOAD_LENGTH <= u16::MAX as usize);
const_assert!(MAX_DEVICES > 0);
