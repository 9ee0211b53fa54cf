#![cfg_attr(test, allow(unused_attributes))]
#![cfg_attr(all(not(test), target_arch = "arm"), no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
use cortex_m_rt::entry;

#[cfg(target_arch = "arm")]
#[entry]
fn main() -> ! { chainloader_lib::ports::run() }

#[cfg(not(target_arch = "arm"))]
fn main() {}
