//! Full project ports for specific targets. They mainly
//! wire concrete drivers into the generic devices and
//! decide which chain role the board plays.

#[cfg(all(target_arch = "arm", feature = "stm32l432kc"))]
port!(stm32l432kc);
