//! Convenience macros for the chainloader project
#![macro_use]

/// Define and export a specific port module (transparently pulls
/// its namespace to the current one).
///
/// Used mostly to conveniently fit the module declaration and reexport
/// under a single configuration flag.
///
/// # Example
/// ```ignore
/// #[cfg(feature = "stm32l432kc")]
/// port!(stm32l432kc);
/// // Expands into:
/// pub mod stm32l432kc;
/// pub use self::stm32l432kc::*;
/// ```
#[macro_export]
macro_rules! port {
    ($mod:ident) => {
        pub mod $mod;
        pub use self::$mod::*;
    };
    ($mod:ident as $name:ident) => {
        pub mod $mod;
        pub use self::$mod as $name;
    };
}

// Logging only exists on target, where a `defmt` transport is linked in.
// On the host (unit tests) these expand to nothing.

#[macro_export]
macro_rules! dinfo {
    ($($arg:tt)+) => {
        #[cfg(target_arch = "arm")]
        defmt::info!($($arg)+);
    };
}

#[macro_export]
macro_rules! dwarn {
    ($($arg:tt)+) => {
        #[cfg(target_arch = "arm")]
        defmt::warn!($($arg)+);
    };
}

#[macro_export]
macro_rules! derror {
    ($($arg:tt)+) => {
        #[cfg(target_arch = "arm")]
        defmt::error!($($arg)+);
    };
}

#[macro_export]
macro_rules! ddebug {
    ($($arg:tt)+) => {
        #[cfg(target_arch = "arm")]
        defmt::debug!($($arg)+);
    };
}
