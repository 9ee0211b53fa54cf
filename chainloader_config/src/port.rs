use std::fmt::Display;

use crate::KB;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Port {
    Stm32L432Kc,
}

impl Default for Port {
    fn default() -> Self { Self::Stm32L432Kc }
}

impl Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Port::Stm32L432Kc => "stm32l432kc",
        })
    }
}

/// Geometry of the internal flash of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashGeometry {
    pub start: u32,
    pub end: u32,
    /// Size of the smallest erasable region
    pub erase_granularity: u32,
    /// Size of the smallest programmable unit
    pub write_granularity: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkerArea {
    pub origin: u32,
    pub size: usize,
}

impl Port {
    pub fn flash(&self) -> FlashGeometry {
        match self {
            Port::Stm32L432Kc => FlashGeometry {
                start: 0x0800_0000,
                end: 0x0804_0000,
                erase_granularity: KB!(2),
                write_granularity: 8,
            },
        }
    }

    pub fn ram(&self) -> LinkerArea {
        match self {
            Port::Stm32L432Kc => LinkerArea { origin: 0x2000_0000, size: KB!(64) },
        }
    }

    /// Feature flag the firmware must be built with to target this port.
    pub fn feature_flag(&self) -> &'static str {
        match self {
            Port::Stm32L432Kc => "stm32l432kc",
        }
    }
}
