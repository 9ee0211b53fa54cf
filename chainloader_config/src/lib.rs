//! This chainloader sub-crate contains all definitions to help generate
//! final chainloader binaries.
//!
//! NOTE: This code is not included anywhere from the firmware itself! This
//! is a dependency of the chainloader **build script**. The build script
//! uses this dependency to validate the board configuration and to generate
//! the code that the firmware includes (memory map, chain protocol constants,
//! linker script).

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

pub mod chain;
pub mod codegen;
pub mod memory;
pub mod port;

use chain::ChainConfiguration;
use memory::MemoryConfiguration;
use port::Port;

#[macro_export(local_inner_macros)]
macro_rules! KB {
    ($val:expr) => {
        $val * 1024
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Configuration {
    pub port: Port,
    pub memory: MemoryConfiguration,
    pub chain: ChainConfiguration,
    pub console: ConsoleConfiguration,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfiguration {
    pub baud_rate: u32,
    /// Largest decoded host frame, in bytes.
    pub max_payload_length: usize,
}

impl Default for ConsoleConfiguration {
    fn default() -> Self { Self { baud_rate: 115_200, max_payload_length: 512 } }
}

/// Smallest frame able to carry a host write: opcode, device,
/// address, checksum and at least one write granule of data.
const MIN_PAYLOAD_LENGTH: usize = 1 + 1 + 4 + 4 + 8;

impl Configuration {
    /// Checks the configuration for consistency against the selected port,
    /// returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        self.memory.validate(&self.port)?;
        self.chain.validate()?;
        ensure!(
            self.console.max_payload_length >= MIN_PAYLOAD_LENGTH,
            "[Console] Maximum payload length must be at least {} bytes",
            MIN_PAYLOAD_LENGTH
        );
        ensure!(
            self.console.max_payload_length <= u16::MAX as usize,
            "[Console] Maximum payload length must fit the chain bus length field"
        );
        ensure!(self.console.baud_rate > 0, "[Console] Baud rate must be non-zero");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        Configuration::default().validate().unwrap();
    }

    #[test]
    fn partial_ron_configuration_fills_in_defaults() {
        // Given
        let text = "(chain: (max_devices: 4), console: (baud_rate: 9600))";

        // When
        let configuration: Configuration = ron::from_str(text).unwrap();

        // Then
        assert_eq!(configuration.chain.max_devices, 4);
        assert_eq!(configuration.console.baud_rate, 9600);
        assert_eq!(configuration.console.max_payload_length, 512);
        assert_eq!(configuration.memory, MemoryConfiguration::default());
        configuration.validate().unwrap();
    }

    #[test]
    fn tiny_payload_bound_is_rejected() {
        // Given
        let mut configuration = Configuration::default();

        // When
        configuration.console.max_payload_length = 8;

        // Then
        assert!(configuration.validate().is_err());
    }
}
