use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Highest address representable on a 7-bit addressed bus.
const MAX_BUS_ADDRESS: u8 = 0x7F;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfiguration {
    /// Address every unaddressed node listens on.
    pub broadcast_address: u8,
    /// Chain node `n` (1-based) is assigned `address_base + n`.
    pub address_base: u8,
    pub max_devices: u8,
    /// Settling time before sampling the boot-in line at power on.
    pub bootscan_delay_ms: u32,
    /// Settling time between addressing one node and probing the next.
    pub boot_to_address_delay_ms: u32,
    /// Status polls spent on a relayed command before giving up on a node.
    pub relay_poll_limit: u32,
}

impl Default for ChainConfiguration {
    fn default() -> Self {
        Self {
            broadcast_address: 0x42,
            address_base: 0,
            max_devices: 16,
            bootscan_delay_ms: 100,
            boot_to_address_delay_ms: 10,
            relay_poll_limit: 100_000,
        }
    }
}

impl ChainConfiguration {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.broadcast_address <= MAX_BUS_ADDRESS,
            "[Chain] Broadcast address 0x{:02X} does not fit 7-bit addressing",
            self.broadcast_address
        );
        ensure!(self.max_devices > 0, "[Chain] The chain must allow at least one device");
        let last = self.address_base as u32 + self.max_devices as u32;
        ensure!(
            last <= MAX_BUS_ADDRESS as u32,
            "[Chain] Device addresses up to 0x{:02X} do not fit 7-bit addressing",
            last
        );
        let assigned = (self.address_base as u32 + 1)..=last;
        ensure!(
            !assigned.contains(&(self.broadcast_address as u32)),
            "[Chain] Device addresses collide with the broadcast address 0x{:02X}",
            self.broadcast_address
        );
        ensure!(self.relay_poll_limit > 0, "[Chain] Relay poll limit must be non-zero");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn addresses_colliding_with_broadcast_are_rejected() {
        // Given
        let chain = ChainConfiguration { address_base: 0x40, max_devices: 4, ..Default::default() };

        // Then
        assert!(chain.validate().is_err());
    }

    #[test]
    fn addresses_beyond_seven_bits_are_rejected() {
        // Given
        let chain = ChainConfiguration {
            broadcast_address: 0x01,
            address_base: 0x70,
            max_devices: 0x10,
            ..Default::default()
        };

        // Then
        assert!(chain.validate().is_err());
    }
}
