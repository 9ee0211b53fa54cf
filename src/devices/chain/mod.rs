//! Chain coordination.
//!
//! Boards are daisy chained: each one holds the next in reset through its
//! boot-out line until it has been given a bus address. The board holding
//! the host console becomes the [`master::Master`], discovers the rest one
//! at a time and relays host commands to them. Every other board runs a
//! [`slave::Slave`].
use crate::{config::MAX_DEVICES, devices::protocol::RespStatus};
use crc::{crc32, Hasher32};
use heapless::Vec;

pub mod master;
pub mod slave;

/// IEEE CRC-32 of a write payload, as carried by `W` and relayed writes.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut digest = crc32::Digest::new(crc32::IEEE);
    digest.write(bytes);
    digest.sum32()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct Node {
    pub address: u8,
    /// Last final status relayed from this node.
    pub status: RespStatus,
    pub responsive: bool,
}

/// Discovered nodes, in chain order. Device `n` (counting from 1, as the
/// host does) is the `n`th entry.
#[derive(Clone, Debug, Default)]
pub struct ChainTable {
    nodes: Vec<Node, MAX_DEVICES>,
}

impl ChainTable {
    pub fn new() -> Self { Self::default() }

    /// Appends a node. False if the table is full.
    pub fn push(&mut self, address: u8) -> bool {
        self.nodes.push(Node { address, status: RespStatus::Done, responsive: true }).is_ok()
    }

    pub fn address_of(&self, device: u8) -> Option<u8> { self.node(device).map(|n| n.address) }

    pub fn node(&self, device: u8) -> Option<&Node> {
        (device as usize).checked_sub(1).and_then(|index| self.nodes.get(index))
    }

    pub fn record(&mut self, device: u8, status: RespStatus) {
        if let Some(node) = self.node_mut(device) {
            node.status = status;
            node.responsive = true;
        }
    }

    pub fn mark_unresponsive(&mut self, device: u8) {
        if let Some(node) = self.node_mut(device) {
            node.responsive = false;
        }
    }

    pub fn nodes(&self) -> &[Node] { &self.nodes }
    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
    pub fn is_full(&self) -> bool { self.nodes.is_full() }
    pub fn clear(&mut self) { self.nodes.clear() }

    fn node_mut(&mut self, device: u8) -> Option<&mut Node> {
        (device as usize).checked_sub(1).and_then(move |index| self.nodes.get_mut(index))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn devices_are_numbered_from_one() {
        // Given
        let mut table = ChainTable::new();
        assert!(table.push(0x01));
        assert!(table.push(0x02));

        // Then
        assert_eq!(table.address_of(0), None);
        assert_eq!(table.address_of(1), Some(0x01));
        assert_eq!(table.address_of(2), Some(0x02));
        assert_eq!(table.address_of(3), None);
    }

    #[test]
    fn recorded_statuses_stick_to_their_node() {
        // Given
        let mut table = ChainTable::new();
        table.push(0x01);
        table.push(0x02);

        // When
        table.record(2, RespStatus::FlashError);
        table.mark_unresponsive(1);
        table.record(7, RespStatus::Done);

        // Then
        assert_eq!(table.nodes()[0], Node { address: 0x01, status: RespStatus::Done, responsive: false });
        assert_eq!(table.nodes()[1], Node { address: 0x02, status: RespStatus::FlashError, responsive: true });
    }

    #[test]
    fn table_holds_at_most_the_configured_device_count() {
        // Given
        let mut table = ChainTable::new();

        // When
        let accepted = (0..=MAX_DEVICES).filter(|i| table.push(*i as u8 + 1)).count();

        // Then
        assert_eq!(accepted, MAX_DEVICES);
        assert!(table.is_full());
    }

    #[test]
    fn checksum_is_the_ieee_crc32() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(&[]), 0);
    }
}
