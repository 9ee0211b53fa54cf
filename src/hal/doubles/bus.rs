use crate::{
    devices::protocol::{Opcode, RespStatus},
    hal::bus::{Controller, Target, Transaction},
};
use std::{collections::VecDeque, vec::Vec};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusError {
    Nack,
    /// The controller stopped before the expected bytes arrived
    Truncated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Write(u8, Vec<u8>),
    Read(u8),
}

/// One board of a simulated chain, as seen from the bus controller.
#[derive(Clone, Debug, Default)]
pub struct SimulatedNode {
    /// `None` while the node still answers to the broadcast address
    pub address: Option<u8>,
    pub boot_out: bool,
    /// Never acknowledges anything
    pub silent: bool,
    /// Answers to status reads, in order. `Done` once exhausted.
    pub statuses: VecDeque<u8>,
    /// Every write the node acknowledged
    pub received: Vec<Vec<u8>>,
    last_opcode: Option<u8>,
}

impl SimulatedNode {
    pub fn silent() -> Self { Self { silent: true, ..Default::default() } }

    pub fn answering(statuses: &[RespStatus]) -> Self {
        Self { statuses: statuses.iter().map(|s| *s as u8).collect(), ..Default::default() }
    }
}

/// Bus controller wired to a chain of simulated nodes. A node answers to the
/// broadcast address only once the node before it has raised its boot-out
/// line (the first node always does), like the physical chain.
#[derive(Debug)]
pub struct MockBus {
    pub broadcast: u8,
    pub nodes: Vec<SimulatedNode>,
    pub log: Vec<BusEvent>,
}

impl MockBus {
    pub fn new(broadcast: u8, nodes: Vec<SimulatedNode>) -> Self {
        Self { broadcast, nodes, log: Vec::new() }
    }

    fn target(&mut self, address: u8) -> Option<&mut SimulatedNode> {
        let index = if address == self.broadcast {
            (0..self.nodes.len()).find(|&i| {
                self.nodes[i].address.is_none() && (i == 0 || self.nodes[i - 1].boot_out)
            })?
        } else {
            self.nodes.iter().position(|n| n.address == Some(address))?
        };
        let node = &mut self.nodes[index];
        (!node.silent).then(move || node)
    }
}

impl Controller for MockBus {
    type Error = BusError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.log.push(BusEvent::Write(address, bytes.to_vec()));
        let broadcast = address == self.broadcast;
        let node = self.target(address).ok_or(BusError::Nack)?;
        let opcode = bytes.first().cloned();
        match opcode.map(Opcode::from_byte) {
            Some(Opcode::SetAddress) if broadcast && bytes.len() >= 2 => node.address = Some(bytes[1]),
            Some(Opcode::SetBootOut) => node.boot_out = true,
            _ => {}
        }
        node.last_opcode = opcode;
        node.received.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.log.push(BusEvent::Read(address));
        let broadcast = address == self.broadcast;
        let node = self.target(address).ok_or(BusError::Nack)?;
        buffer.iter_mut().for_each(|b| *b = 0xFF);
        if node.last_opcode == Some(Opcode::Status as u8) {
            if let Some(first) = buffer.first_mut() {
                *first = if broadcast {
                    RespStatus::Done as u8
                } else {
                    node.statuses.pop_front().unwrap_or(RespStatus::Done as u8)
                };
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scripted {
    /// The controller writes these bytes
    Write(Vec<u8>),
    /// The controller reads one byte
    Read,
}

/// Bus target replaying a scripted sequence of controller transactions,
/// one per `receive` call.
#[derive(Debug, Default)]
pub struct MockTarget {
    pub listening: Vec<u8>,
    pub script: VecDeque<Scripted>,
    pub responses: Vec<u8>,
    pending: VecDeque<u8>,
}

impl MockTarget {
    pub fn scripted(script: Vec<Scripted>) -> Self { Self { script: script.into(), ..Default::default() } }

    pub fn push(&mut self, transaction: Scripted) { self.script.push_back(transaction); }
}

impl Target for MockTarget {
    type Error = BusError;

    fn listen(&mut self, address: u8) { self.listening.push(address); }

    fn receive(&mut self) -> Transaction {
        match self.script.pop_front() {
            Some(Scripted::Write(bytes)) => {
                self.pending = bytes.into();
                Transaction::WriteAddressed
            }
            Some(Scripted::Read) => Transaction::ReadAddressed,
            None => Transaction::None,
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        if self.pending.len() < buffer.len() {
            self.pending.clear();
            return Err(BusError::Truncated);
        }
        buffer.iter_mut().for_each(|b| *b = self.pending.pop_front().unwrap_or(0));
        Ok(())
    }

    fn respond(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.responses.push(byte);
        Ok(())
    }
}
