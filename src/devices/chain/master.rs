//! Master side of the chain: discovery, local dispatch and relaying.
use super::{checksum, ChainTable};
use crate::{
    config::{ADDRESS_BASE, BROADCAST_ADDRESS, MAX_PAYLOAD_LENGTH, RELAY_POLL_LIMIT},
    devices::{
        bootloader::{Bootloader, WriteBuffer},
        isp::Isp,
        protocol::{BootCommand, HostCommand, RespStatus, MAX_COMMAND_OVERHEAD},
        traits::Serial,
    },
    error::Error,
    hal::{
        boot::Launch,
        bus::Controller,
        serial::{Console, Write},
        time::{self, Milliseconds, Now},
    },
    utilities::{
        cobs::{Decoded, Decoder},
        packet::PacketWriter,
    },
};
use heapless::Vec;
use ufmt::uwriteln;

const RELAY_CAPACITY: usize = MAX_PAYLOAD_LENGTH + MAX_COMMAND_OVERHEAD;

pub struct Master<B: Controller> {
    bus: B,
    broadcast: u8,
    base: u8,
    poll_limit: u32,
    chain: ChainTable,
    packet: PacketWriter<RELAY_CAPACITY>,
}

impl<B: Controller> Master<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            broadcast: BROADCAST_ADDRESS,
            base: ADDRESS_BASE,
            poll_limit: RELAY_POLL_LIMIT,
            chain: ChainTable::new(),
            packet: PacketWriter::new(),
        }
    }

    /// Maximum status polls spent on a relayed command.
    pub fn with_poll_limit(mut self, poll_limit: u32) -> Self {
        self.poll_limit = poll_limit;
        self
    }

    pub fn bus(&self) -> &B { &self.bus }
    pub fn chain(&self) -> &ChainTable { &self.chain }

    /// Walks the chain, giving every node that answers the broadcast
    /// address the next free address and releasing the node after it.
    /// Stops at the first silent probe. Returns the number of nodes found.
    pub fn discover<C: Now>(&mut self, clock: &C, settle: Milliseconds) -> usize {
        self.chain.clear();
        while !self.chain.is_full() {
            if self.probe(self.broadcast) != Some(RespStatus::Done) {
                break;
            }
            let address = self.base + self.chain.len() as u8 + 1;
            if self.send(self.broadcast, BootCommand::SetAddress(address)).is_err()
                || self.send(address, BootCommand::SetBootOut).is_err()
            {
                dwarn!("Node at position {=usize} stopped answering", self.chain.len() + 1);
                break;
            }
            self.chain.push(address);
            dinfo!("Node {=usize} assigned address {=u8:#x}", self.chain.len(), address);
            time::wait(clock, settle);
        }
        self.chain.len()
    }

    /// Executes a decoded host frame, locally or on a chain node, and
    /// returns its final status.
    pub fn process<I: Isp, L: Launch>(
        &mut self,
        bootloader: &mut Bootloader<I, L>,
        frame: &[u8],
    ) -> RespStatus {
        let command = match HostCommand::parse(frame) {
            Ok(command) => command,
            Err(status) => return status,
        };
        match command.device() {
            0 => Self::apply(bootloader, command),
            device => self.relay(device, command),
        }
    }

    /// Feeds at most one console byte through `decoder`, executing and
    /// answering any frame it completes. Malformed frames are dropped
    /// silently. Returns whether a byte was read.
    pub fn serve<S: Serial, I: Isp, L: Launch>(
        &mut self,
        serial: &mut S,
        decoder: &mut Decoder<MAX_PAYLOAD_LENGTH>,
        bootloader: &mut Bootloader<I, L>,
    ) -> bool {
        let byte = match serial.read() {
            Ok(byte) => byte,
            Err(_) => return false,
        };
        match decoder.decode(byte) {
            Decoded::Working => {}
            Decoded::FrameReady(frame) => {
                let status = self.process(bootloader, &frame);
                respond(serial, status);
                decoder.bind(frame);
            }
            Decoded::Overflow | Decoded::InvalidFormat | Decoded::NoDestination => {
                dwarn!("Dropped a malformed console frame");
                decoder.bind(Vec::new());
            }
        }
        true
    }

    /// Sends `RunApp` for the start of the application to every node.
    pub fn autorun(&mut self, address: u32) {
        for device in 1..=self.chain.len() as u8 {
            if let Some(node) = self.chain.address_of(device) {
                if self.send(node, BootCommand::RunApp { address }).is_err() {
                    dwarn!("Device {=u8} didn't take the run request", device);
                }
            }
        }
    }

    /// Reports the chain length, counting this board.
    pub fn report_chain<S: Write<u8>>(&self, serial: &mut S) {
        let _ = uwriteln!(Console(serial), "{} devices in chain", self.chain.len() + 1);
    }

    fn apply<I: Isp, L: Launch>(bootloader: &mut Bootloader<I, L>, command: HostCommand) -> RespStatus {
        match command {
            HostCommand::Write { address, crc, data, .. } => {
                if checksum(data) != crc {
                    dwarn!("Checksum mismatch on write to {=u32:#x}", address);
                    return RespStatus::InvalidChecksum;
                }
                match WriteBuffer::from_slice(data) {
                    Ok(buffer) => bootloader.write(address, buffer),
                    Err(_) => Error::PayloadTooLong.into(),
                }
            }
            HostCommand::Erase { address, length, .. } => bootloader.erase(address, length as usize),
            HostCommand::Jump { address, .. } => match bootloader.run_app(address) {
                Ok(never) => match never {},
                Err(error) => error.into(),
            },
        }
    }

    fn relay(&mut self, device: u8, command: HostCommand) -> RespStatus {
        let address = match self.chain.address_of(device) {
            Some(address) => address,
            None => return Error::UnknownDevice.into(),
        };
        let relayed = match command {
            HostCommand::Write { address, crc, data, .. } => BootCommand::Write { address, crc, data },
            HostCommand::Erase { address, length, .. } => BootCommand::Erase { address, length },
            HostCommand::Jump { address, .. } => BootCommand::RunApp { address },
        };

        if let Err(error) = self.send(address, relayed) {
            self.chain.mark_unresponsive(device);
            return error.into();
        }
        if let BootCommand::RunApp { .. } = relayed {
            return RespStatus::Done;
        }

        for _ in 0..self.poll_limit {
            match self.probe(address) {
                Some(RespStatus::Busy) | None => continue,
                Some(status) => {
                    self.chain.record(device, status);
                    return status;
                }
            }
        }
        derror!("Device {=u8} never finished", device);
        self.chain.mark_unresponsive(device);
        Error::ChainUnresponsive.into()
    }

    /// Status of the node at `address`, if it answers with a known one.
    fn probe(&mut self, address: u8) -> Option<RespStatus> {
        self.send(address, BootCommand::Status).ok()?;
        let mut answer = [0u8; 1];
        self.bus.read(address, &mut answer).ok()?;
        RespStatus::from_byte(answer[0])
    }

    fn send(&mut self, address: u8, command: BootCommand) -> Result<(), Error> {
        self.packet.clear();
        if !command.encode(&mut self.packet) {
            return Err(Error::PayloadTooLong);
        }
        self.bus.write(address, self.packet.as_bytes()).map_err(|_| Error::BusNack)
    }
}

/// Answers a host command with its one character status.
pub fn respond<S: Write<u8>>(serial: &mut S, status: RespStatus) {
    let mut encoded = [0u8; 4];
    let character: &str = status.as_char().encode_utf8(&mut encoded);
    let _ = uwriteln!(Console(serial), "{}", character);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{APPLICATION, BOOTLOADER, MAX_DEVICES},
        devices::{
            bootloader::MemoryMap,
            isp::doubles::{IspCall, MockIsp},
        },
        hal::{
            doubles::{
                boot::MockLauncher,
                bus::{BusEvent, MockBus, SimulatedNode},
                serial::MockSerial,
                time::MockClock,
            },
            time::U32Ext,
        },
        utilities::cobs::{encode_frame, Decoded, Decoder},
    };
    use std::vec::Vec;

    const BOOTLOADER_VECTOR: [u8; 8] = [0x00, 0x00, 0x01, 0x20, 0x01, 0x81, 0x03, 0x08];

    fn bootloader() -> Bootloader<MockIsp, MockLauncher> {
        let isp = MockIsp::with_memory(&[(BOOTLOADER.start, BOOTLOADER_VECTOR)]);
        Bootloader::new(isp, MockLauncher, MemoryMap::configured()).unwrap()
    }

    fn discovered(nodes: Vec<SimulatedNode>) -> Master<MockBus> {
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, nodes));
        master.discover(&MockClock::new(1), 10.ms());
        master
    }

    fn host_write(device: u8, address: u32, crc: u32, data: &[u8]) -> Vec<u8> {
        let mut packet = PacketWriter::<64>::new();
        assert!(packet.put(b'W') && packet.put(device) && packet.put(address) && packet.put(crc));
        assert!(packet.put_slice(data));
        packet.as_bytes().to_vec()
    }

    fn host_erase(device: u8, address: u32, length: u32) -> Vec<u8> {
        let mut packet = PacketWriter::<16>::new();
        assert!(packet.put(b'E') && packet.put(device) && packet.put(address) && packet.put(length));
        packet.as_bytes().to_vec()
    }

    #[test]
    fn discovery_numbers_answering_nodes_and_stops_at_the_first_silent_one() {
        // Given
        let nodes = std::vec![
            SimulatedNode::default(),
            SimulatedNode::default(),
            SimulatedNode::default(),
            SimulatedNode::silent(),
            SimulatedNode::default(),
        ];
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, nodes));

        // When
        let found = master.discover(&MockClock::new(1), 10.ms());

        // Then
        assert_eq!(found, 3);
        let addresses: Vec<u8> = master.chain().nodes().iter().map(|n| n.address).collect();
        assert_eq!(addresses, std::vec![ADDRESS_BASE + 1, ADDRESS_BASE + 2, ADDRESS_BASE + 3]);
        let bus = master.bus();
        assert!(bus.nodes[..3].iter().all(|n| n.boot_out));
        assert_eq!(bus.nodes[3].address, None);
        assert_eq!(bus.nodes[4].address, None);
    }

    #[test]
    fn discovery_of_an_empty_chain_finds_nothing() {
        // Given
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));
        let mut serial = MockSerial::default();

        // When
        let found = master.discover(&MockClock::new(1), 10.ms());
        master.report_chain(&mut serial);

        // Then
        assert_eq!(found, 0);
        assert_eq!(serial.written_text(), "1 devices in chain\n");
    }

    #[test]
    fn discovery_stops_once_the_table_is_full() {
        // Given
        let nodes = (0..MAX_DEVICES + 2).map(|_| SimulatedNode::default()).collect();

        // When
        let master = discovered(nodes);

        // Then
        assert_eq!(master.chain().len(), MAX_DEVICES);
        assert_eq!(master.bus().nodes[MAX_DEVICES].address, None);
    }

    #[test]
    fn framed_local_erase_reaches_the_flash_controller_once() {
        // Given
        let command = [b'E', 0x00, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00];
        let mut framed = [0u8; 32];
        let framed_length = encode_frame(&command, &mut framed).unwrap();
        let mut decoder = Decoder::<MAX_PAYLOAD_LENGTH>::with_buffer();
        let mut frames = Vec::new();
        for byte in &framed[..framed_length] {
            if let Decoded::FrameReady(frame) = decoder.decode(*byte) {
                frames.push(frame);
            }
        }
        let mut bootloader = bootloader();
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));

        // When
        assert_eq!(frames.len(), 1);
        let status = master.process(&mut bootloader, &frames[0]);

        // Then
        assert_eq!(&frames[0][..], &command[..]);
        assert_eq!(status, RespStatus::Done);
        assert_eq!(bootloader.isp().erases(), std::vec![(0x0801_0000, 2048)]);
    }

    #[test]
    fn local_writes_with_a_bad_checksum_never_touch_flash() {
        // Given
        let data = [0x11u8; 16];
        let frame = host_write(0, 0x0801_0000, checksum(&data) ^ 1, &data);
        let mut bootloader = bootloader();
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::InvalidChecksum);
        assert!(bootloader.isp().flash_calls().is_empty());
    }

    #[test]
    fn local_writes_with_a_good_checksum_are_programmed() {
        // Given
        let data = [0x11u8; 16];
        let frame = host_write(0, 0x0801_0000, checksum(&data), &data);
        let mut bootloader = bootloader();
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::Done);
        assert!(bootloader.isp().calls.contains(&IspCall::BeginWrite(0x0801_0000, data.to_vec())));
    }

    #[test]
    fn local_jump_outside_the_application_is_invalid_args() {
        // Given
        let frame = [b'J', 0x00, 0x20, 0x00, 0x00, 0x00];
        let mut bootloader = bootloader();
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::InvalidArgs);
    }

    #[test]
    fn relayed_commands_are_polled_until_the_node_is_done() {
        // Given
        let busy = [RespStatus::Busy, RespStatus::Busy, RespStatus::Busy];
        let mut master = discovered(std::vec![SimulatedNode::default(), SimulatedNode::answering(&busy)]);
        let mut bootloader = bootloader();
        let frame = host_erase(2, 0x0801_0000, 2048);

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::Done);
        let node = &master.bus().nodes[1];
        assert_eq!(node.received.iter().filter(|r| r[0] == 0x08).count(), 1 + 4);
        assert!(node.received.contains(&std::vec![0x11, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00]));
        assert!(bootloader.isp().flash_calls().is_empty());
    }

    #[test]
    fn relayed_failures_are_reported_verbatim() {
        // Given
        let mut master = discovered(std::vec![SimulatedNode::answering(&[RespStatus::FlashError])]);
        let mut bootloader = bootloader();
        let data = [0x22u8; 8];
        let frame = host_write(1, 0x0801_0000, checksum(&data), &data);

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::FlashError);
        assert_eq!(master.chain().nodes()[0].status, RespStatus::FlashError);
    }

    #[test]
    fn a_node_that_stays_busy_exhausts_the_poll_budget() {
        // Given
        let busy = [RespStatus::Busy; 10];
        let mut master = discovered(std::vec![SimulatedNode::answering(&busy)]).with_poll_limit(5);
        let mut bootloader = bootloader();

        // When
        let status = master.process(&mut bootloader, &host_erase(1, 0x0801_0000, 2048));

        // Then
        assert_eq!(status, RespStatus::UnknownError);
        assert!(!master.chain().nodes()[0].responsive);
        let reads = master.bus().log.iter().filter(|e| **e == BusEvent::Read(ADDRESS_BASE + 1)).count();
        assert_eq!(reads, 5);
    }

    #[test]
    fn commands_for_missing_devices_are_invalid_args() {
        // Given
        let mut master = discovered(std::vec![SimulatedNode::default()]);
        let mut bootloader = bootloader();

        // When
        let status = master.process(&mut bootloader, &host_erase(2, 0x0801_0000, 2048));

        // Then
        assert_eq!(status, RespStatus::InvalidArgs);
    }

    #[test]
    fn relayed_jumps_are_not_polled() {
        // Given
        let mut master = discovered(std::vec![SimulatedNode::default()]);
        let mut bootloader = bootloader();
        let frame = [b'J', 0x01, 0x08, 0x00, 0x00, 0x00];
        let log_before = master.bus().log.len();

        // When
        let status = master.process(&mut bootloader, &frame);

        // Then
        assert_eq!(status, RespStatus::Done);
        assert_eq!(
            &master.bus().log[log_before..],
            &[BusEvent::Write(ADDRESS_BASE + 1, std::vec![0x13, 0x08, 0x00, 0x00, 0x00])]
        );
    }

    #[test]
    fn autorun_asks_every_node_to_run_its_application() {
        // Given
        let mut master = discovered(std::vec![SimulatedNode::default(), SimulatedNode::default()]);

        // When
        master.autorun(APPLICATION.start);

        // Then
        let run = APPLICATION.start.to_be_bytes();
        let expected = std::vec![0x13, run[0], run[1], run[2], run[3]];
        assert!(master.bus().nodes.iter().all(|n| n.received.last() == Some(&expected)));
    }

    #[test]
    fn responses_are_single_characters() {
        // Given
        let mut serial = MockSerial::default();

        // When
        respond(&mut serial, RespStatus::Done);
        respond(&mut serial, RespStatus::InvalidChecksum);
        respond(&mut serial, RespStatus::Busy);

        // Then
        assert_eq!(serial.written_text(), "D\nC\n?\n");
    }

    #[test]
    fn console_frames_are_answered_and_garbage_is_dropped() {
        // Given
        let erase = [b'E', 0x00, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00];
        let mut stream = std::vec![0x00, 0x03, 0x45, 0x00];
        let mut framed = [0u8; 32];
        let length = encode_frame(&erase, &mut framed).unwrap();
        stream.extend_from_slice(&framed[..length]);
        let mut serial = MockSerial::with_incoming(&stream);
        let mut decoder = Decoder::with_buffer();
        let mut bootloader = bootloader();
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));

        // When
        while master.serve(&mut serial, &mut decoder, &mut bootloader) {}

        // Then
        assert_eq!(serial.written_text(), "D\n");
        assert_eq!(bootloader.isp().erases(), std::vec![(0x0801_0000, 2048)]);
        assert!(decoder.is_bound());
    }

    #[test]
    fn unparseable_frames_are_invalid_format() {
        // Given
        let mut master = Master::new(MockBus::new(BROADCAST_ADDRESS, Vec::new()));
        let mut bootloader = bootloader();

        // Then
        assert_eq!(master.process(&mut bootloader, b"Q"), RespStatus::InvalidFormat);
        assert_eq!(master.process(&mut bootloader, &[]), RespStatus::InvalidFormat);
    }
}
