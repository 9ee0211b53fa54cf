//! Slave side of the chain.
//!
//! A slave starts out answering to the broadcast address and takes the first
//! address assigned to it there. From then on every bus write delivers one
//! command, and every bus read is answered with a single status byte.
use super::checksum;
use crate::{
    config::{BROADCAST_ADDRESS, MAX_PAYLOAD_LENGTH},
    devices::{
        bootloader::{Bootloader, WriteBuffer},
        isp::Isp,
        protocol::{Opcode, RespStatus, ERASE_ARGUMENTS, RUN_APP_ARGUMENTS, WRITE_HEADER},
    },
    hal::{
        boot::Launch,
        bus::{Target, Transaction},
        gpio::OutputPin,
    },
    utilities::packet::PacketReader,
};

pub struct Slave<T: Target, P: OutputPin> {
    bus: T,
    boot_out: P,
    address: Option<u8>,
    last_command: Opcode,
    /// Reported by the next status read instead of the orchestrator's status.
    pending: Option<RespStatus>,
}

impl<T: Target, P: OutputPin> Slave<T, P> {
    /// Holds the next node in reset and starts listening at the broadcast address.
    pub fn new(mut bus: T, mut boot_out: P) -> Self {
        boot_out.set_low();
        bus.listen(BROADCAST_ADDRESS);
        Self { bus, boot_out, address: None, last_command: Opcode::Invalid, pending: None }
    }

    pub fn address(&self) -> Option<u8> { self.address }
    pub fn bus(&self) -> &T { &self.bus }
    pub fn bus_mut(&mut self) -> &mut T { &mut self.bus }

    /// Services one broadcast transaction. Only status probes and an address
    /// assignment are honoured. Returns true once an address has been taken.
    pub fn await_address(&mut self) -> bool {
        match self.bus.receive() {
            Transaction::None => {}
            Transaction::ReadAddressed => {
                if self.last_command == Opcode::Status {
                    let _ = self.bus.respond(RespStatus::Done as u8);
                }
            }
            Transaction::WriteAddressed => {
                let mut opcode = [0u8; 1];
                self.last_command = match self.bus.read(&mut opcode) {
                    Ok(()) => Opcode::from_byte(opcode[0]),
                    Err(_) => Opcode::Invalid,
                };
                let mut address = [0u8; 1];
                if self.last_command == Opcode::SetAddress && self.bus.read(&mut address).is_ok() {
                    dinfo!("Assigned address {=u8:#x}", address[0]);
                    self.address = Some(address[0]);
                    self.bus.listen(address[0]);
                }
            }
        }
        self.address.is_some()
    }

    /// Advances the orchestrator and services at most one bus transaction.
    /// Returns whether there was bus activity.
    pub fn service<I: Isp, L: Launch>(&mut self, bootloader: &mut Bootloader<I, L>) -> bool {
        let status = bootloader.update();
        match self.bus.receive() {
            Transaction::None => false,
            Transaction::ReadAddressed => {
                let answer = match (self.last_command, self.pending.take()) {
                    (Opcode::Status, Some(pending)) => pending,
                    (Opcode::Status, None) => status,
                    (_, pending) => {
                        self.pending = pending;
                        RespStatus::InvalidFormat
                    }
                };
                let _ = self.bus.respond(answer as u8);
                true
            }
            Transaction::WriteAddressed => {
                if let Err(status) = self.execute(bootloader) {
                    dwarn!("Command {} failed: {}", self.last_command, status);
                    self.pending = Some(status);
                }
                true
            }
        }
    }

    fn execute<I: Isp, L: Launch>(&mut self, bootloader: &mut Bootloader<I, L>) -> Result<(), RespStatus> {
        let mut opcode = [0u8; 1];
        self.receive(&mut opcode)?;
        self.last_command = Opcode::from_byte(opcode[0]);
        ddebug!("Received {}", self.last_command);
        if let Opcode::Erase | Opcode::Write | Opcode::RunApp = self.last_command {
            self.pending = None;
        }
        match self.last_command {
            Opcode::Status | Opcode::SetAddress => Ok(()),
            Opcode::SetBootOut => {
                self.boot_out.set_high();
                Ok(())
            }
            Opcode::Erase => self.erase(bootloader),
            Opcode::Write => self.write(bootloader),
            Opcode::RunApp => self.run_app(bootloader),
            Opcode::Invalid => Err(RespStatus::InvalidFormat),
        }
    }

    fn erase<I: Isp, L: Launch>(&mut self, bootloader: &mut Bootloader<I, L>) -> Result<(), RespStatus> {
        let mut arguments = [0u8; ERASE_ARGUMENTS];
        self.receive(&mut arguments)?;
        let mut reader = PacketReader::new(&arguments);
        let (address, length): (u32, u32) = (reader.read(), reader.read());
        if bootloader.begin_erase(address, length as usize) {
            Ok(())
        } else {
            Err(RespStatus::UnknownError)
        }
    }

    fn write<I: Isp, L: Launch>(&mut self, bootloader: &mut Bootloader<I, L>) -> Result<(), RespStatus> {
        let mut header = [0u8; WRITE_HEADER];
        self.receive(&mut header)?;
        let mut reader = PacketReader::new(&header);
        let (address, length, crc): (u32, u16, u32) = (reader.read(), reader.read(), reader.read());

        let length = length as usize;
        if length == 0 || length > MAX_PAYLOAD_LENGTH {
            return Err(RespStatus::InvalidFormat);
        }
        let mut data = WriteBuffer::new();
        data.resize_default(length).map_err(|_| RespStatus::InvalidFormat)?;
        self.receive(&mut data)?;

        if checksum(&data) != crc {
            return Err(RespStatus::InvalidChecksum);
        }
        if bootloader.begin_write(address, data) {
            Ok(())
        } else {
            Err(RespStatus::UnknownError)
        }
    }

    fn run_app<I: Isp, L: Launch>(&mut self, bootloader: &mut Bootloader<I, L>) -> Result<(), RespStatus> {
        let mut arguments = [0u8; RUN_APP_ARGUMENTS];
        self.receive(&mut arguments)?;
        let address: u32 = PacketReader::new(&arguments).read();
        match bootloader.run_app(address) {
            Ok(never) => match never {},
            Err(error) => Err(error.into()),
        }
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), RespStatus> {
        self.bus.read(buffer).map_err(|_| RespStatus::InvalidFormat)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::BOOTLOADER,
        devices::{
            bootloader::MemoryMap,
            isp::doubles::{IspCall, MockIsp},
        },
        hal::doubles::{
            boot::MockLauncher,
            bus::{MockTarget, Scripted},
            gpio::MockPin,
        },
    };
    use std::vec::Vec;

    const BOOTLOADER_VECTOR: [u8; 8] = [0x00, 0x00, 0x01, 0x20, 0x01, 0x81, 0x03, 0x08];
    const ERASE: [u8; 9] = [0x11, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00];
    const STATUS: u8 = 0x08;

    fn bootloader() -> Bootloader<MockIsp, MockLauncher> {
        let isp = MockIsp::with_memory(&[(BOOTLOADER.start, BOOTLOADER_VECTOR)]);
        Bootloader::new(isp, MockLauncher, MemoryMap::configured()).unwrap()
    }

    fn addressed(script: Vec<Scripted>) -> Slave<MockTarget, MockPin> {
        let mut slave = Slave::new(MockTarget::default(), MockPin::default());
        slave.bus_mut().push(Scripted::Write(std::vec![0x09, 0x03]));
        assert!(slave.await_address());
        script.into_iter().for_each(|transaction| slave.bus_mut().push(transaction));
        slave
    }

    fn write_command(address: u32, crc: u32, data: &[u8]) -> Vec<u8> {
        let mut command = std::vec![0x12];
        command.extend_from_slice(&address.to_be_bytes());
        command.extend_from_slice(&(data.len() as u16).to_be_bytes());
        command.extend_from_slice(&crc.to_be_bytes());
        command.extend_from_slice(data);
        command
    }

    /// Queries the status once, servicing until the read has been answered.
    fn query(slave: &mut Slave<MockTarget, MockPin>, bootloader: &mut Bootloader<MockIsp, MockLauncher>) -> u8 {
        slave.bus_mut().push(Scripted::Write(std::vec![STATUS]));
        slave.bus_mut().push(Scripted::Read);
        while !slave.bus().script.is_empty() {
            slave.service(bootloader);
        }
        *slave.bus().responses.last().unwrap()
    }

    fn drain(slave: &mut Slave<MockTarget, MockPin>, bootloader: &mut Bootloader<MockIsp, MockLauncher>) {
        while !slave.bus().script.is_empty() {
            slave.service(bootloader);
        }
    }

    #[test]
    fn unaddressed_slaves_answer_probes_and_take_one_address() {
        // Given
        let script = std::vec![
            Scripted::Write(std::vec![STATUS]),
            Scripted::Read,
            Scripted::Write(std::vec![0x11, 0, 0, 0, 0, 0, 0, 0, 0]),
            Scripted::Write(std::vec![0x09, 0x05]),
        ];
        let mut slave = Slave::new(MockTarget::scripted(script), MockPin::high());

        // When
        let progress: Vec<bool> = (0..4).map(|_| slave.await_address()).collect();

        // Then
        assert_eq!(progress, std::vec![false, false, false, true]);
        assert_eq!(slave.address(), Some(0x05));
        assert_eq!(slave.bus().listening, std::vec![BROADCAST_ADDRESS, 0x05]);
        assert_eq!(slave.bus().responses, std::vec![RespStatus::Done as u8]);
        assert!(!slave.boot_out.state);
    }

    #[test]
    fn unaddressed_slaves_only_answer_reads_after_a_status_request() {
        // Given
        let script = std::vec![Scripted::Read, Scripted::Write(std::vec![0x10]), Scripted::Read];
        let mut slave = Slave::new(MockTarget::scripted(script), MockPin::default());

        // When
        (0..3).for_each(|_| {
            slave.await_address();
        });

        // Then
        assert!(slave.bus().responses.is_empty());
        assert_eq!(slave.address(), None);
    }

    #[test]
    fn accepted_commands_discard_errors_left_by_earlier_ones() {
        // Given
        let isp = MockIsp::with_memory(&[(BOOTLOADER.start, BOOTLOADER_VECTOR), (0x0801_0000, [0xFF; 8])]);
        let mut bootloader = Bootloader::new(isp, MockLauncher, MemoryMap::configured()).unwrap();
        let mut slave = addressed(std::vec![
            Scripted::Write(std::vec![0x13, 0x08, 0x01, 0x00, 0x00]),
            Scripted::Write(ERASE.to_vec()),
        ]);
        drain(&mut slave, &mut bootloader);

        // When
        let first = query(&mut slave, &mut bootloader);

        // Then
        assert_ne!(first, RespStatus::InvalidArgs as u8);
        assert_eq!(first, RespStatus::Busy as u8);
        assert_eq!(bootloader.isp().erases(), std::vec![(0x0801_0000, 2048)]);
    }

    #[test]
    fn erase_runs_in_the_background_and_reports_busy_until_done() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(ERASE.to_vec())]);
        drain(&mut slave, &mut bootloader);

        // When
        let mut answers = Vec::new();
        loop {
            let answer = query(&mut slave, &mut bootloader);
            answers.push(answer);
            if answer != RespStatus::Busy as u8 {
                break;
            }
        }

        // Then
        assert_eq!(answers.last(), Some(&(RespStatus::Done as u8)));
        assert!(answers.len() > 1);
        assert_eq!(bootloader.isp().erases(), std::vec![(0x0801_0000, 2048)]);
    }

    #[test]
    fn framing_errors_take_priority_once() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(std::vec![0x11, 0x08, 0x01])]);
        drain(&mut slave, &mut bootloader);

        // When
        let first = query(&mut slave, &mut bootloader);
        let second = query(&mut slave, &mut bootloader);

        // Then
        assert_eq!(first, RespStatus::InvalidFormat as u8);
        assert_eq!(second, RespStatus::Done as u8);
        assert!(bootloader.isp().flash_calls().is_empty());
    }

    #[test]
    fn unknown_opcodes_are_invalid_format() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(std::vec![0x77, 0x01])]);
        drain(&mut slave, &mut bootloader);

        // Then
        assert_eq!(query(&mut slave, &mut bootloader), RespStatus::InvalidFormat as u8);
    }

    #[test]
    fn writes_with_a_bad_checksum_never_touch_flash() {
        // Given
        let data = [0x5Au8; 16];
        let command = write_command(0x0801_0000, checksum(&data).wrapping_add(1), &data);
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(command)]);
        drain(&mut slave, &mut bootloader);

        // Then
        assert_eq!(query(&mut slave, &mut bootloader), RespStatus::InvalidChecksum as u8);
        assert!(bootloader.isp().flash_calls().is_empty());
    }

    #[test]
    fn writes_with_a_good_checksum_are_programmed() {
        // Given
        let data = [0x5Au8; 16];
        let command = write_command(0x0801_0000, checksum(&data), &data);
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(command)]);
        drain(&mut slave, &mut bootloader);

        // When
        while query(&mut slave, &mut bootloader) == RespStatus::Busy as u8 {}

        // Then
        assert_eq!(slave.bus().responses.last(), Some(&(RespStatus::Done as u8)));
        assert!(bootloader.isp().calls.contains(&IspCall::BeginWrite(0x0801_0000, data.to_vec())));
    }

    #[test]
    fn commands_arriving_mid_operation_are_refused() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(ERASE.to_vec()), Scripted::Write(ERASE.to_vec())]);
        drain(&mut slave, &mut bootloader);

        // Then
        assert_eq!(query(&mut slave, &mut bootloader), RespStatus::UnknownError as u8);
        assert_eq!(bootloader.isp().erases().len(), 1);
    }

    #[test]
    fn reads_without_a_status_request_are_invalid_format() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Read]);

        // When
        drain(&mut slave, &mut bootloader);

        // Then
        assert_eq!(slave.bus().responses, std::vec![RespStatus::InvalidFormat as u8]);
    }

    #[test]
    fn set_boot_out_releases_the_next_node() {
        // Given
        let mut bootloader = bootloader();
        let mut slave = addressed(std::vec![Scripted::Write(std::vec![0x10])]);
        assert!(!slave.boot_out.state);

        // When
        drain(&mut slave, &mut bootloader);

        // Then
        assert!(slave.boot_out.state);
    }

    #[test]
    fn run_requests_for_blank_images_are_invalid_args() {
        // Given
        let isp = MockIsp::with_memory(&[(BOOTLOADER.start, BOOTLOADER_VECTOR), (0x0801_0000, [0xFF; 8])]);
        let mut bootloader = Bootloader::new(isp, MockLauncher, MemoryMap::configured()).unwrap();
        let mut slave = addressed(std::vec![Scripted::Write(std::vec![0x13, 0x08, 0x01, 0x00, 0x00])]);
        drain(&mut slave, &mut bootloader);

        // Then
        assert_eq!(query(&mut slave, &mut bootloader), RespStatus::InvalidArgs as u8);
    }

    #[test]
    #[should_panic(expected = "launch sp=0x20010000 entry=0x08010101 vtor=0x08010000")]
    fn run_requests_launch_the_image() {
        // Given
        let isp = MockIsp::with_memory(&[
            (BOOTLOADER.start, BOOTLOADER_VECTOR),
            (0x0801_0000, [0x00, 0x00, 0x01, 0x20, 0x01, 0x01, 0x01, 0x08]),
        ]);
        let mut bootloader = Bootloader::new(isp, MockLauncher, MemoryMap::configured()).unwrap();
        let mut slave = addressed(std::vec![Scripted::Write(std::vec![0x13, 0x08, 0x01, 0x00, 0x00])]);

        // When
        drain(&mut slave, &mut bootloader);
    }
}
