//! Vocabulary shared by the host console and the chain bus.
//!
//! Host commands arrive framed over serial:
//!
//! | Opcode | Fields (big endian)                               |
//! |--------|---------------------------------------------------|
//! | `W`    | device (u8), address (u32), crc (u32), data (1..) |
//! | `E`    | device (u8), address (u32), length (u32)          |
//! | `J`    | device (u8), address (u32)                        |
//!
//! Device 0 is the node holding the console. Device `n > 0` is the `n`th
//! node down the chain, reached through a [`BootCommand`] relayed over the bus.
use crate::utilities::packet::{PacketReader, PacketWriter};

/// Chain bus opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Followed by a one byte read of the node's [`RespStatus`]
    Status = 0x08,
    /// (address: u8). Only honoured at the broadcast address
    SetAddress = 0x09,
    /// Raises the boot-out line, releasing the next node
    SetBootOut = 0x10,
    /// (address: u32) (length: u32)
    Erase = 0x11,
    /// (address: u32) (length: u16) (crc: u32) (data)
    Write = 0x12,
    /// (address: u32)
    RunApp = 0x13,
    Invalid = 0xFF,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x08 => Opcode::Status,
            0x09 => Opcode::SetAddress,
            0x10 => Opcode::SetBootOut,
            0x11 => Opcode::Erase,
            0x12 => Opcode::Write,
            0x13 => Opcode::RunApp,
            _ => Opcode::Invalid,
        }
    }
}

/// Argument bytes following the opcode of an erase.
pub const ERASE_ARGUMENTS: usize = 8;
/// Argument bytes following the opcode of a write, before its data.
pub const WRITE_HEADER: usize = 10;
/// Argument bytes following the opcode of a run request.
pub const RUN_APP_ARGUMENTS: usize = 4;
/// Largest encoded bus command, other than its write data.
pub const MAX_COMMAND_OVERHEAD: usize = 1 + WRITE_HEADER;

/// Wire level result of a command. The only status vocabulary that crosses
/// the bus or reaches the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
#[repr(u8)]
pub enum RespStatus {
    Busy = 0x00,
    InvalidFormat = 0x10,
    InvalidArgs = 0x11,
    InvalidChecksum = 0x12,
    FlashError = 0x13,
    UnknownError = 0x14,
    Done = 0x5A,
}

impl RespStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => RespStatus::Busy,
            0x10 => RespStatus::InvalidFormat,
            0x11 => RespStatus::InvalidArgs,
            0x12 => RespStatus::InvalidChecksum,
            0x13 => RespStatus::FlashError,
            0x14 => RespStatus::UnknownError,
            0x5A => RespStatus::Done,
            _ => return None,
        })
    }

    /// Single character reported to the host for this status.
    pub fn as_char(self) -> char {
        match self {
            RespStatus::Done => 'D',
            RespStatus::InvalidFormat => 'I',
            RespStatus::InvalidArgs => 'A',
            RespStatus::InvalidChecksum => 'C',
            RespStatus::FlashError => 'F',
            RespStatus::UnknownError => 'U',
            RespStatus::Busy => '?',
        }
    }
}

/// Command addressed to one chain node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootCommand<'a> {
    Status,
    SetAddress(u8),
    SetBootOut,
    Erase { address: u32, length: u32 },
    Write { address: u32, crc: u32, data: &'a [u8] },
    RunApp { address: u32 },
}

impl<'a> BootCommand<'a> {
    pub fn opcode(&self) -> Opcode {
        match self {
            BootCommand::Status => Opcode::Status,
            BootCommand::SetAddress(_) => Opcode::SetAddress,
            BootCommand::SetBootOut => Opcode::SetBootOut,
            BootCommand::Erase { .. } => Opcode::Erase,
            BootCommand::Write { .. } => Opcode::Write,
            BootCommand::RunApp { .. } => Opcode::RunApp,
        }
    }

    /// Appends the bus encoding to `packet`. Returns false if it doesn't fit,
    /// leaving `packet` cleared.
    pub fn encode<const N: usize>(&self, packet: &mut PacketWriter<N>) -> bool {
        let opcode = self.opcode() as u8;
        let fits = match *self {
            BootCommand::Status | BootCommand::SetBootOut => packet.put(opcode),
            BootCommand::SetAddress(address) => packet.put(opcode) && packet.put(address),
            BootCommand::Erase { address, length } => {
                packet.put(opcode) && packet.put(address) && packet.put(length)
            }
            BootCommand::Write { address, crc, data } => {
                data.len() <= u16::MAX as usize
                    && packet.put(opcode)
                    && packet.put(address)
                    && packet.put(data.len() as u16)
                    && packet.put(crc)
                    && packet.put_slice(data)
            }
            BootCommand::RunApp { address } => packet.put(opcode) && packet.put(address),
        };
        if !fits {
            packet.clear();
        }
        fits
    }
}

/// Command received from the host console.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostCommand<'a> {
    Write { device: u8, address: u32, crc: u32, data: &'a [u8] },
    Erase { device: u8, address: u32, length: u32 },
    Jump { device: u8, address: u32 },
}

impl<'a> HostCommand<'a> {
    /// Parses a decoded host frame. Unknown opcodes, truncated fields, empty
    /// write data and trailing bytes are all `InvalidFormat`.
    pub fn parse(frame: &'a [u8]) -> Result<Self, RespStatus> {
        let mut packet = PacketReader::new(frame);
        if packet.remaining_bytes() < 1 {
            return Err(RespStatus::InvalidFormat);
        }
        let command = match packet.read::<u8>() {
            b'W' => {
                if packet.remaining_bytes() < 1 + 4 + 4 + 1 {
                    return Err(RespStatus::InvalidFormat);
                }
                let (device, address, crc) = (packet.read(), packet.read(), packet.read());
                HostCommand::Write { device, address, crc, data: packet.rest() }
            }
            b'E' => {
                if packet.remaining_bytes() != 1 + 4 + 4 {
                    return Err(RespStatus::InvalidFormat);
                }
                HostCommand::Erase { device: packet.read(), address: packet.read(), length: packet.read() }
            }
            b'J' => {
                if packet.remaining_bytes() != 1 + 4 {
                    return Err(RespStatus::InvalidFormat);
                }
                HostCommand::Jump { device: packet.read(), address: packet.read() }
            }
            _ => return Err(RespStatus::InvalidFormat),
        };
        Ok(command)
    }

    pub fn device(&self) -> u8 {
        match *self {
            HostCommand::Write { device, .. }
            | HostCommand::Erase { device, .. }
            | HostCommand::Jump { device, .. } => device,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_erase_parses_big_endian_fields() {
        // Given
        let frame = [b'E', 0x02, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00];

        // When
        let command = HostCommand::parse(&frame);

        // Then
        assert_eq!(
            command,
            Ok(HostCommand::Erase { device: 2, address: 0x0801_0000, length: 0x800 })
        );
    }

    #[test]
    fn host_write_takes_the_rest_of_the_frame_as_data() {
        // Given
        let frame = [b'W', 0x00, 0x08, 0x00, 0x00, 0x10, 0xCA, 0xFE, 0xBA, 0xBE, 1, 2, 3];

        // When
        let command = HostCommand::parse(&frame);

        // Then
        assert_eq!(
            command,
            Ok(HostCommand::Write { device: 0, address: 0x0800_0010, crc: 0xCAFE_BABE, data: &[1, 2, 3] })
        );
    }

    #[test]
    fn malformed_host_frames_are_invalid_format() {
        let write_without_data = [b'W', 0x00, 0x08, 0x00, 0x00, 0x10, 0xCA, 0xFE, 0xBA, 0xBE];
        let erase_with_trailing_byte = [b'E', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let short_jump = [b'J', 0, 0x08, 0, 0];
        let unknown = [b'X', 0, 0, 0, 0, 0];

        let frames: [&[u8]; 5] =
            [&write_without_data, &erase_with_trailing_byte, &short_jump, &unknown, &[]];

        for frame in frames {
            assert_eq!(HostCommand::parse(frame), Err(RespStatus::InvalidFormat), "{:?}", frame);
        }
    }

    #[test]
    fn relayed_write_carries_length_and_checksum() {
        // Given
        let mut packet = PacketWriter::<32>::new();
        let command = BootCommand::Write { address: 0x0800_8000, crc: 0x0102_0304, data: &[0xAA, 0xBB] };

        // When
        let fits = command.encode(&mut packet);

        // Then
        assert!(fits);
        assert_eq!(
            packet.as_bytes(),
            &[0x12, 0x08, 0x00, 0x80, 0x00, 0x00, 0x02, 0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB]
        );
    }

    #[test]
    fn commands_that_do_not_fit_leave_nothing_behind() {
        // Given
        let mut packet = PacketWriter::<6>::new();

        // When
        let fits = BootCommand::Erase { address: 1, length: 2 }.encode(&mut packet);

        // Then
        assert!(!fits);
        assert!(packet.is_empty());
    }

    #[test]
    fn statuses_round_trip_through_their_wire_byte() {
        for status in [
            RespStatus::Busy,
            RespStatus::InvalidFormat,
            RespStatus::InvalidArgs,
            RespStatus::InvalidChecksum,
            RespStatus::FlashError,
            RespStatus::UnknownError,
            RespStatus::Done,
        ] {
            assert_eq!(RespStatus::from_byte(status as u8), Some(status));
        }
        assert_eq!(RespStatus::from_byte(0x42), None);
        assert_eq!(Opcode::from_byte(0x42), Opcode::Invalid);
    }
}
