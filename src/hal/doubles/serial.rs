use crate::hal::serial;
use std::{collections::VecDeque, string::String, vec::Vec};

/// Serial port fed from a queue of incoming bytes, recording what's written.
#[derive(Debug, Default)]
pub struct MockSerial {
    pub incoming: VecDeque<u8>,
    pub write_record: Vec<u8>,
}

impl MockSerial {
    pub fn with_incoming(bytes: &[u8]) -> Self {
        Self { incoming: bytes.iter().cloned().collect(), write_record: Vec::new() }
    }

    pub fn written_text(&self) -> String { String::from_utf8_lossy(&self.write_record).into_owned() }
}

impl serial::Write<u8> for MockSerial {
    type Error = ();

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_record.push(word);
        Ok(())
    }
}

impl serial::Read<u8> for MockSerial {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.incoming.pop_front().ok_or(nb::Error::WouldBlock)
    }
}
