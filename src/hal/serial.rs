use nb;
use ufmt::uWrite;

/// UART read half
pub trait Read<Word> {
    type Error;

    /// Reads a single word
    fn read(&mut self) -> nb::Result<Word, Self::Error>;
}

/// UART write half
pub trait Write<Word> {
    type Error;

    /// Writes a single word
    fn write(&mut self, word: Word) -> nb::Result<(), Self::Error>;
}

/// Adapts any byte serial writer for `ufmt` formatting.
///
/// # Example
/// ```
/// # use chainloader_lib::hal::{serial::Console, doubles::serial::MockSerial};
/// # use ufmt::uwriteln;
/// let mut serial = MockSerial::default();
/// uwriteln!(Console(&mut serial), "{} devices in chain", 3u8).unwrap();
/// assert_eq!(serial.written_text(), "3 devices in chain\n");
/// ```
pub struct Console<'a, S: Write<u8>>(pub &'a mut S);

impl<'a, S: Write<u8>> uWrite for Console<'a, S> {
    type Error = S::Error;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        for byte in s.bytes() {
            nb::block!(self.0.write(byte))?;
        }
        Ok(())
    }
}
