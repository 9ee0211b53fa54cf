//! Consistent overhead byte stuffing.
//!
//! Frames are delimited by `0x00`, and the payload between delimiters is
//! stuffed so it never contains a zero. The stuffed body is a sequence of
//! blocks, each a code byte `N` followed by `N - 1` literal bytes:
//!
//! * `N` in `0x01..=0xFE` implies a zero byte after the block.
//! * `0xFF` carries 254 literal bytes and implies nothing.
//!
//! The zero implied by the last block of a frame marks its end and is not
//! part of the payload, so a body always finishes with a zero-implying block.
//!
//! # Example
//! ```
//! # use chainloader_lib::utilities::cobs::*;
//! let mut frame = [0u8; 16];
//! let length = encode_frame(&[0x45, 0x00, 0x01], &mut frame).unwrap();
//! assert_eq!(&frame[..length], &[0x00, 0x02, 0x45, 0x02, 0x01, 0x00]);
//!
//! let mut decoder = Decoder::<16>::with_buffer();
//! let mut result = Decoded::Working;
//! for byte in &frame[..length] {
//!     result = decoder.decode(*byte);
//! }
//! assert_eq!(result, Decoded::FrameReady(heapless::Vec::from_slice(&[0x45, 0x00, 0x01]).unwrap()));
//! ```
use heapless::Vec;

pub const DELIMITER: u8 = 0x00;
/// Code byte of a full block, which implies no zero.
const FULL_BLOCK: u8 = 0xFF;
const FULL_BLOCK_LITERALS: usize = FULL_BLOCK as usize - 1;

/// Largest stuffed body (delimiters excluded) for a payload of `length` bytes.
pub const fn max_encoded_length(length: usize) -> usize { length + length / FULL_BLOCK_LITERALS + 1 }

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum State {
    /// Last byte was a delimiter; the next non-zero byte opens a frame.
    AwaitingFrame,
    InFrame {
        /// Literal bytes left in the current block.
        remaining: u8,
        /// Whether the current block ends with an implied zero.
        zero_pending: bool,
    },
    /// Dropping bytes until the next delimiter.
    Discarding,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<const N: usize> {
    /// Assembling a frame.
    Working,
    /// A complete frame. The buffer has been handed over, so a fresh
    /// one must be bound before decoding continues.
    FrameReady(Vec<u8, N>),
    /// Frame discarded because it didn't fit the bound buffer.
    Overflow,
    /// Frame discarded because its stuffing was malformed.
    InvalidFormat,
    /// No buffer bound. The byte was not consumed.
    NoDestination,
}

/// Byte-at-a-time frame decoder writing into at most one bound buffer.
pub struct Decoder<const N: usize> {
    state: State,
    buffer: Option<Vec<u8, N>>,
}

impl<const N: usize> Default for Decoder<N> {
    fn default() -> Self { Self::new() }
}

impl<const N: usize> Decoder<N> {
    /// Unbound decoder. Synchronizes on the first delimiter it sees.
    pub const fn new() -> Self { Self { state: State::Discarding, buffer: None } }

    pub fn with_buffer() -> Self { Self { state: State::Discarding, buffer: Some(Vec::new()) } }

    /// Binds the destination for the next frame, replacing any bound one.
    pub fn bind(&mut self, mut buffer: Vec<u8, N>) {
        buffer.clear();
        self.buffer = Some(buffer);
    }

    pub fn is_bound(&self) -> bool { self.buffer.is_some() }

    pub fn state(&self) -> State { self.state }

    /// Drops any partial frame and resynchronizes on the next delimiter,
    /// leaving an empty buffer bound.
    pub fn reset(&mut self) {
        self.state = State::Discarding;
        match self.buffer.as_mut() {
            Some(buffer) => buffer.clear(),
            None => self.buffer = Some(Vec::new()),
        }
    }

    pub fn decode(&mut self, byte: u8) -> Decoded<N> {
        let buffer = match self.buffer.as_mut() {
            Some(buffer) => buffer,
            None => return Decoded::NoDestination,
        };

        match (self.state, byte) {
            (State::InFrame { remaining: 0, zero_pending: true }, DELIMITER) => {
                self.state = State::AwaitingFrame;
                match self.buffer.take() {
                    Some(frame) => Decoded::FrameReady(frame),
                    None => Decoded::NoDestination,
                }
            }
            (State::InFrame { .. }, DELIMITER) => {
                self.state = State::AwaitingFrame;
                self.buffer = None;
                Decoded::InvalidFormat
            }
            (_, DELIMITER) => {
                self.state = State::AwaitingFrame;
                Decoded::Working
            }
            (State::Discarding, _) => Decoded::Working,
            (State::AwaitingFrame, code) => {
                buffer.clear();
                self.state = Self::open_block(code);
                Decoded::Working
            }
            (State::InFrame { remaining: 0, zero_pending }, code) => {
                if zero_pending && buffer.push(0).is_err() {
                    return self.overflow();
                }
                self.state = Self::open_block(code);
                Decoded::Working
            }
            (State::InFrame { remaining, zero_pending }, literal) => {
                if buffer.push(literal).is_err() {
                    return self.overflow();
                }
                self.state = State::InFrame { remaining: remaining - 1, zero_pending };
                Decoded::Working
            }
        }
    }

    fn open_block(code: u8) -> State {
        State::InFrame { remaining: code - 1, zero_pending: code != FULL_BLOCK }
    }

    fn overflow(&mut self) -> Decoded<N> {
        self.state = State::Discarding;
        self.buffer = None;
        Decoded::Overflow
    }
}

/// Stuffs `payload` into `out` (no delimiters), returning the body length,
/// or `None` if `out` is too small.
pub fn encode(payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut code_index = 0;
    let mut code = 1u8;
    let mut written = 1;
    *out.get_mut(code_index)? = 0;

    for &byte in payload {
        if byte == 0 {
            out[code_index] = code;
            code_index = written;
            *out.get_mut(code_index)? = 0;
            written += 1;
            code = 1;
            continue;
        }

        *out.get_mut(written)? = byte;
        written += 1;
        code += 1;
        if code == FULL_BLOCK {
            out[code_index] = code;
            code_index = written;
            *out.get_mut(code_index)? = 0;
            written += 1;
            code = 1;
        }
    }

    out[code_index] = code;
    Some(written)
}

/// Stuffs `payload` into `out` surrounded by delimiters, returning the
/// frame length, or `None` if `out` is too small.
pub fn encode_frame(payload: &[u8], out: &mut [u8]) -> Option<usize> {
    *out.first_mut()? = DELIMITER;
    let body = encode(payload, out.get_mut(1..)?)?;
    *out.get_mut(body + 1)? = DELIMITER;
    Some(body + 2)
}
