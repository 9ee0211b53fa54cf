//! Bounded big endian packet builder and reader.
use heapless::Vec;

/// Fixed width value with a big endian wire representation.
pub trait Wire: Copy + Default {
    const SIZE: usize;
    fn put_into(self, out: &mut [u8]);
    fn take_from(bytes: &[u8]) -> Self;
}

macro_rules! wire {
    ($($t:ty,)+) => {
        $(
            impl Wire for $t {
                const SIZE: usize = core::mem::size_of::<$t>();
                fn put_into(self, out: &mut [u8]) { out.copy_from_slice(&self.to_be_bytes()) }
                fn take_from(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_be_bytes(raw)
                }
            }
        )+
    };
}

wire!(u8, u16, u32, i8, i16, i32, f32,);

/// Packet under construction, backed by a fixed capacity buffer.
///
/// # Example
/// ```
/// # use chainloader_lib::utilities::packet::*;
/// let mut packet = PacketWriter::<8>::new();
/// assert!(packet.put(0x12u8));
/// assert!(packet.put(0x0801_0000u32));
/// assert!(!packet.put(0u32)); // only three bytes left
/// assert_eq!(packet.as_bytes(), &[0x12, 0x08, 0x01, 0x00, 0x00]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct PacketWriter<const N: usize> {
    buffer: Vec<u8, N>,
}

impl<const N: usize> PacketWriter<N> {
    pub const fn new() -> Self { Self { buffer: Vec::new() } }

    /// Appends `value`, or returns false (writing nothing) if it doesn't fit.
    pub fn put<T: Wire>(&mut self, value: T) -> bool {
        let start = self.buffer.len();
        if self.remaining_capacity() < T::SIZE || self.buffer.resize_default(start + T::SIZE).is_err() {
            return false;
        }
        value.put_into(&mut self.buffer[start..]);
        true
    }

    /// Appends raw bytes, or returns false (writing nothing) if they don't fit.
    pub fn put_slice(&mut self, bytes: &[u8]) -> bool { self.buffer.extend_from_slice(bytes).is_ok() }

    pub fn remaining_capacity(&self) -> usize { N - self.buffer.len() }
    pub fn len(&self) -> usize { self.buffer.len() }
    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }
    pub fn as_bytes(&self) -> &[u8] { &self.buffer }
    pub fn clear(&mut self) { self.buffer.clear() }
}

/// Cursor over a received packet.
///
/// Reading a value past the end yields its zero value and leaves the
/// cursor in place, so callers check `remaining_bytes()` first.
#[derive(Clone, Debug)]
pub struct PacketReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self { Self { bytes, cursor: 0 } }

    pub fn read<T: Wire>(&mut self) -> T {
        match self.read_slice(T::SIZE) {
            Some(bytes) => T::take_from(bytes),
            None => T::default(),
        }
    }

    /// Next `length` bytes, or `None` (consuming nothing) if fewer remain.
    pub fn read_slice(&mut self, length: usize) -> Option<&'a [u8]> {
        if self.remaining_bytes() < length {
            return None;
        }
        let slice = &self.bytes[self.cursor..self.cursor + length];
        self.cursor += length;
        Some(slice)
    }

    /// Everything not yet read.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.cursor..];
        self.cursor = self.bytes.len();
        rest
    }

    pub fn remaining_bytes(&self) -> usize { self.bytes.len() - self.cursor }
}
