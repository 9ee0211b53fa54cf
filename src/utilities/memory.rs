//! Utilities to manipulate generic memory
#![macro_use]

#[macro_export]
macro_rules! kb {
    ($val:expr) => {
        $val * 1024
    };
}

/// Contiguous range of memory, `[start, start + length)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub length: u32,
}

impl Region {
    pub const fn new(start: u32, length: u32) -> Self { Self { start, length } }

    /// One past the last address. Computed in 64 bits so a region
    /// reaching the top of the address space doesn't wrap.
    pub const fn end(&self) -> u64 { self.start as u64 + self.length as u64 }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && (address as u64) < self.end()
    }

    /// Whether `[start, start + length)` lies entirely inside this region.
    pub fn contains_range(&self, start: u32, length: u32) -> bool {
        start >= self.start && start as u64 + length as u64 <= self.end()
    }

    /// Whether `[start, start + length)` shares at least one byte with this region.
    pub fn overlaps_range(&self, start: u32, length: u32) -> bool {
        length > 0 && (start as u64) < self.end() && (self.start as u64) < start as u64 + length as u64
    }
}
