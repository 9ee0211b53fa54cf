use crate::hal::time::{self, Instant};

/// Opaque snapshot of a free running cycle counter.
#[derive(Copy, Clone, Debug)]
pub struct Tick {
    counter: u32,
    cycles_per_ms: u32,
}

impl Tick {
    pub fn new(counter: u32, frequency: time::Hertz) -> Self {
        Self { counter, cycles_per_ms: (frequency.0 / 1000).max(1) }
    }
}

/// Tick subtraction to obtain a time period. Survives one counter wrap.
impl core::ops::Sub for Tick {
    type Output = time::Milliseconds;

    fn sub(self, rhs: Self) -> Self::Output {
        debug_assert!(self.cycles_per_ms == rhs.cycles_per_ms);
        time::Milliseconds(self.counter.wrapping_sub(rhs.counter) / self.cycles_per_ms)
    }
}

/// Addition between any Millisecond-convertible type and the current tick.
impl<T: Into<time::Milliseconds>> core::ops::Add<T> for Tick {
    type Output = Self;

    fn add(self, rhs: T) -> Self {
        Self {
            counter: self.counter.wrapping_add(rhs.into().0.wrapping_mul(self.cycles_per_ms)),
            cycles_per_ms: self.cycles_per_ms,
        }
    }
}

impl Instant for Tick {}
