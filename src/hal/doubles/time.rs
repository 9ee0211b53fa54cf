use crate::hal::time;
use std::cell::Cell;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MockInstant(pub u32);

/// Clock that moves forward by a fixed step every time it is read, so
/// polling loops written against `Now` always make progress.
#[derive(Debug)]
pub struct MockClock {
    milliseconds: Cell<u32>,
    step: u32,
}

impl MockClock {
    pub fn new(step: u32) -> Self { Self { milliseconds: Cell::new(0), step } }
}

impl time::Instant for MockInstant {}

impl time::Now for MockClock {
    type I = MockInstant;
    fn now(&self) -> MockInstant {
        let now = self.milliseconds.get();
        self.milliseconds.set(now + self.step);
        MockInstant(now)
    }
}

impl core::ops::Sub for MockInstant {
    type Output = time::Milliseconds;
    fn sub(self, rhs: Self) -> Self::Output { time::Milliseconds(self.0.wrapping_sub(rhs.0)) }
}

impl core::ops::Add<time::Milliseconds> for MockInstant {
    type Output = Self;
    fn add(self, rhs: time::Milliseconds) -> Self { MockInstant(self.0 + rhs.0) }
}
