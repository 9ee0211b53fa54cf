use crate::hal::gpio::{InputPin, OutputPin};
use std::vec::Vec;

#[derive(Clone, Debug, Default)]
pub struct MockPin {
    pub state: bool,
    pub changes: Vec<bool>,
}

impl MockPin {
    pub fn high() -> Self { Self { state: true, changes: Vec::new() } }
}

impl OutputPin for MockPin {
    fn set_low(&mut self) {
        self.state = false;
        self.changes.push(self.state);
    }

    fn set_high(&mut self) {
        self.state = true;
        self.changes.push(self.state);
    }
}

impl InputPin for MockPin {
    fn is_high(&self) -> bool { self.state }
}
