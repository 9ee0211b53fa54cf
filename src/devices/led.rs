use crate::hal::{gpio::OutputPin, led::Toggle};

/// Solid (non-blinking) monochrome LED
///
/// # Example
/// ```
/// # use chainloader_lib::devices::led::*;
/// # use chainloader_lib::hal::{led::Toggle, doubles::gpio::MockPin};
/// let mut led = MonochromeLed::new(MockPin::default(), Logic::Inverted);
/// # assert!(led.pin().state);
///
/// led.toggle();
/// assert!(led.is_on());
/// # assert!(!led.pin().state);
/// ```
pub struct MonochromeLed<Pin: OutputPin> {
    pin: Pin,
    is_on: bool,
    logic: Logic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Logic {
    /// Logical high equals "on"
    Direct,
    /// Logical high equals "off"
    Inverted,
}

// Extension trait to ensure LED pins are correctly
// operated based on the led's direct or inverted logic
trait LedPin: OutputPin {
    fn off(&mut self, logic: Logic) {
        match logic {
            Logic::Direct => self.set_low(),
            Logic::Inverted => self.set_high(),
        }
    }

    fn on(&mut self, logic: Logic) {
        match logic {
            Logic::Direct => self.set_high(),
            Logic::Inverted => self.set_low(),
        }
    }
}

impl<Pin: OutputPin> LedPin for Pin {}

impl<Pin: OutputPin> MonochromeLed<Pin> {
    pub fn new(mut pin: Pin, logic: Logic) -> Self {
        pin.off(logic);
        Self { pin, is_on: false, logic }
    }

    pub fn is_on(&self) -> bool { self.is_on }

    #[doc(hidden)]
    pub fn pin(&self) -> &Pin { &self.pin }
}

impl<Pin: OutputPin> Toggle for MonochromeLed<Pin> {
    fn on(&mut self) {
        if !self.is_on {
            self.pin.on(self.logic);
        }
        self.is_on = true;
    }

    fn off(&mut self) {
        if self.is_on {
            self.pin.off(self.logic);
        }
        self.is_on = false;
    }

    fn toggle(&mut self) {
        if self.is_on {
            self.off();
        } else {
            self.on();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::gpio::MockPin;

    #[test]
    fn pin_only_changes_on_transitions() {
        // Given
        let mut led = MonochromeLed::new(MockPin::default(), Logic::Direct);

        // When
        led.on();
        led.on();
        led.off();
        led.toggle();

        // Then
        assert_eq!(led.pin().changes, std::vec![false, true, false, true]);
    }
}
