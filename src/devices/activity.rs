//! Polled activity indicator.
//!
//! A pulse lights the LED for its length, then keeps it at rest for the same
//! length before a queued pulse may start, so bursts of activity stay visible
//! as distinct blinks. Nothing happens between calls to
//! [`ActivityLed::update`].
use crate::hal::{
    led::Toggle,
    time::{Instant, Milliseconds},
};

#[derive(Copy, Clone, Debug)]
struct Pulse<I: Instant> {
    started: I,
    length: Milliseconds,
}

pub struct ActivityLed<L: Toggle, I: Instant> {
    led: L,
    idle_on: bool,
    current: Option<Pulse<I>>,
    queued: Option<Milliseconds>,
}

impl<L: Toggle, I: Instant> ActivityLed<L, I> {
    pub fn new(led: L, idle_on: bool) -> Self {
        let mut activity = Self { led, idle_on, current: None, queued: None };
        activity.rest();
        activity
    }

    /// Queues a pulse, replacing any pulse already queued.
    pub fn pulse(&mut self, length: Milliseconds) { self.queued = Some(length); }

    /// Level shown while no pulse is lit. Takes effect immediately unless
    /// a pulse is in progress.
    pub fn set_idle_polarity(&mut self, idle_on: bool) {
        self.idle_on = idle_on;
        if self.current.is_none() {
            self.rest();
        }
    }

    pub fn update(&mut self, now: I) {
        match self.current {
            Some(pulse) => {
                let elapsed = now - pulse.started;
                if elapsed.0 >= pulse.length.0.saturating_mul(2) {
                    match self.queued.take() {
                        Some(length) => {
                            let started = pulse.started + Milliseconds(pulse.length.0.saturating_mul(2));
                            self.light(started, length);
                        }
                        None => {
                            self.current = None;
                            self.rest();
                        }
                    }
                } else if elapsed >= pulse.length {
                    self.rest();
                }
            }
            None => {
                if let Some(length) = self.queued.take() {
                    self.light(now, length);
                }
            }
        }
    }

    pub fn led(&self) -> &L { &self.led }

    fn light(&mut self, started: I, length: Milliseconds) {
        self.current = Some(Pulse { started, length });
        if self.idle_on {
            self.led.off();
        } else {
            self.led.on();
        }
    }

    fn rest(&mut self) {
        if self.idle_on {
            self.led.on();
        } else {
            self.led.off();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::led::{Logic, MonochromeLed},
        hal::{
            doubles::{gpio::MockPin, time::MockInstant},
            time::U32Ext,
        },
    };

    type Led = ActivityLed<MonochromeLed<MockPin>, MockInstant>;

    fn activity(idle_on: bool) -> Led { ActivityLed::new(MonochromeLed::new(MockPin::default(), Logic::Direct), idle_on) }

    fn is_lit(led: &Led) -> bool { led.led().is_on() }

    #[test]
    fn a_pulse_lights_for_its_length() {
        // Given
        let mut led = activity(false);
        led.pulse(25.ms());

        // When / Then
        led.update(MockInstant(100));
        assert!(is_lit(&led));
        led.update(MockInstant(124));
        assert!(is_lit(&led));
        led.update(MockInstant(125));
        assert!(!is_lit(&led));
        led.update(MockInstant(150));
        assert!(!is_lit(&led));
    }

    #[test]
    fn pulses_queued_mid_pulse_wait_for_the_rest_period() {
        // Given
        let mut led = activity(false);
        led.pulse(10.ms());
        led.update(MockInstant(0));

        // When
        led.pulse(10.ms());
        led.update(MockInstant(5));
        led.update(MockInstant(12));
        let resting = is_lit(&led);
        led.update(MockInstant(20));

        // Then
        assert!(!resting);
        assert!(is_lit(&led));
        led.update(MockInstant(30));
        assert!(!is_lit(&led));
    }

    #[test]
    fn inverted_idle_polarity_blinks_off() {
        // Given
        let mut led = activity(false);
        led.set_idle_polarity(true);
        assert!(is_lit(&led));

        // When
        led.pulse(25.ms());
        led.update(MockInstant(0));

        // Then
        assert!(!is_lit(&led));
        led.update(MockInstant(30));
        assert!(is_lit(&led));
    }

    #[test]
    fn idle_polarity_changes_wait_for_the_pulse_to_end() {
        // Given
        let mut led = activity(false);
        led.pulse(25.ms());
        led.update(MockInstant(0));

        // When
        led.set_idle_polarity(true);

        // Then
        assert!(is_lit(&led));
        led.update(MockInstant(50));
        assert!(is_lit(&led));
    }
}
