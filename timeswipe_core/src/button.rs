//! Debounced edge detection for the user button.
//!
//! A level change is accepted after `debounce_n` consecutive polls agree on
//! it. Every accepted change bumps a counter that is never reset, so the
//! counter keeps growing across stream start/stop cycles.

use crate::events::ButtonEvent;

#[derive(Debug, Clone)]
pub struct ButtonTracker {
    debounce_n: u8,
    stable: bool,
    candidate: bool,
    run: u8,
    counter: u64,
}

impl ButtonTracker {
    pub fn new(debounce_n: u8) -> Self {
        Self {
            debounce_n: debounce_n.max(1),
            stable: false,
            candidate: false,
            run: 0,
            counter: 0,
        }
    }

    /// Feed one sampled level; returns a transition once it is stable.
    pub fn poll(&mut self, pressed: bool) -> Option<ButtonEvent> {
        if pressed == self.stable {
            self.run = 0;
            return None;
        }
        if pressed == self.candidate && self.run > 0 {
            self.run = self.run.saturating_add(1);
        } else {
            self.candidate = pressed;
            self.run = 1;
        }
        if self.run < self.debounce_n {
            return None;
        }
        self.stable = pressed;
        self.run = 0;
        self.counter += 1;
        Some(ButtonEvent {
            pressed,
            counter: self.counter,
        })
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }
}
