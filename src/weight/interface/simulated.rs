// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! A software HX711 behind a pair of `embedded-hal` pins.
//!
//! The clock pin drives the chip state and the data pin reports it, so the real [`Hx711`] driver
//! runs against it unchanged. Used for the `--simulate` rig and for tests.

use crate::weight::interface::hx711::{Hx711, Hx711Gain, Hx711Timing};
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const DATA_BITS: usize = 24;
const POWER_DOWN_THRESHOLD: Duration = Duration::from_micros(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conversion {
    pub value: i32,
    /// Total clock pulses seen for the frame, data bits included.
    pub pulses: usize,
}

#[derive(Debug)]
struct Frame {
    value: i32,
    pulses: usize,
}

impl Frame {
    fn bit(&self) -> bool {
        let pattern = (self.value as u32) & 0x00FF_FFFF;
        match self.pulses {
            1..=DATA_BITS => (pattern >> (DATA_BITS - self.pulses)) & 0x1 == 0x1,
            // DOUT stays high between the last data bit and the next conversion
            _ => true,
        }
    }
}

#[derive(Debug)]
struct SimState {
    samples: VecDeque<i32>,
    last_value: i32,
    busy_polls: u32,
    frame: Option<Frame>,
    clock_high_since: Option<Instant>,
    long_pulses: u32,
    conversions: Vec<Conversion>,
}

impl SimState {
    fn next_value(&mut self) -> i32 {
        if let Some(value) = self.samples.pop_front() {
            self.last_value = value;
        }
        self.last_value
    }

    fn finish_frame(&mut self, pulses: usize) {
        if let Some(frame) = self.frame.take() {
            self.conversions.push(Conversion {
                value: frame.value,
                pulses,
            });
        }
    }

    fn clock_rising(&mut self) {
        if self.clock_high_since.is_some() {
            return;
        }
        self.clock_high_since = Some(Instant::now());
        match self.frame.as_mut() {
            Some(frame) => frame.pulses += 1,
            None if self.busy_polls == 0 => {
                let value = self.next_value();
                self.frame = Some(Frame { value, pulses: 1 });
            }
            None => {}
        }
    }

    fn clock_falling(&mut self) {
        let Some(since) = self.clock_high_since.take() else {
            return;
        };
        if since.elapsed() < POWER_DOWN_THRESHOLD {
            return;
        }

        // Chip powered down. A frame whose data bits were all clocked out still counts, the long
        // pulse itself is not a gain pulse. Anything shorter is abandoned and re-queued.
        self.long_pulses += 1;
        if let Some(frame) = self.frame.as_ref() {
            let pulses = frame.pulses - 1;
            if pulses >= DATA_BITS {
                self.finish_frame(pulses);
            } else {
                self.samples.push_front(frame.value);
                self.frame = None;
            }
        }
    }

    fn data_level(&mut self) -> bool {
        if self.clock_high_since.is_some() {
            return self.frame.as_ref().map(Frame::bit).unwrap_or(true);
        }

        if let Some(frame) = self.frame.as_ref() {
            if frame.pulses > DATA_BITS {
                let pulses = frame.pulses;
                self.finish_frame(pulses);
            } else {
                return frame.bit();
            }
        }

        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            false
        }
    }
}

/// Handle to the shared chip state. Cheap to clone; every clone sees the same chip.
#[derive(Clone, Debug)]
pub struct SimulatedHx711 {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedHx711 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHx711 {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                samples: VecDeque::new(),
                last_value: 0,
                busy_polls: 0,
                frame: None,
                clock_high_since: None,
                long_pulses: 0,
                conversions: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pins(&self) -> (SimulatedClockPin, SimulatedDataPin) {
        (
            SimulatedClockPin { chip: self.clone() },
            SimulatedDataPin { chip: self.clone() },
        )
    }

    /// HX711 driver wired to this chip.
    pub fn driver(
        &self,
        gain: Hx711Gain,
        timing: Hx711Timing,
    ) -> Hx711<SimulatedClockPin, SimulatedDataPin> {
        let (clock_pin, data_pin) = self.pins();
        Hx711::new(clock_pin, data_pin, gain).with_timing(timing)
    }

    /// Queue conversion results. Once the queue runs dry the last value repeats.
    pub fn push_samples(&self, samples: impl IntoIterator<Item = i32>) {
        self.state().samples.extend(samples);
    }

    /// Replace any queued conversions with a constant reading.
    pub fn set_constant(&self, value: i32) {
        let mut state = self.state();
        state.samples.clear();
        state.last_value = value;
    }

    /// Number of DOUT polls that report "busy" before the next conversion becomes available.
    pub fn set_busy_polls(&self, polls: u32) {
        self.state().busy_polls = polls;
    }

    pub fn pending_samples(&self) -> usize {
        self.state().samples.len()
    }

    /// Clock pulses of the frame in progress, or of the last completed frame.
    pub fn frame_pulses(&self) -> usize {
        let state = self.state();
        match state.frame.as_ref() {
            Some(frame) => frame.pulses,
            None => state.conversions.last().map(|c| c.pulses).unwrap_or(0),
        }
    }

    /// Count of clock-high periods long enough to power the chip down (resets and power cycles).
    pub fn long_pulses(&self) -> u32 {
        self.state().long_pulses
    }

    pub fn conversions(&self) -> Vec<Conversion> {
        self.state().conversions.clone()
    }
}

pub struct SimulatedClockPin {
    chip: SimulatedHx711,
}

pub struct SimulatedDataPin {
    chip: SimulatedHx711,
}

impl ErrorType for SimulatedClockPin {
    type Error = Infallible;
}

impl OutputPin for SimulatedClockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.chip.state().clock_falling();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.chip.state().clock_rising();
        Ok(())
    }
}

impl ErrorType for SimulatedDataPin {
    type Error = Infallible;
}

impl InputPin for SimulatedDataPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.chip.state().data_level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_frame(clk: &mut SimulatedClockPin, data: &mut SimulatedDataPin, pulses: usize) -> u32 {
        let mut value = 0u32;
        for pulse in 0..pulses {
            clk.set_high().unwrap();
            if pulse < DATA_BITS {
                value = (value << 1) | data.is_high().unwrap() as u32;
            }
            clk.set_low().unwrap();
        }
        value
    }

    #[test]
    fn shifts_out_msb_first() {
        let chip = SimulatedHx711::new();
        chip.push_samples([0x0A_BCDE]);
        let (mut clk, mut data) = chip.pins();

        assert!(data.is_low().unwrap());
        assert_eq!(clock_frame(&mut clk, &mut data, 25), 0x0A_BCDE);
        assert_eq!(chip.frame_pulses(), 25);
    }

    #[test]
    fn reports_busy_then_ready() {
        let chip = SimulatedHx711::new();
        chip.set_busy_polls(2);
        let (_clk, mut data) = chip.pins();

        assert!(data.is_high().unwrap());
        assert!(data.is_high().unwrap());
        assert!(data.is_low().unwrap());
    }

    #[test]
    fn repeats_last_value_when_queue_is_empty() {
        let chip = SimulatedHx711::new();
        chip.push_samples([-3]);
        let (mut clk, mut data) = chip.pins();

        for _ in 0..3 {
            assert!(data.is_low().unwrap());
            let frame = clock_frame(&mut clk, &mut data, 25);
            assert_eq!(frame, 0xFF_FFFD);
        }
        // the third frame is completed by the next poll
        assert!(data.is_low().unwrap());
        assert_eq!(chip.conversions().len(), 3);
        assert_eq!(chip.pending_samples(), 0);
    }
}
