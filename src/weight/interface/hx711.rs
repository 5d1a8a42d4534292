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

//! Bit-banged HX711 driver.
//!
//! DOUT goes low when a conversion is ready. The 24 data bits are shifted out MSB first, one per
//! PD_SCK pulse, and the number of extra pulses after the data selects the channel and gain of the
//! *next* conversion. Holding PD_SCK high for more than 60us powers the chip down.

use crate::weight::interface::{AdcRails, AsyncStrainGaugeInterface};
use embassy_time::{block_for, Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use log::{trace, warn};

/// Channel and gain selection, by total PD_SCK pulses per conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hx711Gain {
    Gain128,
    Gain64,
    Gain32ChannelB,
}

impl Hx711Gain {
    fn tick_count(&self) -> usize {
        match self {
            Hx711Gain::Gain128 => 25,
            Hx711Gain::Gain64 => 27,
            Hx711Gain::Gain32ChannelB => 26,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hx711Timing {
    /// How long to wait for DOUT to go low before pulsing a reset and waiting again.
    pub ready_timeout: Duration,
    /// Sleep between DOUT polls while waiting for a conversion.
    pub poll_interval: Duration,
    /// Settling time after power up before readings are trusted.
    pub power_up_settle: Duration,
}

impl Default for Hx711Timing {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            power_up_settle: Duration::from_millis(100),
        }
    }
}

const POWER_DOWN_HOLD: Duration = Duration::from_micros(100);
const CLK_HALF_PERIOD: Duration = Duration::from_micros(1);
const VALID_DATA_BITS: usize = 24;

pub const MAX_VALUE: i32 = (1 << 23) - 1;
pub const MIN_VALUE: i32 = -(1 << 23);

/// Interpret the low 24 bits of `data` as a two's complement value.
pub fn sign_extend_24(data: u32) -> i32 {
    let data_mask = (1u32 << VALID_DATA_BITS) - 1;
    let mut value = (data & data_mask) as i32;
    // extend sign if bit 24 is 1
    if (value >> 23) & 0x1 == 0x1 {
        value |= 0xFF000000u32 as i32;
    }
    value
}

#[derive(Debug)]
pub enum Error<OutPinE, InPinE> {
    OutPin(OutPinE),
    InPin(InPinE),
}

pub struct Hx711<CLK, DATA> {
    clock_pin: CLK,
    data_pin: DATA,
    gain_clocks: usize,
    powered_up: bool,
    timing: Hx711Timing,
    reset_count: u32,
}

impl<CLK, DATA, ClkE, DataE> Hx711<CLK, DATA>
where
    CLK: OutputPin<Error = ClkE>,
    DATA: InputPin<Error = DataE>,
{
    pub fn new(clock_pin: CLK, data_pin: DATA, gain: Hx711Gain) -> Self {
        Self {
            clock_pin,
            data_pin,
            gain_clocks: gain.tick_count(),
            powered_up: false,
            timing: Hx711Timing::default(),
            reset_count: 0,
        }
    }

    pub fn with_timing(mut self, timing: Hx711Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Number of reset pulses issued because the chip did not become ready in time.
    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    fn reset_pulse(&mut self) -> Result<(), Error<ClkE, DataE>> {
        self.clock_pin.set_high().map_err(Error::OutPin)?;
        block_for(POWER_DOWN_HOLD);
        self.clock_pin.set_low().map_err(Error::OutPin)?;
        self.reset_count = self.reset_count.wrapping_add(1);
        Ok(())
    }

    /// Poll DOUT until the chip reports a conversion. Never gives up: on timeout the chip is
    /// reset and the wait starts again.
    async fn wait_for_ready(&mut self) -> Result<(), Error<ClkE, DataE>> {
        let mut deadline = Instant::now() + self.timing.ready_timeout;
        while self.data_pin.is_high().map_err(Error::InPin)? {
            if Instant::now() >= deadline {
                warn!(
                    "HX711 not ready after {} ms, pulsing reset",
                    self.timing.ready_timeout.as_millis()
                );
                self.reset_pulse()?;
                deadline = Instant::now() + self.timing.ready_timeout;
            }
            Timer::after(self.timing.poll_interval).await;
        }
        Ok(())
    }

    /// Clock out one frame. Must not yield: a preempted high phase longer than 60us powers the
    /// chip down mid-frame.
    fn shift_in_frame(&mut self) -> Result<u32, Error<ClkE, DataE>> {
        let mut data: u32 = 0;
        for bit in 0..self.gain_clocks {
            self.clock_pin.set_high().map_err(Error::OutPin)?;
            block_for(CLK_HALF_PERIOD);
            if bit < VALID_DATA_BITS {
                data <<= 1;
                if self.data_pin.is_high().map_err(Error::InPin)? {
                    data |= 0x1;
                }
            }
            self.clock_pin.set_low().map_err(Error::OutPin)?;
            block_for(CLK_HALF_PERIOD);
        }
        Ok(data)
    }
}

impl<CLK, DATA, ClkE, DataE> AsyncStrainGaugeInterface for Hx711<CLK, DATA>
where
    CLK: OutputPin<Error = ClkE>,
    DATA: InputPin<Error = DataE>,
{
    type Error = Error<ClkE, DataE>;

    async fn initialize(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_low().map_err(Error::OutPin)?;
        self.power_up().await
    }

    async fn get_next_reading(&mut self) -> Result<i32, Self::Error> {
        if !self.powered_up {
            self.power_up().await?;
        }

        self.wait_for_ready().await?;
        let data = self.shift_in_frame()?;
        let value = sign_extend_24(data);
        trace!("HX711 frame {:#08x} -> {}", data, value);
        Ok(value)
    }

    async fn power_down(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_high().map_err(Error::OutPin)?;
        Timer::after(POWER_DOWN_HOLD).await;
        self.powered_up = false;
        Ok(())
    }

    async fn power_up(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_low().map_err(Error::OutPin)?;
        Timer::after(self.timing.power_up_settle).await;
        self.powered_up = true;
        Ok(())
    }

    fn rails(&self) -> AdcRails {
        AdcRails {
            min: MIN_VALUE,
            max: MAX_VALUE,
        }
    }
}
