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

pub mod hx711;
pub mod simulated;

/// Lowest and highest code a converter can report. A reading on either rail means the input is
/// out of range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdcRails {
    pub min: i32,
    pub max: i32,
}

impl AdcRails {
    pub fn is_railed(&self, reading: i32) -> bool {
        reading == self.min || reading == self.max
    }
}

/// A load cell amplifier that hands out one signed conversion at a time.
#[allow(async_fn_in_trait)]
pub trait AsyncStrainGaugeInterface {
    type Error;

    /// Bring the amplifier to a known, powered state ready for readings.
    async fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Next conversion. Powers the amplifier up first if needed.
    async fn get_next_reading(&mut self) -> Result<i32, Self::Error>;

    async fn power_down(&mut self) -> Result<(), Self::Error>;

    /// Returns once the analog front end has settled.
    async fn power_up(&mut self) -> Result<(), Self::Error>;

    fn rails(&self) -> AdcRails;
}
