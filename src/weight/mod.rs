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

use crate::weight::filter::NoiseReport;

pub mod calibration;
pub mod filter;
pub mod interface;
pub mod messaging;
#[allow(clippy::module_inception)]
pub mod weight;

#[allow(async_fn_in_trait)]
pub trait WeighingSystem {
    type Error;

    /// Average the unloaded cell and store it as the zero offset. Returns the new offset.
    async fn tare(&mut self) -> Result<f32, Self::Error>;

    /// Derive raw counts per gram from a known reference mass on the cell. Returns the new
    /// factor.
    async fn calibrate(&mut self, known_weight_grams: f32) -> Result<f32, Self::Error>;

    /// Median of `samples` fresh readings, in grams.
    async fn read_weight_grams(&mut self, samples: usize) -> Result<f32, Self::Error>;

    /// Power cycle the ADC front end.
    async fn reset_hardware(&mut self) -> Result<(), Self::Error>;

    async fn analyse_noise(&mut self, samples: usize) -> Result<NoiseReport, Self::Error>;

    /// Next smoothed weight for continuous display.
    async fn get_reading(&mut self) -> Result<f32, Self::Error>;
}
