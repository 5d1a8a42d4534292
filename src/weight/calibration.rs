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

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationState {
    Uncalibrated,
    Tared,
    Calibrated,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationError {
    /// Reference mass must be a positive number of grams.
    InvalidKnownWeight(f32),
    /// The loaded reading did not move away from the tare offset.
    NoLoadDetected,
    /// No calibration factor yet, weights cannot be computed.
    NotCalibrated,
}

/// Zero offset and sensitivity of the load cell, both in raw ADC counts.
///
/// The pair is only ever replaced as a whole value, so a copy taken by a reader is always
/// consistent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    tare_offset: f32,
    calibration_factor: f32,
    state: CalibrationState,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibration {
    pub const fn new() -> Self {
        Self {
            tare_offset: 0.0,
            calibration_factor: 0.0,
            state: CalibrationState::Uncalibrated,
        }
    }

    /// Rebuild from persisted values. A missing or zero factor leaves the scale uncalibrated.
    pub fn restored(tare_offset: Option<f32>, calibration_factor: Option<f32>) -> Self {
        let tare_offset_value = tare_offset.unwrap_or(0.0);
        match calibration_factor {
            Some(factor) if factor != 0.0 && factor.is_finite() => Self {
                tare_offset: tare_offset_value,
                calibration_factor: factor,
                state: CalibrationState::Calibrated,
            },
            _ => Self {
                tare_offset: tare_offset_value,
                calibration_factor: 0.0,
                state: if tare_offset.is_some() {
                    CalibrationState::Tared
                } else {
                    CalibrationState::Uncalibrated
                },
            },
        }
    }

    pub fn tare_offset(&self) -> f32 {
        self.tare_offset
    }

    /// Raw counts per gram.
    pub fn calibration_factor(&self) -> f32 {
        self.calibration_factor
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration_factor != 0.0
    }

    /// Replace the zero offset. An existing factor stays valid, it is relative to the offset.
    pub fn apply_tare(&mut self, tare_offset: f32) {
        self.tare_offset = tare_offset;
        if self.state == CalibrationState::Uncalibrated {
            self.state = CalibrationState::Tared;
        }
    }

    /// Derive the factor from the mean loaded reading and the reference mass. On error nothing
    /// changes.
    pub fn apply_calibration(
        &mut self,
        mean_loaded_reading: f32,
        known_weight_grams: f32,
    ) -> Result<f32, CalibrationError> {
        Self::check_known_weight(known_weight_grams)?;

        let factor = (mean_loaded_reading - self.tare_offset) / known_weight_grams;
        if factor == 0.0 || !factor.is_finite() {
            return Err(CalibrationError::NoLoadDetected);
        }

        self.calibration_factor = factor;
        self.state = CalibrationState::Calibrated;
        Ok(factor)
    }

    pub fn check_known_weight(known_weight_grams: f32) -> Result<(), CalibrationError> {
        // written this way round so NaN is rejected too
        if !(known_weight_grams > 0.0) {
            return Err(CalibrationError::InvalidKnownWeight(known_weight_grams));
        }
        Ok(())
    }

    pub fn to_grams(&self, raw: f32) -> Result<f32, CalibrationError> {
        if !self.is_calibrated() {
            return Err(CalibrationError::NotCalibrated);
        }
        Ok((raw - self.tare_offset) / self.calibration_factor)
    }
}
