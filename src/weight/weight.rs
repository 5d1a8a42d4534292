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

use crate::storage::settings::{SettingValue, SettingsAccessor, SettingsAccessorId};
use crate::weight::calibration::{Calibration, CalibrationError, CalibrationState};
use crate::weight::filter::{self, NoiseReport, SampleBuffer, ScalarKalman, MAX_SAMPLES};
use crate::weight::interface::AsyncStrainGaugeInterface;
use crate::weight::WeighingSystem;
use embassy_time::{Duration, Timer};
use log::{debug, info, trace, warn};

#[derive(Debug)]
pub enum Error<StrainGaugeE> {
    StrainGaugeReadingError(StrainGaugeE),
    /// Bursts must hold between 1 and `MAX_SAMPLES` readings.
    InvalidSampleCount(usize),
    Calibration(CalibrationError),
    /// Readings stayed on an ADC rail after a power cycle of the front end.
    SignalSaturated,
}

impl<E> From<CalibrationError> for Error<E> {
    fn from(e: CalibrationError) -> Self {
        Error::Calibration(e)
    }
}

/// Burst sizes and pacing for the scale operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingConfig {
    pub tare_samples: usize,
    pub calibration_samples: usize,
    /// Burst size of the live reading behind `get_reading`.
    pub weight_samples: usize,
    /// Pause between consecutive reads so the same conversion is never taken twice.
    pub sample_delay: Duration,
    /// Standard deviation, in raw counts, above which a burst is reported as noisy.
    pub noise_limit: f32,
    pub kalman_process_variance: f32,
    pub kalman_measurement_variance: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            tare_samples: 10,
            calibration_samples: 10,
            weight_samples: 5,
            sample_delay: Duration::from_millis(5),
            noise_limit: 2000.0,
            kalman_process_variance: 0.05,
            kalman_measurement_variance: 2.0,
        }
    }
}

pub struct WeightScale<StrainGauge, SA>
where
    SA: SettingsAccessor,
{
    strain_gauge: StrainGauge,
    calibration: Calibration,
    sampling: SamplingConfig,
    smoothing: ScalarKalman,
    settings: SA,
}

impl<StrainGauge, StrainGaugeE, SA> WeightScale<StrainGauge, SA>
where
    StrainGauge: AsyncStrainGaugeInterface<Error = StrainGaugeE>,
    SA: SettingsAccessor,
{
    pub async fn new(
        mut strain_gauge: StrainGauge,
        settings: SA,
        sampling: SamplingConfig,
    ) -> Result<Self, Error<StrainGaugeE>> {
        strain_gauge
            .initialize()
            .await
            .map_err(Error::StrainGaugeReadingError)?;

        let mut s = Self {
            strain_gauge,
            calibration: Calibration::new(),
            sampling,
            smoothing: ScalarKalman::new(
                sampling.kalman_process_variance,
                sampling.kalman_measurement_variance,
            ),
            settings,
        };

        let (tare_offset, calibration_factor) = s.get_stored_calibration().await;
        s.calibration = Calibration::restored(tare_offset, calibration_factor);

        debug!(
            "Loaded calibration: tare = {}, factor = {}, state = {:?}",
            s.calibration.tare_offset(),
            s.calibration.calibration_factor(),
            s.calibration.state()
        );

        Ok(s)
    }

    async fn get_stored_float(&self, id: SettingsAccessorId) -> Option<f32> {
        match self.settings.get_setting(id).await {
            Some(SettingValue::Float(v)) => Some(v),
            Some(_) => {
                warn!("Stored {:?} is not a number", id);
                None
            }
            None => None,
        }
    }

    async fn get_stored_calibration(&self) -> (Option<f32>, Option<f32>) {
        let tare_offset = self
            .get_stored_float(SettingsAccessorId::ScaleTareOffset)
            .await;
        let calibration_factor = self
            .get_stored_float(SettingsAccessorId::ScaleCalibrationFactor)
            .await;
        if calibration_factor.is_none() {
            info!("No stored calibration factor, scale needs calibrating");
        }
        (tare_offset, calibration_factor)
    }

    async fn save_new_tare(&mut self, tare: f32) {
        self.calibration.apply_tare(tare);
        let _ = self
            .settings
            .save_setting(SettingsAccessorId::ScaleTareOffset, SettingValue::Float(tare))
            .await
            .map_err(|e| warn!("Unable to store tare offset: {:?}", e));
    }

    async fn save_new_calibration_factor(&mut self, factor: f32) {
        let _ = self
            .settings
            .save_setting(
                SettingsAccessorId::ScaleCalibrationFactor,
                SettingValue::Float(factor),
            )
            .await
            .map_err(|e| warn!("Unable to store calibration factor: {:?}", e));
    }

    /// One conversion straight from the ADC.
    pub async fn read_raw(&mut self) -> Result<i32, Error<StrainGaugeE>> {
        let reading = self
            .strain_gauge
            .get_next_reading()
            .await
            .map_err(Error::StrainGaugeReadingError)?;
        trace!("Reading = {}", reading);
        Ok(reading)
    }

    /// `count` fresh readings with `delay` between them.
    async fn collect_samples(
        &mut self,
        count: usize,
        delay: Duration,
    ) -> Result<SampleBuffer, Error<StrainGaugeE>> {
        if count == 0 || count > MAX_SAMPLES {
            return Err(Error::InvalidSampleCount(count));
        }

        let mut samples = SampleBuffer::new();
        for i in 0..count {
            if i > 0 {
                Timer::after(delay).await;
            }
            let reading = self.read_raw().await?;
            samples
                .push(reading)
                .map_err(|_| Error::InvalidSampleCount(count))?;
        }
        Ok(samples)
    }

    pub async fn get_average(
        &mut self,
        count: usize,
        delay: Duration,
    ) -> Result<f32, Error<StrainGaugeE>> {
        let samples = self.collect_samples(count, delay).await?;
        let average = filter::mean(&samples).ok_or(Error::InvalidSampleCount(count))?;
        debug!("Mean of {} readings = {}", count, average);
        Ok(average)
    }

    pub async fn get_median(
        &mut self,
        count: usize,
        delay: Duration,
    ) -> Result<i32, Error<StrainGaugeE>> {
        let mut samples = self.collect_samples(count, delay).await?;
        let median = filter::median(&mut samples).ok_or(Error::InvalidSampleCount(count))?;
        debug!("Median of {} readings = {}", count, median);
        Ok(median)
    }

    /// Median of a burst that is not sitting on an ADC rail. A railed burst gets one power cycle
    /// of the front end and a second chance.
    async fn get_checked_median(&mut self, count: usize) -> Result<i32, Error<StrainGaugeE>> {
        let delay = self.sampling.sample_delay;
        let rails = self.strain_gauge.rails();
        let mut samples = self.collect_samples(count, delay).await?;

        if filter::is_saturated(&samples, rails) {
            warn!("Saturated readings, power cycling the load cell amplifier");
            self.power_cycle().await?;
            samples = self.collect_samples(count, delay).await?;
            if filter::is_saturated(&samples, rails) {
                warn!("Readings still saturated after power cycle");
                return Err(Error::SignalSaturated);
            }
        }

        filter::median(&mut samples).ok_or(Error::InvalidSampleCount(count))
    }

    async fn power_cycle(&mut self) -> Result<(), Error<StrainGaugeE>> {
        self.strain_gauge
            .power_down()
            .await
            .map_err(Error::StrainGaugeReadingError)?;
        self.strain_gauge
            .power_up()
            .await
            .map_err(Error::StrainGaugeReadingError)
    }

    pub fn to_grams(&self, raw: f32) -> Result<f32, Error<StrainGaugeE>> {
        Ok(self.calibration.to_grams(raw)?)
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }
}

impl<StrainGauge, StrainGaugeE, SA> WeighingSystem for WeightScale<StrainGauge, SA>
where
    StrainGauge: AsyncStrainGaugeInterface<Error = StrainGaugeE>,
    SA: SettingsAccessor,
{
    type Error = Error<StrainGaugeE>;

    async fn tare(&mut self) -> Result<f32, Error<StrainGaugeE>> {
        let average = self
            .get_average(self.sampling.tare_samples, self.sampling.sample_delay)
            .await?;
        self.save_new_tare(average).await;
        self.smoothing.reset();
        info!("Tare offset = {}", average);
        Ok(average)
    }

    async fn calibrate(&mut self, known_weight_grams: f32) -> Result<f32, Error<StrainGaugeE>> {
        Calibration::check_known_weight(known_weight_grams).map_err(|e| {
            warn!("Calibration rejected, known weight {} g", known_weight_grams);
            Error::Calibration(e)
        })?;
        if self.calibration.state() == CalibrationState::Uncalibrated {
            warn!("Calibrating without a tare, zero offset is {}", self.calibration.tare_offset());
        }

        let average = self
            .get_average(self.sampling.calibration_samples, self.sampling.sample_delay)
            .await?;
        let factor = self
            .calibration
            .apply_calibration(average, known_weight_grams)
            .map_err(|e| {
                warn!("Calibration rejected: {:?}", e);
                Error::Calibration(e)
            })?;
        self.save_new_calibration_factor(factor).await;
        self.smoothing.reset();
        info!("Calibration factor = {} counts per gram", factor);
        Ok(factor)
    }

    async fn read_weight_grams(&mut self, samples: usize) -> Result<f32, Error<StrainGaugeE>> {
        if !self.calibration.is_calibrated() {
            return Err(Error::Calibration(CalibrationError::NotCalibrated));
        }
        let median = self.get_checked_median(samples).await?;
        let grams = self.to_grams(median as f32)?;
        trace!("Tared reading = {} g", grams);
        Ok(grams)
    }

    async fn reset_hardware(&mut self) -> Result<(), Error<StrainGaugeE>> {
        info!("Resetting load cell amplifier");
        self.power_cycle().await?;
        self.smoothing.reset();
        Ok(())
    }

    async fn analyse_noise(&mut self, samples: usize) -> Result<NoiseReport, Error<StrainGaugeE>> {
        let burst = self
            .collect_samples(samples, self.sampling.sample_delay)
            .await?;
        let rails = self.strain_gauge.rails();
        let report = filter::analyse_noise(&burst, self.sampling.noise_limit, rails)
            .ok_or(Error::InvalidSampleCount(samples))?;
        debug!(
            "Noise over {} readings: mean {}, std dev {}",
            samples, report.mean, report.std_dev
        );
        Ok(report)
    }

    async fn get_reading(&mut self) -> Result<f32, Self::Error> {
        let grams = self.read_weight_grams(self.sampling.weight_samples).await?;
        Ok(self.smoothing.update(grams))
    }
}
