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

use crate::weight::interface::AdcRails;
use heapless::Vec;
use micromath::statistics::StdDev;

/// Largest burst a single filter call may take.
pub const MAX_SAMPLES: usize = 32;

pub type SampleBuffer = Vec<i32, MAX_SAMPLES>;

/// Arithmetic mean. Summed in 64 bits, full-scale 24 bit codes overflow f32 precision.
pub fn mean(samples: &[i32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let total: i64 = samples.iter().map(|&s| s as i64).sum();
    Some((total as f64 / samples.len() as f64) as f32)
}

/// Middle element after sorting. For even counts this is the upper of the two middle values.
pub fn median(samples: &mut [i32]) -> Option<i32> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    Some(samples[samples.len() / 2])
}

/// One-dimensional Kalman filter used to smooth the live weight display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarKalman {
    state: Option<f32>,
    error_covariance: f32,
    process_variance: f32,
    measurement_variance: f32,
}

impl ScalarKalman {
    const INITIAL_ERROR_COVARIANCE: f32 = 1.0;

    pub const fn new(process_variance: f32, measurement_variance: f32) -> Self {
        Self {
            state: None,
            error_covariance: Self::INITIAL_ERROR_COVARIANCE,
            process_variance,
            measurement_variance,
        }
    }

    pub fn estimate(&self) -> Option<f32> {
        self.state
    }

    /// Feed one measurement and return the new estimate. The first measurement seeds the state.
    pub fn update(&mut self, measurement: f32) -> f32 {
        let Some(state) = self.state else {
            self.state = Some(measurement);
            return measurement;
        };

        self.error_covariance += self.process_variance;
        let gain = self.error_covariance / (self.error_covariance + self.measurement_variance);
        let state = state + gain * (measurement - state);
        self.error_covariance *= 1.0 - gain;
        self.state = Some(state);
        state
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.error_covariance = Self::INITIAL_ERROR_COVARIANCE;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalHealth {
    Healthy,
    /// At least one reading sat on an ADC rail.
    Saturated,
    /// Standard deviation above the configured limit, in raw counts.
    Noisy(f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseReport {
    pub mean: f32,
    pub std_dev: f32,
    pub health: SignalHealth,
}

pub fn is_saturated(samples: &[i32], rails: AdcRails) -> bool {
    samples.iter().any(|&s| rails.is_railed(s))
}

/// Summarise a burst of raw readings. `None` for an empty burst.
pub fn analyse_noise(samples: &[i32], noise_limit: f32, rails: AdcRails) -> Option<NoiseReport> {
    let mean = mean(samples)?;

    let mut centred = Vec::<f32, MAX_SAMPLES>::new();
    for &sample in samples.iter().take(MAX_SAMPLES) {
        // centred first so the spread survives the f32 conversion
        let _ = centred.push(sample as f32 - mean);
    }
    let std_dev = if centred.len() > 1 {
        centred.as_slice().stddev()
    } else {
        0.0
    };

    let health = if is_saturated(samples, rails) {
        SignalHealth::Saturated
    } else if std_dev > noise_limit {
        SignalHealth::Noisy(std_dev)
    } else {
        SignalHealth::Healthy
    };

    Some(NoiseReport {
        mean,
        std_dev,
        health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight::interface::hx711::{MAX_VALUE, MIN_VALUE};

    const RAILS: AdcRails = AdcRails {
        min: MIN_VALUE,
        max: MAX_VALUE,
    };

    #[test]
    fn median_rejects_single_outlier() {
        let mut samples = [100, 102, 101, 99, 1000];
        assert_eq!(median(&mut samples), Some(101));
    }

    #[test]
    fn median_with_outlier_matches_median_of_clean_values() {
        let clean = [5000, 5003, 4998, 5001];
        for outlier in [-8_000_000, 8_000_000] {
            let mut with_outlier: Vec<i32, 8> = Vec::from_slice(&clean).unwrap();
            with_outlier.push(outlier).unwrap();
            let mut clean_copy = clean;
            clean_copy.sort_unstable();
            let filtered = median(&mut with_outlier).unwrap();
            // five values, one extreme: the middle lands on one of the two clean middles
            assert!(filtered == clean_copy[1] || filtered == clean_copy[2]);
        }
    }

    #[test]
    fn empty_bursts_have_no_estimate() {
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&mut []), None);
        assert_eq!(analyse_noise(&[], 10.0, RAILS), None);
    }

    #[test]
    fn mean_keeps_precision_near_full_scale() {
        let samples = [8_388_600, 8_388_601, 8_388_602, 8_388_603];
        assert!((mean(&samples).unwrap() - 8_388_601.5).abs() < 1.0);
        assert_eq!(mean(&[-3, -1]), Some(-2.0));
    }

    #[test]
    fn kalman_converges_on_constant_signal() {
        let mut filter = ScalarKalman::new(0.01, 4.0);
        assert_eq!(filter.update(100.0), 100.0);
        let mut estimate = 0.0;
        for _ in 0..200 {
            estimate = filter.update(150.0);
        }
        assert!((estimate - 150.0).abs() < 1.0);
    }

    #[test]
    fn kalman_damps_a_spike() {
        let mut filter = ScalarKalman::new(0.01, 4.0);
        for _ in 0..50 {
            filter.update(200.0);
        }
        let after_spike = filter.update(1200.0);
        assert!(after_spike < 300.0);
        filter.reset();
        assert_eq!(filter.estimate(), None);
    }

    #[test]
    fn noise_report_flags_saturation_and_noise() {
        let quiet = analyse_noise(&[1000, 1001, 999, 1000], 5.0, RAILS).unwrap();
        assert_eq!(quiet.health, SignalHealth::Healthy);
        assert!((quiet.mean - 1000.0).abs() < 0.01);

        let railed = analyse_noise(&[MAX_VALUE, 1000, 1001], 5.0, RAILS).unwrap();
        assert_eq!(railed.health, SignalHealth::Saturated);

        let low_rail = analyse_noise(&[MIN_VALUE, 0], 1e9, RAILS).unwrap();
        assert_eq!(low_rail.health, SignalHealth::Saturated);

        let noisy = analyse_noise(&[0, 400, -400, 0], 5.0, RAILS).unwrap();
        assert!(matches!(noisy.health, SignalHealth::Noisy(sd) if sd > 5.0));
    }
}
