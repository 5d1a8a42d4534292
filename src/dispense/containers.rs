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

//! Operator procedures for the empty containers and their fill level.
//!
//! The beer keg sits on the cell first. The cocktail container is added on top of it, so its
//! figures are relative to the empty beer keg.

use crate::dispense::DrinkType;
use crate::storage::settings::{
    get_float_or, SettingError, SettingValue, SettingsAccessor, SettingsAccessorId,
};
use crate::weight::WeighingSystem;
use log::{info, warn};

#[derive(Debug, PartialEq)]
pub enum ContainerError<WeighE> {
    /// `finish_cocktail_calibration` without a preceding start.
    CalibrationNotStarted,
    /// The cocktail container weighed less than the empty beer keg alone.
    NegativeCocktailTare(f32),
    Weighing(WeighE),
    Settings(SettingError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerCalibration {
    /// Total weight on the cell with the container in place.
    pub empty_weight: f32,
    /// Weight attributed to this container.
    pub tare: f32,
    pub connector_weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerLevel {
    pub measured: f32,
    /// Liquid present, never negative.
    pub net_liquid: f32,
    pub remaining: f32,
}

pub struct ContainerProcedures<WS, SA> {
    weighing: WS,
    settings: SA,
    weight_samples: usize,
    cocktail_baseline: Option<f32>,
}

impl<WS, SA> ContainerProcedures<WS, SA>
where
    WS: WeighingSystem,
    SA: SettingsAccessor<Error = SettingError>,
{
    pub fn new(weighing: WS, settings: SA, weight_samples: usize) -> Self {
        Self {
            weighing,
            settings,
            weight_samples,
            cocktail_baseline: None,
        }
    }

    async fn measure(&mut self) -> Result<f32, ContainerError<WS::Error>> {
        self.weighing
            .read_weight_grams(self.weight_samples)
            .await
            .map_err(ContainerError::Weighing)
    }

    async fn store(
        &self,
        id: SettingsAccessorId,
        value: f32,
    ) -> Result<(), ContainerError<WS::Error>> {
        self.settings
            .save_setting(id, SettingValue::Float(value))
            .await
            .map_err(ContainerError::Settings)
    }

    async fn setting(&self, id: SettingsAccessorId) -> f32 {
        get_float_or(&self.settings, id, 0.0).await
    }

    /// Weigh the empty beer keg with its connector.
    pub async fn calibrate_beer_container(
        &mut self,
    ) -> Result<ContainerCalibration, ContainerError<WS::Error>> {
        let measured = self.measure().await?;
        let theoretical = self
            .setting(SettingsAccessorId::TheoreticalWeight(DrinkType::Beer))
            .await;
        let connector_weight = measured - theoretical;

        self.store(SettingsAccessorId::ScaleBeerEmpty, measured).await?;
        self.store(SettingsAccessorId::ScaleBeerTare, measured).await?;
        self.store(SettingsAccessorId::ScaleCurrentWeight, measured)
            .await?;
        self.store(
            SettingsAccessorId::ConnectorWeight(DrinkType::Beer),
            connector_weight,
        )
        .await?;

        info!(
            "Beer calibrated: empty weight = {:.2} g, connector weight = {:.2} g",
            measured, connector_weight
        );
        Ok(ContainerCalibration {
            empty_weight: measured,
            tare: measured,
            connector_weight,
        })
    }

    /// First step of the cocktail calibration, taken before the new container is placed.
    pub async fn start_cocktail_calibration(&mut self) -> Result<f32, ContainerError<WS::Error>> {
        let baseline = self.measure().await?;
        self.cocktail_baseline = Some(baseline);
        info!(
            "Baseline measured at {:.2} g, place the empty cocktail container",
            baseline
        );
        Ok(baseline)
    }

    pub fn cocktail_calibration_started(&self) -> bool {
        self.cocktail_baseline.is_some()
    }

    /// Second step, with the empty cocktail container in place. Ends the calibration whatever
    /// the outcome.
    pub async fn finish_cocktail_calibration(
        &mut self,
    ) -> Result<ContainerCalibration, ContainerError<WS::Error>> {
        if self.cocktail_baseline.take().is_none() {
            warn!("Cocktail calibration finished before it was started");
            return Err(ContainerError::CalibrationNotStarted);
        }

        let overall = self.measure().await?;
        let beer_empty = self.setting(SettingsAccessorId::ScaleBeerEmpty).await;
        let cocktail_tare = overall - beer_empty;
        if cocktail_tare < 0.0 {
            warn!(
                "Cocktail tare of {:.2} g is negative, is the container in place?",
                cocktail_tare
            );
            return Err(ContainerError::NegativeCocktailTare(cocktail_tare));
        }

        let theoretical = self
            .setting(SettingsAccessorId::TheoreticalWeight(DrinkType::Cocktail))
            .await;
        let connector_weight = overall - beer_empty - theoretical;

        self.store(SettingsAccessorId::ScaleCocktailEmpty, overall)
            .await?;
        self.store(SettingsAccessorId::ScaleCocktailTare, cocktail_tare)
            .await?;
        self.store(
            SettingsAccessorId::ConnectorWeight(DrinkType::Cocktail),
            connector_weight,
        )
        .await?;
        self.store(SettingsAccessorId::ScaleCurrentWeight, overall)
            .await?;

        info!(
            "Cocktail calibrated: overall weight = {:.2} g, connector weight = {:.2} g",
            overall, connector_weight
        );
        Ok(ContainerCalibration {
            empty_weight: overall,
            tare: cocktail_tare,
            connector_weight,
        })
    }

    pub async fn measure_beer(&mut self) -> Result<ContainerLevel, ContainerError<WS::Error>> {
        let measured = self.measure().await?;
        let floor = self.setting(SettingsAccessorId::ScaleBeerEmpty).await;
        self.record_level(DrinkType::Beer, measured, floor).await
    }

    pub async fn measure_cocktail(&mut self) -> Result<ContainerLevel, ContainerError<WS::Error>> {
        let measured = self.measure().await?;
        let beer_empty = self.setting(SettingsAccessorId::ScaleBeerEmpty).await;
        let cocktail_empty = self.setting(SettingsAccessorId::ScaleCocktailEmpty).await;
        let connector = self
            .setting(SettingsAccessorId::ConnectorWeight(DrinkType::Cocktail))
            .await;
        self.record_level(
            DrinkType::Cocktail,
            measured,
            beer_empty + cocktail_empty - connector,
        )
        .await
    }

    pub async fn measure_drink(
        &mut self,
        drink_type: DrinkType,
    ) -> Result<ContainerLevel, ContainerError<WS::Error>> {
        match drink_type {
            DrinkType::Beer => self.measure_beer().await,
            DrinkType::Cocktail => self.measure_cocktail().await,
        }
    }

    async fn record_level(
        &mut self,
        drink_type: DrinkType,
        measured: f32,
        floor: f32,
    ) -> Result<ContainerLevel, ContainerError<WS::Error>> {
        let net_liquid = (measured - floor).max(0.0);
        let capacity = self
            .setting(SettingsAccessorId::ContainerSize(drink_type))
            .await;
        let remaining = capacity - net_liquid;

        self.store(SettingsAccessorId::CurrentVolume(drink_type), net_liquid)
            .await?;
        self.store(SettingsAccessorId::Remaining(drink_type), remaining)
            .await?;
        self.store(SettingsAccessorId::ScaleCurrentWeight, measured)
            .await?;

        info!(
            "{} measured: {:.2} ml present, remaining capacity {:.2} ml",
            drink_type, net_liquid, remaining
        );
        Ok(ContainerLevel {
            measured,
            net_liquid,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispense::test_rig::{grams_scale, grams_store};
    use crate::storage::settings::accessor::JsonSettingsAccessor;
    use crate::storage::settings::settings_store::SettingsManagerMutex;
    use crate::weight::interface::simulated::SimulatedHx711;
    use embassy_futures::block_on;

    fn stored(store: &SettingsManagerMutex, id: SettingsAccessorId) -> Option<SettingValue> {
        block_on(store.lock()).get_setting(id)
    }

    #[test]
    fn beer_calibration_stores_empty_weight_and_connector() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        block_on(store.lock())
            .set_setting(
                SettingsAccessorId::TheoreticalWeight(DrinkType::Beer),
                SettingValue::Float(7_000.0),
            )
            .unwrap();
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );
        chip.set_constant(7_250);

        let calibration = block_on(procedures.calibrate_beer_container()).unwrap();
        assert_eq!(calibration.empty_weight, 7_250.0);
        assert_eq!(calibration.connector_weight, 250.0);
        assert_eq!(
            stored(&store, SettingsAccessorId::ScaleBeerEmpty),
            Some(SettingValue::Float(7_250.0))
        );
        assert_eq!(
            stored(&store, SettingsAccessorId::ScaleBeerTare),
            Some(SettingValue::Float(7_250.0))
        );
        assert_eq!(
            stored(&store, SettingsAccessorId::ConnectorWeight(DrinkType::Beer)),
            Some(SettingValue::Float(250.0))
        );
    }

    #[test]
    fn cocktail_calibration_needs_a_start() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );
        chip.set_constant(100);

        assert!(matches!(
            block_on(procedures.finish_cocktail_calibration()),
            Err(ContainerError::CalibrationNotStarted)
        ));
    }

    #[test]
    fn cocktail_calibration_is_relative_to_the_empty_keg() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );

        let calibration = block_on(async {
            chip.set_constant(7_000);
            procedures.calibrate_beer_container().await.unwrap();
            procedures.start_cocktail_calibration().await.unwrap();
            assert!(procedures.cocktail_calibration_started());
            chip.set_constant(7_400);
            procedures.finish_cocktail_calibration().await.unwrap()
        });

        assert_eq!(calibration.tare, 400.0);
        assert_eq!(calibration.connector_weight, 400.0);
        assert!(!procedures.cocktail_calibration_started());
        assert_eq!(
            stored(&store, SettingsAccessorId::ScaleCocktailEmpty),
            Some(SettingValue::Float(7_400.0))
        );
        assert_eq!(
            stored(&store, SettingsAccessorId::ScaleCocktailTare),
            Some(SettingValue::Float(400.0))
        );
    }

    #[test]
    fn negative_cocktail_tare_is_rejected_and_ends_the_calibration() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );

        block_on(async {
            chip.set_constant(7_000);
            procedures.calibrate_beer_container().await.unwrap();
            procedures.start_cocktail_calibration().await.unwrap();
            chip.set_constant(6_900);
            assert!(matches!(
                procedures.finish_cocktail_calibration().await,
                Err(ContainerError::NegativeCocktailTare(t)) if t == -100.0
            ));
        });

        assert!(!procedures.cocktail_calibration_started());
        assert_eq!(stored(&store, SettingsAccessorId::ScaleCocktailEmpty), None);
    }

    #[test]
    fn beer_level_is_clamped_at_zero() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        block_on(store.lock())
            .set_setting(SettingsAccessorId::ScaleBeerEmpty, SettingValue::Float(7_000.0))
            .unwrap();
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );

        chip.set_constant(9_000);
        let level = block_on(procedures.measure_drink(DrinkType::Beer)).unwrap();
        assert_eq!(level.net_liquid, 2_000.0);
        assert_eq!(level.remaining, 3_000.0);

        chip.set_constant(6_500);
        let level = block_on(procedures.measure_beer()).unwrap();
        assert_eq!(level.net_liquid, 0.0);
        assert_eq!(level.remaining, 5_000.0);
        assert_eq!(
            stored(&store, SettingsAccessorId::ScaleCurrentWeight),
            Some(SettingValue::Float(6_500.0))
        );
    }

    #[test]
    fn cocktail_level_discounts_both_containers() {
        let chip = SimulatedHx711::new();
        let store = grams_store();
        {
            let mut settings = block_on(store.lock());
            for (id, value) in [
                (SettingsAccessorId::ScaleBeerEmpty, 7_000.0),
                (SettingsAccessorId::ScaleCocktailEmpty, 7_400.0),
                (SettingsAccessorId::ConnectorWeight(DrinkType::Cocktail), 7_000.0),
            ] {
                settings.set_setting(id, SettingValue::Float(value)).unwrap();
            }
        }
        let mut procedures = ContainerProcedures::new(
            grams_scale(&chip, &store),
            JsonSettingsAccessor::new(&store),
            5,
        );
        chip.set_constant(7_900);

        let level = block_on(procedures.measure_cocktail()).unwrap();
        // floor is 7000 + 7400 - 7000
        assert_eq!(level.net_liquid, 500.0);
        assert_eq!(level.remaining, 500.0);
        assert_eq!(
            stored(&store, SettingsAccessorId::CurrentVolume(DrinkType::Cocktail)),
            Some(SettingValue::Float(500.0))
        );
    }
}
