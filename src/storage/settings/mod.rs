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

use crate::dispense::pour::{NegativePourPolicy, PourBaseline};
use crate::dispense::DrinkType;
use core::fmt::Debug;
use core::future::Future;

pub mod accessor;
pub mod settings_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingError {
    SaveError,
    RetrieveError,
    TypeMismatch,
}

/// Every value the kiosk core reads from or writes to `config.json`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettingsAccessorId {
    ScaleTareOffset,
    ScaleCalibrationFactor,
    ScaleBeerTare,
    ScaleCocktailTare,
    ScaleCurrentWeight,
    ScaleBeerEmpty,
    ScaleCocktailEmpty,
    MlPerGram,
    NegativePourPolicy,
    PourBaseline,
    PricePerMl(DrinkType),
    DrinkName(DrinkType),
    /// `barrel_size` for beer, `container_size` for cocktails.
    ContainerSize(DrinkType),
    TheoreticalWeight(DrinkType),
    ConnectorWeight(DrinkType),
    CurrentVolume(DrinkType),
    Remaining(DrinkType),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettingKind {
    Float,
    Text,
    NegativePourPolicy,
    PourBaseline,
}

/// Where a setting lives in the JSON document: an optional top level section and a key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SettingLocation {
    pub section: Option<&'static str>,
    pub key: &'static str,
}

impl SettingsAccessorId {
    pub fn location(&self) -> SettingLocation {
        let scale = |key| SettingLocation {
            section: Some("scale"),
            key,
        };
        let drink = |drink_type: &DrinkType, key| SettingLocation {
            section: Some(drink_type.into()),
            key,
        };
        let pour_policy = |key| SettingLocation {
            section: Some("pour_policy"),
            key,
        };

        match self {
            SettingsAccessorId::ScaleTareOffset => scale("tare_offset"),
            SettingsAccessorId::ScaleCalibrationFactor => scale("calibration_factor"),
            SettingsAccessorId::ScaleBeerTare => scale("beer_tare"),
            SettingsAccessorId::ScaleCocktailTare => scale("cocktail_tare"),
            SettingsAccessorId::ScaleCurrentWeight => scale("current_weight"),
            SettingsAccessorId::ScaleBeerEmpty => scale("beer_empty"),
            SettingsAccessorId::ScaleCocktailEmpty => scale("cocktail_empty"),
            SettingsAccessorId::MlPerGram => SettingLocation {
                section: None,
                key: "ml_per_gram",
            },
            SettingsAccessorId::NegativePourPolicy => pour_policy("negative_volume"),
            SettingsAccessorId::PourBaseline => pour_policy("baseline"),
            SettingsAccessorId::PricePerMl(d) => drink(d, "price_per_ml"),
            SettingsAccessorId::DrinkName(d) => drink(d, "drink_name"),
            SettingsAccessorId::ContainerSize(d) => match d {
                DrinkType::Beer => drink(d, "barrel_size"),
                DrinkType::Cocktail => drink(d, "container_size"),
            },
            SettingsAccessorId::TheoreticalWeight(d) => drink(d, "theoretical_weight"),
            SettingsAccessorId::ConnectorWeight(d) => drink(d, "connector_weight"),
            SettingsAccessorId::CurrentVolume(d) => drink(d, "current_volume"),
            SettingsAccessorId::Remaining(d) => drink(d, "remaining"),
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingsAccessorId::DrinkName(_) => SettingKind::Text,
            SettingsAccessorId::NegativePourPolicy => SettingKind::NegativePourPolicy,
            SettingsAccessorId::PourBaseline => SettingKind::PourBaseline,
            _ => SettingKind::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Float(f32),
    Text(String),
    NegativePourPolicy(NegativePourPolicy),
    PourBaseline(PourBaseline),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Float(_) => SettingKind::Float,
            SettingValue::Text(_) => SettingKind::Text,
            SettingValue::NegativePourPolicy(_) => SettingKind::NegativePourPolicy,
            SettingValue::PourBaseline(_) => SettingKind::PourBaseline,
        }
    }
}

pub trait SettingsAccessor {
    type Error: Debug;

    /// Getting required setting from the settings storage. Will return None if it is not available
    /// in the storage or is stored with the wrong type. Thread safe.
    fn get_setting(
        &self,
        id: SettingsAccessorId,
    ) -> impl Future<Output = Option<SettingValue>> + Send;

    /// Save setting value to the settings storage. Will pass back a storage error if it is unable
    /// to complete the save action. Thread safe.
    fn save_setting(
        &self,
        setting: SettingsAccessorId,
        value: SettingValue,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Read a numeric setting, failing if it is missing or not a number.
pub async fn get_float<SA: SettingsAccessor>(
    settings: &SA,
    id: SettingsAccessorId,
) -> Result<f32, SettingError> {
    match settings.get_setting(id).await {
        Some(SettingValue::Float(v)) => Ok(v),
        Some(_) => Err(SettingError::TypeMismatch),
        None => Err(SettingError::RetrieveError),
    }
}

/// Numeric setting that may legitimately be absent, such as a baseline not yet measured.
pub async fn get_float_or<SA: SettingsAccessor>(
    settings: &SA,
    id: SettingsAccessorId,
    default: f32,
) -> f32 {
    match settings.get_setting(id).await {
        Some(SettingValue::Float(v)) => v,
        _ => default,
    }
}
