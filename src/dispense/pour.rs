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

//! Pricing of a single pour from the weight before and after.

use crate::dispense::{DrinkType, ValveActuator};
use crate::storage::settings::{
    get_float, get_float_or, SettingError, SettingValue, SettingsAccessor, SettingsAccessorId,
};
use crate::weight::WeighingSystem;
use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const RECEIPT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What to do when the closing weight is above the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativePourPolicy {
    /// Keep the negative volume, the customer is credited.
    Allow,
    /// Charge nothing.
    Clamp,
    /// Fail the pour with the measured volume.
    #[default]
    Reject,
}

/// Reference weight the closing weight is subtracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PourBaseline {
    /// Weight captured when the pour started.
    #[default]
    StartWeight,
    /// `scale.beer_tare + scale.cocktail_tare` from the configuration.
    ContainerTares,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PourTransaction {
    pub drink_type: DrinkType,
    pub start_weight: f32,
    pub started_at: DateTime<Local>,
}

/// Somewhere to keep the pour in flight between start and stop.
pub trait PourSession {
    fn active_pour(&self) -> Option<&PourTransaction>;

    fn begin(&mut self, pour: PourTransaction);

    /// Remove and return the pour in flight.
    fn finish(&mut self) -> Option<PourTransaction>;
}

#[derive(Debug, Default)]
pub struct InMemoryPourSession {
    active: Option<PourTransaction>,
}

impl InMemoryPourSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PourSession for InMemoryPourSession {
    fn active_pour(&self) -> Option<&PourTransaction> {
        self.active.as_ref()
    }

    fn begin(&mut self, pour: PourTransaction) {
        self.active = Some(pour);
    }

    fn finish(&mut self) -> Option<PourTransaction> {
        self.active.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PourPricing {
    pub price_per_ml: f32,
    pub ml_per_gram: f32,
    pub negative_volume: NegativePourPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PourCost {
    pub poured_ml: f32,
    pub cost: f32,
}

/// Volume and cost of `grams_poured`. A rejected negative pour returns the volume as the error.
pub fn price_pour(grams_poured: f32, pricing: &PourPricing) -> Result<PourCost, f32> {
    let mut poured_ml = grams_poured * pricing.ml_per_gram;
    if poured_ml < 0.0 {
        match pricing.negative_volume {
            NegativePourPolicy::Allow => {}
            NegativePourPolicy::Clamp => poured_ml = 0.0,
            NegativePourPolicy::Reject => return Err(poured_ml),
        }
    }
    Ok(PourCost {
        poured_ml,
        cost: poured_ml * pricing.price_per_ml,
    })
}

/// Record of a finished pour, in the shape of the web layer's transaction history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PourReceipt {
    pub drink_type: DrinkType,
    pub drink_name: String,
    pub start_weight: f32,
    pub end_weight: f32,
    pub poured_ml: f32,
    pub cost: f32,
    /// Time the valve was open for.
    pub pour_seconds: f32,
    pub date: String,
}

#[derive(Debug, PartialEq)]
pub enum PourError<WeighE, ValveE> {
    PourAlreadyActive(DrinkType),
    NoActivePour,
    NegativeVolume { poured_ml: f32 },
    Weighing(WeighE),
    Valve(ValveE),
    Settings(SettingError),
}

pub struct PourController<WS, V, S, SA> {
    weighing: WS,
    valves: V,
    session: S,
    settings: SA,
    weight_samples: usize,
}

impl<WS, V, S, SA> PourController<WS, V, S, SA>
where
    WS: WeighingSystem,
    V: ValveActuator,
    S: PourSession,
    SA: SettingsAccessor<Error = SettingError>,
{
    pub fn new(weighing: WS, valves: V, session: S, settings: SA, weight_samples: usize) -> Self {
        Self {
            weighing,
            valves,
            session,
            settings,
            weight_samples,
        }
    }

    pub fn active_pour(&self) -> Option<&PourTransaction> {
        self.session.active_pour()
    }

    /// Weigh, remember the pour and open the valve. Returns the start weight.
    pub async fn pour_started(
        &mut self,
        drink_type: DrinkType,
    ) -> Result<f32, PourError<WS::Error, V::Error>> {
        if let Some(active) = self.session.active_pour() {
            warn!(
                "Refusing {} pour, {} pour already active",
                drink_type, active.drink_type
            );
            return Err(PourError::PourAlreadyActive(active.drink_type));
        }

        let start_weight = self
            .weighing
            .read_weight_grams(self.weight_samples)
            .await
            .map_err(PourError::Weighing)?;

        self.session.begin(PourTransaction {
            drink_type,
            start_weight,
            started_at: Local::now(),
        });
        if let Err(e) = self.valves.open(drink_type) {
            self.session.finish();
            return Err(PourError::Valve(e));
        }

        info!("{} pour started at {} g", drink_type, start_weight);
        Ok(start_weight)
    }

    /// Close the valve, weigh and price the pour. The valve is closed and the pour cleared even
    /// when weighing fails.
    pub async fn pour_stopped(&mut self) -> Result<PourReceipt, PourError<WS::Error, V::Error>> {
        let pour = self.session.finish().ok_or(PourError::NoActivePour)?;

        let closed = self.valves.close(pour.drink_type);
        let end_weight = self.weighing.read_weight_grams(self.weight_samples).await;
        closed.map_err(PourError::Valve)?;
        let end_weight = end_weight.map_err(PourError::Weighing)?;

        let _ = self
            .settings
            .save_setting(
                SettingsAccessorId::ScaleCurrentWeight,
                SettingValue::Float(end_weight),
            )
            .await
            .map_err(|e| warn!("Unable to store current weight: {:?}", e));

        let baseline = self.baseline(&pour).await?;
        let pricing = self.pricing(pour.drink_type).await?;
        let PourCost { poured_ml, cost } =
            price_pour(baseline - end_weight, &pricing).map_err(|poured_ml| {
                warn!("Pour of {} ml rejected as negative", poured_ml);
                PourError::NegativeVolume { poured_ml }
            })?;

        let drink_name = match self
            .settings
            .get_setting(SettingsAccessorId::DrinkName(pour.drink_type))
            .await
        {
            Some(SettingValue::Text(name)) => name,
            _ => pour.drink_type.to_string(),
        };

        let now = Local::now();
        let pour_seconds = (now - pour.started_at).num_milliseconds() as f32 / 1000.0;
        info!(
            "{} pour stopped after {:.1} s: {} ml, cost {:.2}",
            pour.drink_type, pour_seconds, poured_ml, cost
        );
        Ok(PourReceipt {
            drink_type: pour.drink_type,
            drink_name,
            start_weight: pour.start_weight,
            end_weight,
            poured_ml,
            cost,
            pour_seconds,
            date: now.format(RECEIPT_DATE_FORMAT).to_string(),
        })
    }

    async fn baseline(&self, pour: &PourTransaction) -> Result<f32, PourError<WS::Error, V::Error>> {
        let policy = match self.settings.get_setting(SettingsAccessorId::PourBaseline).await {
            Some(SettingValue::PourBaseline(policy)) => policy,
            _ => PourBaseline::default(),
        };
        match policy {
            PourBaseline::StartWeight => Ok(pour.start_weight),
            PourBaseline::ContainerTares => {
                let beer = get_float(&self.settings, SettingsAccessorId::ScaleBeerTare)
                    .await
                    .map_err(PourError::Settings)?;
                let cocktail = get_float(&self.settings, SettingsAccessorId::ScaleCocktailTare)
                    .await
                    .map_err(PourError::Settings)?;
                Ok(beer + cocktail)
            }
        }
    }

    async fn pricing(
        &self,
        drink_type: DrinkType,
    ) -> Result<PourPricing, PourError<WS::Error, V::Error>> {
        let price_per_ml = get_float(&self.settings, SettingsAccessorId::PricePerMl(drink_type))
            .await
            .map_err(PourError::Settings)?;
        let ml_per_gram = get_float_or(&self.settings, SettingsAccessorId::MlPerGram, 1.0).await;
        let negative_volume = match self
            .settings
            .get_setting(SettingsAccessorId::NegativePourPolicy)
            .await
        {
            Some(SettingValue::NegativePourPolicy(policy)) => policy,
            _ => NegativePourPolicy::default(),
        };
        Ok(PourPricing {
            price_per_ml,
            ml_per_gram,
            negative_volume,
        })
    }
}
