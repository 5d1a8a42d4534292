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

//! Bench rig for `--simulate`: a simulated HX711 under a keg whose weight drains while a valve
//! is open.

use crate::util::Command;
use embassy_time::{Duration, Ticker};
use kiosk_scale::dispense::valves::{GpioValves, SimulatedValvePin};
use kiosk_scale::weight::interface::simulated::SimulatedHx711;
use log::trace;

/// Raw reading with nothing on the cell.
pub(crate) const ZERO_COUNTS: i32 = 84_250;
pub(crate) const COUNTS_PER_GRAM: f32 = 21.5;

const STARTING_LOAD_GRAMS: f32 = 12_500.0;
const FLOW_GRAMS_PER_SECOND: f32 = 45.0;
const FLOW_TICK: Duration = Duration::from_millis(50);

pub(crate) struct SimulatedRig {
    chip: SimulatedHx711,
    beer_valve: SimulatedValvePin,
    cocktail_valve: SimulatedValvePin,
    load_grams: f32,
}

/// Load on the cell when the rig starts up for `command`.
pub(crate) fn load_for(command: &Command) -> f32 {
    match command {
        Command::Tare => 0.0,
        Command::Calibrate { grams } => grams.max(0.0),
        _ => STARTING_LOAD_GRAMS,
    }
}

impl SimulatedRig {
    pub fn with_load(load_grams: f32) -> Self {
        let rig = Self {
            chip: SimulatedHx711::new(),
            beer_valve: SimulatedValvePin::new(),
            cocktail_valve: SimulatedValvePin::new(),
            load_grams,
        };
        rig.update_chip();
        rig
    }

    pub fn chip(&self) -> SimulatedHx711 {
        self.chip.clone()
    }

    pub fn valves(&self) -> GpioValves<SimulatedValvePin> {
        let Ok(valves) = GpioValves::new(self.beer_valve.clone(), self.cocktail_valve.clone());
        valves
    }

    fn update_chip(&self) {
        let counts = ZERO_COUNTS + (self.load_grams * COUNTS_PER_GRAM).round() as i32;
        self.chip.set_constant(counts);
    }

    fn step(&mut self, elapsed: Duration) {
        let open = [&self.beer_valve, &self.cocktail_valve]
            .iter()
            .filter(|valve| valve.is_open())
            .count();
        if open == 0 {
            return;
        }
        let seconds = elapsed.as_micros() as f32 / 1_000_000.0;
        self.load_grams = (self.load_grams - FLOW_GRAMS_PER_SECOND * seconds * open as f32).max(0.0);
        trace!("Simulated load now {} g", self.load_grams);
        self.update_chip();
    }

    pub async fn run(mut self) -> ! {
        let mut ticker = Ticker::every(FLOW_TICK);
        loop {
            ticker.next().await;
            self.step(FLOW_TICK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_scale::dispense::{DrinkType, ValveActuator};

    #[test]
    fn load_only_drains_while_a_valve_is_open() {
        let mut rig = SimulatedRig::with_load(STARTING_LOAD_GRAMS);
        let mut valves = rig.valves();

        rig.step(Duration::from_secs(1));
        assert_eq!(rig.load_grams, STARTING_LOAD_GRAMS);

        valves.open(DrinkType::Beer).unwrap();
        rig.step(Duration::from_secs(2));
        assert_eq!(rig.load_grams, STARTING_LOAD_GRAMS - 2.0 * FLOW_GRAMS_PER_SECOND);

        valves.close(DrinkType::Beer).unwrap();
        rig.step(Duration::from_secs(2));
        assert_eq!(rig.load_grams, STARTING_LOAD_GRAMS - 2.0 * FLOW_GRAMS_PER_SECOND);
    }

    #[test]
    fn an_empty_keg_stays_at_zero() {
        let mut rig = SimulatedRig::with_load(STARTING_LOAD_GRAMS);
        let mut valves = rig.valves();
        valves.open(DrinkType::Cocktail).unwrap();
        rig.step(Duration::from_secs(3_600));
        assert_eq!(rig.load_grams, 0.0);
    }

    #[test]
    fn load_follows_the_command() {
        assert_eq!(load_for(&Command::Tare), 0.0);
        assert_eq!(load_for(&Command::Calibrate { grams: 500.0 }), 500.0);
        assert_eq!(load_for(&Command::Weigh { samples: None }), STARTING_LOAD_GRAMS);
    }

    #[test]
    fn tare_then_calibrate_then_weigh_the_keg() {
        use embassy_futures::block_on;
        use embassy_sync::mutex::Mutex;
        use kiosk_scale::storage::settings::accessor::JsonSettingsAccessor;
        use kiosk_scale::storage::settings::settings_store::SettingsManager;
        use kiosk_scale::weight::interface::hx711::{Hx711Gain, Hx711Timing};
        use kiosk_scale::weight::weight::{SamplingConfig, WeightScale};
        use kiosk_scale::weight::WeighingSystem;

        let store = Mutex::new(SettingsManager::new());
        let timing = Hx711Timing {
            ready_timeout: Duration::from_millis(5),
            poll_interval: Duration::from_micros(50),
            power_up_settle: Duration::from_micros(10),
        };
        let sampling = SamplingConfig {
            sample_delay: Duration::from_ticks(0),
            ..SamplingConfig::default()
        };
        let scale_on = |rig: &SimulatedRig| {
            block_on(WeightScale::new(
                rig.chip().driver(Hx711Gain::Gain128, timing),
                JsonSettingsAccessor::new(&store),
                sampling,
            ))
            .unwrap()
        };

        let rig = SimulatedRig::with_load(load_for(&Command::Tare));
        let offset = block_on(scale_on(&rig).tare()).unwrap();
        assert_eq!(offset, ZERO_COUNTS as f32);

        let rig = SimulatedRig::with_load(load_for(&Command::Calibrate { grams: 500.0 }));
        let factor = block_on(scale_on(&rig).calibrate(500.0)).unwrap();
        assert_eq!(factor, COUNTS_PER_GRAM);

        let rig = SimulatedRig::with_load(STARTING_LOAD_GRAMS);
        let grams = block_on(scale_on(&rig).read_weight_grams(5)).unwrap();
        assert!((grams - STARTING_LOAD_GRAMS).abs() < 0.5, "{}", grams);
    }
}
