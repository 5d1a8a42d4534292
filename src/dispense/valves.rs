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

use crate::dispense::{DrinkType, ValveActuator};
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, OutputPin};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Valves driven by one active-high output pin each.
pub struct GpioValves<P> {
    beer: P,
    cocktail: P,
}

impl<P> GpioValves<P>
where
    P: OutputPin,
{
    /// Both valves are driven closed on construction.
    pub fn new(mut beer: P, mut cocktail: P) -> Result<Self, P::Error> {
        beer.set_low()?;
        cocktail.set_low()?;
        Ok(Self { beer, cocktail })
    }

    fn pin(&mut self, drink_type: DrinkType) -> &mut P {
        match drink_type {
            DrinkType::Beer => &mut self.beer,
            DrinkType::Cocktail => &mut self.cocktail,
        }
    }
}

impl<P> ValveActuator for GpioValves<P>
where
    P: OutputPin,
{
    type Error = P::Error;

    fn open(&mut self, drink_type: DrinkType) -> Result<(), Self::Error> {
        self.pin(drink_type).set_high()?;
        info!("Opened valve for {}", drink_type);
        Ok(())
    }

    fn close(&mut self, drink_type: DrinkType) -> Result<(), Self::Error> {
        self.pin(drink_type).set_low()?;
        info!("Closed valve for {}", drink_type);
        Ok(())
    }
}

/// Output pin that only records its level.
#[derive(Clone, Debug, Default)]
pub struct SimulatedValvePin {
    level: Arc<AtomicBool>,
}

impl SimulatedValvePin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl ErrorType for SimulatedValvePin {
    type Error = Infallible;
}

impl OutputPin for SimulatedValvePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_drink_drives_its_own_pin() {
        let beer = SimulatedValvePin::new();
        let cocktail = SimulatedValvePin::new();
        let mut valves = GpioValves::new(beer.clone(), cocktail.clone()).unwrap();

        valves.open(DrinkType::Cocktail).unwrap();
        assert!(cocktail.is_open());
        assert!(!beer.is_open());

        valves.open(DrinkType::Beer).unwrap();
        valves.close_all().unwrap();
        assert!(!beer.is_open());
        assert!(!cocktail.is_open());
    }

    #[test]
    fn construction_closes_both_valves() {
        let mut beer = SimulatedValvePin::new();
        beer.set_high().unwrap();
        let _valves = GpioValves::new(beer.clone(), SimulatedValvePin::new()).unwrap();
        assert!(!beer.is_open());
    }
}
