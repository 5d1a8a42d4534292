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

use core::fmt::Debug;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

pub mod containers;
pub mod pour;
pub mod valves;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DrinkType {
    Beer,
    Cocktail,
}

/// Solenoid valves feeding the tap, one per drink.
pub trait ValveActuator {
    type Error: Debug;

    fn open(&mut self, drink_type: DrinkType) -> Result<(), Self::Error>;

    fn close(&mut self, drink_type: DrinkType) -> Result<(), Self::Error>;

    fn close_all(&mut self) -> Result<(), Self::Error> {
        self.close(DrinkType::Beer)?;
        self.close(DrinkType::Cocktail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn drink_names_round_trip_through_text() {
        for drink in DrinkType::iter() {
            assert_eq!(DrinkType::from_str(&drink.to_string()), Ok(drink));
        }
        assert_eq!(DrinkType::from_str("cocktail"), Ok(DrinkType::Cocktail));
        assert!(DrinkType::from_str("wine").is_err());
        let section: &'static str = DrinkType::Beer.into();
        assert_eq!(section, "beer");
    }
}
