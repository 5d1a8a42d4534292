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

use clap::{Parser, Subcommand};
use kiosk_scale::dispense::DrinkType;
use log::LevelFilter;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "kiosk-scale",
    version,
    about = "Load-cell weighing, container calibration and timed pours for the drinks kiosk"
)]
pub(crate) struct Options {
    /// Run against the simulated rig instead of the GPIO header
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Settings document
    #[arg(long = "config", global = true, default_value = "config.json")]
    pub config_path: String,

    /// trace, debug, info, warn, error or off
    #[arg(long, global = true, default_value = "info", value_parser = parse_log_level)]
    pub log_level: LevelFilter,

    #[arg(long, global = true, default_value_t = 13)]
    pub clock_pin: u8,

    #[arg(long, global = true, default_value_t = 6)]
    pub data_pin: u8,

    #[arg(long, global = true, default_value_t = 25)]
    pub beer_valve_pin: u8,

    #[arg(long, global = true, default_value_t = 11)]
    pub cocktail_valve_pin: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub(crate) enum Command {
    /// Weight in grams
    Weigh {
        /// Defaults to the configured sample count
        samples: Option<usize>,
    },
    /// Zero the scale with nothing on it
    Tare,
    /// Calibrate with a known weight on the scale
    Calibrate { grams: f32 },
    /// Power cycle the HX711
    Reset,
    /// Raw signal statistics
    Noise {
        #[arg(default_value_t = 20)]
        samples: usize,
    },
    /// Print live readings
    Watch {
        #[arg(default_value_t = 20)]
        count: usize,
    },
    /// Timed pour with receipt
    Pour {
        drink: DrinkType,
        #[arg(default_value_t = 3.0, value_parser = parse_seconds)]
        seconds: f32,
    },
    /// Record the empty beer keg
    CalibrateBeer,
    /// Record the empty cocktail container
    CalibrateCocktail,
    /// Remaining volume
    Measure { drink: DrinkType },
    /// Print the settings document
    ShowConfig,
    /// Open one valve for a while
    ValveTest {
        drink: DrinkType,
        #[arg(default_value_t = 2.0, value_parser = parse_seconds)]
        seconds: f32,
    },
}

fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    match level.to_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::Trace),
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARN" => Ok(LevelFilter::Warn),
        "ERROR" => Ok(LevelFilter::Error),
        "OFF" => Ok(LevelFilter::Off),
        _ => Err(format!("unknown log level '{}'", level)),
    }
}

fn parse_seconds(value: &str) -> Result<f32, String> {
    let seconds: f32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(format!("duration must be zero or more seconds, got '{}'", value))
    }
}
