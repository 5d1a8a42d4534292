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

mod rig;
mod util;

use crate::rig::{load_for, SimulatedRig};
use crate::util::{Command, Options};
use clap::Parser;
use core::fmt::Debug;
use embassy_executor::Spawner;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::PubSubChannel;
use embassy_time::{Duration, Timer};
use kiosk_scale::application::weighing_manager::{WeighingManager, DEFAULT_UPDATE_PERIOD};
use kiosk_scale::dispense::containers::{ContainerCalibration, ContainerLevel, ContainerProcedures};
use kiosk_scale::dispense::pour::{InMemoryPourSession, PourController};
use kiosk_scale::dispense::ValveActuator;
use kiosk_scale::dispense::valves::{GpioValves, SimulatedValvePin};
use kiosk_scale::storage::settings::accessor::JsonSettingsAccessor;
use kiosk_scale::storage::settings::settings_store::{SettingsManager, SettingsManagerMutex};
use kiosk_scale::weight::filter::{NoiseReport, SignalHealth};
use kiosk_scale::weight::interface::hx711::{Hx711Gain, Hx711Timing};
use kiosk_scale::weight::interface::simulated::SimulatedHx711;
use kiosk_scale::weight::interface::AsyncStrainGaugeInterface;
use kiosk_scale::weight::messaging::{
    WeighingSystemOverChannel, WeightChannel, WeightChannelPublisher, WeightRequestChannel,
    WeightRequestReceiver,
};
use kiosk_scale::weight::weight::{SamplingConfig, WeightScale};
use kiosk_scale::weight::WeighingSystem;
use log::{error, info};
use serde_json::{json, Value};
use static_cell::StaticCell;
use std::process;

const EXIT_FAILURE: i32 = 1;

static SETTINGS: StaticCell<SettingsManagerMutex> = StaticCell::new();
static WEIGHT_REQUEST_CHANNEL: WeightRequestChannel = Channel::new();
static WEIGHT_EVENT_CHANNEL: WeightChannel = PubSubChannel::new();

/// Everything the weighing manager needs apart from the strain gauge itself.
struct ManagerWiring {
    settings: &'static SettingsManagerMutex,
    request_rx: WeightRequestReceiver<'static>,
    weight_channel_publisher: WeightChannelPublisher<'static>,
    update_period: Option<Duration>,
}

fn manager_wiring(
    settings: &'static SettingsManagerMutex,
    update_period: Option<Duration>,
) -> Result<ManagerWiring, String> {
    let weight_channel_publisher = WEIGHT_EVENT_CHANNEL
        .publisher()
        .map_err(|e| format!("No free weight event publisher: {:?}", e))?;
    Ok(ManagerWiring {
        settings,
        request_rx: WEIGHT_REQUEST_CHANNEL.receiver(),
        weight_channel_publisher,
        update_period,
    })
}

fn weighing_client() -> Result<WeighingSystemOverChannel<'static>, String> {
    let subscriber = WEIGHT_EVENT_CHANNEL
        .subscriber()
        .map_err(|e| format!("No free weight event subscriber: {:?}", e))?;
    Ok(WeighingSystemOverChannel::new(
        WEIGHT_REQUEST_CHANNEL.sender(),
        subscriber,
    ))
}

async fn run_weighing<SG>(strain_gauge: SG, wiring: ManagerWiring) -> !
where
    SG: AsyncStrainGaugeInterface,
    SG::Error: Debug,
{
    let settings = JsonSettingsAccessor::new(wiring.settings);
    let weight_scale = match WeightScale::new(strain_gauge, settings, SamplingConfig::default()).await
    {
        Ok(weight_scale) => weight_scale,
        Err(e) => {
            error!("Could not start the strain gauge: {:?}", e);
            process::exit(EXIT_FAILURE);
        }
    };
    let mut weighing_manager = WeighingManager::new(
        wiring.request_rx,
        wiring.weight_channel_publisher,
        weight_scale,
        wiring.update_period,
    );
    weighing_manager.run().await
}

#[embassy_executor::task]
async fn simulated_weighing_task(chip: SimulatedHx711, wiring: ManagerWiring) {
    let strain_gauge = chip.driver(Hx711Gain::Gain128, Hx711Timing::default());
    run_weighing(strain_gauge, wiring).await
}

#[embassy_executor::task]
async fn simulated_flow_task(rig: SimulatedRig) {
    rig.run().await
}

#[cfg(feature = "rpi")]
#[embassy_executor::task]
async fn gpio_weighing_task(
    clock_pin: rppal::gpio::OutputPin,
    data_pin: rppal::gpio::InputPin,
    wiring: ManagerWiring,
) {
    use kiosk_scale::weight::interface::hx711::Hx711;

    let strain_gauge = Hx711::new(clock_pin, data_pin, Hx711Gain::Gain128);
    run_weighing(strain_gauge, wiring).await
}

fn start_simulation(
    spawner: &Spawner,
    command: &Command,
    wiring: ManagerWiring,
) -> Result<GpioValves<SimulatedValvePin>, String> {
    let rig = SimulatedRig::with_load(load_for(command));
    let valves = rig.valves();
    spawner
        .spawn(simulated_weighing_task(rig.chip(), wiring))
        .map_err(|e| format!("Could not spawn task: {:?}", e))?;
    spawner
        .spawn(simulated_flow_task(rig))
        .map_err(|e| format!("Could not spawn task: {:?}", e))?;
    info!("Running against the simulated rig");
    Ok(valves)
}

#[cfg(feature = "rpi")]
async fn run_on_gpio(
    spawner: &Spawner,
    options: &Options,
    wiring: ManagerWiring,
    settings: &'static SettingsManagerMutex,
) -> Result<Value, String> {
    use rppal::gpio::Gpio;

    let gpio = Gpio::new().map_err(|e| format!("GPIO unavailable: {}", e))?;
    let pin = |number: u8| {
        gpio.get(number)
            .map_err(|e| format!("GPIO {} unavailable: {}", number, e))
    };

    let clock_pin = pin(options.clock_pin)?.into_output_low();
    let data_pin = pin(options.data_pin)?.into_input();
    let valves = GpioValves::new(
        pin(options.beer_valve_pin)?.into_output_low(),
        pin(options.cocktail_valve_pin)?.into_output_low(),
    )
    .map_err(|e| format!("Could not close the valves: {:?}", e))?;

    spawner
        .spawn(gpio_weighing_task(clock_pin, data_pin, wiring))
        .map_err(|e| format!("Could not spawn task: {:?}", e))?;
    execute(options.command.clone(), valves, settings).await
}

#[cfg(not(feature = "rpi"))]
async fn run_on_gpio(
    _spawner: &Spawner,
    _options: &Options,
    _wiring: ManagerWiring,
    _settings: &'static SettingsManagerMutex,
) -> Result<Value, String> {
    Err(String::from("Built without GPIO support, run with --simulate"))
}

fn failed<E: Debug>(what: &'static str) -> impl Fn(E) -> String {
    move |e| format!("{} failed: {:?}", what, e)
}

fn from_seconds(seconds: f32) -> Duration {
    Duration::from_micros((seconds * 1_000_000.0) as u64)
}

fn wait_for_enter() -> Result<(), String> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map(|_| ())
        .map_err(|e| format!("Could not read from stdin: {}", e))
}

async fn show_config(settings: &SettingsManagerMutex) -> Value {
    settings.lock().await.document().clone()
}

fn noise_json(report: &NoiseReport) -> Value {
    let health = match report.health {
        SignalHealth::Healthy => "healthy",
        SignalHealth::Saturated => "saturated",
        SignalHealth::Noisy(_) => "noisy",
    };
    json!({ "mean": report.mean, "std_dev": report.std_dev, "health": health })
}

fn container_json(calibration: &ContainerCalibration) -> Value {
    json!({
        "empty_weight": calibration.empty_weight,
        "tare": calibration.tare,
        "connector_weight": calibration.connector_weight,
    })
}

fn level_json(level: &ContainerLevel) -> Value {
    json!({
        "measured": level.measured,
        "current_volume": level.net_liquid,
        "remaining": level.remaining,
    })
}

async fn execute<V>(
    command: Command,
    mut valves: V,
    settings: &'static SettingsManagerMutex,
) -> Result<Value, String>
where
    V: ValveActuator,
{
    let weight_samples = SamplingConfig::default().weight_samples;
    let accessor = JsonSettingsAccessor::new(settings);

    match command {
        Command::Weigh { samples } => {
            let grams = weighing_client()?
                .read_weight_grams(samples.unwrap_or(weight_samples))
                .await
                .map_err(failed("Weighing"))?;
            Ok(json!({ "weight": grams }))
        }
        Command::Tare => {
            let offset = weighing_client()?.tare().await.map_err(failed("Tare"))?;
            Ok(json!({ "tare_offset": offset }))
        }
        Command::Calibrate { grams } => {
            let factor = weighing_client()?
                .calibrate(grams)
                .await
                .map_err(failed("Calibration"))?;
            Ok(json!({ "calibration_factor": factor }))
        }
        Command::Reset => {
            weighing_client()?
                .reset_hardware()
                .await
                .map_err(failed("Hardware reset"))?;
            Ok(json!({ "hardware_reset": true }))
        }
        Command::Noise { samples } => {
            let report = weighing_client()?
                .analyse_noise(samples)
                .await
                .map_err(failed("Noise analysis"))?;
            Ok(noise_json(&report))
        }
        Command::Watch { count } => {
            let mut client = weighing_client()?;
            // live updates only flow once calibrated, surface that before waiting on them
            let grams = client.get_reading().await.map_err(failed("Watch"))?;
            if count > 0 {
                println!("{}", json!({ "weight": grams }));
            }
            for _ in 1..count {
                let grams = client.live_update().await;
                println!("{}", json!({ "weight": grams }));
            }
            Ok(Value::Null)
        }
        Command::Pour { drink, seconds } => {
            let mut controller = PourController::new(
                weighing_client()?,
                valves,
                InMemoryPourSession::new(),
                accessor,
                weight_samples,
            );
            controller
                .pour_started(drink)
                .await
                .map_err(failed("Pour start"))?;
            Timer::after(from_seconds(seconds)).await;
            let receipt = controller.pour_stopped().await.map_err(failed("Pour"))?;
            serde_json::to_value(&receipt).map_err(|e| format!("Could not encode receipt: {}", e))
        }
        Command::CalibrateBeer => {
            let calibration = ContainerProcedures::new(weighing_client()?, accessor, weight_samples)
                .calibrate_beer_container()
                .await
                .map_err(failed("Beer container calibration"))?;
            Ok(container_json(&calibration))
        }
        Command::CalibrateCocktail => {
            let mut procedures =
                ContainerProcedures::new(weighing_client()?, accessor, weight_samples);
            let baseline = procedures
                .start_cocktail_calibration()
                .await
                .map_err(failed("Cocktail container calibration"))?;
            eprintln!(
                "Baseline {:.1} g. Place the empty cocktail container and press Enter.",
                baseline
            );
            wait_for_enter()?;
            let calibration = procedures
                .finish_cocktail_calibration()
                .await
                .map_err(failed("Cocktail container calibration"))?;
            Ok(container_json(&calibration))
        }
        Command::Measure { drink } => {
            let level = ContainerProcedures::new(weighing_client()?, accessor, weight_samples)
                .measure_drink(drink)
                .await
                .map_err(failed("Measurement"))?;
            Ok(level_json(&level))
        }
        Command::ShowConfig => Ok(show_config(settings).await),
        Command::ValveTest { drink, seconds } => {
            valves.open(drink).map_err(failed("Valve open"))?;
            Timer::after(from_seconds(seconds)).await;
            valves.close(drink).map_err(failed("Valve close"))?;
            Ok(json!({ "valve": drink, "open_seconds": seconds }))
        }
    }
}

fn finish(outcome: Result<Value, String>) -> ! {
    match outcome {
        Ok(Value::Null) => process::exit(0),
        Ok(value) => {
            println!("{:#}", value);
            process::exit(0)
        }
        Err(message) => {
            error!("{}", message);
            process::exit(EXIT_FAILURE)
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let options = Options::parse();

    env_logger::Builder::from_default_env()
        .filter_level(options.log_level)
        .format_timestamp_millis()
        .init();

    let settings: &'static SettingsManagerMutex =
        SETTINGS.init(Mutex::new(SettingsManager::load(&options.config_path)));
    if options.command == Command::ShowConfig {
        finish(Ok(show_config(settings).await));
    }

    // live updates would only pile up unread for anything but `watch`
    let update_period =
        matches!(options.command, Command::Watch { .. }).then_some(DEFAULT_UPDATE_PERIOD);
    let wiring = match manager_wiring(settings, update_period) {
        Ok(wiring) => wiring,
        Err(message) => finish(Err(message)),
    };

    let outcome = if options.simulate {
        match start_simulation(&spawner, &options.command, wiring) {
            Ok(valves) => execute(options.command.clone(), valves, settings).await,
            Err(message) => Err(message),
        }
    } else {
        run_on_gpio(&spawner, &options, wiring, settings).await
    };
    finish(outcome)
}
