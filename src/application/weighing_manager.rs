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

use crate::weight::messaging::{
    WeighingError, WeightChannelPublisher, WeightCommand, WeightEvents, WeightRequest,
    WeightRequestReceiver, WeightResponse,
};
use crate::weight::WeighingSystem;
use core::fmt::Debug;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};
use log::{debug, warn};

pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_millis(250);

/// Sole owner of the weighing system. Requests arrive one at a time over the request channel, so
/// hardware access and calibration updates never interleave.
pub struct WeighingManager<'a, WS> {
    request_rx: WeightRequestReceiver<'a>,
    weight_channel_publisher: WeightChannelPublisher<'a>,
    weight_scale: WS,
    update_period: Option<Duration>,
}

impl<'a, WS> WeighingManager<'a, WS>
where
    WS: WeighingSystem,
    WS::Error: Debug,
    WeighingError: From<WS::Error>,
{
    /// `update_period` of `None` turns off the live weight updates.
    pub fn new(
        request_rx: WeightRequestReceiver<'a>,
        weight_channel_publisher: WeightChannelPublisher<'a>,
        weight_scale: WS,
        update_period: Option<Duration>,
    ) -> Self {
        Self {
            request_rx,
            weight_channel_publisher,
            weight_scale,
            update_period,
        }
    }

    pub async fn run(&mut self) -> ! {
        let Some(period) = self.update_period else {
            loop {
                let command = self.request_rx.receive().await;
                self.handle_request(command).await;
            }
        };

        let mut periodic_timer = Ticker::every(period);
        loop {
            let request_or_timer = select(self.request_rx.receive(), periodic_timer.next()).await;
            match request_or_timer {
                Either::First(command) => self.handle_request(command).await,
                Either::Second(_) => self.do_measurement().await,
            }
        }
    }

    async fn handle_request(&mut self, command: WeightCommand) {
        debug!("Weight request {}: {:?}", command.id, command.request);
        let result = match command.request {
            WeightRequest::Tare => self.weight_scale.tare().await.map(WeightResponse::Tared),
            WeightRequest::CalibrationAtMass(mass) => self
                .weight_scale
                .calibrate(mass)
                .await
                .map(WeightResponse::Calibrated),
            WeightRequest::Weight(samples) => self
                .weight_scale
                .read_weight_grams(samples)
                .await
                .map(WeightResponse::Weight),
            WeightRequest::ResetHardware => self
                .weight_scale
                .reset_hardware()
                .await
                .map(|_| WeightResponse::HardwareReset),
            WeightRequest::NoiseAnalysis(samples) => self
                .weight_scale
                .analyse_noise(samples)
                .await
                .map(WeightResponse::Noise),
            WeightRequest::Reading => self
                .weight_scale
                .get_reading()
                .await
                .map(WeightResponse::Reading),
        };

        let event = match result {
            Ok(response) => WeightEvents::RequestCompleted(command.id, response),
            Err(e) => {
                warn!("Weight request {:?} failed: {:?}", command.request, e);
                WeightEvents::RequestFailed(command.id, e.into())
            }
        };
        self.weight_channel_publisher.publish_immediate(event);
    }

    async fn do_measurement(&mut self) {
        match self.weight_scale.get_reading().await {
            Ok(weight) => self
                .weight_channel_publisher
                .publish_immediate(WeightEvents::WeightUpdate(weight)),
            Err(e) => match WeighingError::from(e) {
                // nothing to show until an operator calibrates
                WeighingError::NotCalibrated => {}
                e => warn!("Live measurement failed: {:?}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::accessor::JsonSettingsAccessor;
    use crate::storage::settings::settings_store::{SettingsManager, SettingsManagerMutex};
    use crate::storage::settings::{SettingValue, SettingsAccessorId};
    use crate::weight::interface::hx711::{Hx711, Hx711Gain, Hx711Timing};
    use crate::weight::interface::simulated::{SimulatedClockPin, SimulatedDataPin, SimulatedHx711};
    use crate::weight::messaging::{WeighingSystemOverChannel, WeightChannel, WeightRequestChannel};
    use crate::weight::weight::{SamplingConfig, WeightScale};
    use core::future::Future;
    use embassy_futures::block_on;
    use embassy_sync::mutex::Mutex;

    type TestScale<'a> =
        WeightScale<Hx711<SimulatedClockPin, SimulatedDataPin>, JsonSettingsAccessor<'a>>;

    fn manager<'a>(
        chip: &SimulatedHx711,
        store: &'a SettingsManagerMutex,
        requests: &'a WeightRequestChannel,
        events: &'a WeightChannel,
        update_period: Option<Duration>,
    ) -> WeighingManager<'a, TestScale<'a>> {
        let (clk, data) = chip.pins();
        let hx711 = Hx711::new(clk, data, Hx711Gain::Gain128).with_timing(Hx711Timing {
            ready_timeout: Duration::from_millis(5),
            poll_interval: Duration::from_micros(50),
            power_up_settle: Duration::from_micros(10),
        });
        let sampling = SamplingConfig {
            sample_delay: Duration::from_ticks(0),
            ..SamplingConfig::default()
        };
        let scale = block_on(WeightScale::new(hx711, JsonSettingsAccessor::new(store), sampling))
            .unwrap();
        WeighingManager::new(
            requests.receiver(),
            events.publisher().unwrap(),
            scale,
            update_period,
        )
    }

    /// Drive the manager alongside the client operations until the latter finish.
    fn until_done<T>(manager: impl Future, client_ops: impl Future<Output = T>) -> T {
        block_on(async {
            match select(manager, client_ops).await {
                Either::First(_) => unreachable!("manager loop returned"),
                Either::Second(result) => result,
            }
        })
    }

    #[test]
    fn tare_calibrate_and_weigh_through_the_channel() {
        let chip = SimulatedHx711::new();
        let store = Mutex::new(SettingsManager::new());
        let requests = WeightRequestChannel::new();
        let events = WeightChannel::new();
        let mut manager = manager(&chip, &store, &requests, &events, None);
        let mut client =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());

        let (offset, factor, weight) = until_done(manager.run(), async {
            chip.set_constant(2_000);
            let offset = client.tare().await.unwrap();
            chip.set_constant(2_000 + 40 * 250);
            let factor = client.calibrate(250.0).await.unwrap();
            let weight = client.read_weight_grams(5).await.unwrap();
            (offset, factor, weight)
        });

        assert_eq!(offset, 2_000.0);
        assert_eq!(factor, 40.0);
        assert_eq!(weight, 250.0);
    }

    #[test]
    fn failures_come_back_to_the_caller() {
        let chip = SimulatedHx711::new();
        let store = Mutex::new(SettingsManager::new());
        let requests = WeightRequestChannel::new();
        let events = WeightChannel::new();
        let mut manager = manager(&chip, &store, &requests, &events, None);
        let mut client =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());

        let (weigh, calibrate, burst) = until_done(manager.run(), async {
            (
                client.read_weight_grams(5).await,
                client.calibrate(-1.0).await,
                client.analyse_noise(0).await,
            )
        });

        assert_eq!(weigh, Err(WeighingError::NotCalibrated));
        assert_eq!(calibrate, Err(WeighingError::InvalidKnownWeight(-1.0)));
        assert_eq!(burst, Err(WeighingError::InvalidSampleCount(0)));
    }

    #[test]
    fn two_clients_each_get_their_own_response() {
        let chip = SimulatedHx711::new();
        chip.set_constant(700);
        let store = Mutex::new(SettingsManager::new());
        let requests = WeightRequestChannel::new();
        let events = WeightChannel::new();
        let mut manager = manager(&chip, &store, &requests, &events, None);
        let mut first =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());
        let mut second =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());

        let (tare, reset) = until_done(manager.run(), async {
            embassy_futures::join::join(first.tare(), second.reset_hardware()).await
        });

        assert_eq!(tare, Ok(700.0));
        assert_eq!(reset, Ok(()));
    }

    fn calibrated_store() -> SettingsManagerMutex {
        let mut settings = SettingsManager::new();
        settings
            .set_setting(SettingsAccessorId::ScaleTareOffset, SettingValue::Float(500.0))
            .unwrap();
        settings
            .set_setting(SettingsAccessorId::ScaleCalibrationFactor, SettingValue::Float(10.0))
            .unwrap();
        Mutex::new(settings)
    }

    #[test]
    fn publishes_live_updates_when_calibrated() {
        let chip = SimulatedHx711::new();
        chip.set_constant(1_500);
        let store = calibrated_store();
        let requests = WeightRequestChannel::new();
        let events = WeightChannel::new();
        let mut manager = manager(
            &chip,
            &store,
            &requests,
            &events,
            Some(Duration::from_millis(5)),
        );
        let mut client =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());

        let reading = until_done(manager.run(), client.live_update());

        assert_eq!(reading, 100.0);
    }

    #[test]
    fn smoothed_reading_on_request_without_live_updates() {
        let chip = SimulatedHx711::new();
        chip.set_constant(1_500);
        let store = calibrated_store();
        let requests = WeightRequestChannel::new();
        let events = WeightChannel::new();
        let mut manager = manager(&chip, &store, &requests, &events, None);
        let mut client =
            WeighingSystemOverChannel::new(requests.sender(), events.subscriber().unwrap());

        let (first, second) = until_done(manager.run(), async {
            let first = client.get_reading().await;
            chip.set_constant(1_600);
            (first, client.get_reading().await)
        });

        assert_eq!(first, Ok(100.0));
        let second = second.unwrap();
        assert!(second > 100.0 && second <= 110.0, "{}", second);
    }
}
