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

use crate::weight::calibration::CalibrationError;
use crate::weight::filter::NoiseReport;
use crate::weight::weight::Error;
use crate::weight::WeighingSystem;
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::pubsub::{PubSubChannel, Publisher, Subscriber, WaitResult};
use log::warn;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeighingError {
    StrainGaugeFailed,
    InvalidSampleCount(usize),
    InvalidKnownWeight(f32),
    NoLoadDetected,
    NotCalibrated,
    SignalSaturated,
    UnexpectedResponse,
}

impl<E> From<Error<E>> for WeighingError {
    fn from(e: Error<E>) -> Self {
        match e {
            Error::StrainGaugeReadingError(_) => WeighingError::StrainGaugeFailed,
            Error::InvalidSampleCount(n) => WeighingError::InvalidSampleCount(n),
            Error::Calibration(CalibrationError::InvalidKnownWeight(g)) => {
                WeighingError::InvalidKnownWeight(g)
            }
            Error::Calibration(CalibrationError::NoLoadDetected) => WeighingError::NoLoadDetected,
            Error::Calibration(CalibrationError::NotCalibrated) => WeighingError::NotCalibrated,
            Error::SignalSaturated => WeighingError::SignalSaturated,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeightRequest {
    Tare,
    CalibrationAtMass(f32),
    Weight(usize),
    ResetHardware,
    NoiseAnalysis(usize),
    /// Smoothed reading, as published in live updates.
    Reading,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightCommand {
    pub id: u32,
    pub request: WeightRequest,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeightResponse {
    Tared(f32),
    Calibrated(f32),
    Weight(f32),
    HardwareReset,
    Noise(NoiseReport),
    Reading(f32),
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum WeightEvents {
    WeightUpdate(f32),
    RequestCompleted(u32, WeightResponse),
    RequestFailed(u32, WeighingError),
}

const REQUEST_DEPTH: usize = 4;
const CHANNEL_DEPTH: usize = 10;
const CHANNEL_SUBS: usize = 4;
const CHANNEL_PUBS: usize = 1;

pub type WeightRequestChannel = Channel<CriticalSectionRawMutex, WeightCommand, REQUEST_DEPTH>;
pub type WeightRequestSender<'a> =
    Sender<'a, CriticalSectionRawMutex, WeightCommand, REQUEST_DEPTH>;
pub type WeightRequestReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, WeightCommand, REQUEST_DEPTH>;

pub type WeightChannel =
    PubSubChannel<CriticalSectionRawMutex, WeightEvents, CHANNEL_DEPTH, CHANNEL_SUBS, CHANNEL_PUBS>;
pub type WeightChannelSubscriber<'a> = Subscriber<
    'a,
    CriticalSectionRawMutex,
    WeightEvents,
    CHANNEL_DEPTH,
    CHANNEL_SUBS,
    CHANNEL_PUBS,
>;
pub type WeightChannelPublisher<'a> = Publisher<
    'a,
    CriticalSectionRawMutex,
    WeightEvents,
    CHANNEL_DEPTH,
    CHANNEL_SUBS,
    CHANNEL_PUBS,
>;

static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(1);

/// Client side of the weighing manager. Each call is tagged with a fresh id and waits for the
/// event carrying it, so several clients can share the channels.
pub struct WeighingSystemOverChannel<'a> {
    request_tx: WeightRequestSender<'a>,
    weight_event_rx: WeightChannelSubscriber<'a>,
}

impl<'a> WeighingSystemOverChannel<'a> {
    pub fn new(
        request_tx: WeightRequestSender<'a>,
        weight_event_rx: WeightChannelSubscriber<'a>,
    ) -> Self {
        Self {
            request_tx,
            weight_event_rx,
        }
    }

    /// Wait for the next live update. These are only published while the manager runs with an
    /// update period and the scale is calibrated; use `get_reading` for an on-demand value.
    pub async fn live_update(&mut self) -> f32 {
        loop {
            match self.weight_event_rx.next_message().await {
                WaitResult::Message(WeightEvents::WeightUpdate(grams)) => return grams,
                WaitResult::Lagged(missed) => {
                    warn!("Weight client missed {} events", missed);
                }
                WaitResult::Message(_) => {}
            }
        }
    }

    async fn request(&mut self, request: WeightRequest) -> Result<WeightResponse, WeighingError> {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        self.request_tx.send(WeightCommand { id, request }).await;
        loop {
            match self.weight_event_rx.next_message().await {
                WaitResult::Message(WeightEvents::RequestCompleted(rid, response)) if rid == id => {
                    return Ok(response);
                }
                WaitResult::Message(WeightEvents::RequestFailed(rid, e)) if rid == id => {
                    return Err(e);
                }
                WaitResult::Lagged(missed) => {
                    warn!("Weight client missed {} events", missed);
                }
                WaitResult::Message(_) => {}
            }
        }
    }
}

impl WeighingSystem for WeighingSystemOverChannel<'_> {
    type Error = WeighingError;

    async fn tare(&mut self) -> Result<f32, Self::Error> {
        match self.request(WeightRequest::Tare).await? {
            WeightResponse::Tared(offset) => Ok(offset),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }

    async fn calibrate(&mut self, known_weight_grams: f32) -> Result<f32, Self::Error> {
        match self
            .request(WeightRequest::CalibrationAtMass(known_weight_grams))
            .await?
        {
            WeightResponse::Calibrated(factor) => Ok(factor),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }

    async fn read_weight_grams(&mut self, samples: usize) -> Result<f32, Self::Error> {
        match self.request(WeightRequest::Weight(samples)).await? {
            WeightResponse::Weight(grams) => Ok(grams),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }

    async fn reset_hardware(&mut self) -> Result<(), Self::Error> {
        match self.request(WeightRequest::ResetHardware).await? {
            WeightResponse::HardwareReset => Ok(()),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }

    async fn analyse_noise(&mut self, samples: usize) -> Result<NoiseReport, Self::Error> {
        match self.request(WeightRequest::NoiseAnalysis(samples)).await? {
            WeightResponse::Noise(report) => Ok(report),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }

    async fn get_reading(&mut self) -> Result<f32, Self::Error> {
        match self.request(WeightRequest::Reading).await? {
            WeightResponse::Reading(grams) => Ok(grams),
            _ => Err(WeighingError::UnexpectedResponse),
        }
    }
}
