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

use crate::storage::settings::settings_store::SettingsManagerMutex;
use crate::storage::settings::{SettingError, SettingValue, SettingsAccessor, SettingsAccessorId};
use log::{trace, warn};

/// Handle onto the shared settings store. Copies share the same store.
#[derive(Clone, Copy)]
pub struct JsonSettingsAccessor<'a> {
    store: &'a SettingsManagerMutex,
}

impl<'a> JsonSettingsAccessor<'a> {
    pub fn new(store: &'a SettingsManagerMutex) -> Self {
        Self { store }
    }
}

impl SettingsAccessor for JsonSettingsAccessor<'_> {
    type Error = SettingError;

    async fn get_setting(&self, setting: SettingsAccessorId) -> Option<SettingValue> {
        let settings = self.store.lock().await;
        settings.get_setting(setting)
    }

    async fn save_setting(
        &self,
        setting: SettingsAccessorId,
        value: SettingValue,
    ) -> Result<(), Self::Error> {
        let mut settings = self.store.lock().await;
        trace!("Saving {:?} = {:?}", setting, value);
        settings.save_setting(setting, value).map_err(|e| {
            warn!("Unable to save setting {:?}: {:?}", setting, e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispense::DrinkType;
    use crate::storage::settings::settings_store::SettingsManager;
    use crate::storage::settings::{get_float, get_float_or};
    use embassy_futures::block_on;
    use embassy_sync::mutex::Mutex;

    #[test]
    fn copies_share_the_same_store() {
        let store: SettingsManagerMutex = Mutex::new(SettingsManager::new());
        let writer = JsonSettingsAccessor::new(&store);
        let reader = writer;

        block_on(async {
            writer
                .save_setting(SettingsAccessorId::ScaleBeerTare, SettingValue::Float(420.0))
                .await
                .unwrap();
            assert_eq!(get_float(&reader, SettingsAccessorId::ScaleBeerTare).await, Ok(420.0));
        });
    }

    #[test]
    fn typed_helpers_report_missing_and_mismatched_values() {
        let store: SettingsManagerMutex = Mutex::new(SettingsManager::new());
        let settings = JsonSettingsAccessor::new(&store);

        block_on(async {
            assert_eq!(
                get_float(&settings, SettingsAccessorId::ScaleBeerEmpty).await,
                Err(SettingError::RetrieveError)
            );
            assert_eq!(
                get_float(&settings, SettingsAccessorId::DrinkName(DrinkType::Beer)).await,
                Err(SettingError::TypeMismatch)
            );
            assert_eq!(
                get_float_or(&settings, SettingsAccessorId::ScaleBeerEmpty, 3.0).await,
                3.0
            );
        });
    }
}
