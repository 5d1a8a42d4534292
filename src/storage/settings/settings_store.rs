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

use crate::storage::settings::{
    SettingError, SettingKind, SettingLocation, SettingValue, SettingsAccessorId,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{json, Map, Number, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub type SettingsManagerMutex = Mutex<CriticalSectionRawMutex, SettingsManager>;

/// The document a fresh kiosk starts from. Keys present in the file always win.
pub fn default_config() -> Value {
    json!({
        "beer": {
            "price_per_ml": 0.005,
            "drink_name": "Beer",
            "barrel_size": 5000,
            "theoretical_weight": 0
        },
        "cocktail": {
            "price_per_ml": 0.01,
            "drink_name": "Cocktail",
            "container_size": 1000,
            "theoretical_weight": 0
        },
        "scale": {
            "beer_tare": 0,
            "cocktail_tare": 0,
            "current_weight": 0
        },
        "ml_per_gram": 1.0,
        "pour_policy": {
            "negative_volume": "reject",
            "baseline": "start_weight"
        }
    })
}

/// Fill in every key of `defaults` missing from `target`, recursing into objects.
fn merge_defaults(target: &mut Value, defaults: &Value) {
    let (Value::Object(target), Value::Object(defaults)) = (target, defaults) else {
        return;
    };
    for (key, default_value) in defaults {
        match target.get_mut(key) {
            Some(existing) => merge_defaults(existing, default_value),
            None => {
                target.insert(key.clone(), default_value.clone());
            }
        }
    }
}

/// Store floats with their shortest decimal form so 0.005 does not come back as
/// 0.004999999888241291.
fn float_to_json(value: f32) -> Option<Value> {
    let widened = value.to_string().parse::<f64>().unwrap_or(value as f64);
    Number::from_f64(widened).map(Value::Number)
}

/// Settings backed by the JSON configuration file shared with the web layer.
pub struct SettingsManager {
    document: Value,
    path: Option<PathBuf>,
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsManager {
    /// Defaults only, never written to disk.
    pub fn new() -> Self {
        Self {
            document: default_config(),
            path: None,
        }
    }

    /// Load `path`, merged over the defaults. An unreadable or malformed file is replaced by the
    /// defaults on the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut document = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(value @ Value::Object(_)) => value,
                Ok(_) => {
                    warn!("{} is not a JSON object, using defaults", path.display());
                    Value::Object(Map::new())
                }
                Err(e) => {
                    warn!("Unable to parse {}: {}. Using defaults", path.display(), e);
                    Value::Object(Map::new())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}, starting from defaults", path.display());
                Value::Object(Map::new())
            }
            Err(e) => {
                warn!("Unable to read {}: {}. Using defaults", path.display(), e);
                Value::Object(Map::new())
            }
        };
        merge_defaults(&mut document, &default_config());
        debug!("Settings loaded from {}", path.display());

        Self {
            document,
            path: Some(path),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    fn lookup(&self, location: SettingLocation) -> Option<&Value> {
        match location.section {
            Some(section) => self.document.get(section)?.get(location.key),
            None => self.document.get(location.key),
        }
    }

    pub fn get_setting(&self, id: SettingsAccessorId) -> Option<SettingValue> {
        let raw = self.lookup(id.location())?;
        let value = match id.kind() {
            SettingKind::Float => raw.as_f64().map(|v| SettingValue::Float(v as f32)),
            SettingKind::Text => raw.as_str().map(|v| SettingValue::Text(v.to_owned())),
            SettingKind::NegativePourPolicy => serde_json::from_value(raw.clone())
                .ok()
                .map(SettingValue::NegativePourPolicy),
            SettingKind::PourBaseline => serde_json::from_value(raw.clone())
                .ok()
                .map(SettingValue::PourBaseline),
        };
        if value.is_none() {
            warn!("Setting {:?} has unexpected value {}", id, raw);
        }
        value
    }

    /// Update the in-memory document without touching the file.
    pub fn set_setting(
        &mut self,
        id: SettingsAccessorId,
        value: SettingValue,
    ) -> Result<(), SettingError> {
        if id.kind() != value.kind() {
            return Err(SettingError::TypeMismatch);
        }
        let json_value = match value {
            SettingValue::Float(v) => float_to_json(v).ok_or(SettingError::TypeMismatch)?,
            SettingValue::Text(v) => Value::String(v),
            SettingValue::NegativePourPolicy(v) => {
                serde_json::to_value(v).map_err(|_| SettingError::TypeMismatch)?
            }
            SettingValue::PourBaseline(v) => {
                serde_json::to_value(v).map_err(|_| SettingError::TypeMismatch)?
            }
        };

        let location = id.location();
        let Value::Object(root) = &mut self.document else {
            return Err(SettingError::SaveError);
        };
        let container = match location.section {
            Some(section) => {
                let entry = root
                    .entry(section)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                match entry {
                    Value::Object(map) => map,
                    _ => return Err(SettingError::SaveError),
                }
            }
            None => root,
        };
        container.insert(location.key.to_owned(), json_value);
        Ok(())
    }

    /// Write the document back with four space indentation. No-op for an in-memory store.
    pub fn save(&self) -> Result<(), SettingError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.document.serialize(&mut serializer).map_err(|e| {
            warn!("Unable to serialise settings: {}", e);
            SettingError::SaveError
        })?;

        fs::write(path, buffer).map_err(|e| {
            warn!("Unable to write {}: {}", path.display(), e);
            SettingError::SaveError
        })?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Set and persist in one step.
    pub fn save_setting(
        &mut self,
        id: SettingsAccessorId,
        value: SettingValue,
    ) -> Result<(), SettingError> {
        self.set_setting(id, value)?;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispense::pour::{NegativePourPolicy, PourBaseline};
    use crate::dispense::DrinkType;

    fn temp_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "kiosk-scale-settings-{}-{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir.join("config.json")
    }

    #[test]
    fn defaults_are_available_in_memory() {
        let settings = SettingsManager::new();
        assert_eq!(
            settings.get_setting(SettingsAccessorId::PricePerMl(DrinkType::Beer)),
            Some(SettingValue::Float(0.005))
        );
        assert_eq!(
            settings.get_setting(SettingsAccessorId::DrinkName(DrinkType::Cocktail)),
            Some(SettingValue::Text("Cocktail".to_owned()))
        );
        assert_eq!(
            settings.get_setting(SettingsAccessorId::NegativePourPolicy),
            Some(SettingValue::NegativePourPolicy(NegativePourPolicy::Reject))
        );
        assert_eq!(
            settings.get_setting(SettingsAccessorId::PourBaseline),
            Some(SettingValue::PourBaseline(PourBaseline::StartWeight))
        );
        assert_eq!(
            settings.get_setting(SettingsAccessorId::ContainerSize(DrinkType::Beer)),
            Some(SettingValue::Float(5000.0))
        );
        assert_eq!(settings.get_setting(SettingsAccessorId::ScaleTareOffset), None);
    }

    #[test]
    fn load_merges_file_over_defaults_and_keeps_unknown_keys() {
        let path = temp_config_path("merge");
        fs::write(
            &path,
            r#"{"beer": {"price_per_ml": 0.007}, "admin_email": "bar@example.com"}"#,
        )
        .unwrap();

        let mut settings = SettingsManager::load(&path);
        assert_eq!(
            settings.get_setting(SettingsAccessorId::PricePerMl(DrinkType::Beer)),
            Some(SettingValue::Float(0.007))
        );
        assert_eq!(
            settings.get_setting(SettingsAccessorId::DrinkName(DrinkType::Beer)),
            Some(SettingValue::Text("Beer".to_owned()))
        );

        settings
            .save_setting(SettingsAccessorId::ScaleCurrentWeight, SettingValue::Float(650.0))
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n    \"admin_email\""));
        let reloaded = SettingsManager::load(&path);
        assert_eq!(
            reloaded.get_setting(SettingsAccessorId::ScaleCurrentWeight),
            Some(SettingValue::Float(650.0))
        );
        assert_eq!(reloaded.document()["admin_email"], "bar@example.com");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = temp_config_path("malformed");
        fs::write(&path, "{ not json").unwrap();

        let settings = SettingsManager::load(&path);
        assert_eq!(settings.get_setting(SettingsAccessorId::MlPerGram), Some(SettingValue::Float(1.0)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_values_of_the_wrong_kind() {
        let mut settings = SettingsManager::new();
        assert_eq!(
            settings.set_setting(SettingsAccessorId::MlPerGram, SettingValue::Text("x".into())),
            Err(SettingError::TypeMismatch)
        );
        assert_eq!(
            settings.set_setting(SettingsAccessorId::ScaleTareOffset, SettingValue::Float(f32::NAN)),
            Err(SettingError::TypeMismatch)
        );
    }

    #[test]
    fn floats_are_stored_in_shortest_form() {
        let mut settings = SettingsManager::new();
        settings
            .set_setting(
                SettingsAccessorId::PricePerMl(DrinkType::Cocktail),
                SettingValue::Float(0.005),
            )
            .unwrap();
        assert_eq!(settings.document()["cocktail"]["price_per_ml"], json!(0.005));
    }

    #[test]
    fn creates_missing_sections_for_new_keys() {
        let mut settings = SettingsManager::new();
        settings
            .set_setting(
                SettingsAccessorId::ConnectorWeight(DrinkType::Beer),
                SettingValue::Float(12.5),
            )
            .unwrap();
        settings
            .set_setting(
                SettingsAccessorId::NegativePourPolicy,
                SettingValue::NegativePourPolicy(NegativePourPolicy::Clamp),
            )
            .unwrap();
        assert_eq!(settings.document()["beer"]["connector_weight"], json!(12.5));
        assert_eq!(settings.document()["pour_policy"]["negative_volume"], json!("clamp"));
    }
}
