//! Installation settings as written in a JSON config file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::client::{ApiClient, ApiClientBuilder};
use crate::{Error, Result};

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_COOLING_TEMP: f64 = 32.0;
pub const DEFAULT_MIN_COOLING_TEMP: f64 = 20.0;
pub const DEFAULT_MAX_HEATING_TEMP: f64 = 26.0;
pub const DEFAULT_MIN_HEATING_TEMP: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NeoConfig {
    pub client_name: String,
    pub username: String,
    pub password: String,
    /// Empty picks the only system on the account.
    pub device_serial: String,
    /// Seconds between background status reads.
    pub refresh_interval: u64,
    pub max_cooling_temp: f64,
    pub min_cooling_temp: f64,
    pub max_heating_temp: f64,
    pub min_heating_temp: f64,
    /// Directory for the persisted token records.
    pub storage_path: Option<PathBuf>,
}

impl Default for NeoConfig {
    fn default() -> Self {
        Self {
            client_name: String::new(),
            username: String::new(),
            password: String::new(),
            device_serial: String::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL_SECS,
            max_cooling_temp: DEFAULT_MAX_COOLING_TEMP,
            min_cooling_temp: DEFAULT_MIN_COOLING_TEMP,
            max_heating_temp: DEFAULT_MAX_HEATING_TEMP,
            min_heating_temp: DEFAULT_MIN_HEATING_TEMP,
            storage_path: None,
        }
    }
}

impl NeoConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("clientName", &self.client_name),
            ("username", &self.username),
            ("password", &self.password),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if self.refresh_interval == 0 {
            return Err(Error::Config("refreshInterval must be positive".to_string()));
        }
        if self.min_cooling_temp > self.max_cooling_temp {
            return Err(Error::Config(format!(
                "minCoolingTemp {} is above maxCoolingTemp {}",
                self.min_cooling_temp, self.max_cooling_temp
            )));
        }
        if self.min_heating_temp > self.max_heating_temp {
            return Err(Error::Config(format!(
                "minHeatingTemp {} is above maxHeatingTemp {}",
                self.min_heating_temp, self.max_heating_temp
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn serial(&self) -> Option<&str> {
        let serial = self.device_serial.trim();
        (!serial.is_empty()).then_some(serial)
    }

    pub fn clamp_cool(&self, temp: f64) -> f64 {
        temp.clamp(self.min_cooling_temp, self.max_cooling_temp)
    }

    pub fn clamp_heat(&self, temp: f64) -> f64 {
        temp.clamp(self.min_heating_temp, self.max_heating_temp)
    }

    /// A client builder carrying these credentials, serial and storage.
    pub fn client_builder(&self) -> Result<ApiClientBuilder> {
        self.validate()?;
        let mut builder = ApiClient::builder(&self.username, &self.password, &self.client_name);
        if let Some(serial) = self.serial() {
            builder = builder.serial(serial);
        }
        if let Some(dir) = &self.storage_path {
            builder = builder.storage_dir(dir);
        }
        Ok(builder)
    }
}
