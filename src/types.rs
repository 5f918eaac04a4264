use std::fmt;

use serde::Deserialize;

/// Outcome of a command sent to the cloud.
///
/// `Failure` means the vendor was reached but the command did not take
/// (server fault after retries, or a malformed ack); the local model must
/// resync. `ApiError` means the vendor could not be reached at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Failure,
    ApiError,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandResult::Success => "SUCCESS",
            CommandResult::Failure => "FAILURE",
            CommandResult::ApiError => "API_ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn from_is_on(is_on: bool) -> Self {
        if is_on { PowerState::On } else { PowerState::Off }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClimateMode {
    Auto,
    Cool,
    Heat,
    Fan,
    #[default]
    Unknown,
}

impl ClimateMode {
    pub fn as_neo_str(&self) -> &'static str {
        match self {
            ClimateMode::Auto => "AUTO",
            ClimateMode::Cool => "COOL",
            ClimateMode::Heat => "HEAT",
            ClimateMode::Fan => "FAN",
            ClimateMode::Unknown => "UNKNOWN",
        }
    }

    pub fn from_neo_str(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(ClimateMode::Auto),
            "COOL" => Some(ClimateMode::Cool),
            "HEAT" => Some(ClimateMode::Heat),
            "FAN" => Some(ClimateMode::Fan),
            _ => None,
        }
    }
}

/// What the compressor is actually doing. Reported by the unit, never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressorMode {
    Cool,
    Heat,
    Off,
    #[default]
    Unknown,
}

impl CompressorMode {
    pub fn from_neo_str(s: &str) -> Option<Self> {
        match s {
            "COOL" => Some(CompressorMode::Cool),
            "HEAT" => Some(CompressorMode::Heat),
            "OFF" => Some(CompressorMode::Off),
            _ => None,
        }
    }
}

/// Fan speed, each with a "continuous" variant where the fan keeps running
/// after the set point is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanMode {
    Auto,
    Low,
    Medium,
    High,
    AutoCont,
    LowCont,
    MediumCont,
    HighCont,
    #[default]
    Unknown,
}

impl FanMode {
    pub fn as_neo_str(&self) -> &'static str {
        match self {
            FanMode::Auto => "AUTO",
            FanMode::Low => "LOW",
            FanMode::Medium => "MED",
            FanMode::High => "HIGH",
            FanMode::AutoCont => "AUTO+CONT",
            FanMode::LowCont => "LOW+CONT",
            FanMode::MediumCont => "MED+CONT",
            FanMode::HighCont => "HIGH+CONT",
            FanMode::Unknown => "UNKNOWN",
        }
    }

    pub fn from_neo_str(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(FanMode::Auto),
            "LOW" => Some(FanMode::Low),
            "MED" => Some(FanMode::Medium),
            "HIGH" => Some(FanMode::High),
            "AUTO+CONT" => Some(FanMode::AutoCont),
            "LOW+CONT" => Some(FanMode::LowCont),
            "MED+CONT" => Some(FanMode::MediumCont),
            "HIGH+CONT" => Some(FanMode::HighCont),
            _ => None,
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            FanMode::AutoCont | FanMode::LowCont | FanMode::MediumCont | FanMode::HighCont
        )
    }

    /// Same speed with the continuous flag set or cleared.
    pub fn with_continuous(self, continuous: bool) -> Self {
        match (self, continuous) {
            (FanMode::Auto | FanMode::AutoCont, true) => FanMode::AutoCont,
            (FanMode::Auto | FanMode::AutoCont, false) => FanMode::Auto,
            (FanMode::Low | FanMode::LowCont, true) => FanMode::LowCont,
            (FanMode::Low | FanMode::LowCont, false) => FanMode::Low,
            (FanMode::Medium | FanMode::MediumCont, true) => FanMode::MediumCont,
            (FanMode::Medium | FanMode::MediumCont, false) => FanMode::Medium,
            (FanMode::High | FanMode::HighCont, true) => FanMode::HighCont,
            (FanMode::High | FanMode::HighCont, false) => FanMode::High,
            (FanMode::Unknown, _) => FanMode::Unknown,
        }
    }
}

/// Zone humidity. Sensors without a humidity element report `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Humidity {
    Percent(f64),
    #[default]
    NotSupported,
}

impl Humidity {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Humidity::Percent(p) => Some(*p),
            Humidity::NotSupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Humidity::Percent(_))
    }
}

/// Full snapshot of one zone as found in a status read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneStatus {
    pub zone_name: String,
    pub zone_index: usize,
    pub sensor_id: String,
    pub zone_enabled: bool,
    pub current_temp: f64,
    pub current_humidity: Humidity,
    pub max_heat_set_point: f64,
    pub min_heat_set_point: f64,
    pub max_cool_set_point: f64,
    pub min_cool_set_point: f64,
    pub current_heating_set_temp: f64,
    pub current_cooling_set_temp: f64,
    pub zone_sensor_battery: f64,
}

/// Sparse master-unit snapshot. `None` fields were absent from the read and
/// must leave the corresponding local value untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HvacStatus {
    pub api_error: bool,
    pub cloud_connected: Option<bool>,
    pub power_state: Option<PowerState>,
    pub climate_mode: Option<ClimateMode>,
    pub compressor_mode: Option<CompressorMode>,
    pub fan_mode: Option<FanMode>,
    pub fan_running: Option<bool>,
    pub away_mode: Option<bool>,
    pub quiet_mode: Option<bool>,
    pub continuous_fan_mode: Option<bool>,
    pub control_all_zones: Option<bool>,
    pub master_cooling_set_temp: Option<f64>,
    pub master_heating_set_temp: Option<f64>,
    pub master_current_temp: Option<f64>,
    pub master_current_humidity: Option<f64>,
    pub compressor_chasing_temp: Option<f64>,
    pub compressor_current_temp: Option<f64>,
    pub enabled_zones: Option<Vec<bool>>,
    pub zone_current_status: Vec<ZoneStatus>,
}

impl HvacStatus {
    /// The `{apiError: true}` sentinel returned when the cloud could not be read.
    pub fn api_error() -> Self {
        Self {
            api_error: true,
            ..Default::default()
        }
    }

    pub fn zone(&self, name: &str) -> Option<&ZoneStatus> {
        self.zone_current_status.iter().find(|z| z.zone_name == name)
    }
}

/// A system registered to the account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AcSystem {
    pub serial: String,
    #[serde(rename = "type", default)]
    pub system_type: String,
    #[serde(default)]
    pub description: String,
}
