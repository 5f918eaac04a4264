use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::types::{AcSystem, ClimateMode, FanMode};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://nimbus.actronair.com.au";

pub const PAIR_PATH: &str = "/api/v0/client/user-devices";
pub const TOKEN_PATH: &str = "/api/v0/oauth/token";
pub const SYSTEMS_PATH: &str = "/api/v0/client/ac-systems";
pub const STATUS_PATH: &str = "/api/v0/client/ac-systems/status/latest";
pub const COMMAND_PATH: &str = "/api/v0/client/ac-systems/cmds/send";

pub const PAIR_CLIENT: &str = "ios";
pub const OAUTH_CLIENT_ID: &str = "app";

const SET_SETTINGS: &str = "set-settings";

/// The closed set of commands the cloud accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCommand {
    On,
    Off,
    ClimateModeAuto,
    ClimateModeCool,
    ClimateModeFan,
    ClimateModeHeat,
    FanModeAuto,
    FanModeAutoCont,
    FanModeLow,
    FanModeLowCont,
    FanModeMedium,
    FanModeMediumCont,
    FanModeHigh,
    FanModeHighCont,
    CoolSetPoint,
    HeatSetPoint,
    HeatCoolSetPoint,
    AwayModeOn,
    AwayModeOff,
    QuietModeOn,
    QuietModeOff,
    ControlAllZonesOn,
    ControlAllZonesOff,
    ZoneEnable,
    ZoneDisable,
    ZoneCoolSetPoint,
    ZoneHeatSetPoint,
}

/// Positional command arguments. Commands ignore the ones they don't use;
/// unused temperatures are sent nowhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandParams {
    pub cool_temp: f64,
    pub heat_temp: f64,
    pub zone_index: Option<usize>,
    pub enabled_zones: Option<Vec<bool>>,
}

impl CommandParams {
    pub fn cool(cool_temp: f64) -> Self {
        Self {
            cool_temp,
            ..Default::default()
        }
    }

    pub fn heat(heat_temp: f64) -> Self {
        Self {
            heat_temp,
            ..Default::default()
        }
    }

    pub fn heat_cool(cool_temp: f64, heat_temp: f64) -> Self {
        Self {
            cool_temp,
            heat_temp,
            ..Default::default()
        }
    }

    pub fn zone(mut self, zone_index: usize) -> Self {
        self.zone_index = Some(zone_index);
        self
    }

    pub fn enabled_zones(mut self, zones: Vec<bool>) -> Self {
        self.enabled_zones = Some(zones);
        self
    }
}

impl ApiCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ApiCommand::On => "ON",
            ApiCommand::Off => "OFF",
            ApiCommand::ClimateModeAuto => "CLIMATE_MODE_AUTO",
            ApiCommand::ClimateModeCool => "CLIMATE_MODE_COOL",
            ApiCommand::ClimateModeFan => "CLIMATE_MODE_FAN",
            ApiCommand::ClimateModeHeat => "CLIMATE_MODE_HEAT",
            ApiCommand::FanModeAuto => "FAN_MODE_AUTO",
            ApiCommand::FanModeAutoCont => "FAN_MODE_AUTO_CONT",
            ApiCommand::FanModeLow => "FAN_MODE_LOW",
            ApiCommand::FanModeLowCont => "FAN_MODE_LOW_CONT",
            ApiCommand::FanModeMedium => "FAN_MODE_MEDIUM",
            ApiCommand::FanModeMediumCont => "FAN_MODE_MEDIUM_CONT",
            ApiCommand::FanModeHigh => "FAN_MODE_HIGH",
            ApiCommand::FanModeHighCont => "FAN_MODE_HIGH_CONT",
            ApiCommand::CoolSetPoint => "COOL_SET_POINT",
            ApiCommand::HeatSetPoint => "HEAT_SET_POINT",
            ApiCommand::HeatCoolSetPoint => "HEAT_COOL_SET_POINT",
            ApiCommand::AwayModeOn => "AWAY_MODE_ON",
            ApiCommand::AwayModeOff => "AWAY_MODE_OFF",
            ApiCommand::QuietModeOn => "QUIET_MODE_ON",
            ApiCommand::QuietModeOff => "QUIET_MODE_OFF",
            ApiCommand::ControlAllZonesOn => "CONTROL_ALL_ZONES_ON",
            ApiCommand::ControlAllZonesOff => "CONTROL_ALL_ZONES_OFF",
            ApiCommand::ZoneEnable => "ZONE_ENABLE",
            ApiCommand::ZoneDisable => "ZONE_DISABLE",
            ApiCommand::ZoneCoolSetPoint => "ZONE_COOL_SET_POINT",
            ApiCommand::ZoneHeatSetPoint => "ZONE_HEAT_SET_POINT",
        }
    }

    pub fn power(on: bool) -> Self {
        if on { ApiCommand::On } else { ApiCommand::Off }
    }

    pub fn climate_mode(mode: ClimateMode) -> Option<Self> {
        match mode {
            ClimateMode::Auto => Some(ApiCommand::ClimateModeAuto),
            ClimateMode::Cool => Some(ApiCommand::ClimateModeCool),
            ClimateMode::Heat => Some(ApiCommand::ClimateModeHeat),
            ClimateMode::Fan => Some(ApiCommand::ClimateModeFan),
            ClimateMode::Unknown => None,
        }
    }

    pub fn fan_mode(mode: FanMode) -> Option<Self> {
        match mode {
            FanMode::Auto => Some(ApiCommand::FanModeAuto),
            FanMode::AutoCont => Some(ApiCommand::FanModeAutoCont),
            FanMode::Low => Some(ApiCommand::FanModeLow),
            FanMode::LowCont => Some(ApiCommand::FanModeLowCont),
            FanMode::Medium => Some(ApiCommand::FanModeMedium),
            FanMode::MediumCont => Some(ApiCommand::FanModeMediumCont),
            FanMode::High => Some(ApiCommand::FanModeHigh),
            FanMode::HighCont => Some(ApiCommand::FanModeHighCont),
            FanMode::Unknown => None,
        }
    }

    pub fn away_mode(on: bool) -> Self {
        if on { ApiCommand::AwayModeOn } else { ApiCommand::AwayModeOff }
    }

    pub fn quiet_mode(on: bool) -> Self {
        if on { ApiCommand::QuietModeOn } else { ApiCommand::QuietModeOff }
    }

    pub fn control_all_zones(on: bool) -> Self {
        if on {
            ApiCommand::ControlAllZonesOn
        } else {
            ApiCommand::ControlAllZonesOff
        }
    }

    pub fn zone_enabled(on: bool) -> Self {
        if on { ApiCommand::ZoneEnable } else { ApiCommand::ZoneDisable }
    }

    /// Whether building this command needs the current enabled-zones array.
    pub fn needs_enabled_zones(&self) -> bool {
        matches!(self, ApiCommand::ZoneEnable | ApiCommand::ZoneDisable)
    }

    /// Builds the partial-update document, e.g.
    /// `{"UserAirconSettings.isOn": true, "type": "set-settings"}`.
    pub fn build(&self, params: &CommandParams) -> Result<Value> {
        let settings = |key: &str, value: Value| settings_doc(&[(key, value)]);
        let doc = match self {
            ApiCommand::On => settings("UserAirconSettings.isOn", json!(true)),
            ApiCommand::Off => settings("UserAirconSettings.isOn", json!(false)),
            ApiCommand::ClimateModeAuto
            | ApiCommand::ClimateModeCool
            | ApiCommand::ClimateModeFan
            | ApiCommand::ClimateModeHeat => {
                let mode = match self {
                    ApiCommand::ClimateModeAuto => ClimateMode::Auto,
                    ApiCommand::ClimateModeCool => ClimateMode::Cool,
                    ApiCommand::ClimateModeFan => ClimateMode::Fan,
                    _ => ClimateMode::Heat,
                };
                settings("UserAirconSettings.Mode", json!(mode.as_neo_str()))
            }
            ApiCommand::FanModeAuto => fan_doc(FanMode::Auto),
            ApiCommand::FanModeAutoCont => fan_doc(FanMode::AutoCont),
            ApiCommand::FanModeLow => fan_doc(FanMode::Low),
            ApiCommand::FanModeLowCont => fan_doc(FanMode::LowCont),
            ApiCommand::FanModeMedium => fan_doc(FanMode::Medium),
            ApiCommand::FanModeMediumCont => fan_doc(FanMode::MediumCont),
            ApiCommand::FanModeHigh => fan_doc(FanMode::High),
            ApiCommand::FanModeHighCont => fan_doc(FanMode::HighCont),
            ApiCommand::CoolSetPoint => settings(
                "UserAirconSettings.TemperatureSetpoint_Cool_oC",
                json!(params.cool_temp),
            ),
            ApiCommand::HeatSetPoint => settings(
                "UserAirconSettings.TemperatureSetpoint_Heat_oC",
                json!(params.heat_temp),
            ),
            ApiCommand::HeatCoolSetPoint => settings_doc(&[
                (
                    "UserAirconSettings.TemperatureSetpoint_Cool_oC",
                    json!(params.cool_temp),
                ),
                (
                    "UserAirconSettings.TemperatureSetpoint_Heat_oC",
                    json!(params.heat_temp),
                ),
            ]),
            ApiCommand::AwayModeOn => settings("UserAirconSettings.AwayMode", json!(true)),
            ApiCommand::AwayModeOff => settings("UserAirconSettings.AwayMode", json!(false)),
            ApiCommand::QuietModeOn => settings("UserAirconSettings.QuietMode", json!(true)),
            ApiCommand::QuietModeOff => settings("UserAirconSettings.QuietMode", json!(false)),
            ApiCommand::ControlAllZonesOn => settings("MasterInfo.ControlAllZones", json!(true)),
            ApiCommand::ControlAllZonesOff => settings("MasterInfo.ControlAllZones", json!(false)),
            ApiCommand::ZoneEnable | ApiCommand::ZoneDisable => {
                let index = self.zone_index(params)?;
                let current = params.enabled_zones.as_deref().ok_or_else(|| {
                    Error::InvalidCommand(format!("{} needs the enabled zones array", self.name()))
                })?;
                let zones = with_zone_enabled(current, index, *self == ApiCommand::ZoneEnable)?;
                settings("UserAirconSettings.EnabledZones", json!(zones))
            }
            ApiCommand::ZoneCoolSetPoint => {
                let index = self.zone_index(params)?;
                settings(
                    &format!("RemoteZoneInfo[{index}].TemperatureSetpoint_Cool_oC"),
                    json!(params.cool_temp),
                )
            }
            ApiCommand::ZoneHeatSetPoint => {
                let index = self.zone_index(params)?;
                settings(
                    &format!("RemoteZoneInfo[{index}].TemperatureSetpoint_Heat_oC"),
                    json!(params.heat_temp),
                )
            }
        };
        Ok(doc)
    }

    fn zone_index(&self, params: &CommandParams) -> Result<usize> {
        params
            .zone_index
            .ok_or_else(|| Error::InvalidCommand(format!("{} needs a zone index", self.name())))
    }
}

/// Copy of `zones` with only `index` set to `enabled`.
pub fn with_zone_enabled(zones: &[bool], index: usize, enabled: bool) -> Result<Vec<bool>> {
    if index >= zones.len() {
        return Err(Error::InvalidCommand(format!(
            "zone index {index} outside enabled zones array of {}",
            zones.len()
        )));
    }
    let mut updated = zones.to_vec();
    updated[index] = enabled;
    Ok(updated)
}

fn fan_doc(mode: FanMode) -> Value {
    settings_doc(&[("UserAirconSettings.FanMode", json!(mode.as_neo_str()))])
}

fn settings_doc(entries: &[(&str, Value)]) -> Value {
    let mut doc = Map::new();
    for (key, value) in entries {
        doc.insert((*key).to_string(), value.clone());
    }
    doc.insert("type".to_string(), json!(SET_SETTINGS));
    Value::Object(doc)
}

/// Request body for the command endpoint.
pub fn command_message(doc: Value) -> Value {
    json!({ "command": doc })
}

pub fn is_ack(body: &Value) -> bool {
    body.get("type").and_then(|v| v.as_str()) == Some("ack")
}

/// Reply of both the password and the refresh grant.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "pairingToken")]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

pub fn parse_ac_systems(body: &Value) -> Result<Vec<AcSystem>> {
    match body.pointer("/_embedded/ac-system") {
        Some(list) => Ok(serde_json::from_value(list.clone())?),
        None => Err(Error::Protocol(
            "device list has no _embedded.ac-system collection".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(command: ApiCommand) -> Value {
        command.build(&CommandParams::default()).unwrap()
    }

    #[test]
    fn power_documents() {
        assert_eq!(
            build(ApiCommand::On),
            json!({ "UserAirconSettings.isOn": true, "type": "set-settings" })
        );
        assert_eq!(
            build(ApiCommand::Off),
            json!({ "UserAirconSettings.isOn": false, "type": "set-settings" })
        );
    }

    #[test]
    fn fan_mode_documents_use_wire_names() {
        assert_eq!(build(ApiCommand::FanModeMedium)["UserAirconSettings.FanMode"], "MED");
        assert_eq!(
            build(ApiCommand::FanModeHighCont)["UserAirconSettings.FanMode"],
            "HIGH+CONT"
        );
        assert_eq!(build(ApiCommand::ClimateModeFan)["UserAirconSettings.Mode"], "FAN");
    }

    #[test]
    fn single_set_points_only_carry_their_key() {
        let params = CommandParams::heat_cool(24.0, 20.0);
        let cool = ApiCommand::CoolSetPoint.build(&params).unwrap();
        assert_eq!(cool["UserAirconSettings.TemperatureSetpoint_Cool_oC"], 24.0);
        assert!(cool.get("UserAirconSettings.TemperatureSetpoint_Heat_oC").is_none());

        let both = ApiCommand::HeatCoolSetPoint.build(&params).unwrap();
        assert_eq!(both["UserAirconSettings.TemperatureSetpoint_Cool_oC"], 24.0);
        assert_eq!(both["UserAirconSettings.TemperatureSetpoint_Heat_oC"], 20.0);
    }

    #[test]
    fn zone_set_points_address_by_index() {
        let doc = ApiCommand::ZoneCoolSetPoint
            .build(&CommandParams::cool(24.0).zone(2))
            .unwrap();
        assert_eq!(doc["RemoteZoneInfo[2].TemperatureSetpoint_Cool_oC"], 24.0);
        assert_eq!(doc["type"], "set-settings");
    }

    #[test]
    fn zone_enable_copies_the_array() {
        let current = vec![true, false, false];
        let params = CommandParams::default().zone(1).enabled_zones(current.clone());
        let doc = ApiCommand::ZoneEnable.build(&params).unwrap();
        assert_eq!(doc["UserAirconSettings.EnabledZones"], json!([true, true, false]));
        assert_eq!(params.enabled_zones.as_deref(), Some(&current[..]));
    }

    #[test]
    fn with_zone_enabled_leaves_input_untouched() {
        let current = [true, true, true];
        let updated = with_zone_enabled(&current, 1, false).unwrap();
        assert_eq!(updated, vec![true, false, true]);
        assert_eq!(current, [true, true, true]);
        assert!(with_zone_enabled(&current, 3, true).is_err());
    }

    #[test]
    fn zone_commands_require_parameters() {
        assert!(matches!(
            ApiCommand::ZoneHeatSetPoint.build(&CommandParams::heat(20.0)),
            Err(Error::InvalidCommand(_))
        ));
        assert!(matches!(
            ApiCommand::ZoneDisable.build(&CommandParams::default().zone(0)),
            Err(Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn control_all_zones_targets_master_info() {
        assert_eq!(build(ApiCommand::ControlAllZonesOn)["MasterInfo.ControlAllZones"], true);
    }

    #[test]
    fn ack_detection() {
        assert!(is_ack(&json!({ "type": "ack", "value": {} })));
        assert!(!is_ack(&json!({ "type": "nack" })));
        assert!(!is_ack(&json!({})));
    }

    #[test]
    fn token_response_accepts_pairing_token() {
        let r: TokenResponse =
            serde_json::from_value(json!({ "pairingToken": "p", "expires_in": 10 })).unwrap();
        assert_eq!(r.access_token, "p");
        assert_eq!(r.expires_in, Some(10));
    }

    #[test]
    fn ac_systems_from_embedded_collection() {
        let body = json!({ "_embedded": { "ac-system": [
            { "serial": "ABC123", "type": "Neo", "description": "House" }
        ]}});
        let systems = parse_ac_systems(&body).unwrap();
        assert_eq!(systems[0].serial, "ABC123");
        assert_eq!(systems[0].system_type, "Neo");
        assert!(parse_ac_systems(&json!({})).is_err());
    }
}
