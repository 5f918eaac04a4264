//! Parsing of the cloud's `lastKnownState` document.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::types::*;
use crate::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusEnvelope {
    #[serde(rename = "isOnline")]
    is_online: Option<bool>,
    #[serde(rename = "lastKnownState")]
    last_known_state: Option<LastKnownState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LastKnownState {
    #[serde(rename = "UserAirconSettings")]
    settings: Option<UserAirconSettings>,
    #[serde(rename = "LiveAircon")]
    live: Option<LiveAircon>,
    #[serde(rename = "MasterInfo")]
    master: Option<MasterInfo>,
    #[serde(rename = "RemoteZoneInfo")]
    zones: Option<Vec<RemoteZone>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserAirconSettings {
    #[serde(rename = "isOn")]
    is_on: Option<bool>,
    #[serde(rename = "Mode")]
    mode: Option<String>,
    #[serde(rename = "FanMode")]
    fan_mode: Option<String>,
    #[serde(rename = "AwayMode")]
    away_mode: Option<bool>,
    #[serde(rename = "QuietMode")]
    quiet_mode: Option<bool>,
    #[serde(rename = "EnabledZones")]
    enabled_zones: Option<Vec<bool>>,
    #[serde(rename = "TemperatureSetpoint_Cool_oC")]
    cool_set_point: Option<f64>,
    #[serde(rename = "TemperatureSetpoint_Heat_oC")]
    heat_set_point: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LiveAircon {
    #[serde(rename = "CompressorMode")]
    compressor_mode: Option<String>,
    #[serde(rename = "AmRunningFan")]
    fan_running: Option<bool>,
    #[serde(rename = "CompressorChasingTemperature")]
    chasing_temp: Option<f64>,
    #[serde(rename = "CompressorLiveTemperature")]
    live_temp: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MasterInfo {
    #[serde(rename = "LiveTemp_oC")]
    live_temp: Option<f64>,
    #[serde(rename = "LiveHumidity_pc")]
    live_humidity: Option<f64>,
    #[serde(rename = "ControlAllZones")]
    control_all_zones: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteZone {
    #[serde(rename = "NV_Title")]
    title: Option<String>,
    #[serde(rename = "NV_Exists")]
    exists: Option<bool>,
    #[serde(rename = "LiveTemp_oC")]
    live_temp: Option<f64>,
    #[serde(rename = "LiveHumidity_pc")]
    live_humidity: Option<f64>,
    #[serde(rename = "TemperatureSetpoint_Cool_oC")]
    cool_set_point: Option<f64>,
    #[serde(rename = "TemperatureSetpoint_Heat_oC")]
    heat_set_point: Option<f64>,
    #[serde(rename = "MaxHeatSetpoint")]
    max_heat: Option<f64>,
    #[serde(rename = "MinHeatSetpoint")]
    min_heat: Option<f64>,
    #[serde(rename = "MaxCoolSetpoint")]
    max_cool: Option<f64>,
    #[serde(rename = "MinCoolSetpoint")]
    min_cool: Option<f64>,
    #[serde(rename = "Sensors")]
    sensors: Option<Sensors>,
}

/// Newer firmware keys sensors by id, older payloads send a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Sensors {
    List(Vec<Sensor>),
    Keyed(BTreeMap<String, Sensor>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Sensor {
    id: Option<String>,
    #[serde(rename = "Battery_pc")]
    battery: Option<f64>,
}

impl Sensors {
    fn first(&self) -> Option<(String, f64)> {
        match self {
            Sensors::List(list) => list
                .first()
                .map(|s| (s.id.clone().unwrap_or_default(), s.battery.unwrap_or(0.0))),
            Sensors::Keyed(map) => map.iter().next().map(|(key, s)| {
                (
                    s.id.clone().unwrap_or_else(|| key.clone()),
                    s.battery.unwrap_or(0.0),
                )
            }),
        }
    }
}

/// Parses a status reply. Fields missing from the reply stay `None`.
pub fn parse_status(body: &Value) -> Result<HvacStatus> {
    let envelope: StatusEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| Error::Protocol(format!("malformed status document: {e}")))?;
    let state = envelope
        .last_known_state
        .ok_or_else(|| Error::Protocol("status document has no lastKnownState".to_string()))?;

    let mut status = HvacStatus {
        cloud_connected: envelope.is_online,
        ..Default::default()
    };

    let enabled_zones = state
        .settings
        .as_ref()
        .and_then(|s| s.enabled_zones.clone())
        .unwrap_or_default();

    if let Some(settings) = state.settings {
        status.power_state = settings.is_on.map(PowerState::from_is_on);
        status.climate_mode = settings
            .mode
            .map(|m| ClimateMode::from_neo_str(&m).unwrap_or_default());
        status.fan_mode = settings
            .fan_mode
            .map(|m| FanMode::from_neo_str(&m).unwrap_or_default());
        status.continuous_fan_mode = status.fan_mode.map(|m| m.is_continuous());
        status.away_mode = settings.away_mode;
        status.quiet_mode = settings.quiet_mode;
        status.master_cooling_set_temp = settings.cool_set_point;
        status.master_heating_set_temp = settings.heat_set_point;
        status.enabled_zones = settings.enabled_zones;
    }

    if let Some(live) = state.live {
        status.compressor_mode = live
            .compressor_mode
            .map(|m| CompressorMode::from_neo_str(&m).unwrap_or_default());
        status.fan_running = live.fan_running;
        status.compressor_chasing_temp = live.chasing_temp;
        status.compressor_current_temp = live.live_temp;
    }

    if let Some(master) = state.master {
        status.master_current_temp = master.live_temp;
        status.master_current_humidity = master.live_humidity;
        status.control_all_zones = master.control_all_zones;
    }

    for (index, zone) in state.zones.unwrap_or_default().into_iter().enumerate() {
        if zone.exists == Some(false) {
            continue;
        }
        let Some(name) = zone.title.filter(|t| !t.is_empty()) else {
            continue;
        };
        let (sensor_id, battery) = zone
            .sensors
            .as_ref()
            .and_then(Sensors::first)
            .unwrap_or_default();
        let humidity = match zone.live_humidity {
            Some(h) if h > 0.0 => Humidity::Percent(h),
            _ => Humidity::NotSupported,
        };
        status.zone_current_status.push(ZoneStatus {
            zone_name: name,
            zone_index: index,
            sensor_id,
            zone_enabled: enabled_zones.get(index).copied().unwrap_or(false),
            current_temp: zone.live_temp.unwrap_or_default(),
            current_humidity: humidity,
            max_heat_set_point: zone.max_heat.unwrap_or_default(),
            min_heat_set_point: zone.min_heat.unwrap_or_default(),
            max_cool_set_point: zone.max_cool.unwrap_or_default(),
            min_cool_set_point: zone.min_cool.unwrap_or_default(),
            current_heating_set_temp: zone.heat_set_point.unwrap_or_default(),
            current_cooling_set_temp: zone.cool_set_point.unwrap_or_default(),
            zone_sensor_battery: battery,
        });
    }

    Ok(status)
}
