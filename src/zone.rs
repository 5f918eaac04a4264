use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::client::HvacApi;
use crate::dispatch::execute_command;
use crate::protocol::{ApiCommand, CommandParams};
use crate::types::{CommandResult, HvacStatus, Humidity, ZoneStatus};
use crate::{Error, Result};

/// Mutable part of a zone, replaced wholesale by every status push.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneState {
    pub zone_index: usize,
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

/// Result of reading one zone out of a full status read.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneStatusReply {
    Found(ZoneStatus),
    /// The read succeeded but no zone carries this name any more.
    NotFound,
    /// The `api_error` sentinel, passed through untouched.
    ApiError(HvacStatus),
}

/// One zone of a master unit, identified by its name.
pub struct HvacZone<A> {
    api: Arc<A>,
    name: String,
    sensor_id: String,
    humidity_sensor: bool,
    online: Arc<AtomicBool>,
    op: tokio::sync::Mutex<()>,
    state: RwLock<ZoneState>,
}

impl<A: HvacApi> HvacZone<A> {
    pub(crate) fn new(api: Arc<A>, status: &ZoneStatus, online: Arc<AtomicBool>) -> Self {
        Self {
            api,
            name: status.zone_name.clone(),
            sensor_id: status.sensor_id.clone(),
            humidity_sensor: status.current_humidity.is_supported(),
            online,
            op: tokio::sync::Mutex::new(()),
            state: RwLock::new(ZoneState {
                zone_index: status.zone_index,
                zone_enabled: status.zone_enabled,
                current_temp: status.current_temp,
                current_humidity: status.current_humidity,
                max_heat_set_point: status.max_heat_set_point,
                min_heat_set_point: status.min_heat_set_point,
                max_cool_set_point: status.max_cool_set_point,
                min_cool_set_point: status.min_cool_set_point,
                current_heating_set_temp: status.current_heating_set_temp,
                current_cooling_set_temp: status.current_cooling_set_temp,
                zone_sensor_battery: status.zone_sensor_battery,
            }),
        }
    }

    pub fn zone_name(&self) -> &str {
        &self.name
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Fixed when the zone is first seen.
    pub fn has_humidity_sensor(&self) -> bool {
        self.humidity_sensor
    }

    pub fn state(&self) -> ZoneState {
        self.read().clone()
    }

    pub fn zone_index(&self) -> usize {
        self.read().zone_index
    }

    pub fn zone_enabled(&self) -> bool {
        self.read().zone_enabled
    }

    pub fn current_temp(&self) -> f64 {
        self.read().current_temp
    }

    pub fn current_humidity(&self) -> Humidity {
        self.read().current_humidity
    }

    pub fn current_heating_set_temp(&self) -> f64 {
        self.read().current_heating_set_temp
    }

    pub fn current_cooling_set_temp(&self) -> f64 {
        self.read().current_cooling_set_temp
    }

    pub fn zone_sensor_battery(&self) -> f64 {
        self.read().zone_sensor_battery
    }

    /// Overwrites every field from `status`. A zone that had no humidity
    /// sensor when first seen keeps reporting `NotSupported`.
    pub fn push_status_update(&self, status: &ZoneStatus) {
        let humidity = match status.current_humidity {
            Humidity::Percent(p) if self.humidity_sensor => Humidity::Percent(p),
            _ => Humidity::NotSupported,
        };
        let mut state = self.write();
        if state.zone_index != status.zone_index {
            debug!(
                zone = %self.name,
                from = state.zone_index,
                to = status.zone_index,
                "zone moved in the remote zone list"
            );
        }
        *state = ZoneState {
            zone_index: status.zone_index,
            zone_enabled: status.zone_enabled,
            current_temp: status.current_temp,
            current_humidity: humidity,
            max_heat_set_point: status.max_heat_set_point,
            min_heat_set_point: status.min_heat_set_point,
            max_cool_set_point: status.max_cool_set_point,
            min_cool_set_point: status.min_cool_set_point,
            current_heating_set_temp: status.current_heating_set_temp,
            current_cooling_set_temp: status.current_cooling_set_temp,
            zone_sensor_battery: status.zone_sensor_battery,
        };
    }

    /// Push from the master unit's refresh, queued behind any command in
    /// flight on this zone.
    pub(crate) async fn sync_from_master(&self, status: &ZoneStatus) {
        let _op = self.op.lock().await;
        self.push_status_update(status);
    }

    /// Re-reads this zone from a full status read.
    pub async fn get_zone_status(&self) -> Result<ZoneStatusReply> {
        let status = self.api.get_status().await?;
        if status.api_error {
            warn!(zone = %self.name, "failed to refresh zone, cloud unreachable");
            return Ok(ZoneStatusReply::ApiError(status));
        }
        Ok(match status.zone(&self.name) {
            Some(zone) => ZoneStatusReply::Found(zone.clone()),
            None => ZoneStatusReply::NotFound,
        })
    }

    pub async fn set_zone_enable(&self) -> Result<bool> {
        self.set_enabled(true).await
    }

    pub async fn set_zone_disable(&self) -> Result<bool> {
        self.set_enabled(false).await
    }

    pub async fn set_heat_temp(&self, heat_temp: f64) -> Result<f64> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        let state = self.state();
        if state.current_heating_set_temp == heat_temp {
            return Ok(heat_temp);
        }
        let result = execute_command(
            self.api.as_ref(),
            &self.name,
            ApiCommand::ZoneHeatSetPoint,
            CommandParams::heat(heat_temp).zone(state.zone_index),
            || self.write().current_heating_set_temp = heat_temp,
            || self.resync(),
        )
        .await?;
        if result == CommandResult::Failure {
            warn!(zone = %self.name, "zone may not support its own temperature control");
        }
        Ok(self.read().current_heating_set_temp)
    }

    pub async fn set_cool_temp(&self, cool_temp: f64) -> Result<f64> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        let state = self.state();
        if state.current_cooling_set_temp == cool_temp {
            return Ok(cool_temp);
        }
        execute_command(
            self.api.as_ref(),
            &self.name,
            ApiCommand::ZoneCoolSetPoint,
            CommandParams::cool(cool_temp).zone(state.zone_index),
            || self.write().current_cooling_set_temp = cool_temp,
            || self.resync(),
        )
        .await?;
        Ok(self.read().current_cooling_set_temp)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<bool> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        let state = self.state();
        if state.zone_enabled == enabled {
            return Ok(enabled);
        }
        execute_command(
            self.api.as_ref(),
            &self.name,
            ApiCommand::zone_enabled(enabled),
            CommandParams::default().zone(state.zone_index),
            || self.write().zone_enabled = enabled,
            || self.resync(),
        )
        .await?;
        Ok(self.read().zone_enabled)
    }

    async fn resync(&self) -> Result<()> {
        match self.get_zone_status().await? {
            ZoneStatusReply::Found(status) => self.push_status_update(&status),
            ZoneStatusReply::NotFound => {
                warn!(zone = %self.name, "zone missing from the latest status read");
            }
            ZoneStatusReply::ApiError(_) => {}
        }
        Ok(())
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ControllerOffline)
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ZoneState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ZoneState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> std::fmt::Debug for HvacZone<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HvacZone")
            .field("name", &self.name)
            .field("sensor_id", &self.sensor_id)
            .field("humidity_sensor", &self.humidity_sensor)
            .finish_non_exhaustive()
    }
}
