use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::client::HvacApi;
use crate::dispatch::execute_command;
use crate::protocol::{ApiCommand, CommandParams};
use crate::types::*;
use crate::zone::HvacZone;
use crate::{Error, Result};

/// Local view of the master unit. Starts out unknown and is filled in by
/// status reads and successful commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterState {
    pub cloud_connected: bool,
    pub power_state: PowerState,
    pub climate_mode: ClimateMode,
    pub compressor_mode: CompressorMode,
    pub fan_mode: FanMode,
    pub fan_running: bool,
    pub away_mode: bool,
    pub quiet_mode: bool,
    pub continuous_fan_mode: bool,
    pub control_all_zones: bool,
    pub master_cooling_set_temp: f64,
    pub master_heating_set_temp: f64,
    pub master_current_temp: f64,
    pub master_current_humidity: f64,
    pub compressor_chasing_temp: f64,
    pub compressor_current_temp: f64,
    pub enabled_zones: Vec<bool>,
    pub zone_data: Vec<ZoneStatus>,
}

fn patch<T: Clone>(field: &mut T, update: &Option<T>) {
    if let Some(value) = update {
        *field = value.clone();
    }
}

impl MasterState {
    /// Overwrites the fields present in `status` and leaves the rest alone.
    fn apply(&mut self, status: &HvacStatus) {
        patch(&mut self.cloud_connected, &status.cloud_connected);
        patch(&mut self.power_state, &status.power_state);
        patch(&mut self.climate_mode, &status.climate_mode);
        patch(&mut self.compressor_mode, &status.compressor_mode);
        patch(&mut self.fan_mode, &status.fan_mode);
        patch(&mut self.fan_running, &status.fan_running);
        patch(&mut self.away_mode, &status.away_mode);
        patch(&mut self.quiet_mode, &status.quiet_mode);
        patch(&mut self.continuous_fan_mode, &status.continuous_fan_mode);
        patch(&mut self.control_all_zones, &status.control_all_zones);
        patch(&mut self.master_cooling_set_temp, &status.master_cooling_set_temp);
        patch(&mut self.master_heating_set_temp, &status.master_heating_set_temp);
        patch(&mut self.master_current_temp, &status.master_current_temp);
        patch(&mut self.master_current_humidity, &status.master_current_humidity);
        patch(&mut self.compressor_chasing_temp, &status.compressor_chasing_temp);
        patch(&mut self.compressor_current_temp, &status.compressor_current_temp);
        patch(&mut self.enabled_zones, &status.enabled_zones);
        if !status.zone_current_status.is_empty() {
            self.zone_data = status.zone_current_status.clone();
        }
    }
}

struct ZoneSlot<A> {
    zone: Arc<HvacZone<A>>,
    missed: u32,
}

/// The master controller of one system, plus every zone seen so far.
///
/// Each unit and each zone serializes its own operations, so concurrent
/// callers never interleave a compare, a command and the follow-up write.
pub struct HvacUnit<A> {
    name: String,
    api: Arc<A>,
    op: tokio::sync::Mutex<()>,
    state: RwLock<MasterState>,
    online: Arc<AtomicBool>,
    /// Set once any read has carried the controller's link state.
    link_reported: AtomicBool,
    zones: RwLock<Vec<ZoneSlot<A>>>,
    evict_after: Option<u32>,
}

impl<A: HvacApi> HvacUnit<A> {
    pub fn new(name: impl Into<String>, api: Arc<A>) -> Self {
        Self {
            name: name.into(),
            api,
            op: tokio::sync::Mutex::new(()),
            state: RwLock::new(MasterState::default()),
            online: Arc::new(AtomicBool::new(false)),
            link_reported: AtomicBool::new(false),
            zones: RwLock::new(Vec::new()),
            evict_after: None,
        }
    }

    /// Drop a zone once it has been missing from `reads` consecutive status
    /// reads. By default zones are never dropped.
    pub fn evict_missing_zones_after(mut self, reads: u32) -> Self {
        self.evict_after = Some(reads.max(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn state(&self) -> MasterState {
        let mut state = self.read().clone();
        state.cloud_connected = self.online.load(Ordering::SeqCst);
        state
    }

    pub fn cloud_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn power_state(&self) -> PowerState {
        self.read().power_state
    }

    pub fn climate_mode(&self) -> ClimateMode {
        self.read().climate_mode
    }

    pub fn compressor_mode(&self) -> CompressorMode {
        self.read().compressor_mode
    }

    pub fn fan_mode(&self) -> FanMode {
        self.read().fan_mode
    }

    pub fn fan_running(&self) -> bool {
        self.read().fan_running
    }

    pub fn away_mode(&self) -> bool {
        self.read().away_mode
    }

    pub fn quiet_mode(&self) -> bool {
        self.read().quiet_mode
    }

    pub fn continuous_fan_mode(&self) -> bool {
        self.read().continuous_fan_mode
    }

    pub fn control_all_zones(&self) -> bool {
        self.read().control_all_zones
    }

    pub fn master_cooling_set_temp(&self) -> f64 {
        self.read().master_cooling_set_temp
    }

    pub fn master_heating_set_temp(&self) -> f64 {
        self.read().master_heating_set_temp
    }

    pub fn master_current_temp(&self) -> f64 {
        self.read().master_current_temp
    }

    pub fn master_current_humidity(&self) -> f64 {
        self.read().master_current_humidity
    }

    pub fn compressor_chasing_temp(&self) -> f64 {
        self.read().compressor_chasing_temp
    }

    pub fn compressor_current_temp(&self) -> f64 {
        self.read().compressor_current_temp
    }

    pub fn zones(&self) -> Vec<Arc<HvacZone<A>>> {
        self.zones_read().iter().map(|slot| slot.zone.clone()).collect()
    }

    pub fn zone(&self, name: &str) -> Option<Arc<HvacZone<A>>> {
        self.zones_read()
            .iter()
            .find(|slot| slot.zone.zone_name() == name)
            .map(|slot| slot.zone.clone())
    }

    /// Fails with [`Error::ControllerOffline`] until a status read reports
    /// the controller connected.
    pub fn ensure_online(&self) -> Result<()> {
        if self.cloud_connected() {
            Ok(())
        } else {
            Err(Error::ControllerOffline)
        }
    }

    /// Reads the latest status and merges it into the local state.
    pub async fn get_status(&self) -> Result<HvacStatus> {
        let _op = self.op.lock().await;
        self.refresh().await
    }

    pub async fn set_power_state_on(&self) -> Result<PowerState> {
        self.set_power(PowerState::On).await
    }

    pub async fn set_power_state_off(&self) -> Result<PowerState> {
        self.set_power(PowerState::Off).await
    }

    pub async fn set_climate_mode(&self, mode: ClimateMode) -> Result<ClimateMode> {
        let command = ApiCommand::climate_mode(mode)
            .ok_or_else(|| Error::InvalidCommand("climate mode must be known".to_string()))?;
        self.set_attribute(
            |s| s.climate_mode,
            mode,
            command,
            CommandParams::default(),
            |s| s.climate_mode = mode,
        )
        .await
    }

    /// Sets the fan speed. The continuous flag is kept as it is, so asking
    /// for `High` while continuous is on sends `HIGH+CONT`.
    pub async fn set_fan_mode(&self, speed: FanMode) -> Result<FanMode> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        let target = speed.with_continuous(self.read().continuous_fan_mode);
        let command = ApiCommand::fan_mode(target)
            .ok_or_else(|| Error::InvalidCommand("fan mode must be known".to_string()))?;
        if self.read().fan_mode == target {
            return Ok(target);
        }
        self.execute(command, CommandParams::default(), |s| s.fan_mode = target)
            .await?;
        Ok(self.read().fan_mode)
    }

    /// Re-issues the current fan speed with the continuous flag set or
    /// cleared.
    pub async fn set_continuous_fan_mode(&self, on: bool) -> Result<bool> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        if self.read().continuous_fan_mode == on {
            return Ok(on);
        }
        if self.read().fan_mode == FanMode::Unknown {
            self.refresh().await?;
        }
        let current = self.read().fan_mode;
        let Some(command) = ApiCommand::fan_mode(current.with_continuous(on)) else {
            warn!(unit = %self.name, "fan speed unknown, cannot change continuous fan mode");
            return Ok(self.read().continuous_fan_mode);
        };
        let target = current.with_continuous(on);
        self.execute(command, CommandParams::default(), |s| {
            s.fan_mode = target;
            s.continuous_fan_mode = on;
        })
        .await?;
        Ok(self.read().continuous_fan_mode)
    }

    pub async fn set_heat_temp(&self, heat_temp: f64) -> Result<f64> {
        self.set_attribute(
            |s| s.master_heating_set_temp,
            heat_temp,
            ApiCommand::HeatSetPoint,
            CommandParams::heat(heat_temp),
            |s| s.master_heating_set_temp = heat_temp,
        )
        .await
    }

    pub async fn set_cool_temp(&self, cool_temp: f64) -> Result<f64> {
        self.set_attribute(
            |s| s.master_cooling_set_temp,
            cool_temp,
            ApiCommand::CoolSetPoint,
            CommandParams::cool(cool_temp),
            |s| s.master_cooling_set_temp = cool_temp,
        )
        .await
    }

    /// Sets both thresholds in one command. Returns `(cool, heat)`.
    pub async fn set_heat_cool_temp(&self, cool_temp: f64, heat_temp: f64) -> Result<(f64, f64)> {
        self.set_attribute(
            |s| (s.master_cooling_set_temp, s.master_heating_set_temp),
            (cool_temp, heat_temp),
            ApiCommand::HeatCoolSetPoint,
            CommandParams::heat_cool(cool_temp, heat_temp),
            |s| {
                s.master_cooling_set_temp = cool_temp;
                s.master_heating_set_temp = heat_temp;
            },
        )
        .await
    }

    pub async fn set_away_mode(&self, on: bool) -> Result<bool> {
        self.set_attribute(
            |s| s.away_mode,
            on,
            ApiCommand::away_mode(on),
            CommandParams::default(),
            |s| s.away_mode = on,
        )
        .await
    }

    pub async fn set_quiet_mode(&self, on: bool) -> Result<bool> {
        self.set_attribute(
            |s| s.quiet_mode,
            on,
            ApiCommand::quiet_mode(on),
            CommandParams::default(),
            |s| s.quiet_mode = on,
        )
        .await
    }

    pub async fn set_control_all_zones(&self, on: bool) -> Result<bool> {
        self.set_attribute(
            |s| s.control_all_zones,
            on,
            ApiCommand::control_all_zones(on),
            CommandParams::default(),
            |s| s.control_all_zones = on,
        )
        .await
    }

    async fn set_power(&self, target: PowerState) -> Result<PowerState> {
        let _op = self.op.lock().await;
        // Unknown never equals the target, so learn the real state first
        // rather than sending a command that may be redundant.
        if self.read().power_state == PowerState::Unknown {
            self.refresh().await?;
        }
        self.ensure_online()?;
        if self.read().power_state == target {
            return Ok(target);
        }
        self.execute(
            ApiCommand::power(target == PowerState::On),
            CommandParams::default(),
            |s| s.power_state = target,
        )
        .await?;
        Ok(self.read().power_state)
    }

    async fn set_attribute<T: PartialEq + Copy>(
        &self,
        current: impl Fn(&MasterState) -> T,
        target: T,
        command: ApiCommand,
        params: CommandParams,
        apply: impl FnOnce(&mut MasterState),
    ) -> Result<T> {
        let _op = self.op.lock().await;
        self.ensure_online()?;
        if current(&self.read()) == target {
            return Ok(target);
        }
        self.execute(command, params, apply).await?;
        Ok(current(&self.read()))
    }

    async fn execute(
        &self,
        command: ApiCommand,
        params: CommandParams,
        apply: impl FnOnce(&mut MasterState),
    ) -> Result<CommandResult> {
        execute_command(
            self.api.as_ref(),
            &self.name,
            command,
            params,
            || apply(&mut self.write()),
            move || async move { self.refresh().await.map(|_| ()) },
        )
        .await
    }

    /// Caller holds the operation lock.
    async fn refresh(&self) -> Result<HvacStatus> {
        let status = self.api.get_status().await?;
        if status.api_error {
            warn!(unit = %self.name, "failed to refresh status, cloud unreachable or returned invalid data");
            return Ok(status);
        }

        // Until the cloud has reported the link state, a successful read is
        // the only evidence of connectivity.
        let connected = match status.cloud_connected {
            Some(connected) => {
                self.link_reported.store(true, Ordering::SeqCst);
                Some(connected)
            }
            None if !self.link_reported.load(Ordering::SeqCst) => Some(true),
            None => None,
        };
        if let Some(connected) = connected {
            let was = self.online.swap(connected, Ordering::SeqCst);
            if was != connected {
                info!(unit = %self.name, connected, "controller connection changed");
            }
        }
        self.write().apply(&status);
        self.reconcile_zones(&status.zone_current_status).await;
        Ok(status)
    }

    /// Matches zones by name: known zones take the new snapshot, new names
    /// become new zones.
    async fn reconcile_zones(&self, snapshot: &[ZoneStatus]) {
        for status in snapshot {
            let known = self.zone(&status.zone_name);
            match known {
                Some(zone) => zone.sync_from_master(status).await,
                None => {
                    info!(unit = %self.name, zone = %status.zone_name, index = status.zone_index, "discovered zone");
                    let zone = HvacZone::new(self.api.clone(), status, self.online.clone());
                    self.zones_write().push(ZoneSlot {
                        zone: Arc::new(zone),
                        missed: 0,
                    });
                }
            }
        }

        let Some(limit) = self.evict_after else {
            return;
        };
        if snapshot.is_empty() {
            return;
        }
        let mut zones = self.zones_write();
        for slot in zones.iter_mut() {
            if snapshot.iter().any(|s| s.zone_name == slot.zone.zone_name()) {
                slot.missed = 0;
            } else {
                slot.missed += 1;
                debug!(zone = %slot.zone.zone_name(), missed = slot.missed, "zone absent from status read");
            }
        }
        zones.retain(|slot| {
            let keep = slot.missed < limit;
            if !keep {
                info!(unit = %self.name, zone = %slot.zone.zone_name(), "dropping zone missing from status reads");
            }
            keep
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, MasterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MasterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn zones_read(&self) -> RwLockReadGuard<'_, Vec<ZoneSlot<A>>> {
        self.zones.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn zones_write(&self) -> RwLockWriteGuard<'_, Vec<ZoneSlot<A>>> {
        self.zones.write().unwrap_or_else(PoisonError::into_inner)
    }
}
