use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actron_neo::{
    ApiCommand, ClimateMode, CommandParams, CommandResult, Error, FanMode, HvacApi, HvacStatus,
    HvacUnit, Humidity, PowerState, Result, ZoneStatus, ZoneStatusReply,
};

/// Scripted cloud: serves whatever status it holds and answers every
/// command with the same result.
struct FakeApi {
    status: Mutex<HvacStatus>,
    result: Mutex<CommandResult>,
    commands: Mutex<Vec<(ApiCommand, CommandParams)>>,
    status_calls: AtomicUsize,
}

impl FakeApi {
    fn new(status: HvacStatus) -> Self {
        Self {
            status: Mutex::new(status),
            result: Mutex::new(CommandResult::Success),
            commands: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    fn serve(&self, status: HvacStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn answer(&self, result: CommandResult) {
        *self.result.lock().unwrap() = result;
    }

    fn commands(&self) -> Vec<(ApiCommand, CommandParams)> {
        self.commands.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<ApiCommand> {
        self.commands().into_iter().map(|(c, _)| c).collect()
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.commands.lock().unwrap().clear();
        self.status_calls.store(0, Ordering::SeqCst);
    }
}

impl HvacApi for FakeApi {
    async fn get_status(&self) -> Result<HvacStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().unwrap().clone())
    }

    async fn run_command(&self, command: ApiCommand, params: CommandParams) -> Result<CommandResult> {
        self.commands.lock().unwrap().push((command, params));
        Ok(*self.result.lock().unwrap())
    }
}

fn zone(name: &str, index: usize, humidity: Humidity) -> ZoneStatus {
    ZoneStatus {
        zone_name: name.to_string(),
        zone_index: index,
        sensor_id: format!("S{index}"),
        zone_enabled: index == 0,
        current_temp: 22.0,
        current_humidity: humidity,
        max_heat_set_point: 30.0,
        min_heat_set_point: 10.0,
        max_cool_set_point: 30.0,
        min_cool_set_point: 16.0,
        current_heating_set_temp: 19.0,
        current_cooling_set_temp: 23.0,
        zone_sensor_battery: 90.0,
    }
}

fn snapshot() -> HvacStatus {
    HvacStatus {
        cloud_connected: Some(true),
        power_state: Some(PowerState::Off),
        climate_mode: Some(ClimateMode::Cool),
        fan_mode: Some(FanMode::High),
        continuous_fan_mode: Some(false),
        away_mode: Some(false),
        quiet_mode: Some(false),
        control_all_zones: Some(false),
        master_cooling_set_temp: Some(22.0),
        master_heating_set_temp: Some(20.0),
        master_current_temp: Some(23.5),
        enabled_zones: Some(vec![true, false]),
        zone_current_status: vec![
            zone("Living Room", 0, Humidity::Percent(51.0)),
            zone("Bedroom", 1, Humidity::NotSupported),
        ],
        ..Default::default()
    }
}

async fn online_unit() -> (Arc<FakeApi>, HvacUnit<FakeApi>) {
    let api = Arc::new(FakeApi::new(snapshot()));
    let unit = HvacUnit::new("test", api.clone());
    unit.get_status().await.unwrap();
    api.reset();
    (api, unit)
}

#[tokio::test]
async fn power_on_from_off_sends_one_command() {
    let (api, unit) = online_unit().await;

    assert_eq!(unit.set_power_state_on().await.unwrap(), PowerState::On);
    assert_eq!(unit.power_state(), PowerState::On);
    assert_eq!(api.sent(), [ApiCommand::On]);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn setters_at_the_current_value_send_nothing() {
    let (api, unit) = online_unit().await;

    assert_eq!(unit.set_power_state_off().await.unwrap(), PowerState::Off);
    assert_eq!(unit.set_climate_mode(ClimateMode::Cool).await.unwrap(), ClimateMode::Cool);
    assert_eq!(unit.set_fan_mode(FanMode::High).await.unwrap(), FanMode::High);
    assert!(!unit.set_continuous_fan_mode(false).await.unwrap());
    assert_eq!(unit.set_cool_temp(22.0).await.unwrap(), 22.0);
    assert_eq!(unit.set_heat_temp(20.0).await.unwrap(), 20.0);
    assert_eq!(unit.set_heat_cool_temp(22.0, 20.0).await.unwrap(), (22.0, 20.0));
    assert!(!unit.set_away_mode(false).await.unwrap());
    assert!(!unit.set_quiet_mode(false).await.unwrap());
    assert!(!unit.set_control_all_zones(false).await.unwrap());

    let living = unit.zone("Living Room").unwrap();
    assert!(living.set_zone_enable().await.unwrap());
    assert_eq!(living.set_cool_temp(23.0).await.unwrap(), 23.0);

    assert!(api.commands().is_empty());
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn failure_resyncs_exactly_once() {
    let (api, unit) = online_unit().await;
    api.answer(CommandResult::Failure);
    api.serve(HvacStatus {
        master_cooling_set_temp: Some(23.0),
        ..snapshot()
    });

    assert_eq!(unit.set_cool_temp(25.0).await.unwrap(), 23.0);
    assert_eq!(api.sent(), [ApiCommand::CoolSetPoint]);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn api_error_leaves_state_and_skips_resync() {
    let (api, unit) = online_unit().await;
    api.answer(CommandResult::ApiError);

    assert_eq!(unit.set_cool_temp(25.0).await.unwrap(), 22.0);
    assert!(!unit.set_away_mode(true).await.unwrap());
    assert_eq!(api.sent(), [ApiCommand::CoolSetPoint, ApiCommand::AwayModeOn]);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn unknown_power_state_is_read_before_deciding() {
    let api = Arc::new(FakeApi::new(HvacStatus {
        power_state: Some(PowerState::On),
        ..snapshot()
    }));
    let unit = HvacUnit::new("test", api.clone());
    assert_eq!(unit.power_state(), PowerState::Unknown);

    assert_eq!(unit.set_power_state_on().await.unwrap(), PowerState::On);
    assert!(api.commands().is_empty());
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn setters_fail_while_the_controller_is_offline() {
    let api = Arc::new(FakeApi::new(snapshot()));
    let unit = HvacUnit::new("test", api.clone());
    assert!(matches!(unit.set_away_mode(true).await, Err(Error::ControllerOffline)));

    unit.get_status().await.unwrap();
    assert!(unit.cloud_connected());

    api.serve(HvacStatus {
        cloud_connected: Some(false),
        ..snapshot()
    });
    unit.get_status().await.unwrap();
    assert!(!unit.cloud_connected());
    assert!(matches!(unit.set_cool_temp(25.0).await, Err(Error::ControllerOffline)));

    let bedroom = unit.zone("Bedroom").unwrap();
    assert!(matches!(bedroom.set_zone_enable().await, Err(Error::ControllerOffline)));
    assert!(api.commands().is_empty());
}

#[tokio::test]
async fn first_read_without_link_state_counts_as_connected() {
    let api = Arc::new(FakeApi::new(HvacStatus {
        cloud_connected: None,
        ..snapshot()
    }));
    let unit = HvacUnit::new("test", api.clone());
    unit.get_status().await.unwrap();
    assert!(unit.cloud_connected());
}

#[tokio::test]
async fn reads_without_link_state_keep_the_last_reported_one() {
    let (api, unit) = online_unit().await;
    api.serve(HvacStatus {
        cloud_connected: Some(false),
        ..snapshot()
    });
    unit.get_status().await.unwrap();
    assert!(!unit.cloud_connected());

    api.serve(HvacStatus {
        cloud_connected: None,
        ..snapshot()
    });
    unit.get_status().await.unwrap();
    assert!(!unit.cloud_connected());
    assert!(matches!(unit.set_quiet_mode(true).await, Err(Error::ControllerOffline)));
}

#[tokio::test]
async fn sparse_reads_only_touch_present_fields() {
    let (api, unit) = online_unit().await;
    api.serve(HvacStatus {
        cloud_connected: Some(true),
        quiet_mode: Some(true),
        master_current_temp: Some(0.0),
        ..Default::default()
    });
    unit.get_status().await.unwrap();

    let state = unit.state();
    assert!(state.quiet_mode);
    assert_eq!(state.master_current_temp, 0.0);
    assert_eq!(state.master_cooling_set_temp, 22.0);
    assert_eq!(state.power_state, PowerState::Off);
    assert_eq!(state.zone_data.len(), 2);
    assert_eq!(unit.zones().len(), 2);
}

#[tokio::test]
async fn unreachable_read_keeps_the_local_model() {
    let (api, unit) = online_unit().await;
    api.serve(HvacStatus::api_error());

    let status = unit.get_status().await.unwrap();
    assert!(status.api_error);
    assert!(unit.cloud_connected());
    assert_eq!(unit.fan_mode(), FanMode::High);
}

#[tokio::test]
async fn continuous_flag_travels_with_the_fan_speed() {
    let (api, unit) = online_unit().await;

    assert!(unit.set_continuous_fan_mode(true).await.unwrap());
    assert_eq!(unit.fan_mode(), FanMode::HighCont);

    assert_eq!(unit.set_fan_mode(FanMode::Low).await.unwrap(), FanMode::LowCont);
    assert!(unit.continuous_fan_mode());

    assert!(!unit.set_continuous_fan_mode(false).await.unwrap());
    assert_eq!(unit.fan_mode(), FanMode::Low);

    assert_eq!(
        api.sent(),
        [ApiCommand::FanModeHighCont, ApiCommand::FanModeLowCont, ApiCommand::FanModeLow]
    );
}

#[tokio::test]
async fn continuous_toggle_with_unknown_speed_gives_up() {
    let api = Arc::new(FakeApi::new(HvacStatus {
        fan_mode: None,
        continuous_fan_mode: None,
        ..snapshot()
    }));
    let unit = HvacUnit::new("test", api.clone());
    unit.get_status().await.unwrap();
    api.reset();

    assert!(!unit.set_continuous_fan_mode(true).await.unwrap());
    assert!(api.commands().is_empty());
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn unknown_climate_mode_is_rejected() {
    let (api, unit) = online_unit().await;
    let err = unit.set_climate_mode(ClimateMode::Unknown).await.unwrap_err();
    assert!(matches!(err, Error::InvalidCommand(_)));
    assert!(api.commands().is_empty());
}

#[tokio::test]
async fn heat_cool_sets_both_thresholds() {
    let (api, unit) = online_unit().await;

    assert_eq!(unit.set_heat_cool_temp(25.0, 18.0).await.unwrap(), (25.0, 18.0));
    assert_eq!(unit.master_cooling_set_temp(), 25.0);
    assert_eq!(unit.master_heating_set_temp(), 18.0);
    assert_eq!(
        api.commands(),
        [(ApiCommand::HeatCoolSetPoint, CommandParams::heat_cool(25.0, 18.0))]
    );
}

#[tokio::test]
async fn concurrent_identical_setters_send_one_command() {
    let (api, unit) = online_unit().await;

    let (a, b) = tokio::join!(unit.set_cool_temp(24.0), unit.set_cool_temp(24.0));
    assert_eq!(a.unwrap(), 24.0);
    assert_eq!(b.unwrap(), 24.0);
    assert_eq!(api.sent(), [ApiCommand::CoolSetPoint]);
}

#[tokio::test]
async fn zones_keep_their_identity_across_reads() {
    let (api, unit) = online_unit().await;
    let living = unit.zone("Living Room").unwrap();

    let mut next = snapshot();
    next.zone_current_status[0].current_temp = 25.5;
    api.serve(next);
    unit.get_status().await.unwrap();

    let again = unit.zone("Living Room").unwrap();
    assert!(Arc::ptr_eq(&living, &again));
    assert_eq!(living.current_temp(), 25.5);
    assert_eq!(living.current_humidity(), Humidity::Percent(51.0));
}

#[tokio::test]
async fn humidity_support_is_fixed_at_discovery() {
    let (api, unit) = online_unit().await;

    let mut next = snapshot();
    next.zone_current_status[1].current_humidity = Humidity::Percent(40.0);
    api.serve(next);
    unit.get_status().await.unwrap();

    let bedroom = unit.zone("Bedroom").unwrap();
    assert!(!bedroom.has_humidity_sensor());
    assert_eq!(bedroom.current_humidity(), Humidity::NotSupported);
}

#[tokio::test]
async fn missing_zones_are_kept_by_default() {
    let (api, unit) = online_unit().await;

    let mut next = snapshot();
    next.zone_current_status.truncate(1);
    api.serve(next);
    unit.get_status().await.unwrap();
    unit.get_status().await.unwrap();

    let names: Vec<String> = unit.zones().iter().map(|z| z.zone_name().to_string()).collect();
    assert_eq!(names, ["Living Room", "Bedroom"]);
    assert_eq!(unit.zone("Bedroom").unwrap().zone_index(), 1);
}

#[tokio::test]
async fn eviction_drops_zones_after_consecutive_misses() {
    let api = Arc::new(FakeApi::new(snapshot()));
    let unit = HvacUnit::new("test", api.clone()).evict_missing_zones_after(2);
    unit.get_status().await.unwrap();

    let mut next = snapshot();
    next.zone_current_status.truncate(1);
    api.serve(next);

    unit.get_status().await.unwrap();
    assert!(unit.zone("Bedroom").is_some());
    unit.get_status().await.unwrap();
    assert!(unit.zone("Bedroom").is_none());
    assert!(unit.zone("Living Room").is_some());
}

#[tokio::test]
async fn new_zone_names_are_discovered() {
    let (api, unit) = online_unit().await;

    let mut next = snapshot();
    next.zone_current_status.push(zone("Study", 2, Humidity::NotSupported));
    api.serve(next);
    unit.get_status().await.unwrap();

    assert_eq!(unit.zones().len(), 3);
    assert_eq!(unit.zone("Study").unwrap().sensor_id(), "S2");
}

#[tokio::test]
async fn zone_commands_follow_the_current_index() {
    let (api, unit) = online_unit().await;
    let bedroom = unit.zone("Bedroom").unwrap();

    let mut next = snapshot();
    next.zone_current_status[1].zone_index = 3;
    api.serve(next);
    unit.get_status().await.unwrap();
    assert_eq!(bedroom.zone_index(), 3);

    assert!(bedroom.set_zone_enable().await.unwrap());
    assert!(bedroom.zone_enabled());
    assert_eq!(
        api.commands(),
        [(ApiCommand::ZoneEnable, CommandParams::default().zone(3))]
    );
}

#[tokio::test]
async fn zone_failure_resyncs_only_the_zone() {
    let (api, unit) = online_unit().await;
    let living = unit.zone("Living Room").unwrap();
    api.answer(CommandResult::Failure);

    let mut truth = snapshot();
    truth.master_cooling_set_temp = Some(30.0);
    truth.zone_current_status[0].current_cooling_set_temp = 21.0;
    api.serve(truth);

    assert_eq!(living.set_cool_temp(25.0).await.unwrap(), 21.0);
    assert_eq!(unit.master_cooling_set_temp(), 22.0);
    assert_eq!(api.status_calls(), 1);
    assert_eq!(
        api.commands(),
        [(ApiCommand::ZoneCoolSetPoint, CommandParams::cool(25.0).zone(0))]
    );
}

#[tokio::test]
async fn zone_heat_set_point_success_updates_locally() {
    let (api, unit) = online_unit().await;
    let bedroom = unit.zone("Bedroom").unwrap();

    assert_eq!(bedroom.set_heat_temp(21.0).await.unwrap(), 21.0);
    assert_eq!(bedroom.current_heating_set_temp(), 21.0);
    assert_eq!(
        api.commands(),
        [(ApiCommand::ZoneHeatSetPoint, CommandParams::heat(21.0).zone(1))]
    );
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn zone_status_reports_missing_and_unreachable() {
    let (api, unit) = online_unit().await;
    let bedroom = unit.zone("Bedroom").unwrap();

    match bedroom.get_zone_status().await.unwrap() {
        ZoneStatusReply::Found(status) => assert_eq!(status.zone_index, 1),
        other => panic!("expected the zone, got {other:?}"),
    }

    let mut next = snapshot();
    next.zone_current_status.truncate(1);
    api.serve(next);
    assert_eq!(bedroom.get_zone_status().await.unwrap(), ZoneStatusReply::NotFound);

    api.serve(HvacStatus::api_error());
    match bedroom.get_zone_status().await.unwrap() {
        ZoneStatusReply::ApiError(status) => assert!(status.api_error),
        other => panic!("expected the sentinel, got {other:?}"),
    }
}
