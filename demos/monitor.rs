use actron_neo::{ApiClient, HvacUnit, MessageLogMode, NeoConfig};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> actron_neo::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let path = args
        .get(1)
        .expect("usage: monitor <config.json> [--log <messages.ndjson>]");
    let log_path = args
        .iter()
        .position(|a| a == "--log")
        .and_then(|i| args.get(i + 1));

    let config = NeoConfig::from_file(path)?;
    let mut builder = config.client_builder()?;
    if let Some(log_path) = log_path {
        builder = builder.message_log(MessageLogMode::Diffed, log_path);
    }
    let mut client: ApiClient = builder.build()?;

    let serial = client.initializer().await?;
    println!("Monitoring {serial} every {:?}", config.refresh_interval());

    let unit = HvacUnit::new(config.client_name.clone(), Arc::new(client));
    let mut ticker = tokio::time::interval(config.refresh_interval());
    loop {
        ticker.tick().await;
        let status = unit.get_status().await?;
        if status.api_error {
            eprintln!("Cloud unreachable, keeping last known state");
            continue;
        }

        let master = unit.state();
        println!(
            "[{}] online: {} | power: {:?} | mode: {:?} | fan: {:?} | {:.1}\u{00b0}C {:.0}% | set {:.1}/{:.1}\u{00b0}C",
            unit.name(),
            master.cloud_connected,
            master.power_state,
            master.climate_mode,
            master.fan_mode,
            master.master_current_temp,
            master.master_current_humidity,
            master.master_heating_set_temp,
            master.master_cooling_set_temp,
        );
        for zone in unit.zones() {
            let state = zone.state();
            let humidity = match state.current_humidity.percent() {
                Some(p) => format!("{p:.0}%"),
                None => "n/a".to_string(),
            };
            println!(
                "  [{}] {} | {:.1}\u{00b0}C {} | set {:.1}/{:.1}\u{00b0}C | battery {:.0}%",
                zone.zone_name(),
                if state.zone_enabled { "on " } else { "off" },
                state.current_temp,
                humidity,
                state.current_heating_set_temp,
                state.current_cooling_set_temp,
                state.zone_sensor_battery,
            );
        }
    }
}
