pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod home_assistant;
pub mod modbus;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod register;
pub mod scheduler;
pub mod telemetry;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::coordinator::Coordinator;
use crate::home_assistant::Generator;
use crate::modbus::ModbusClient;
use crate::mqtt::{EventPublisher, Mqtt, MqttPublisher, Suffix};
use crate::options::{Command, Options};
use crate::scheduler::Scheduler;
use crate::telemetry::TelemetryPoller;

use rumqttc::QoS;
use std::io::Write;

pub async fn app() -> Result<()> {
    let options = Options::new();

    let mut config = match Config::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            init_logging("info");
            error!("Failed to load config: {:?}", err);
            std::process::exit(255);
        }
    };
    config.set_register_map(options.register_map.clone());

    init_logging(config.loglevel());

    info!("smh-bridge {} starting ({:?})", CARGO_PKG_VERSION, options.command);
    config.log_summary();

    let channels = Channels::new();

    let shutdown = channels.shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", err);
            return;
        }
        info!("ctrl+c received, shutting down");
        let _ = shutdown.send(());
    });

    match options.command {
        Command::Adapter => adapter(config, channels).await,
        Command::Discovery => discovery(config, channels).await,
    }
}

fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Polls the Modbus device and publishes its meta and state events until
/// shutdown. Failing to open the device or reach the broker is fatal.
pub async fn adapter(config: Config, channels: Channels) -> Result<()> {
    let map = RegisterMap::from_json_or_default(config.modbus().register_map());
    let device = config.device().clone();
    let namespace = config.mqtt().namespace().to_string();

    let transport = ModbusClient::connect(config.modbus()).await?;

    let client_id = config
        .mqtt()
        .client_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("smh-adapter-{}", utils::sanitize(device.id())));
    let mqtt = Mqtt::new(config.mqtt().clone(), client_id)
        .with_last_will(mqtt::topic(&namespace, device.id(), Suffix::Availability));
    let (client, eventloop) = mqtt.connect().await?;

    let publisher = EventPublisher::new(&namespace, MqttPublisher::new(client));
    let poller = TelemetryPoller::new(transport, map);
    let scheduler = Scheduler::new(device, config.modbus().interval(), poller, publisher);

    let (transport, _) = futures::try_join!(
        scheduler.start(channels.clone()),
        mqtt.receiver(eventloop, channels.clone(), None)
    )?;

    // no DISCONNECT was sent, so the broker publishes the "offline" last will
    transport.close();
    info!("adapter stopped");

    Ok(())
}

/// Subscribes to every device's meta topic and publishes Home Assistant
/// discovery configs for each announcement until shutdown.
pub async fn discovery(config: Config, channels: Channels) -> Result<()> {
    let namespace = config.mqtt().namespace().to_string();

    let client_id = config
        .mqtt()
        .client_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("smh-core-{}", chrono::Local::now().format("%H%M%S")));
    let mqtt = Mqtt::new(config.mqtt().clone(), client_id);
    let (client, eventloop) = mqtt.connect().await?;

    let filter = coordinator::meta_filter(&namespace);
    client
        .subscribe(filter.clone(), QoS::AtLeastOnce)
        .await
        .map_err(|err| anyhow!("subscribe to {} failed: {}", filter, err))?;
    info!("subscribed to {}", filter);

    let coordinator = Coordinator::new(
        channels.clone(),
        Generator::new(config.mqtt()),
        EventPublisher::new(&namespace, MqttPublisher::new(client.clone())),
    );

    info!("smh-core up; waiting for meta...");

    let resubscribe = || {
        let client = client.clone();
        let filter = filter.clone();
        async move {
            client
                .subscribe(filter.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|err| anyhow!("subscribe to {} failed: {}", filter, err))
        }
    };

    futures::try_join!(
        coordinator.start(resubscribe),
        mqtt.receiver(eventloop, channels.clone(), Some(client.clone()))
    )?;

    info!("discovery stopped");

    Ok(())
}
