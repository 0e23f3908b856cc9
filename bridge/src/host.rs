use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions};
use tokio::net::TcpListener;
use tracing::{info, warn};
use w100_common::RuntimeConfig;

use crate::{
    api,
    coordinator::Coordinator,
    mqtt::{self, MqttHost},
    ports::Ports,
    store::AppStore,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    let network = runtime.network.clone();
    let control = runtime.control.clone();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(network.mqtt_port);

    let mut mqtt_options =
        MqttOptions::new(network.mqtt_client_id.clone(), mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (client, eventloop) = AsyncClient::new(mqtt_options, 64);
    let host = Arc::new(MqttHost::new(client, network.host_prefix.clone()));
    let coordinator = Coordinator::new(
        Ports::from_host(host.clone()),
        control.clone(),
        Some(store.clone()),
    );

    host.subscribe().await?;
    spawn_mqtt_loop(host.clone(), coordinator.clone(), eventloop);

    // Retained host states and registry entries arrive before devices are bound.
    tokio::time::sleep(Duration::from_millis(control.startup_delay_ms)).await;

    let records = store.load_thermostats().await.unwrap_or_else(|err| {
        warn!("failed to load thermostats from store: {err:#}");
        Vec::new()
    });
    coordinator.restore_thermostats(records).await;

    for device in runtime.devices {
        let name = device.device_name.clone();
        if let Err(err) = coordinator.add_device(device).await {
            warn!(device = %name, "failed to bind device: {err}");
        }
    }
    coordinator.sync_all_displays().await;

    spawn_monitor_loop(coordinator.clone());
    spawn_refresh_loop(coordinator.clone());

    let port = std::env::var("W100_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(network.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bridge server at {addr}"))?;

    info!("w100 bridge listening on http://{addr}");
    axum::serve(listener, api::router(coordinator.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if cleanup_on_exit() {
        coordinator.cleanup().await;
    } else {
        coordinator.shutdown().await;
    }
    Ok(())
}

fn spawn_mqtt_loop(
    host: Arc<MqttHost>,
    coordinator: Coordinator,
    mut eventloop: rumqttc::EventLoop,
) {
    tokio::spawn(async move {
        let mut connected_once = false;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let topic = message.topic.as_str();
                    if let Err(err) =
                        mqtt::handle_message(&host, &coordinator, topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if connected_once {
                        if let Err(err) = host.subscribe().await {
                            warn!("mqtt resubscribe failed: {err:#}");
                        }
                    }
                    connected_once = true;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_monitor_loop(coordinator: Coordinator) {
    tokio::spawn(async move {
        let period = Duration::from_millis(coordinator.control().stuck_check_interval_ms);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            coordinator.monitor_tick().await;
        }
    });
}

fn spawn_refresh_loop(coordinator: Coordinator) {
    tokio::spawn(async move {
        let period = Duration::from_millis(coordinator.control().refresh_interval_ms);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            coordinator.refresh().await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn cleanup_on_exit() -> bool {
    std::env::var("W100_CLEANUP_ON_EXIT")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
