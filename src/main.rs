mod config;
mod effect;
mod error;
mod miio;
mod mqtt;
mod state;

use std::time::Instant;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use miio::client::{CommandQueue, MiioClient, QUEUE_CAPACITY};
use miio::commands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting miio-to-mqtt bridge (mqtt={}:{}, gateway={}, prefix={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.gateway_addr(),
        config.mqtt.topic_prefix,
    );

    let state = state::shared(&config.initial_states);

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::MqttMessage>(100);
    let (update_tx, update_rx) = mpsc::channel::<mqtt::StateUpdate>(200);
    let (queue, queue_rx) = CommandQueue::new(QUEUE_CAPACITY);

    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, update_rx).await;
    });

    let startup = {
        let state = state.lock();
        commands::startup_commands(&state.device, config.miio.silent_start)
    };
    for command in startup {
        queue.push(command);
    }

    let miio_client = match MiioClient::connect(
        &config.gateway_addr(),
        queue.clone(),
        queue_rx,
        state.clone(),
        update_tx,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Cannot open gateway socket: {}", e);
            std::process::exit(1);
        }
    };
    let miio_handle = tokio::spawn(miio_client.run());

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::process::exit(1);
        }
    };

    // Main loop: turn bus commands into gateway requests + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                let Some(topic) = config.strip_prefix(&msg.topic) else {
                    warn!("Ignoring message outside prefix: {}", msg.topic);
                    continue;
                };
                if let Err(e) = commands::dispatch(topic, &msg.payload, &queue, &state, Instant::now()) {
                    warn!("Rejected {} = {}: {}", topic, msg.payload, e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    miio_handle.abort();
    mqtt_handle.abort();
    info!("miio-to-mqtt bridge stopped");
}
