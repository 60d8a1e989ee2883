use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::miio::commands::CONTROL_TOPICS;

use super::{MqttMessage, StateUpdate};

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the control topics on every
    /// connect, forwards incoming publishes through command_tx, and publishes
    /// the state updates produced by the gateway side.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut update_rx: mpsc::Receiver<StateUpdate>,
    ) {
        let status_topic = self.config.bridge_status_topic();
        let subscribe_topics: Vec<String> = CONTROL_TOPICS
            .iter()
            .map(|suffix| self.config.topic(suffix))
            .collect();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            Self::on_connect(&self.client, &status_topic, &subscribe_topics).await;
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                            };
                            debug!("MQTT received {}: {}", msg.topic, msg.payload);
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(update) = update_rx.recv() => {
                    let topic = self.config.topic(&update.topic);
                    debug!("Publishing {}: {}", topic, update.payload);
                    if let Err(e) = self
                        .client
                        .publish(&topic, QoS::AtMostOnce, false, update.payload.into_bytes())
                        .await
                    {
                        warn!("Failed to publish {}: {}", topic, e);
                    }
                }
            }
        }
    }

    /// Borrows only the client handle: the event loop is not `Sync`, so
    /// `&self` would make the run future `!Send`.
    async fn on_connect(client: &AsyncClient, status_topic: &str, subscribe_topics: &[String]) {
        if let Err(e) = client
            .publish(status_topic, QoS::AtLeastOnce, true, "online")
            .await
        {
            error!("Failed to publish online status: {}", e);
        }

        for topic in subscribe_topics {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                error!("Failed to subscribe to {}: {}", topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn run_can_be_spawned() {
        let client = MqttClient::new(&config("miio"));
        let (command_tx, _command_rx) = mpsc::channel(1);
        let (_update_tx, update_rx) = mpsc::channel(1);

        let run = client.run(command_tx, update_rx);
        assert_send(&run);
    }
}
