use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::time::Duration;

use crate::canonical::{DeviceGroup, Value};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// One data-tree attribute, e.g. `mppsolar/ttyUSB0/inverter/Dc/0/Voltage`.
    pub fn for_attribute(
        namespace: &str,
        device_id: &str,
        group: DeviceGroup,
        path: &str,
        value: &Value,
    ) -> Message {
        Message {
            topic: format!("{}/{}/{}{}", namespace, device_id, group, path),
            retain: true,
            payload: value.to_payload(),
        }
    }

    /// The management sub-tree both device groups carry, published once at
    /// startup.
    pub fn for_management(
        config: &ConfigWrapper,
        firmware_version: Option<&str>,
        serial_number: Option<&str>,
    ) -> Vec<Message> {
        let inverter = config.inverter();
        let mqtt = config.mqtt();
        let namespace = mqtt.namespace();
        let device_id = inverter.device_id();
        let product_name = config.product_name();

        let mut messages = Vec::new();
        for group in [DeviceGroup::Inverter, DeviceGroup::Charger] {
            let prefix = match group {
                DeviceGroup::Inverter => "Inverter",
                DeviceGroup::Charger => "Charger",
            };

            let mut push = |path: &str, value: Value| {
                messages.push(Message::for_attribute(
                    namespace, &device_id, group, path, &value,
                ));
            };

            push(
                "/Mgmt/ProcessName",
                Value::Text(env!("CARGO_PKG_NAME").to_string()),
            );
            push(
                "/Mgmt/ProcessVersion",
                Value::Text(crate::CARGO_PKG_VERSION.to_string()),
            );
            push(
                "/Mgmt/Connection",
                Value::Text(format!("MPPSolar interface on {}", inverter.serial())),
            );
            push(
                "/DeviceInstance",
                Value::Int(inverter.device_instance() as i64),
            );
            push("/ProductId", Value::None);
            push(
                "/ProductName",
                Value::Text(format!("{} {}", prefix, product_name)),
            );
            push(
                "/FirmwareVersion",
                firmware_version
                    .map(|v| Value::Text(v.to_string()))
                    .unwrap_or(Value::None),
            );
            push("/HardwareVersion", Value::None);
            push(
                "/Serial",
                serial_number
                    .map(|v| Value::Text(v.to_string()))
                    .unwrap_or(Value::None),
            );
            push("/Connected", Value::Int(1));
        }

        messages
    }
} // }}}

#[derive(Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Batch(Vec<Message>),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let mqtt_config = self.config.mqtt();
        if !mqtt_config.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let device_id = self.config.inverter().device_id();

        let mut options = MqttOptions::new(
            format!("mppsolar-bridge-{}", device_id),
            mqtt_config.host(),
            mqtt_config.port(),
        );
        options.set_keep_alive(Duration::from_secs(60));

        if let (Some(username), Some(password)) =
            (mqtt_config.username(), mqtt_config.password())
        {
            options.set_credentials(username.clone(), password.clone());
        }

        // broker marks us dead if the process goes away uncleanly
        let lwt_topic = format!("{}/{}/Connected", mqtt_config.namespace(), device_id);
        options.set_last_will(LastWill::new(&lwt_topic, "0", QoS::AtLeastOnce, true));

        info!(
            "connecting to mqtt at {}:{}",
            mqtt_config.host(),
            mqtt_config.port()
        );

        let (client, event_loop) = AsyncClient::new(options, 10);

        futures::try_join!(self.receiver(event_loop, client.clone()), self.sender(client))?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    // inbound: broker -> coordinator write requests
    async fn receiver(&self, mut event_loop: EventLoop, client: AsyncClient) -> Result<()> {
        let mqtt_config = self.config.mqtt();
        let device_id = self.config.inverter().device_id();
        let set_prefix = format!("{}/{}/set", mqtt_config.namespace(), device_id);

        let mut shutdown_rx = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected, subscribing to {}/#", set_prefix);
                        client
                            .subscribe(format!("{}/#", set_prefix), QoS::AtLeastOnce)
                            .await?;
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(&set_prefix, publish)?;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // soft: rumqttc reconnects on the next poll
                        error!("mqtt connection error: {}", err);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, set_prefix: &str, publish: Publish) -> Result<()> {
        let Some(path) = publish.topic.strip_prefix(set_prefix) else {
            debug!("ignoring message on {}", publish.topic);
            return Ok(());
        };

        let payload = String::from_utf8_lossy(&publish.payload);
        let value: serde_json::Value = serde_json::from_str(&payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

        if self
            .channels
            .to_coordinator
            .send(coordinator::ChannelData::WriteRequest(
                path.to_string(),
                value,
            ))
            .is_err()
        {
            bail!("send(to_coordinator) failed - channel closed?");
        }

        Ok(())
    }

    // outbound: coordinator batches -> broker
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Message(message)) => {
                    self.publish(&client, message).await?;
                }
                Ok(ChannelData::Batch(messages)) => {
                    for message in messages {
                        self.publish(&client, message).await?;
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, dropped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, message: Message) -> Result<()> {
        client
            .publish(
                &message.topic,
                QoS::AtLeastOnce,
                message.retain,
                message.payload.clone(),
            )
            .await
            .map_err(|err| anyhow!("publish to {} failed: {}", message.topic, err))
    }
}
