use crate::prelude::*;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing,
    Publish, QoS, Transport,
};
use serde::Serialize;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const RECONNECT_DELAY_SECS: u64 = 5;
const DISCONNECT_TIMEOUT_SECS: u64 = 2;
const REQUEST_CHANNEL_CAPACITY: usize = 64;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    /// The broker accepted a (re)connection.
    Connected,
    Message(Message),
}

pub type Sender = broadcast::Sender<ChannelData>;

/// Hands one message to the bus at QoS 1 ("at least once").
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<()>;
}

/// Topic level appended after `<namespace>/<device_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    Meta,
    State,
    Availability,
}

impl Suffix {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "/meta",
            Self::State => "/state",
            Self::Availability => "/availability",
        }
    }
}

impl std::fmt::Display for Suffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds topics for a device and publishes serialized events on them.
pub struct EventPublisher<P> {
    namespace: String,
    publisher: P,
}

impl<P: Publisher> EventPublisher<P> {
    pub fn new(namespace: &str, publisher: P) -> Self {
        Self {
            namespace: namespace.to_string(),
            publisher,
        }
    }

    pub fn topic(&self, device_id: &str, suffix: Suffix) -> String {
        topic(&self.namespace, device_id, suffix)
    }

    /// Serializes `payload` to JSON and publishes it unretained.
    pub async fn publish<T>(&self, device_id: &str, suffix: Suffix, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = serde_json::to_string(payload)
            .map_err(|err| anyhow!("serializing {} payload for {}: {}", suffix, device_id, err))?;

        self.publisher
            .publish(Message {
                topic: self.topic(device_id, suffix),
                retain: false,
                payload,
            })
            .await
    }

    /// Serializes `payload` to JSON and publishes it retained on an explicit
    /// topic, for control-plane messages late subscribers must still see.
    pub async fn publish_retained<T>(&self, topic: String, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = serde_json::to_string(payload)
            .map_err(|err| anyhow!("serializing payload for {}: {}", topic, err))?;

        self.publisher
            .publish(Message {
                topic,
                retain: true,
                payload,
            })
            .await
    }

    /// Publishes a plain-text availability marker, retained.
    pub async fn publish_availability(&self, device_id: &str, online: bool) -> Result<()> {
        self.publisher
            .publish(Message {
                topic: self.topic(device_id, Suffix::Availability),
                retain: true,
                payload: availability_payload(online).to_string(),
            })
            .await
    }
}

pub fn topic(namespace: &str, device_id: &str, suffix: Suffix) -> String {
    format!("{}/{}{}", namespace, device_id, suffix)
}

fn availability_payload(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}

// MqttPublisher {{{
/// `Publisher` backed by a rumqttc client. Publishing never waits on the
/// network: a full request queue is reported as an error instead.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, message: Message) -> Result<()> {
        debug!("publishing: {} = {}", message.topic, message.payload);

        self.client
            .try_publish(
                &message.topic,
                QoS::AtLeastOnce,
                message.retain,
                message.payload.into_bytes(),
            )
            .map_err(|err| anyhow!("publish to {} failed: {}", message.topic, err))
    }
} // }}}

// Mqtt {{{
#[derive(Clone)]
pub struct Mqtt {
    config: config::Mqtt,
    client_id: String,
    lwt_topic: Option<String>,
}

impl Mqtt {
    pub fn new(config: config::Mqtt, client_id: String) -> Self {
        Self {
            config,
            client_id,
            lwt_topic: None,
        }
    }

    /// Registers a retained "offline" last will on `topic`.
    pub fn with_last_will(mut self, topic: String) -> Self {
        self.lwt_topic = Some(topic);
        self
    }

    /// Connects and waits for the broker's CONNACK. Any failure here is fatal
    /// to the caller; later connection drops are handled by `receiver`.
    pub async fn connect(&self) -> Result<(AsyncClient, EventLoop)> {
        let c = &self.config;
        let (host, port) = c.host_port()?;

        let mut options = MqttOptions::new(&self.client_id, &host, port);
        options.set_keep_alive(c.keep_alive());
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }
        if c.tls() {
            options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(topic) = &self.lwt_topic {
            options.set_last_will(LastWill {
                topic: topic.clone(),
                message: bytes::Bytes::from(availability_payload(false)),
                qos: QoS::AtLeastOnce,
                retain: true,
            });
        }

        info!(
            "initializing mqtt at {}:{} as {}{}",
            host,
            port,
            self.client_id,
            if c.tls() { " (tls)" } else { "" }
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            bail!("broker refused connection: {:?}", ack.code);
                        }
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(err) => bail!("mqtt connect to {}:{} failed: {}", host, port, err),
                }
            }
        };

        tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connack)
            .await
            .map_err(|_| anyhow!("mqtt connect timed out after {}s", CONNECT_TIMEOUT_SECS))??;

        info!("mqtt connected");

        Ok((client, eventloop))
    }

    /// Drives the event loop until shutdown: forwards inbound publishes and
    /// reconnections to `channels.from_mqtt`, and keeps retrying after
    /// connection errors.
    ///
    /// With `disconnect` set, a DISCONNECT is sent on shutdown. Without it the
    /// connection is just dropped, so the broker publishes the last will.
    pub async fn receiver(
        &self,
        mut eventloop: EventLoop,
        channels: Channels,
        disconnect: Option<AsyncClient>,
    ) -> Result<()> {
        let mut shutdown = channels.shutdown.subscribe();

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => None,
                event = eventloop.poll() => Some(event),
            };

            let event = match event {
                Some(event) => event,
                None => {
                    info!("MQTT receiver shutting down");
                    if let Some(client) = &disconnect {
                        Self::disconnect(client, &mut eventloop).await;
                    }
                    break;
                }
            };

            match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.handle_message(publish, &channels.from_mqtt);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt reconnected");
                    let _ = channels.from_mqtt.send(ChannelData::Connected);
                }
                Err(err) => {
                    error!("{}", err);
                    info!("reconnecting in {}s", RECONNECT_DELAY_SECS);
                    tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                }
                _ => {} // keepalives etc
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
        if let Err(err) = client.disconnect().await {
            warn!("mqtt disconnect: {}", err);
            return;
        }

        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        match tokio::time::timeout(Duration::from_secs(DISCONNECT_TIMEOUT_SECS), flush).await {
            Ok(()) => info!("mqtt disconnected"),
            Err(_) => warn!("mqtt disconnect not sent within {}s", DISCONNECT_TIMEOUT_SECS),
        }
    }

    fn handle_message(&self, publish: Publish, sender: &Sender) {
        let payload = match String::from_utf8(publish.payload.to_vec()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("ignoring non-utf8 payload on {}: {}", publish.topic, err);
                return;
            }
        };

        let message = Message {
            topic: publish.topic,
            retain: publish.retain,
            payload,
        };
        debug!("RX: {:?}", message);

        if sender.send(ChannelData::Message(message)).is_err() {
            debug!("no consumer for inbound message");
        }
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics() {
        assert_eq!(topic("smh", "cw100.inverter", Suffix::State), "smh/cw100.inverter/state");
        assert_eq!(topic("smh", "cw100.inverter", Suffix::Meta), "smh/cw100.inverter/meta");
        assert_eq!(
            topic("smh", "dev", Suffix::Availability),
            "smh/dev/availability"
        );
    }
}
