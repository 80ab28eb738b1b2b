use crate::prelude::*;
use crate::home_assistant::Generator;
use crate::mqtt::{EventPublisher, Publisher};
use crate::telemetry::MetaAnnouncement;

/// Topic filter matching every device's meta announcement.
pub fn meta_filter(namespace: &str) -> String {
    format!("{}/+/meta", namespace)
}

/// Discovery side: consumes meta announcements one at a time and publishes
/// the discovery configs for each.
pub struct Coordinator<P> {
    channels: Channels,
    generator: Generator,
    publisher: EventPublisher<P>,
}

impl<P: Publisher> Coordinator<P> {
    pub fn new(channels: Channels, generator: Generator, publisher: EventPublisher<P>) -> Self {
        Self {
            channels,
            generator,
            publisher,
        }
    }

    /// Handles inbound messages until shutdown. `on_connected` runs after
    /// every reconnection, so the caller can restore its subscription.
    pub async fn start<F, Fut>(&self, mut on_connected: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut receiver = self.channels.from_mqtt.subscribe();
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            let data = tokio::select! {
                _ = shutdown.recv() => break,
                data = receiver.recv() => data,
            };

            match data {
                Ok(mqtt::ChannelData::Message(message)) => {
                    if let Err(err) = self.process_message(message).await {
                        warn!("{}", err);
                    }
                }
                Ok(mqtt::ChannelData::Connected) => {
                    if let Err(err) = on_connected().await {
                        error!("resubscribe after reconnect: {}", err);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagging, {} meta messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("from_mqtt channel closed"),
            }
        }

        info!("coordinator loop exiting");
        Ok(())
    }

    /// Parses one meta announcement and publishes its discovery configs.
    /// Returns how many configs went out.
    pub async fn process_message(&self, message: mqtt::Message) -> Result<usize> {
        let meta: MetaAnnouncement = serde_json::from_str(&message.payload)
            .map_err(|err| anyhow!("bad meta on {}: {}", message.topic, err))?;

        Ok(self.generator.on_meta(&self.publisher, &meta).await)
    }
}
