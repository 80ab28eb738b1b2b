use crate::prelude::*;
use crate::modbus::RegisterTransport;
use crate::mqtt::{EventPublisher, Publisher, Suffix};
use crate::telemetry::{MetaAnnouncement, TelemetryPoller};

use tokio::time::{Instant, MissedTickBehavior};

/// Drives the telemetry side: announces the device, then polls on a fixed
/// interval and publishes each event as it is produced.
pub struct Scheduler<T, P> {
    device: config::Device,
    interval: std::time::Duration,
    poller: TelemetryPoller<T>,
    publisher: EventPublisher<P>,
}

impl<T: RegisterTransport, P: Publisher> Scheduler<T, P> {
    pub fn new(
        device: config::Device,
        interval: std::time::Duration,
        poller: TelemetryPoller<T>,
        publisher: EventPublisher<P>,
    ) -> Self {
        Self {
            device,
            interval,
            poller,
            publisher,
        }
    }

    pub fn meta(&self) -> MetaAnnouncement {
        MetaAnnouncement::new(&self.device, &self.poller.capabilities())
    }

    /// Publishes availability and the meta announcement. Failures are logged.
    pub async fn announce(&self) {
        if let Err(err) = self.publisher.publish_availability(self.device.id(), true).await {
            error!("availability publish: {}", err);
        }

        let meta = self.meta();
        match self.publisher.publish(self.device.id(), Suffix::Meta, &meta).await {
            Ok(()) => info!("announced {} with {:?}", meta.device_id, meta.capabilities),
            Err(err) => error!("meta publish: {}", err),
        }
    }

    /// Runs one poll cycle and publishes its events. A failed publish does
    /// not stop the remaining events from going out.
    pub async fn tick(&mut self, now: i64) -> usize {
        let mut published = 0;

        for event in self.poller.poll_once(now).await {
            match self
                .publisher
                .publish(self.device.id(), Suffix::State, &event)
                .await
            {
                Ok(()) => published += 1,
                Err(err) => error!("publish {} event: {}", event.capability, err),
            }
        }

        published
    }

    /// Polls until shutdown. Ticks missed while a cycle overran are skipped,
    /// not caught up. Returns the poller's transport so the caller can close it.
    pub async fn start(mut self, channels: Channels) -> Result<T> {
        let mut shutdown = channels.shutdown.subscribe();
        let mut from_mqtt = channels.from_mqtt.subscribe();

        self.announce().await;
        let mut last_announce = Instant::now();

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "polling {} every {}s",
            self.device.id(),
            self.interval.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("scheduler received shutdown signal");
                    break;
                }
                data = from_mqtt.recv() => {
                    match data {
                        Ok(mqtt::ChannelData::Connected) => {
                            self.announce().await;
                            last_announce = Instant::now();
                        }
                        Ok(mqtt::ChannelData::Message(_)) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("scheduler skipped {} mqtt notifications", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            bail!("from_mqtt channel closed");
                        }
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            if let Some(every) = self.device.meta_interval() {
                if last_announce.elapsed() >= every {
                    self.announce().await;
                    last_announce = Instant::now();
                }
            }

            self.tick(utils::unixtime()).await;
        }

        info!("scheduler loop exiting");
        Ok(self.poller.into_transport())
    }
}
