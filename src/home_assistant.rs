use crate::prelude::*;
use crate::mqtt::{EventPublisher, Publisher, Suffix};
use crate::telemetry::MetaAnnouncement;

use serde::Serialize;
use std::collections::HashSet;

const DISCOVERY_QOS: u8 = 1;

/// Physical device a discovery config belongs to. Every config for the same
/// device carries its own copy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub name: String,
}

/// Home Assistant MQTT sensor discovery payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorConfig {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
}

/// One config for one metric, e.g. the `power_w` half of an energy meter.
#[derive(Clone, Debug, PartialEq)]
pub struct Discovery {
    pub metric: &'static str,
    pub config: SensorConfig,
}

/// Everything a capability builder needs to know about the announcing device.
pub struct Context<'a> {
    pub meta: &'a MetaAnnouncement,
    pub unique: String,
    pub state_topic: String,
    pub device: Device,
}

pub type Builder = fn(&Context) -> Vec<Discovery>;

/// Capabilities this bridge knows how to describe. Anything else in a meta
/// announcement is ignored.
static CAPABILITIES: &[(&str, Builder)] = &[
    (Capability::EnergyMeter.as_str(), energy_meter),
    (Capability::Frequency.as_str(), frequency),
    (Capability::Voltage.as_str(), voltage),
];

pub fn lookup(capability: &str) -> Option<Builder> {
    CAPABILITIES
        .iter()
        .find(|(name, _)| *name == capability)
        .map(|(_, builder)| *builder)
}

fn energy_meter(ctx: &Context) -> Vec<Discovery> {
    vec![
        sensor(ctx, Capability::EnergyMeter, Sensor {
            metric: "power_w",
            label: "power",
            unique_suffix: "_power",
            field: "power_w",
            device_class: Some("power"),
            unit: "W",
        }),
        sensor(ctx, Capability::EnergyMeter, Sensor {
            metric: "energy_kwh",
            label: "energy",
            unique_suffix: "_energy",
            field: "energy_kwh",
            device_class: Some("energy"),
            unit: "kWh",
        }),
    ]
}

fn frequency(ctx: &Context) -> Vec<Discovery> {
    vec![sensor(ctx, Capability::Frequency, Sensor {
        metric: "frequency",
        label: "frequency",
        unique_suffix: "_freq",
        field: "value",
        device_class: None,
        unit: "Hz",
    })]
}

fn voltage(ctx: &Context) -> Vec<Discovery> {
    vec![sensor(ctx, Capability::Voltage, Sensor {
        metric: "voltage",
        label: "voltage",
        unique_suffix: "_volt",
        field: "value",
        device_class: None,
        unit: "V",
    })]
}

struct Sensor {
    metric: &'static str,
    label: &'static str,
    unique_suffix: &'static str,
    field: &'static str,
    device_class: Option<&'static str>,
    unit: &'static str,
}

fn sensor(ctx: &Context, capability: Capability, sensor: Sensor) -> Discovery {
    Discovery {
        metric: sensor.metric,
        config: SensorConfig {
            name: format!("{} {}", ctx.meta.device_id, sensor.label),
            unique_id: format!("{}{}", ctx.unique, sensor.unique_suffix),
            state_topic: ctx.state_topic.clone(),
            value_template: Some(value_template(sensor.field, capability)),
            device_class: sensor.device_class,
            unit_of_measurement: Some(sensor.unit),
            device: Some(ctx.device.clone()),
            qos: Some(DISCOVERY_QOS),
        },
    }
}

/// Jinja template picking `field` out of a state event, only for events of
/// the given capability; all of a device's metrics share one state topic.
pub fn value_template(field: &str, capability: Capability) -> String {
    format!(
        "{{{{ value_json.{} if value_json.cap == \"{}\" }}}}",
        field, capability
    )
}

// Generator {{{
/// Turns meta announcements into retained discovery configs.
#[derive(Clone, Debug)]
pub struct Generator {
    namespace: String,
    prefix: String,
    manufacturer: String,
}

impl Generator {
    pub fn new(config: &config::Mqtt) -> Self {
        Self {
            namespace: config.namespace().to_string(),
            prefix: config.homeassistant().prefix().to_string(),
            manufacturer: config.homeassistant().manufacturer().to_string(),
        }
    }

    pub fn config_topic(&self, unique: &str, metric: &str) -> String {
        format!("{}/sensor/{}/{}/config", self.prefix, unique, metric)
    }

    /// Builds every (topic, config) pair for an announcement. Unknown
    /// capabilities contribute nothing; a repeated capability is built once.
    pub fn build(&self, meta: &MetaAnnouncement) -> Vec<(String, SensorConfig)> {
        let ctx = Context {
            meta,
            unique: utils::sanitize(&meta.device_id),
            state_topic: mqtt::topic(&self.namespace, &meta.device_id, Suffix::State),
            device: Device {
                identifiers: vec![meta.device_id.clone()],
                manufacturer: self.manufacturer.clone(),
                model: meta.model.clone().filter(|m| !m.is_empty()),
                name: meta.device_id.clone(),
            },
        };

        let mut seen = HashSet::new();
        let mut r = Vec::new();

        for capability in &meta.capabilities {
            if !seen.insert(capability.as_str()) {
                continue;
            }

            match lookup(capability) {
                Some(builder) => {
                    for discovery in builder(&ctx) {
                        let topic = self.config_topic(&ctx.unique, discovery.metric);
                        r.push((topic, discovery.config));
                    }
                }
                None => debug!("{}: no discovery for capability {:?}", meta.device_id, capability),
            }
        }

        r
    }

    /// Publishes the configs for one announcement, retained. A failed publish
    /// is logged and the rest still go out. Returns how many were published.
    pub async fn on_meta<P: Publisher>(
        &self,
        publisher: &EventPublisher<P>,
        meta: &MetaAnnouncement,
    ) -> usize {
        let mut published = 0;

        for (topic, config) in self.build(meta) {
            match publisher.publish_retained(topic, &config).await {
                Ok(()) => published += 1,
                Err(err) => error!("discovery for {}: {}", config.unique_id, err),
            }
        }

        info!(
            "HA discovery published for {} ({:?}): {} configs",
            meta.device_id, meta.capabilities, published
        );

        published
    }
} // }}}
