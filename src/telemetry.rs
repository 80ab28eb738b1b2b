use crate::prelude::*;
use crate::modbus::{RegisterReader, RegisterTransport};

use serde::{Deserialize, Serialize};

/// Metric family tag carried in the `cap` field of every state event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "sensor.frequency")]
    Frequency,
    #[serde(rename = "sensor.voltage")]
    Voltage,
    #[serde(rename = "energy.meter")]
    EnergyMeter,
}

impl Capability {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Frequency => "sensor.frequency",
            Self::Voltage => "sensor.voltage",
            Self::EnergyMeter => "energy.meter",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized reading, published to `<namespace>/<device_id>/state`.
///
/// Single-value capabilities carry `unit` and `value`; the energy meter
/// carries whichever of `power_w` / `energy_kwh` was read. Absent fields are
/// left out of the JSON entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "cap")]
    pub capability: Capability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_kwh: Option<f64>,
}

impl SensorState {
    pub fn frequency(timestamp: i64, hz: f64) -> Self {
        Self::single(timestamp, Capability::Frequency, "Hz", utils::round(hz, 2))
    }

    pub fn voltage(timestamp: i64, volts: f64) -> Self {
        Self::single(timestamp, Capability::Voltage, "V", utils::round(volts, 1))
    }

    /// Combines whatever power/energy values were read this cycle; `None` when
    /// neither was, since an empty energy-meter event is never emitted.
    pub fn energy_meter(
        timestamp: i64,
        power_w: Option<f64>,
        energy_kwh: Option<f64>,
    ) -> Option<Self> {
        if power_w.is_none() && energy_kwh.is_none() {
            return None;
        }

        Some(Self {
            timestamp,
            capability: Capability::EnergyMeter,
            unit: None,
            value: None,
            power_w: power_w.map(|w| utils::round(w, 1)),
            energy_kwh: energy_kwh.map(|kwh| utils::round(kwh, 6)),
        })
    }

    fn single(timestamp: i64, capability: Capability, unit: &'static str, value: f64) -> Self {
        Self {
            timestamp,
            capability,
            unit: Some(unit),
            value: Some(value),
            power_w: None,
            energy_kwh: None,
        }
    }
}

/// Identity and capability set of a device, published to
/// `<namespace>/<device_id>/meta` and consumed by the discovery side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaAnnouncement {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(rename = "caps")]
    pub capabilities: Vec<String>,
}

impl MetaAnnouncement {
    pub fn new(device: &config::Device, capabilities: &[Capability]) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Self {
            device_id: device.id().to_string(),
            model: non_empty(device.model()),
            area: non_empty(device.area()),
            capabilities: capabilities.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}

// TelemetryPoller {{{
/// Reads every mapped register once per cycle and turns the results into
/// state events.
pub struct TelemetryPoller<T> {
    reader: RegisterReader<T>,
    map: RegisterMap,
}

impl<T: RegisterTransport> TelemetryPoller<T> {
    pub fn new(transport: T, map: RegisterMap) -> Self {
        Self {
            reader: RegisterReader::new(transport),
            map,
        }
    }

    /// Capabilities this device can report with the current map.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = vec![Capability::Frequency, Capability::Voltage];
        if self.map.has_energy_meter() {
            capabilities.push(Capability::EnergyMeter);
        }
        capabilities
    }

    /// Runs one poll cycle. Every event shares `now`; a metric whose read
    /// fails is skipped for this cycle.
    pub async fn poll_once(&mut self, now: i64) -> Vec<SensorState> {
        let map = self.map;
        let mut events = Vec::with_capacity(3);

        if let Some(hz) = self.read("frequency", &map.frequency).await {
            events.push(SensorState::frequency(now, hz));
        }

        if let Some(volts) = self.read("voltage", &map.voltage).await {
            events.push(SensorState::voltage(now, volts));
        }

        let power_w = if map.power.is_configured() {
            self.read("power", &map.power).await
        } else {
            None
        };
        let energy_kwh = if map.energy.is_configured() {
            self.read("energy", &map.energy).await
        } else {
            None
        };
        if let Some(event) = SensorState::energy_meter(now, power_w, energy_kwh) {
            events.push(event);
        }

        debug!("poll at {} produced {} events", now, events.len());
        events
    }

    pub fn into_transport(self) -> T {
        self.reader.into_inner()
    }

    async fn read(&mut self, metric: &str, param: &RegisterParam) -> Option<f64> {
        match self.reader.read_float(param).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("read {} ({}): {}", metric, param, err);
                None
            }
        }
    }
} // }}}
