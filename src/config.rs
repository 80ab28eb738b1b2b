use crate::prelude::*;

use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: Mqtt,

    #[serde(default)]
    pub device: Device,

    #[serde(default)]
    pub modbus: Modbus,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_mqtt_url")]
    pub url: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    #[serde(default = "Config::default_mqtt_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default)]
    pub homeassistant: HomeAssistant,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            url: Config::default_mqtt_url(),
            client_id: None,
            username: None,
            password: None,
            tls: false,
            namespace: Config::default_mqtt_namespace(),
            keep_alive_secs: Config::default_mqtt_keep_alive_secs(),
            homeassistant: HomeAssistant::default(),
        }
    }
}

impl Mqtt {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    /// TLS is on when asked for explicitly or implied by the url scheme.
    pub fn tls(&self) -> bool {
        self.tls
            || url::Url::parse(&self.url)
                .map(|u| matches!(u.scheme(), "ssl" | "mqtts" | "tls"))
                .unwrap_or(false)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn homeassistant(&self) -> &HomeAssistant {
        &self.homeassistant
    }

    /// Broker host and port from the url; the port defaults to 1883, or 8883
    /// with TLS.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let url = url::Url::parse(&self.url)
            .map_err(|err| anyhow!("config.rs:invalid mqtt url {}: {}", self.url, err))?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => bail!("mqtt url {} has no host", self.url),
        };
        let port = url
            .port()
            .unwrap_or(if self.tls() { 8883 } else { 1883 });

        Ok((host, port))
    }
} // }}}

// HomeAssistant {{{
#[derive(Clone, Debug, Deserialize)]
pub struct HomeAssistant {
    #[serde(default = "Config::default_mqtt_homeassistant_prefix")]
    pub prefix: String,

    #[serde(default = "Config::default_mqtt_homeassistant_manufacturer")]
    pub manufacturer: String,
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self {
            prefix: Config::default_mqtt_homeassistant_prefix(),
            manufacturer: Config::default_mqtt_homeassistant_manufacturer(),
        }
    }
}

impl HomeAssistant {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }
} // }}}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    #[serde(default = "Config::default_device_id")]
    pub id: String,
    #[serde(default = "Config::default_device_model")]
    pub model: String,
    #[serde(default = "Config::default_device_area")]
    pub area: String,

    pub meta_interval_secs: Option<u64>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            id: Config::default_device_id(),
            model: Config::default_device_model(),
            area: Config::default_device_area(),
            meta_interval_secs: None,
        }
    }
}

impl Device {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn meta_interval(&self) -> Option<Duration> {
        self.meta_interval_secs.map(Duration::from_secs)
    }
} // }}}

// Modbus {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusMode {
    Rtu,
    Tcp,
}

impl std::fmt::Display for ModbusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rtu => write!(f, "rtu"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Modbus {
    #[serde(default = "Config::default_modbus_mode")]
    pub mode: ModbusMode,

    #[serde(default = "Config::default_modbus_port")]
    pub port: String,
    #[serde(default = "Config::default_modbus_baud")]
    pub baud: u32,
    #[serde(default = "Config::default_modbus_data_bits")]
    pub data_bits: u8,
    #[serde(default = "Config::default_modbus_parity")]
    pub parity: String,
    #[serde(default = "Config::default_modbus_stop_bits")]
    pub stop_bits: u8,

    #[serde(default = "Config::default_modbus_tcp_addr")]
    pub tcp_addr: String,

    #[serde(default = "Config::default_modbus_slave_id")]
    pub slave_id: u8,
    #[serde(default = "Config::default_modbus_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "Config::default_modbus_interval_secs")]
    pub interval_secs: u64,

    /// Optional JSON override of the register map.
    pub register_map: Option<String>,
}

impl Default for Modbus {
    fn default() -> Self {
        Self {
            mode: Config::default_modbus_mode(),
            port: Config::default_modbus_port(),
            baud: Config::default_modbus_baud(),
            data_bits: Config::default_modbus_data_bits(),
            parity: Config::default_modbus_parity(),
            stop_bits: Config::default_modbus_stop_bits(),
            tcp_addr: Config::default_modbus_tcp_addr(),
            slave_id: Config::default_modbus_slave_id(),
            timeout_ms: Config::default_modbus_timeout_ms(),
            interval_secs: Config::default_modbus_interval_secs(),
            register_map: None,
        }
    }
}

impl Modbus {
    pub fn mode(&self) -> ModbusMode {
        self.mode
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    pub fn parity(&self) -> &str {
        &self.parity
    }

    pub fn stop_bits(&self) -> u8 {
        self.stop_bits
    }

    pub fn tcp_addr(&self) -> &str {
        &self.tcp_addr
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn register_map(&self) -> Option<&str> {
        self.register_map.as_deref()
    }
} // }}}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: Mqtt::default(),
            device: Device::default(),
            modbus: Modbus::default(),
            loglevel: Self::default_loglevel(),
        }
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;

        config.validate()?;
        Ok(config)
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.mqtt
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn modbus(&self) -> &Modbus {
        &self.modbus
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    /// A register map given on the command line beats the one in the file.
    pub fn set_register_map(&mut self, json: Option<String>) {
        if json.is_some() {
            self.modbus.register_map = json;
        }
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  MQTT:");
        info!("    URL: {}", self.mqtt.url);
        info!("    TLS: {}", self.mqtt.tls());
        info!("    Namespace: {}", self.mqtt.namespace);
        info!("    Home Assistant prefix: {}", self.mqtt.homeassistant.prefix);
        info!("  Device:");
        info!("    ID: {}", self.device.id);
        info!("    Model: {}", self.device.model);
        info!("    Area: {}", self.device.area);
        match self.device.meta_interval_secs {
            Some(secs) => info!("    Meta re-announce: every {}s", secs),
            None => info!("    Meta re-announce: startup only"),
        }
        info!("  Modbus: {}", self.modbus.mode);
        match self.modbus.mode {
            ModbusMode::Rtu => {
                info!("    Port: {}", self.modbus.port);
                info!(
                    "    Line: {} {}{}{}",
                    self.modbus.baud,
                    self.modbus.data_bits,
                    self.modbus.parity,
                    self.modbus.stop_bits
                );
            }
            ModbusMode::Tcp => info!("    Address: {}", self.modbus.tcp_addr),
        }
        info!("    Slave ID: {}", self.modbus.slave_id);
        info!("    Timeout: {}ms", self.modbus.timeout_ms);
        info!("    Interval: {}s", self.modbus.interval_secs);
        info!(
            "    Register map: {}",
            if self.modbus.register_map.is_some() { "override" } else { "defaults" }
        );
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        // Validate MQTT configuration
        self.mqtt.host_port()?;
        if self.mqtt.namespace.is_empty() {
            return Err(anyhow!("config.rs:MQTT namespace cannot be empty"));
        }
        if self.mqtt.keep_alive_secs == 0 {
            bail!("mqtt.keep_alive_secs must be at least 1");
        }
        if self.mqtt.homeassistant.prefix.is_empty() {
            return Err(anyhow!("config.rs:Home Assistant prefix cannot be empty"));
        }

        // Validate device identity
        if self.device.id.is_empty() {
            return Err(anyhow!("config.rs:device id cannot be empty"));
        }
        if self.device.meta_interval_secs == Some(0) {
            bail!("device.meta_interval_secs must be at least 1");
        }

        // Validate modbus transport
        match self.modbus.mode {
            ModbusMode::Rtu => {
                if self.modbus.port.is_empty() {
                    return Err(anyhow!("config.rs:modbus port cannot be empty in rtu mode"));
                }
                if self.modbus.baud == 0 {
                    bail!("modbus.baud must be greater than 0");
                }
                if !(5..=8).contains(&self.modbus.data_bits) {
                    bail!("modbus.data_bits must be between 5 and 8");
                }
                if !matches!(self.modbus.parity.to_ascii_uppercase().as_str(), "N" | "E" | "O") {
                    bail!("modbus.parity must be one of N, E, O");
                }
                if !(1..=2).contains(&self.modbus.stop_bits) {
                    bail!("modbus.stop_bits must be 1 or 2");
                }
            }
            ModbusMode::Tcp => {
                if self.modbus.tcp_addr.is_empty() {
                    return Err(anyhow!("config.rs:modbus tcp_addr cannot be empty in tcp mode"));
                }
            }
        }
        if self.modbus.timeout_ms == 0 {
            return Err(anyhow!("config.rs:Invalid modbus timeout: 0"));
        }
        if self.modbus.interval_secs == 0 {
            bail!("modbus.interval_secs must be at least 1");
        }

        Ok(())
    }

    fn default_mqtt_url() -> String {
        "tcp://mqtt:1883".to_string()
    }

    fn default_mqtt_namespace() -> String {
        "smh".to_string()
    }

    fn default_mqtt_keep_alive_secs() -> u64 {
        30
    }

    fn default_mqtt_homeassistant_prefix() -> String {
        "homeassistant".to_string()
    }

    fn default_mqtt_homeassistant_manufacturer() -> String {
        "SMH".to_string()
    }

    fn default_device_id() -> String {
        "cw100.inverter".to_string()
    }

    fn default_device_model() -> String {
        "CW100".to_string()
    }

    fn default_device_area() -> String {
        "lab".to_string()
    }

    fn default_modbus_mode() -> ModbusMode {
        ModbusMode::Rtu
    }

    fn default_modbus_port() -> String {
        "/dev/ttyUSB0".to_string()
    }

    fn default_modbus_baud() -> u32 {
        9600
    }

    fn default_modbus_data_bits() -> u8 {
        8
    }

    fn default_modbus_parity() -> String {
        "N".to_string()
    }

    fn default_modbus_stop_bits() -> u8 {
        1
    }

    fn default_modbus_tcp_addr() -> String {
        "127.0.0.1:502".to_string()
    }

    fn default_modbus_slave_id() -> u8 {
        1
    }

    fn default_modbus_timeout_ms() -> u64 {
        500
    }

    fn default_modbus_interval_secs() -> u64 {
        1
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_from_url() -> Result<()> {
        let mut mqtt = Mqtt::default();
        assert_eq!(mqtt.host_port()?, ("mqtt".to_string(), 1883));

        mqtt.url = "mqtts://broker.example.com".to_string();
        assert!(mqtt.tls());
        assert_eq!(mqtt.host_port()?, ("broker.example.com".to_string(), 8883));

        mqtt.url = "tcp://10.0.0.5:1884".to_string();
        assert!(!mqtt.tls());
        assert_eq!(mqtt.host_port()?, ("10.0.0.5".to_string(), 1884));

        Ok(())
    }

    #[test]
    fn host_port_rejects_garbage() {
        let mqtt = Mqtt {
            url: "not a url".to_string(),
            ..Mqtt::default()
        };
        assert!(mqtt.host_port().is_err());
    }
}
