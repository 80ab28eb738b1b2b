mod common;
use common::*;
use smh_bridge::config::ModbusMode;
use smh_bridge::prelude::*;

use std::io::Write;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn defaults() -> Result<()> {
    common_setup();

    let config = Config::from_yaml("loglevel: debug\n")?;

    assert_eq!(config.loglevel(), "debug");
    assert_eq!(config.mqtt().host_port()?, ("mqtt".to_string(), 1883));
    assert_eq!(config.mqtt().namespace(), "smh");
    assert!(!config.mqtt().tls());
    assert_eq!(config.mqtt().keep_alive(), Duration::from_secs(30));
    assert_eq!(config.mqtt().homeassistant().prefix(), "homeassistant");
    assert_eq!(config.mqtt().homeassistant().manufacturer(), "SMH");

    assert_eq!(config.device().id(), "cw100.inverter");
    assert_eq!(config.device().model(), "CW100");
    assert_eq!(config.device().area(), "lab");
    assert_eq!(config.device().meta_interval(), None);

    let modbus = config.modbus();
    assert_eq!(modbus.mode(), ModbusMode::Rtu);
    assert_eq!(modbus.port(), "/dev/ttyUSB0");
    assert_eq!(modbus.baud(), 9600);
    assert_eq!(modbus.data_bits(), 8);
    assert_eq!(modbus.parity(), "N");
    assert_eq!(modbus.stop_bits(), 1);
    assert_eq!(modbus.slave_id(), 1);
    assert_eq!(modbus.timeout(), Duration::from_millis(500));
    assert_eq!(modbus.interval(), Duration::from_secs(1));
    assert_eq!(modbus.register_map(), None);

    Ok(())
}

#[test]
fn reads_file() -> Result<()> {
    common_setup();

    let file = write_config(
        r#"
mqtt:
  url: mqtts://broker.example.com
  username: bridge
  password: secret
  namespace: plant
device:
  id: roof.inverter
  meta_interval_secs: 300
modbus:
  mode: tcp
  tcp_addr: 10.0.0.5:502
  slave_id: 3
  register_map: '{"frequency": {"addr": 1, "scale": 100}, "voltage": {"addr": 2, "scale": 10}}'
"#,
    );

    let config = Config::new(file.path().to_string_lossy().to_string())?;

    assert!(config.mqtt().tls());
    assert_eq!(
        config.mqtt().host_port()?,
        ("broker.example.com".to_string(), 8883)
    );
    assert_eq!(config.mqtt().username().as_deref(), Some("bridge"));
    assert_eq!(config.mqtt().namespace(), "plant");
    assert_eq!(config.device().id(), "roof.inverter");
    assert_eq!(config.device().meta_interval(), Some(Duration::from_secs(300)));
    assert_eq!(config.modbus().mode(), ModbusMode::Tcp);
    assert_eq!(config.modbus().tcp_addr(), "10.0.0.5:502");
    assert_eq!(config.modbus().slave_id(), 3);

    let map = RegisterMap::from_json_or_default(config.modbus().register_map());
    assert_eq!(map.frequency.address, 1);
    assert!(!map.has_energy_meter());

    Ok(())
}

#[test]
fn command_line_register_map_wins() -> Result<()> {
    let mut config = Config::from_yaml("modbus:\n  register_map: '{}'\n")?;

    config.set_register_map(None);
    assert_eq!(config.modbus().register_map(), Some("{}"));

    config.set_register_map(Some("[]".to_string()));
    assert_eq!(config.modbus().register_map(), Some("[]"));

    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    assert!(Config::new("/nonexistent/smh.yaml".to_string()).is_err());
}

#[test]
fn invalid_values_are_rejected() {
    common_setup();

    let bad = [
        "mqtt:\n  url: not a url\n",
        "mqtt:\n  namespace: ''\n",
        "mqtt:\n  keep_alive_secs: 0\n",
        "device:\n  id: ''\n",
        "device:\n  meta_interval_secs: 0\n",
        "modbus:\n  mode: serial\n",
        "modbus:\n  parity: X\n",
        "modbus:\n  data_bits: 9\n",
        "modbus:\n  stop_bits: 3\n",
        "modbus:\n  baud: 0\n",
        "modbus:\n  mode: tcp\n  tcp_addr: ''\n",
        "modbus:\n  timeout_ms: 0\n",
        "modbus:\n  interval_secs: 0\n",
    ];

    for yaml in bad {
        assert!(Config::from_yaml(yaml).is_err(), "{}", yaml);
    }
}
