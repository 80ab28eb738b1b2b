#![allow(dead_code)]

use smh_bridge::prelude::*;
use smh_bridge::modbus::RegisterTransport;
use smh_bridge::mqtt::{Message, Publisher};
use smh_bridge::telemetry::MetaAnnouncement;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn config() -> Config {
        Config::from_yaml(
            r#"
mqtt:
  url: tcp://localhost:1883
  namespace: smh
device:
  id: cw100.inverter
  model: CW100
  area: lab
modbus:
  mode: tcp
  tcp_addr: 127.0.0.1:502
"#,
        )
        .expect("factory config")
    }

    pub fn meta(device_id: &str, caps: &[&str]) -> MetaAnnouncement {
        MetaAnnouncement {
            device_id: device_id.to_string(),
            model: Some("CW100".to_string()),
            area: Some("lab".to_string()),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Transport holding the raw values the default register map points at.
    pub fn inverter(hz: i16, volts: i16, watts: i16, energy: i16) -> MockTransport {
        let map = RegisterMap::default();
        MockTransport::default()
            .with_value(map.frequency.bank, map.frequency.address, hz)
            .with_value(map.voltage.bank, map.voltage.address, volts)
            .with_value(map.power.bank, map.power.address, watts)
            .with_value(map.energy.bank, map.energy.address, energy)
    }
}

#[derive(Clone)]
enum Reply {
    Bytes(Vec<u8>),
    Timeout,
}

/// In-memory register banks. Reads of unknown registers fail with a transport
/// error, like an exception response from a real device.
#[derive(Clone, Default)]
pub struct MockTransport {
    registers: HashMap<(RegisterBank, u16), Reply>,
    pub reads: Arc<Mutex<Vec<(RegisterBank, u16, u16)>>>,
}

impl MockTransport {
    pub fn with_value(self, bank: RegisterBank, address: u16, value: i16) -> Self {
        self.with_bytes(bank, address, value.to_be_bytes().to_vec())
    }

    pub fn with_bytes(mut self, bank: RegisterBank, address: u16, bytes: Vec<u8>) -> Self {
        self.registers.insert((bank, address), Reply::Bytes(bytes));
        self
    }

    pub fn with_timeout(mut self, bank: RegisterBank, address: u16) -> Self {
        self.registers.insert((bank, address), Reply::Timeout);
        self
    }

    pub fn reads(&self) -> Vec<(RegisterBank, u16, u16)> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn read_registers(
        &mut self,
        bank: RegisterBank,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, ReadError> {
        self.reads.lock().unwrap().push((bank, address, count));

        match self.registers.get(&(bank, address)) {
            Some(Reply::Bytes(bytes)) => Ok(bytes.clone()),
            Some(Reply::Timeout) => Err(ReadError::Timeout { timeout_ms: 500 }),
            None => Err(ReadError::Transport(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("illegal data address {:#06x}", address),
            ))),
        }
    }
}

/// Records every message; optionally rejects any message whose topic or
/// payload contains `fail_on`.
#[derive(Clone, Default)]
pub struct MockPublisher {
    pub messages: Arc<Mutex<Vec<Message>>>,
    fail_on: Option<String>,
}

impl MockPublisher {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            messages: Arc::default(),
            fail_on: Some(pattern.to_string()),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, message: Message) -> Result<()> {
        if let Some(pattern) = self.fail_on.as_deref() {
            if message.topic.contains(pattern) || message.payload.contains(pattern) {
                bail!("queue full");
            }
        }

        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
